use super::interval::{IntervalEstimate, IntervalEstimator};
use super::sample::Sample;
use crate::pip::proto::identifiers::TagId;
use std::collections::{BTreeMap, VecDeque};

/// A battery reading at or below this is treated as not reported.
const BATTERY_UNSET_MV: f32 = 0.0001;

pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Everything known about one tag.
#[derive(Debug, Clone)]
pub struct TagState {
    pub latest: Sample,
    pub interval: IntervalEstimate,
    /// Most recent first.
    pub history: VecDeque<Sample>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateResult {
    pub is_new_tag: bool,
    /// Stored sample the update replaced.
    pub previous: Option<Sample>,
    /// Row of the tag in id order after the update.
    pub row: usize,
}

/// Latest sample, period estimate and bounded history per tag, in tag id order.
pub struct SampleStore {
    tags: BTreeMap<TagId, TagState>,
    estimator: IntervalEstimator,
    history_capacity: usize,
}

impl Default for SampleStore {
    fn default() -> Self {
        SampleStore::new(DEFAULT_HISTORY_CAPACITY, IntervalEstimator::default())
    }
}

impl SampleStore {
    pub fn new(history_capacity: usize, estimator: IntervalEstimator) -> SampleStore {
        SampleStore {
            tags: BTreeMap::new(),
            estimator,
            history_capacity: history_capacity.max(1),
        }
    }

    /// Stores `sample` as the tag's latest, refreshing the period estimate and
    /// pushing the stored sample onto the front of the tag's history.
    ///
    /// Battery fields are sticky: a sample without a battery reading keeps
    /// the last one the tag reported.
    pub fn update(&mut self, sample: Sample) -> UpdateResult {
        let tag_id = sample.tag_id;
        let mut merged = sample;
        let (is_new_tag, previous) = match self.tags.get_mut(&tag_id) {
            Some(state) => {
                let previous = state.latest.clone();
                merge_battery(&mut merged, Some(&previous));
                self.estimator.update(
                    &mut state.interval,
                    merged.receive_millis(),
                    previous.receive_millis(),
                );
                state.latest = merged.clone();
                state.history.push_front(merged);
                state.history.truncate(self.history_capacity);
                (false, Some(previous))
            }
            None => {
                merge_battery(&mut merged, None);
                let mut history = VecDeque::with_capacity(self.history_capacity);
                history.push_front(merged.clone());
                self.tags.insert(
                    tag_id,
                    TagState {
                        latest: merged,
                        interval: self.estimator.seed(),
                        history,
                    },
                );
                (true, None)
            }
        };
        UpdateResult {
            is_new_tag,
            previous,
            row: self.tags.range(..tag_id).count(),
        }
    }

    /// Forgets a tag. Returns the row it occupied.
    pub fn delete(&mut self, tag_id: TagId) -> Option<usize> {
        let row = self.row_of(tag_id)?;
        self.tags.remove(&tag_id);
        Some(row)
    }

    pub fn get(&self, tag_id: TagId) -> Option<&TagState> {
        self.tags.get(&tag_id)
    }

    pub fn history(&self, tag_id: TagId) -> Option<&VecDeque<Sample>> {
        self.tags.get(&tag_id).map(|s| &s.history)
    }

    pub fn row_of(&self, tag_id: TagId) -> Option<usize> {
        if !self.tags.contains_key(&tag_id) {
            return None;
        }
        Some(self.tags.range(..tag_id).count())
    }

    pub fn tag_at(&self, row: usize) -> Option<TagId> {
        self.tags.keys().nth(row).copied()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// States in tag id order.
    pub fn iter(&self) -> impl Iterator<Item = (&TagId, &TagState)> {
        self.tags.iter()
    }
}

fn merge_battery(incoming: &mut Sample, stored: Option<&Sample>) {
    if incoming.battery_mv > 0.0 {
        return;
    }
    match stored {
        Some(prev) if prev.battery_mv >= BATTERY_UNSET_MV => {
            incoming.battery_mv = prev.battery_mv;
            incoming.battery_joules = prev.battery_joules;
        }
        _ => incoming.clear_battery(),
    }
}

//! Reporting period estimate
//!
//! Tags report on a fixed schedule, but packets get lost, so the gap between
//! consecutive receptions is a noisy multiple of the real period. The estimate
//! is an exponential filter whose gain shrinks as confidence in the current
//! value grows. Confidence rises when an observation lands within 5% of the
//! estimate and decays multiplicatively otherwise.

/// Default reporting period of a tag, until observations say otherwise.
pub const DEFAULT_INTERVAL_MS: i64 = 15000;

/// Relative deviation beyond which an observation counts as a miss.
const TOLERANCE: f32 = 0.05;
const MISS_DECAY: f32 = 0.95;
const HIT_WEIGHT: f32 = 0.65;
const HIT_GAIN: f32 = 0.35;
const SNAP_ABOVE: f32 = 0.99;
const DAMPING: f32 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntervalEstimate {
    pub interval_ms: i64,
    /// Between 0 and 1.
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct IntervalEstimator {
    default_interval_ms: i64,
}

impl Default for IntervalEstimator {
    fn default() -> Self {
        IntervalEstimator::new(DEFAULT_INTERVAL_MS)
    }
}

impl IntervalEstimator {
    pub fn new(default_interval_ms: i64) -> IntervalEstimator {
        IntervalEstimator {
            default_interval_ms,
        }
    }

    /// Estimate for a tag seen for the first time.
    pub fn seed(&self) -> IntervalEstimate {
        IntervalEstimate {
            interval_ms: self.default_interval_ms,
            confidence: 0.0,
        }
    }

    /// Folds the gap between two consecutive receptions into `est`.
    pub fn update(&self, est: &mut IntervalEstimate, new_time_ms: i64, prev_time_ms: i64) {
        let observed = new_time_ms - prev_time_ms;
        let ratio = if est.interval_ms == 0 {
            if observed == 0 {
                0.0
            } else {
                f32::INFINITY
            }
        } else {
            (est.interval_ms - observed) as f32 / est.interval_ms as f32
        };

        if ratio.abs() > TOLERANCE {
            est.confidence *= MISS_DECAY;
        } else {
            est.confidence = est.confidence * HIT_WEIGHT + HIT_GAIN;
            if est.confidence > SNAP_ABOVE {
                est.confidence = 1.0;
            }
        }

        let gain = 1.0 - est.confidence * DAMPING;
        est.interval_ms =
            (est.interval_ms as f32 + (observed - est.interval_ms) as f32 * gain) as i64;
    }
}

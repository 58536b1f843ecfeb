//! Dashboard state machine
//!
//! The dashboard owns the sample store, the recorder and everything that is
//! shown on screen. It is driven by three kinds of events, all delivered from
//! a single loop: decoded samples, key presses and periodic ticks. Every event
//! handler repaints the smallest region it invalidated and flushes.
//!
//! Screen layout: the column header on row 0, one table row per screen row from
//! row 1 to `rows - 2`, and the status line on the last row.

use super::render::{self, IdFormat, Renderer, Span, Style, Tone};
use super::saver::Saver;
use super::scroll::ScrollWindow;
use crate::data::{Recorder, Sample, SampleStore, TagState};
use crate::pip::proto::identifiers::TagId;
use chrono::Local;
use std::collections::VecDeque;
use std::io;
use std::time::{Duration, Instant};

pub const STATUS_INFO_KEYS: &str = "Use arrow keys to scroll. Toggle recording with R.";
pub const STATUS_SHUTDOWN: &str = "Shutting down. Use CTRL+C to force exit.";
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(3600);

/// First screen row of the table.
const MIN_ROW: usize = 1;

/// Input as seen by the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Up,
    Down,
    PageUp,
    PageDown,
    Home,
    End,
    Enter,
    Esc,
    Backspace,
    Delete,
    Char(char),
    /// Ctrl-C or a termination signal.
    Interrupt,
}

/// What the event loop should do after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Shut down cleanly.
    Quit,
    /// A shutdown was already pending, exit now.
    ForceQuit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewMode {
    Main,
    History(TagId),
    ScreenSaver,
}

struct HistoryView {
    tag: TagId,
    /// Copy of the tag's history, newest first.
    rows: Vec<Sample>,
    highlighted: usize,
    scroll: ScrollWindow,
}

impl HistoryView {
    fn new(tag: TagId, history: &VecDeque<Sample>) -> HistoryView {
        HistoryView {
            tag,
            rows: history.iter().cloned().collect(),
            highlighted: 0,
            scroll: ScrollWindow::new(),
        }
    }

    /// Takes a fresh copy after a new sample arrived. The new sample lands on
    /// top, so a highlight below the top moves down with its row.
    fn refresh(&mut self, history: &VecDeque<Sample>) {
        self.rows = history.iter().cloned().collect();
        if self.highlighted > 0 {
            self.highlighted = (self.highlighted + 1).min(self.rows.len().saturating_sub(1));
        }
    }

    fn more_below(&self) -> bool {
        !self.rows.is_empty() && self.scroll.last() < self.rows.len() - 1
    }
}

enum View {
    Main,
    History(HistoryView),
    ScreenSaver {
        saver: Saver,
        returning_to: Box<View>,
    },
}

fn history_view_mut(view: &mut View) -> Option<&mut HistoryView> {
    match view {
        View::History(hv) => Some(hv),
        View::ScreenSaver { returning_to, .. } => history_view_mut(returning_to),
        View::Main => None,
    }
}

/// What is shown, apart from the tag data itself.
#[derive(Debug, Clone)]
pub struct DisplayState {
    /// Revalidated against the store on every use.
    pub highlighted: Option<TagId>,
    pub scroll: ScrollWindow,
    pub id_format: IdFormat,
    pub status: String,
    pub decode_errors: u64,
    pub shutdown_pending: bool,
}

/// Row to highlight after a key press, for a list of `len` rows.
fn navigate(current: Option<usize>, len: usize, key: Key, page: usize) -> Option<usize> {
    let last = len.checked_sub(1)?;
    let cur = current.map(|c| c.min(last));
    Some(match (key, cur) {
        (Key::Home, _) => 0,
        (Key::End, _) => last,
        (_, None) => 0,
        (Key::Up, Some(c)) => c.saturating_sub(1),
        (Key::Down, Some(c)) => (c + 1).min(last),
        (Key::PageUp, Some(c)) => c.saturating_sub(page),
        (Key::PageDown, Some(c)) => (c + page).min(last),
        (_, Some(c)) => c,
    })
}

pub struct Dashboard<R: Renderer> {
    renderer: R,
    store: SampleStore,
    recorder: Recorder,
    state: DisplayState,
    view: View,
    idle_timeout: Duration,
    last_key: Instant,
}

impl<R: Renderer> Dashboard<R> {
    pub fn new(renderer: R, store: SampleStore, recorder: Recorder, now: Instant) -> Self {
        Dashboard {
            renderer,
            store,
            recorder,
            state: DisplayState {
                highlighted: None,
                scroll: ScrollWindow::new(),
                id_format: IdFormat::default(),
                status: STATUS_INFO_KEYS.to_string(),
                decode_errors: 0,
                shutdown_pending: false,
            },
            view: View::Main,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            last_key: now,
        }
    }

    /// A zero timeout disables the screen saver.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_id_format(mut self, id_format: IdFormat) -> Self {
        self.state.id_format = id_format;
        self
    }

    pub fn store(&self) -> &SampleStore {
        &self.store
    }

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    pub fn state(&self) -> &DisplayState {
        &self.state
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }

    pub fn mode(&self) -> ViewMode {
        match &self.view {
            View::Main => ViewMode::Main,
            View::History(hv) => ViewMode::History(hv.tag),
            View::ScreenSaver { .. } => ViewMode::ScreenSaver,
        }
    }

    fn saver_active(&self) -> bool {
        matches!(self.view, View::ScreenSaver { .. })
    }

    fn max_row(&self) -> usize {
        self.renderer.size().1.saturating_sub(2).max(MIN_ROW)
    }

    /// Rows moved by PageUp and PageDown, `last - first` of the window.
    fn page(&self) -> usize {
        (self.max_row() - MIN_ROW).max(1)
    }

    fn highlighted_row(&self) -> Option<usize> {
        self.state.highlighted.and_then(|t| self.store.row_of(t))
    }

    /// Repaints the whole screen.
    pub fn redraw(&mut self) -> io::Result<()> {
        match self.mode() {
            ViewMode::Main => self.draw_main()?,
            ViewMode::History(_) => self.draw_history()?,
            ViewMode::ScreenSaver => {
                let rows = self.renderer.size().1;
                self.renderer.clear_region(0, rows.saturating_sub(1))?;
            }
        }
        self.renderer.flush()
    }

    /// Replaces the status message.
    pub fn set_status(&mut self, msg: impl Into<String>) -> io::Result<()> {
        self.state.status = msg.into();
        if self.saver_active() {
            return Ok(());
        }
        self.draw_status()?;
        self.renderer.flush()
    }

    /// Counts a packet that failed to decode.
    pub fn decode_failed(&mut self) -> io::Result<()> {
        self.state.decode_errors += 1;
        if self.saver_active() {
            return Ok(());
        }
        self.draw_status()?;
        self.renderer.flush()
    }

    /// Stores a decoded sample, records it if needed and repaints what changed.
    pub fn ingest(&mut self, sample: Sample) -> io::Result<()> {
        let tag = sample.tag_id;
        let mut status_dirty = false;
        if sample.dropped_count > 0 {
            self.state.status = format!("Dropped: {}", sample.dropped_count);
            status_dirty = true;
        }
        if let Err(e) = self.recorder.append(&sample) {
            log::warn!("recording sample from {}: {}", tag, e);
            self.state.status = e.to_string();
            status_dirty = true;
        }

        let result = self.store.update(sample);
        if let (Some(hv), Some(history)) = (history_view_mut(&mut self.view), self.store.history(tag)) {
            if hv.tag == tag {
                hv.refresh(history);
            }
        }

        match self.mode() {
            ViewMode::ScreenSaver => return Ok(()),
            ViewMode::Main => {
                let (len, max_row, hi) = (self.store.len(), self.max_row(), self.highlighted_row());
                let (_, _, changed) = self.state.scroll.recompute(len, MIN_ROW, max_row, hi);
                if result.is_new_tag || changed {
                    self.draw_main()?;
                } else {
                    self.draw_tag_row(tag)?;
                    if status_dirty {
                        self.draw_status()?;
                    }
                }
            }
            ViewMode::History(open) if open == tag => self.draw_history()?,
            ViewMode::History(_) => {
                if status_dirty {
                    self.draw_status()?;
                }
            }
        }
        self.renderer.flush()
    }

    /// Enters the screen saver once no key was pressed for the idle timeout,
    /// and animates it while active.
    pub fn tick(&mut self, now: Instant) -> io::Result<()> {
        if !self.saver_active() {
            let idle = now.saturating_duration_since(self.last_key);
            if self.idle_timeout.is_zero() || idle < self.idle_timeout {
                return Ok(());
            }
            log::debug!("idle for {:?}, starting screen saver", idle);
            self.enter_saver()?;
        }

        let banner = format!(
            " pipsqueak  {} tags  {} ",
            self.store.len(),
            Local::now().format("%H:%M:%S")
        );
        let (cols, rows) = self.renderer.size();
        let View::ScreenSaver { saver, .. } = &mut self.view else {
            return Ok(());
        };
        let (x, y) = saver.advance(banner.chars().count(), cols, rows);
        if let Some(prev) = saver.swap_drawn(y).filter(|prev| *prev != y) {
            self.renderer.clear_region(prev, prev)?;
        }
        let style = Style {
            tone: Tone::Good,
            bold: true,
            reverse: false,
        };
        self.renderer
            .draw_row(y, &[Span::plain(" ".repeat(x)), Span::styled(banner, style)])?;
        self.renderer.flush()
    }

    /// The terminal changed size. Also leaves the screen saver.
    pub fn resize(&mut self) -> io::Result<()> {
        if self.saver_active() {
            self.leave_saver();
        }
        self.state.scroll.invalidate();
        if let Some(hv) = history_view_mut(&mut self.view) {
            hv.scroll.invalidate();
        }
        self.redraw()
    }

    pub fn handle_key(&mut self, key: Key, now: Instant) -> io::Result<Flow> {
        self.last_key = now;
        if key == Key::Interrupt {
            return self.request_shutdown();
        }
        if self.saver_active() {
            self.leave_saver();
            self.redraw()?;
            return Ok(Flow::Continue);
        }
        if matches!(key, Key::Char('z') | Key::Char('Z')) {
            self.enter_saver()?;
            return Ok(Flow::Continue);
        }

        let flow = match self.mode() {
            ViewMode::Main => self.main_key(key)?,
            ViewMode::History(_) => self.history_key(key)?,
            ViewMode::ScreenSaver => Flow::Continue,
        };
        self.renderer.flush()?;
        Ok(flow)
    }

    /// First call asks for a clean shutdown, a second one forces it.
    pub fn request_shutdown(&mut self) -> io::Result<Flow> {
        if self.state.shutdown_pending {
            return Ok(Flow::ForceQuit);
        }
        self.state.shutdown_pending = true;
        self.set_status(STATUS_SHUTDOWN)?;
        Ok(Flow::Quit)
    }

    fn main_key(&mut self, key: Key) -> io::Result<Flow> {
        match key {
            Key::Up | Key::Down | Key::PageUp | Key::PageDown | Key::Home | Key::End => {
                self.move_highlight(key)?
            }
            Key::Enter => self.open_history()?,
            Key::Esc => return self.request_shutdown(),
            Key::Backspace | Key::Delete => self.delete_highlighted()?,
            Key::Char(c) => match c.to_ascii_lowercase() {
                'r' => self.toggle_recording()?,
                'x' => {
                    self.state.id_format = self.state.id_format.toggled();
                    self.draw_main()?;
                }
                _ => {}
            },
            Key::Interrupt => return self.request_shutdown(),
        }
        Ok(Flow::Continue)
    }

    fn history_key(&mut self, key: Key) -> io::Result<Flow> {
        match key {
            Key::Esc => {
                self.view = View::Main;
                self.state.status = STATUS_INFO_KEYS.to_string();
                self.draw_main()?;
            }
            Key::Up | Key::Down | Key::PageUp | Key::PageDown | Key::Home | Key::End => {
                let page = self.page();
                if let View::History(hv) = &mut self.view {
                    if let Some(row) = navigate(Some(hv.highlighted), hv.rows.len(), key, page) {
                        hv.highlighted = row;
                    }
                }
                self.draw_history()?;
            }
            Key::Char(c) => match c.to_ascii_lowercase() {
                's' => self.save_snapshot()?,
                'x' => {
                    self.state.id_format = self.state.id_format.toggled();
                    self.draw_history()?;
                }
                _ => {}
            },
            Key::Interrupt => return self.request_shutdown(),
            _ => {}
        }
        Ok(Flow::Continue)
    }

    fn move_highlight(&mut self, key: Key) -> io::Result<()> {
        let old = self.state.highlighted;
        let len = self.store.len();
        let Some(row) = navigate(self.highlighted_row(), len, key, self.page()) else {
            return Ok(());
        };
        let new = self.store.tag_at(row);
        if new == old {
            return Ok(());
        }
        self.state.highlighted = new;
        let max_row = self.max_row();
        let (_, _, changed) = self.state.scroll.recompute(len, MIN_ROW, max_row, Some(row));
        if changed {
            return self.draw_main();
        }
        for tag in [old, new].into_iter().flatten() {
            self.draw_tag_row(tag)?;
        }
        Ok(())
    }

    fn delete_highlighted(&mut self) -> io::Result<()> {
        let Some(tag) = self.state.highlighted else {
            return Ok(());
        };
        let Some(row) = self.store.delete(tag) else {
            self.state.highlighted = None;
            return Ok(());
        };
        if self.recorder.is_recording(tag) {
            if let Err(e) = self.recorder.toggle(tag, Local::now()) {
                log::warn!("stopping recording of {}: {}", tag, e);
            }
        }
        self.state.highlighted = self
            .store
            .tag_at(row)
            .or_else(|| row.checked_sub(1).and_then(|r| self.store.tag_at(r)));
        self.state.status = format!("Deleted {}.", self.state.id_format.format(tag));
        log::info!("deleted tag {}", tag);
        self.draw_main()
    }

    fn toggle_recording(&mut self) -> io::Result<()> {
        let Some(tag) = self.state.highlighted else {
            return Ok(());
        };
        self.state.status = match self.recorder.toggle(tag, Local::now()) {
            Ok(toggle) => toggle.to_string(),
            Err(e) => {
                log::warn!("{:?}", e);
                e.to_string()
            }
        };
        self.draw_tag_row(tag)?;
        self.draw_status()
    }

    fn open_history(&mut self) -> io::Result<()> {
        let Some(tag) = self.state.highlighted else {
            return Ok(());
        };
        let Some(history) = self.store.history(tag) else {
            return Ok(());
        };
        let hv = HistoryView::new(tag, history);
        self.state.status = format!(
            "History of {}: {} samples. S saves a snapshot, Esc returns.",
            self.state.id_format.format(tag),
            hv.rows.len()
        );
        self.view = View::History(hv);
        self.draw_history()
    }

    fn save_snapshot(&mut self) -> io::Result<()> {
        let View::History(hv) = &self.view else {
            return Ok(());
        };
        let status = match self.recorder.snapshot(hv.tag, &hv.rows, Local::now()) {
            Ok(path) => format!("Saved {}.", path.display()),
            Err(e) => {
                log::warn!("{:?}", e);
                e.to_string()
            }
        };
        self.state.status = status;
        self.draw_status()
    }

    fn enter_saver(&mut self) -> io::Result<()> {
        if self.saver_active() {
            return Ok(());
        }
        let previous = std::mem::replace(&mut self.view, View::Main);
        self.view = View::ScreenSaver {
            saver: Saver::new(),
            returning_to: Box::new(previous),
        };
        let rows = self.renderer.size().1;
        self.renderer.clear_region(0, rows.saturating_sub(1))?;
        self.renderer.flush()
    }

    fn leave_saver(&mut self) {
        let view = std::mem::replace(&mut self.view, View::Main);
        self.view = match view {
            View::ScreenSaver { returning_to, .. } => *returning_to,
            other => other,
        };
    }

    fn tag_spans(&self, tag: TagId, state: &TagState) -> Vec<Span> {
        render::format_tag_row(
            &state.latest,
            &state.interval,
            self.recorder.is_recording(tag),
            self.state.highlighted == Some(tag),
            self.state.id_format,
        )
    }

    /// Header, visible table rows and status line.
    fn draw_main(&mut self) -> io::Result<()> {
        let max_row = self.max_row();
        let len = self.store.len();
        let hi = self.highlighted_row();
        self.state.scroll.recompute(len, MIN_ROW, max_row, hi);
        let (first, last) = (self.state.scroll.first(), self.state.scroll.last());

        self.renderer.draw_row(0, &render::format_header(first > 0))?;
        let mut y = MIN_ROW;
        for (tag, state) in self.store.iter().skip(first).take(last - first + 1) {
            let spans = self.tag_spans(*tag, state);
            self.renderer.draw_row(y, &spans)?;
            y += 1;
        }
        if y <= max_row {
            self.renderer.clear_region(y, max_row)?;
        }
        self.draw_status()
    }

    fn draw_tag_row(&mut self, tag: TagId) -> io::Result<()> {
        let (Some(row), Some(state)) = (self.store.row_of(tag), self.store.get(tag)) else {
            return Ok(());
        };
        match self.state.scroll.screen_row(row, MIN_ROW) {
            Some(y) if y <= self.max_row() => {
                let spans = self.tag_spans(tag, state);
                self.renderer.draw_row(y, &spans)
            }
            _ => Ok(()),
        }
    }

    fn draw_history(&mut self) -> io::Result<()> {
        let max_row = self.max_row();
        let id_format = self.state.id_format;
        let View::History(hv) = &mut self.view else {
            return Ok(());
        };
        let hi = (!hv.rows.is_empty()).then_some(hv.highlighted);
        let (first, last, _) = hv.scroll.recompute(hv.rows.len(), MIN_ROW, max_row, hi);

        self.renderer.draw_row(0, &render::format_header(first > 0))?;
        for row in first..=last {
            let y = MIN_ROW + row - first;
            if y > max_row {
                break;
            }
            match hv.rows.get(row) {
                Some(s) => {
                    let gap = hv
                        .rows
                        .get(row + 1)
                        .map(|older| (s.receive_time - older.receive_time).num_milliseconds());
                    let spans = render::format_history_row(s, gap, row == hv.highlighted, id_format);
                    self.renderer.draw_row(y, &spans)?;
                }
                None => self.renderer.clear_region(y, y)?,
            }
        }
        self.draw_status()
    }

    fn status_text(&self) -> String {
        match self.state.decode_errors {
            0 => self.state.status.clone(),
            n => format!("{}  ({} bad packets)", self.state.status, n),
        }
    }

    fn draw_status(&mut self) -> io::Result<()> {
        let (cols, rows) = self.renderer.size();
        if rows == 0 {
            return Ok(());
        }
        let more_below = match &self.view {
            View::Main => {
                let len = self.store.len();
                len > 0 && self.state.scroll.last() < len - 1
            }
            View::History(hv) => hv.more_below(),
            View::ScreenSaver { .. } => return Ok(()),
        };
        let spans = render::format_status(&self.status_text(), more_below, cols);
        self.renderer.draw_row(rows - 1, &spans)
    }
}

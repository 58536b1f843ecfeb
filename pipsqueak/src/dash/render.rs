//! Drawing primitives and row formatting
//!
//! The dashboard never talks to a terminal library directly. It formats rows
//! into styled `Span`s and hands them to a `Renderer`.

use crate::data::{IntervalEstimate, Sample, RECORD_TIME_FORMAT};
use crate::pip::proto::identifiers::TagId;
use chrono::Local;
use std::io;

pub const HEADER: &str =
    "  Tag    RSSI  Temp (C) Rel. Hum. Lt  Batt   Joul  Date                 Period";

/// Semantic colour of a span. Terminals map these to actual colours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tone {
    #[default]
    Plain,
    Bad,
    Fair,
    Good,
    Bright,
    /// Scroll indicators.
    Marker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Style {
    pub tone: Tone,
    pub bold: bool,
    pub reverse: bool,
}

impl Style {
    pub fn tone(tone: Tone) -> Style {
        Style {
            tone,
            ..Default::default()
        }
    }

    pub fn bold() -> Style {
        Style {
            bold: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Span {
    pub text: String,
    pub style: Style,
}

impl Span {
    pub fn plain(text: impl Into<String>) -> Span {
        Span {
            text: text.into(),
            style: Style::default(),
        }
    }

    pub fn styled(text: impl Into<String>, style: Style) -> Span {
        Span {
            text: text.into(),
            style,
        }
    }
}

/// Concatenated text of a row, without styles.
pub fn row_text(spans: &[Span]) -> String {
    spans.iter().map(|s| s.text.as_str()).collect()
}

/// Terminal capabilities the dashboard needs.
pub trait Renderer {
    /// `(columns, rows)`
    fn size(&self) -> (usize, usize);

    /// Replaces screen row `y` with `spans`, clipped to the width.
    fn draw_row(&mut self, y: usize, spans: &[Span]) -> io::Result<()>;

    /// Blanks rows `top..=bottom`.
    fn clear_region(&mut self, top: usize, bottom: usize) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdFormat {
    #[default]
    Decimal,
    Hex,
}

impl IdFormat {
    pub fn toggled(self) -> IdFormat {
        match self {
            IdFormat::Decimal => IdFormat::Hex,
            IdFormat::Hex => IdFormat::Decimal,
        }
    }

    pub fn format(self, id: TagId) -> String {
        match self {
            IdFormat::Decimal => format!("{:04}", id),
            IdFormat::Hex => format!("{:06x}", id),
        }
    }
}

impl std::str::FromStr for IdFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<IdFormat, String> {
        match s {
            "decimal" | "dec" => Ok(IdFormat::Decimal),
            "hex" => Ok(IdFormat::Hex),
            _ => Err(format!("unknown id format '{}'", s)),
        }
    }
}

/// Keeps the last `width` characters of `msg`.
pub fn truncate_front(msg: &str, width: usize) -> &str {
    let len = msg.chars().count();
    if len <= width {
        return msg;
    }
    match msg.char_indices().nth(len - width) {
        Some((i, _)) => &msg[i..],
        None => "",
    }
}

pub fn rssi_tone(rssi: f32) -> Tone {
    if rssi < -90.0 {
        Tone::Bad
    } else if rssi > -60.0 {
        Tone::Good
    } else {
        Tone::Fair
    }
}

pub fn light_tone(light: u8) -> Tone {
    if light > 0xB0 {
        Tone::Bright
    } else {
        Tone::Plain
    }
}

pub fn battery_tone(mv: f32) -> Tone {
    if mv > 2.9 {
        Tone::Good
    } else {
        Tone::Bad
    }
}

pub fn confidence_tone(confidence: f32) -> Tone {
    if confidence > 0.95 {
        Tone::Good
    } else if confidence > 0.5 {
        Tone::Fair
    } else {
        Tone::Bad
    }
}

/// Builds a row from `(text, tone)` pieces, applying the highlight to all of them.
fn assemble(marker: &str, pieces: Vec<(String, Tone)>, highlighted: bool) -> Vec<Span> {
    let mut spans = vec![Span::plain(marker)];
    spans.extend(pieces.into_iter().map(|(text, tone)| {
        Span::styled(
            text,
            Style {
                tone,
                bold: highlighted,
                reverse: highlighted,
            },
        )
    }));
    spans
}

fn sample_pieces(s: &Sample, ids: IdFormat) -> Vec<(String, Tone)> {
    let mut p = vec![
        (format!("{:<8}", ids.format(s.tag_id)), Tone::Plain),
        (format!("{:5.1}", s.rssi), rssi_tone(s.rssi)),
    ];
    p.push(match s.temperature() {
        Some(t) => (format!("  {:6.2} C", t), Tone::Plain),
        None => ("  ------  ".to_string(), Tone::Plain),
    });
    p.push(match s.humidity() {
        Some(rh) => (format!("  {:6.2} %  ", rh), Tone::Plain),
        None => ("  ------    ".to_string(), Tone::Plain),
    });
    p.push(match s.light() {
        Some(l) => (format!("{:02x}", l), light_tone(l)),
        None => ("--".to_string(), Tone::Plain),
    });
    p.push(("  ".to_string(), Tone::Plain));
    match s.battery().filter(|mv| *mv > 0.0) {
        Some(mv) => {
            let tone = battery_tone(mv);
            p.push((format!("{:5.3}", mv), tone));
            p.push(("  ".to_string(), Tone::Plain));
            p.push((format!("{:4}", s.battery_joules), tone));
        }
        None => p.push(("-----  ----".to_string(), Tone::Plain)),
    }
    p.push((
        format!(
            "  {}  ",
            s.receive_time.with_timezone(&Local).format(RECORD_TIME_FORMAT)
        ),
        Tone::Plain,
    ));
    p
}

/// One row of the main table.
pub fn format_tag_row(
    s: &Sample,
    interval: &IntervalEstimate,
    recording: bool,
    highlighted: bool,
    ids: IdFormat,
) -> Vec<Span> {
    let mut p = sample_pieces(s, ids);
    p.push((
        format!("{:6}", interval.interval_ms),
        confidence_tone(interval.confidence),
    ));
    assemble(if recording { "R " } else { "  " }, p, highlighted)
}

/// One row of the history panel. `gap_ms` is the time since the previous
/// (older) entry and fills the period column.
pub fn format_history_row(
    s: &Sample,
    gap_ms: Option<i64>,
    highlighted: bool,
    ids: IdFormat,
) -> Vec<Span> {
    let mut p = sample_pieces(s, ids);
    p.push(match gap_ms {
        Some(gap) => (format!("{:6}", gap), Tone::Plain),
        None => ("------".to_string(), Tone::Plain),
    });
    assemble("  ", p, highlighted)
}

/// Column header with the upward scroll indicator in column 0.
pub fn format_header(more_above: bool) -> Vec<Span> {
    vec![
        scroll_marker('^', more_above),
        Span::styled(HEADER, Style::bold()),
    ]
}

/// Status line with the downward scroll indicator in column 0. The message
/// starts at column 2 and is cut from the front to fit `width`.
pub fn format_status(msg: &str, more_below: bool, width: usize) -> Vec<Span> {
    vec![
        scroll_marker('v', more_below),
        Span::plain(" "),
        Span::plain(truncate_front(msg, width.saturating_sub(2))),
    ]
}

fn scroll_marker(c: char, on: bool) -> Span {
    if on {
        Span::styled(
            c.to_string(),
            Style {
                tone: Tone::Marker,
                bold: true,
                reverse: false,
            },
        )
    } else {
        Span::plain(" ")
    }
}

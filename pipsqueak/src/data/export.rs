//! CSV recording and history snapshots
//!
//! One recording file is shared by every tag being recorded. It is opened when
//! the first tag is added and closed when the last one is removed. Snapshots
//! are independent one-shot files holding a tag's history.

use super::sample::Sample;
use crate::pip::proto::identifiers::TagId;
use chrono::{DateTime, Local};
use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const RECORD_FILE_FORMAT: &str = "%Y%m%d_%H%M%S.csv";
pub const RECORD_TIME_FORMAT: &str = "%m/%d/%Y %H:%M:%S";

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("Unable to open record file!")]
    Open { path: PathBuf, source: io::Error },

    #[error("Error writing to record file!")]
    Write(#[source] io::Error),

    #[error("Unable to write {}", path.display())]
    Snapshot { path: PathBuf, source: io::Error },
}

/// Which optional columns the CSV files carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsvLayout {
    pub hex_id: bool,
    pub moisture: bool,
}

impl Default for CsvLayout {
    fn default() -> Self {
        CsvLayout {
            hex_id: true,
            moisture: true,
        }
    }
}

impl CsvLayout {
    pub fn header(&self) -> String {
        let mut cols = vec!["Timestamp", "Date", "Tag ID"];
        if self.hex_id {
            cols.push("Tag ID (Hex)");
        }
        cols.extend(["RSSI", "Temp (C)", "Relative Humidity (%)", "Light (%)"]);
        if self.moisture {
            cols.push("Moisture");
        }
        cols.extend(["Battery (mV)", "Battery (J)"]);
        cols.join(",")
    }

    /// One data row. Absent fields are empty cells.
    pub fn row(&self, s: &Sample) -> String {
        let t = s.receive_time;
        let mut values = vec![
            format!("{}{:03}", t.timestamp(), t.timestamp_subsec_millis()),
            t.with_timezone(&Local).format(RECORD_TIME_FORMAT).to_string(),
            s.tag_id.to_string(),
        ];
        if self.hex_id {
            values.push(format!("{:06x}", s.tag_id));
        }
        values.push(format!("{:.1}", s.rssi));
        values.push(opt(s.temperature(), |v| format!("{:.4}", v)));
        values.push(opt(s.humidity(), |v| format!("{:.4}", v)));
        values.push(opt(s.light(), |v| format!("{:.3}", v as f32 / 255.0)));
        if self.moisture {
            values.push(opt(s.moisture(), |v| v.to_string()));
        }
        values.push(opt(s.battery(), |v| format!("{:.3}", v)));
        values.push(opt(s.joules(), |v| v.to_string()));
        values.join(",")
    }
}

fn opt<T>(value: Option<T>, fmt: impl Fn(T) -> String) -> String {
    value.map(fmt).unwrap_or_default()
}

/// Outcome of toggling a tag's recording state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Toggle {
    /// `opened` is the file created for this session, if this was the first tag.
    Started { tag: TagId, opened: Option<PathBuf> },
    /// `closed` is set when this was the last tag and the file was closed.
    Stopped { tag: TagId, closed: bool },
}

impl std::fmt::Display for Toggle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Toggle::Started {
                opened: Some(path), ..
            } => write!(
                f,
                "Recording to \"{}\".",
                path.file_name().unwrap_or_default().to_string_lossy()
            ),
            Toggle::Started { tag, .. } => write!(f, "Started recording {}", tag),
            Toggle::Stopped { closed: true, .. } => write!(f, "Stopped recording."),
            Toggle::Stopped { tag, .. } => write!(f, "Stopped recording {}", tag),
        }
    }
}

struct RecordFile {
    path: PathBuf,
    writer: BufWriter<File>,
}

pub struct Recorder {
    dir: PathBuf,
    layout: CsvLayout,
    recording: BTreeSet<TagId>,
    file: Option<RecordFile>,
}

impl Recorder {
    pub fn new(dir: impl Into<PathBuf>, layout: CsvLayout) -> Recorder {
        Recorder {
            dir: dir.into(),
            layout,
            recording: BTreeSet::new(),
            file: None,
        }
    }

    pub fn is_recording(&self, tag_id: TagId) -> bool {
        self.recording.contains(&tag_id)
    }

    /// File of the current session.
    pub fn path(&self) -> Option<&Path> {
        self.file.as_ref().map(|f| f.path.as_path())
    }

    /// Adds or removes a tag from the recording set. The first tag added opens
    /// a new file named after `now`. If that fails the set is left unchanged.
    pub fn toggle(&mut self, tag_id: TagId, now: DateTime<Local>) -> Result<Toggle, RecordError> {
        if self.recording.remove(&tag_id) {
            let closed = self.recording.is_empty();
            if closed {
                self.close();
            }
            return Ok(Toggle::Stopped {
                tag: tag_id,
                closed,
            });
        }

        let mut opened = None;
        if self.file.is_none() {
            let name = now.format(RECORD_FILE_FORMAT).to_string();
            let (path, file) =
                create_unique(&self.dir, &name).map_err(|source| RecordError::Open {
                    path: self.dir.join(&name),
                    source,
                })?;
            let mut writer = BufWriter::new(file);
            writeln!(writer, "{}", self.layout.header())
                .and_then(|_| writer.flush())
                .map_err(|source| RecordError::Open {
                    path: path.clone(),
                    source,
                })?;
            log::info!("recording to {}", path.display());
            opened = Some(path.clone());
            self.file = Some(RecordFile { path, writer });
        }
        self.recording.insert(tag_id);
        Ok(Toggle::Started {
            tag: tag_id,
            opened,
        })
    }

    /// Writes `sample` if its tag is being recorded. Returns whether a row was written.
    pub fn append(&mut self, sample: &Sample) -> Result<bool, RecordError> {
        if !self.recording.contains(&sample.tag_id) {
            return Ok(false);
        }
        let Some(file) = self.file.as_mut() else {
            return Ok(false);
        };
        writeln!(file.writer, "{}", self.layout.row(sample))
            .and_then(|_| file.writer.flush())
            .map_err(RecordError::Write)?;
        Ok(true)
    }

    /// Writes `samples` to `snap-<tag>-<time>.csv`, independently of recording.
    pub fn snapshot<'a>(
        &self,
        tag_id: TagId,
        samples: impl IntoIterator<Item = &'a Sample>,
        now: DateTime<Local>,
    ) -> Result<PathBuf, RecordError> {
        let name = format!("snap-{:04}-{}.csv", tag_id, now.format("%Y%m%d_%H%M%S"));
        let (path, file) = create_unique(&self.dir, &name).map_err(|source| RecordError::Snapshot {
            path: self.dir.join(&name),
            source,
        })?;
        let write = |file: File| -> io::Result<()> {
            let mut writer = BufWriter::new(file);
            writeln!(writer, "{}", self.layout.header())?;
            for s in samples {
                writeln!(writer, "{}", self.layout.row(s))?;
            }
            writer.flush()
        };
        write(file).map_err(|source| RecordError::Snapshot {
            path: path.clone(),
            source,
        })?;
        log::info!("saved history of {} to {}", tag_id, path.display());
        Ok(path)
    }

    fn close(&mut self) {
        if let Some(mut file) = self.file.take() {
            if let Err(e) = file.writer.flush() {
                log::warn!("flushing {}: {}", file.path.display(), e);
            }
            log::info!("closed {}", file.path.display());
        }
    }
}

/// Creates `dir/name`, or `dir/<stem>-N.<ext>` with the first free `N` when
/// a file from the same second already exists.
fn create_unique(dir: &Path, name: &str) -> io::Result<(PathBuf, File)> {
    let base = Path::new(name);
    let stem = base.file_stem().and_then(|s| s.to_str()).unwrap_or(name);
    let ext = base.extension().and_then(|s| s.to_str());
    for n in 0u32..=u32::MAX {
        let file_name = match (n, ext) {
            (0, _) => name.to_string(),
            (n, Some(ext)) => format!("{}-{}.{}", stem, n, ext),
            (n, None) => format!("{}-{}", stem, n),
        };
        let path = dir.join(file_name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
    Err(io::Error::new(io::ErrorKind::AlreadyExists, name.to_string()))
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.close();
    }
}

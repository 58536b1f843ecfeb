//! Capture files and replay
//!
//! A capture is a plain sequence of frames:
//! `[variant u8][offset_ms u64 LE][len u8][len bytes]`, where the offset is
//! measured from the start of the capture and the bytes are the decoder input
//! (extra length byte included). The replay port re-emits frames, optionally
//! paced by their recorded offsets, and reports `Disconnected` at end of file.

use super::{RawPacket, RawPort, RecvError};
use crate::pip::proto::Variant;
use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub variant: Variant,
    pub offset_ms: u64,
    pub data: Vec<u8>,
}

/// Reads the next frame, or `None` at a clean end of file.
pub fn read_frame<R: Read>(reader: &mut R) -> io::Result<Option<Frame>> {
    let mut tag = [0u8; 1];
    if reader.read(&mut tag)? == 0 {
        return Ok(None);
    }
    let variant = Variant::try_from(tag[0]).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unknown variant {} in capture", tag[0]),
        )
    })?;
    let mut offset = [0u8; 8];
    reader.read_exact(&mut offset)?;
    let mut len = [0u8; 1];
    reader.read_exact(&mut len)?;
    let mut data = vec![0u8; len[0] as usize];
    reader.read_exact(&mut data)?;
    Ok(Some(Frame {
        variant,
        offset_ms: u64::from_le_bytes(offset),
        data,
    }))
}

pub fn write_frame<W: Write>(writer: &mut W, frame: &Frame) -> io::Result<()> {
    let len = u8::try_from(frame.data.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "frame too long"))?;
    writer.write_all(&[frame.variant.into()])?;
    writer.write_all(&frame.offset_ms.to_le_bytes())?;
    writer.write_all(&[len])?;
    writer.write_all(&frame.data)
}

/// Writes live packets to a capture.
pub struct CaptureWriter<W: Write> {
    writer: W,
    start: DateTime<Utc>,
    frames: usize,
}

impl CaptureWriter<BufWriter<File>> {
    pub fn create(path: &Path) -> io::Result<Self> {
        Ok(CaptureWriter::new(BufWriter::new(File::create(path)?), Utc::now()))
    }
}

impl<W: Write> CaptureWriter<W> {
    pub fn new(writer: W, start: DateTime<Utc>) -> Self {
        CaptureWriter {
            writer,
            start,
            frames: 0,
        }
    }

    pub fn write(&mut self, pkt: &RawPacket) -> io::Result<()> {
        let offset_ms = (pkt.received_at - self.start).num_milliseconds().max(0) as u64;
        write_frame(
            &mut self.writer,
            &Frame {
                variant: pkt.variant,
                offset_ms,
                data: pkt.data.clone(),
            },
        )?;
        self.frames += 1;
        Ok(())
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// RawPort re-emitting a capture.
pub struct ReplayPort<R: Read> {
    name: String,
    reader: R,
    pending: Option<Frame>,
    started: Instant,
    base: DateTime<Utc>,
    paced: bool,
    variant: Variant,
}

impl ReplayPort<BufReader<File>> {
    pub fn open(path: &Path, paced: bool) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(ReplayPort::new(
            path.display().to_string(),
            BufReader::new(file),
            paced,
        ))
    }
}

impl<R: Read> ReplayPort<R> {
    pub fn new(name: String, reader: R, paced: bool) -> Self {
        ReplayPort {
            name,
            reader,
            pending: None,
            started: Instant::now(),
            base: Utc::now(),
            paced,
            variant: Variant::ModernCrc,
        }
    }

    /// Receive times are reported relative to this instant instead of the time of opening.
    pub fn with_base(mut self, base: DateTime<Utc>) -> Self {
        self.base = base;
        self
    }
}

impl<R: Read> RawPort for ReplayPort<R> {
    fn name(&self) -> &str {
        &self.name
    }

    /// Variant of the most recently read frame.
    fn variant(&self) -> Variant {
        self.variant
    }

    fn recv(&mut self) -> Result<RawPacket, RecvError> {
        if self.pending.is_none() {
            self.pending = match read_frame(&mut self.reader) {
                Ok(Some(frame)) => Some(frame),
                Ok(None) => return Err(RecvError::Disconnected),
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    log::warn!("capture {} ends mid-frame", self.name);
                    return Err(RecvError::Disconnected);
                }
                Err(e) => return Err(RecvError::IO(e)),
            };
        }
        let Some(frame) = self.pending.take() else {
            return Err(RecvError::NotReady);
        };
        let due = Duration::from_millis(frame.offset_ms);
        if self.paced && self.started.elapsed() < due {
            self.pending = Some(frame);
            return Err(RecvError::NotReady);
        }
        self.variant = frame.variant;
        let received_at = self.base + chrono::Duration::milliseconds(frame.offset_ms as i64);
        Ok(RawPacket {
            variant: frame.variant,
            data: frame.data,
            received_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn packet(variant: Variant, at: DateTime<Utc>, data: &[u8]) -> RawPacket {
        RawPacket {
            variant,
            data: data.to_vec(),
            received_at: at,
        }
    }

    #[test]
    fn capture_then_replay_unpaced() {
        let start = Utc::now();
        let mut cap = CaptureWriter::new(Vec::new(), start);
        cap.write(&packet(Variant::LegacyParity, start + chrono::Duration::milliseconds(5), &[0, 1, 2]))
            .unwrap();
        cap.write(&packet(Variant::ModernCrc, start + chrono::Duration::milliseconds(15005), &[1, 9]))
            .unwrap();
        assert_eq!(cap.frames(), 2);
        let bytes = cap.into_inner();
        assert_eq!(bytes.len(), 2 * 10 + 3 + 2);

        let mut port = ReplayPort::new("cap".into(), Cursor::new(bytes), false).with_base(start);
        let a = port.recv().unwrap();
        assert_eq!(a.variant, Variant::LegacyParity);
        assert_eq!(a.data, vec![0, 1, 2]);
        assert_eq!(a.received_at, start + chrono::Duration::milliseconds(5));
        let b = port.recv().unwrap();
        assert_eq!(port.variant(), Variant::ModernCrc);
        assert_eq!((b.received_at - a.received_at).num_milliseconds(), 15000);
        assert!(matches!(port.recv(), Err(RecvError::Disconnected)));
    }

    #[test]
    fn paced_replay_holds_future_frames() {
        let mut bytes = Vec::new();
        let frame = Frame {
            variant: Variant::ModernCrc,
            offset_ms: 3_600_000,
            data: vec![0; 14],
        };
        write_frame(&mut bytes, &frame).unwrap();
        let mut port = ReplayPort::new("cap".into(), Cursor::new(bytes), true);
        assert!(matches!(port.recv(), Err(RecvError::NotReady)));
        assert!(matches!(port.recv(), Err(RecvError::NotReady)));
    }

    #[test]
    fn truncated_capture_disconnects() {
        let mut bytes = Vec::new();
        write_frame(
            &mut bytes,
            &Frame {
                variant: Variant::ModernCrc,
                offset_ms: 0,
                data: vec![7; 14],
            },
        )
        .unwrap();
        bytes.truncate(bytes.len() - 3);
        let mut port = ReplayPort::new("cap".into(), Cursor::new(bytes), false);
        assert!(matches!(port.recv(), Err(RecvError::Disconnected)));
    }

    #[test]
    fn unknown_variant_is_invalid_data() {
        let bytes = vec![9u8, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        let err = read_frame(&mut Cursor::new(bytes)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}

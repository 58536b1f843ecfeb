//! Optional data segment
//!
//! The segment starts with a one byte mask. Each set bit enables a fixed
//! size field, and the fields follow the mask in bit order.

use super::{DecodeError, PIP_HEADER_SIZE};
use crate::data::Sample;

/// Binary sensing (doors, water, ...) with a coarse temperature in bits 1..7.
pub const EXTRA_BINARY_TEMP: u8 = 0x01;
/// Temperature in sixteenths of a degree Celsius.
pub const EXTRA_TEMP: u8 = 0x02;
/// Ambient light, 0x00 dark to 0xFF bright office.
pub const EXTRA_LIGHT: u8 = 0x04;
/// Off-chip temperature and relative humidity, both in sixteenths.
pub const EXTRA_CLIMATE: u8 = 0x08;
pub const EXTRA_MOISTURE: u8 = 0x10;
/// Six bytes of on-tag history. Skipped.
pub const EXTRA_HISTORY: u8 = 0x20;
/// Battery millivolts and joules consumed since start-up.
pub const EXTRA_BATTERY: u8 = 0x40;

struct Walker<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Walker<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.pos + n;
        if end > self.data.len() {
            return Err(DecodeError::Truncated {
                needed: PIP_HEADER_SIZE + end,
                available: PIP_HEADER_SIZE + self.data.len(),
            });
        }
        let field = &self.data[self.pos..end];
        self.pos = end;
        Ok(field)
    }
}

/// Fixed point value with the high byte shifted up a nibble and the low byte in sixteenths.
pub fn sixteenths(hi: u8, lo: u8) -> f32 {
    ((hi as i32) << 4) as f32 + lo as f32 / 16.0
}

/// Fills `sample` from the optional segment `data` (mask byte included).
/// An empty segment leaves the sample untouched.
pub(super) fn parse(
    data: &[u8],
    binary_temp_offset: f32,
    sample: &mut Sample,
) -> Result<(), DecodeError> {
    let Some((&mask, _)) = data.split_first() else {
        return Ok(());
    };
    let mut walker = Walker { data, pos: 1 };

    if mask & EXTRA_BINARY_TEMP != 0 {
        let b = walker.take(1)?;
        sample.temperature_c = (b[0] >> 1) as f32 - binary_temp_offset;
    }
    if mask & EXTRA_TEMP != 0 {
        let b = walker.take(2)?;
        sample.temperature_c = sixteenths(b[0], b[1]);
    }
    if mask & EXTRA_LIGHT != 0 {
        let b = walker.take(1)?;
        sample.light_level = b[0].into();
    }
    if mask & EXTRA_CLIMATE != 0 {
        let b = walker.take(4)?;
        sample.temperature_c = sixteenths(b[0], b[1]);
        sample.relative_humidity_pct = sixteenths(b[2], b[3]);
    }
    if mask & EXTRA_MOISTURE != 0 {
        let b = walker.take(2)?;
        sample.moisture = u16::from_be_bytes([b[0], b[1]]).into();
    }
    if mask & EXTRA_HISTORY != 0 {
        walker.take(6)?;
    }
    if mask & EXTRA_BATTERY != 0 {
        let b = walker.take(4)?;
        sample.battery_mv = u16::from_be_bytes([b[0], b[1]]) as f32 / 1000.0;
        sample.battery_joules = u16::from_be_bytes([b[2], b[3]]).into();
    }
    Ok(())
}

use crate::pip::proto::identifiers::{DeviceTime, ReceiverId, TagId};
use crate::pip::proto::Variant;

use chrono::{DateTime, Utc};

/// Sentinel for temperature and humidity. Anything at or below it is absent.
pub const ABSENT_CLIMATE: f32 = -300.0;

/// Sentinel for light, moisture and battery fields. Any negative value is absent.
pub const ABSENT_LEVEL: i32 = -1;

/// One decoded observation from a tag.
///
/// The optional sensor payload is kept in sentinel form, matching what the
/// tags put on the wire: a field the header mask did not enable stays at its
/// sentinel. Use the accessor methods to read them as `Option`s.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub tag_id: TagId,
    pub receiver_id: ReceiverId,
    pub variant: Variant,
    /// Wall clock time at the host when the packet was read.
    pub receive_time: DateTime<Utc>,
    pub device_time: DeviceTime,
    pub rssi: f32,
    /// Packets the reader lost before this one because its queue overflowed.
    pub dropped_count: u8,
    pub temperature_c: f32,
    pub relative_humidity_pct: f32,
    /// 0 (dark) to 255 (bright office).
    pub light_level: i16,
    pub moisture: i32,
    pub battery_mv: f32,
    /// Estimated energy consumed since start-up.
    pub battery_joules: i32,
}

impl Sample {
    /// A sample with every optional field at its absent sentinel.
    pub fn new(tag_id: TagId, variant: Variant, receive_time: DateTime<Utc>) -> Sample {
        Sample {
            tag_id,
            receiver_id: 0,
            variant,
            receive_time,
            device_time: 0,
            rssi: 0.0,
            dropped_count: 0,
            temperature_c: ABSENT_CLIMATE,
            relative_humidity_pct: ABSENT_CLIMATE,
            light_level: ABSENT_LEVEL as i16,
            moisture: ABSENT_LEVEL,
            battery_mv: ABSENT_LEVEL as f32,
            battery_joules: ABSENT_LEVEL,
        }
    }

    pub fn receive_millis(&self) -> i64 {
        self.receive_time.timestamp_millis()
    }

    pub fn temperature(&self) -> Option<f32> {
        (self.temperature_c > ABSENT_CLIMATE).then_some(self.temperature_c)
    }

    pub fn humidity(&self) -> Option<f32> {
        (self.relative_humidity_pct > ABSENT_CLIMATE).then_some(self.relative_humidity_pct)
    }

    pub fn light(&self) -> Option<u8> {
        u8::try_from(self.light_level).ok()
    }

    pub fn moisture(&self) -> Option<u16> {
        u16::try_from(self.moisture).ok()
    }

    pub fn battery(&self) -> Option<f32> {
        (self.battery_mv >= 0.0).then_some(self.battery_mv)
    }

    pub fn joules(&self) -> Option<i32> {
        (self.battery_joules >= 0).then_some(self.battery_joules)
    }

    pub fn clear_battery(&mut self) {
        self.battery_mv = ABSENT_LEVEL as f32;
        self.battery_joules = ABSENT_LEVEL;
    }
}

impl std::fmt::Display for Sample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "PIP({:04}@{:06x}) {} rssi {:.1}",
            self.tag_id,
            self.receiver_id,
            self.receive_time.format("%H:%M:%S%.3f"),
            self.rssi
        )?;
        if let Some(t) = self.temperature() {
            write!(f, " temp: {:.2}", t)?;
        }
        if let Some(rh) = self.humidity() {
            write!(f, " rh: {:.2}", rh)?;
        }
        if let Some(light) = self.light() {
            write!(f, " light: {:02x}", light)?;
        }
        if let Some(m) = self.moisture() {
            write!(f, " moisture: {}", m)?;
        }
        if let Some(b) = self.battery() {
            write!(f, " batt: {:.3}", b)?;
        }
        if let Some(j) = self.joules() {
            write!(f, " joules: {}", j)?;
        }
        if self.dropped_count > 0 {
            write!(f, " [dropped {}]", self.dropped_count)?;
        }
        Ok(())
    }
}

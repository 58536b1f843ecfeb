pub mod extra;
pub mod identifiers;

use crate::data::Sample;
use chrono::{DateTime, Utc};
use identifiers::{ReceiverId, TagId};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;

/// Wire format of the attached reader.
///
/// The two formats differ in how the three tag id bytes are split and in how
/// a corrupt packet is detected, so they are mutually exclusive: the variant
/// travels with every raw buffer and selects the decoding rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[derive(TryFromPrimitive, IntoPrimitive)]
pub enum Variant {
    /// 8051 based readers: 21 bit tag id followed by 3 bits of even parity.
    LegacyParity = 0,
    /// MSP430 based readers: 24 bit tag id, status byte holds crc-ok + 7 bit LQI.
    ModernCrc = 1,
}

/// Offset subtracted from the one byte binary-sensing temperature on legacy readers.
/// Early tag firmware sent the value unbiased.
pub const LEGACY_BINARY_TEMP_OFFSET: f32 = 0.0;

/// Offset subtracted from the one byte binary-sensing temperature on modern readers.
/// Later tag firmware biases the value by 40 degrees so it can go below zero.
pub const MODERN_BINARY_TEMP_OFFSET: f32 = 40.0;

impl Variant {
    pub fn tag_id_bits(self) -> u32 {
        match self {
            Variant::LegacyParity => 21,
            Variant::ModernCrc => 24,
        }
    }

    /// Whether the tag id carries an even parity check.
    pub fn has_parity(self) -> bool {
        matches!(self, Variant::LegacyParity)
    }

    /// Whether the status byte exposes an explicit crc-ok bit.
    pub fn has_crc_ok(self) -> bool {
        matches!(self, Variant::ModernCrc)
    }

    pub fn binary_temp_offset(self) -> f32 {
        match self {
            Variant::LegacyParity => LEGACY_BINARY_TEMP_OFFSET,
            Variant::ModernCrc => MODERN_BINARY_TEMP_OFFSET,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Variant::LegacyParity => "legacy",
            Variant::ModernCrc => "modern",
        }
    }
}

impl std::str::FromStr for Variant {
    type Err = String;

    fn from_str(s: &str) -> Result<Variant, String> {
        match s {
            "legacy" | "parity" | "old" => Ok(Variant::LegacyParity),
            "modern" | "crc" | "gpip" => Ok(Variant::ModernCrc),
            _ => Err(format!("unknown reader variant '{}'", s)),
        }
    }
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Reasons a raw buffer does not turn into a `Sample`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Also covers a declared extra length over `PIP_MAX_EXTRA_SIZE`: no
    /// reader transfers that much, so such a packet can never be complete.
    #[error("packet truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("null read: zero rssi and zero link quality")]
    NullRead,

    #[error("crc-ok bit not set")]
    CrcFailed,

    #[error("tag id failed even parity check")]
    ParityFailed,
}

/// Length of the buffer handed to the decoder before the optional segment:
/// the host-filled extra length byte plus the reader's 13 byte packet.
pub const PIP_HEADER_SIZE: usize = 14;

/// Length of a packet as sent by the reader, without the extra length byte.
pub const PIP_PACKET_LEN: usize = 13;

pub const PIP_MAX_EXTRA_SIZE: usize = 20;

/// Defined in the CC1100 data sheet/errata.
pub const RSSI_OFFSET: f32 = 78.0;

const CRC_OK: u8 = 0x80;
const LQI_MASK: u8 = 0x7F;

struct PipPktHdr {
    ex_length: u8,
    dropped: u8,
    receiver_id: ReceiverId,
    time: u32,
    id: [u8; 3],
    rssi: u8,
    status: u8,
}

impl PipPktHdr {
    fn deserialize(raw: &[u8]) -> Result<PipPktHdr, DecodeError> {
        if raw.len() < PIP_HEADER_SIZE {
            return Err(DecodeError::Truncated {
                needed: PIP_HEADER_SIZE,
                available: raw.len(),
            });
        }
        let hdr = PipPktHdr {
            ex_length: raw[0],
            dropped: raw[1],
            receiver_id: u32::from_be_bytes([0, raw[2], raw[3], raw[4]]),
            time: u32::from_be_bytes([raw[5], raw[6], raw[7], raw[8]]),
            id: [raw[9], raw[10], raw[11]],
            rssi: raw[12],
            status: raw[13],
        };
        // Bytes past the largest possible packet never belong to it.
        let available = raw.len().min(PIP_HEADER_SIZE + PIP_MAX_EXTRA_SIZE);
        if available < hdr.packet_size() {
            return Err(DecodeError::Truncated {
                needed: hdr.packet_size(),
                available,
            });
        }
        Ok(hdr)
    }

    fn extra_len(&self) -> usize {
        self.ex_length as usize
    }

    fn packet_size(&self) -> usize {
        PIP_HEADER_SIZE + self.extra_len()
    }

    /// The id sits in the top bits of the 24 bit field. Legacy readers use
    /// the low 3 bits for parity.
    fn tag_id(&self, variant: Variant) -> TagId {
        let bits = u32::from_be_bytes([0, self.id[0], self.id[1], self.id[2]]);
        bits >> (24 - variant.tag_id_bits())
    }

    fn quality(&self, variant: Variant) -> u8 {
        match variant {
            Variant::LegacyParity => self.status,
            Variant::ModernCrc => self.status & LQI_MASK,
        }
    }

    fn crc_ok(&self) -> bool {
        self.status & CRC_OK != 0
    }
}

/// Converts the raw RSSI byte as described in TI design note DN505.
pub fn rssi_from_raw(raw: u8) -> f32 {
    let half = if raw >= 128 {
        (raw as i32 - 256) as f32 / 2.0
    } else {
        raw as f32 / 2.0
    };
    half - RSSI_OFFSET
}

/// Even parity over the 24 id bits: XOR together all eight 3-bit groups,
/// the packet is good iff the result is zero.
pub fn even_parity_ok(id: [u8; 3]) -> bool {
    let bits = u32::from_be_bytes([0, id[0], id[1], id[2]]);
    let fold = (0..8).fold(0u32, |acc, i| acc ^ ((bits >> (3 * i)) & 0x7));
    fold == 0
}

/// Packet decoder for one reader variant.
#[derive(Debug, Clone, Copy)]
pub struct Decoder {
    variant: Variant,
    binary_temp_offset: f32,
}

impl Decoder {
    pub fn new(variant: Variant) -> Decoder {
        Decoder {
            variant,
            binary_temp_offset: variant.binary_temp_offset(),
        }
    }

    /// Overrides the variant's default binary-sensing temperature offset.
    pub fn with_binary_temp_offset(mut self, offset: f32) -> Decoder {
        self.binary_temp_offset = offset;
        self
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    pub fn binary_temp_offset(&self) -> f32 {
        self.binary_temp_offset
    }

    pub fn decode(&self, raw: &[u8], received_at: DateTime<Utc>) -> Result<Sample, DecodeError> {
        let hdr = PipPktHdr::deserialize(raw)?;

        if hdr.rssi == 0 && hdr.quality(self.variant) == 0 {
            return Err(DecodeError::NullRead);
        }
        if self.variant.has_crc_ok() && !hdr.crc_ok() {
            return Err(DecodeError::CrcFailed);
        }
        if self.variant.has_parity() && !even_parity_ok(hdr.id) {
            return Err(DecodeError::ParityFailed);
        }

        let mut sample = Sample::new(hdr.tag_id(self.variant), self.variant, received_at);
        sample.receiver_id = hdr.receiver_id;
        sample.device_time = hdr.time;
        sample.dropped_count = hdr.dropped;
        sample.rssi = rssi_from_raw(hdr.rssi);

        extra::parse(
            &raw[PIP_HEADER_SIZE..hdr.packet_size()],
            self.binary_temp_offset,
            &mut sample,
        )?;
        Ok(sample)
    }
}

/// Decodes `raw` with the default rules for `variant`.
pub fn decode(raw: &[u8], variant: Variant, received_at: DateTime<Utc>) -> Result<Sample, DecodeError> {
    Decoder::new(variant).decode(raw, received_at)
}

#[cfg(test)]
mod tests {
    use super::extra::*;
    use super::*;
    use approx::assert_abs_diff_eq;

    fn modern_packet(tag: u32, rssi: u8, extra: &[u8]) -> Vec<u8> {
        let id = tag.to_be_bytes();
        let mut raw = vec![
            extra.len() as u8,
            0,
            0x00,
            0x12,
            0x34,
            0,
            0,
            0,
            1,
            id[1],
            id[2],
            id[3],
            rssi,
            CRC_OK | 0x2A,
        ];
        raw.extend_from_slice(extra);
        raw
    }

    fn legacy_id_bytes(tag: u32) -> [u8; 3] {
        // Tag id in the top 21 bits, parity bits chosen to make the fold zero.
        let base = tag << 3;
        (0..8u32)
            .map(|p| {
                let b = (base | p).to_be_bytes();
                [b[1], b[2], b[3]]
            })
            .find(|id| even_parity_ok(*id))
            .unwrap()
    }

    fn legacy_packet(tag: u32, status: u8, extra: &[u8]) -> Vec<u8> {
        let id = legacy_id_bytes(tag);
        let mut raw = vec![extra.len() as u8, 3, 0, 0, 9, 0, 0, 0, 0, id[0], id[1], id[2], 0x40, status];
        raw.extend_from_slice(extra);
        raw
    }

    #[test]
    fn rssi_conversion() {
        assert_eq!(rssi_from_raw(200), -106.0);
        assert_eq!(rssi_from_raw(100), -28.0);
        assert_eq!(rssi_from_raw(128), -142.0);
        assert_eq!(rssi_from_raw(127), -14.5);
    }

    #[test]
    fn modern_header_fields() {
        let raw = modern_packet(0xABCDEF, 100, &[]);
        let s = decode(&raw, Variant::ModernCrc, Utc::now()).unwrap();
        assert_eq!(s.tag_id, 0xABCDEF);
        assert_eq!(s.receiver_id, 0x1234);
        assert_eq!(s.device_time, 1);
        assert_eq!(s.rssi, -28.0);
        assert_eq!(s.variant, Variant::ModernCrc);
        assert_eq!(s.temperature(), None);
        assert_eq!(s.battery(), None);
    }

    #[test]
    fn legacy_header_fields() {
        let raw = legacy_packet(100, 0x55, &[]);
        let s = decode(&raw, Variant::LegacyParity, Utc::now()).unwrap();
        assert_eq!(s.tag_id, 100);
        assert_eq!(s.dropped_count, 3);
        assert_eq!(s.rssi, 32.0 - RSSI_OFFSET);
    }

    #[test]
    fn legacy_parity_mismatch_is_rejected() {
        let mut raw = legacy_packet(100, 0x55, &[]);
        raw[11] ^= 0x01;
        assert_eq!(
            decode(&raw, Variant::LegacyParity, Utc::now()),
            Err(DecodeError::ParityFailed)
        );
    }

    #[test]
    fn modern_requires_crc_ok() {
        let mut raw = modern_packet(5, 100, &[]);
        raw[13] &= LQI_MASK;
        assert_eq!(
            decode(&raw, Variant::ModernCrc, Utc::now()),
            Err(DecodeError::CrcFailed)
        );
    }

    #[test]
    fn null_read_is_rejected() {
        let mut raw = modern_packet(5, 0, &[]);
        raw[13] = CRC_OK;
        assert_eq!(
            decode(&raw, Variant::ModernCrc, Utc::now()),
            Err(DecodeError::NullRead)
        );
        let raw = legacy_packet(5, 0, &[]);
        let mut raw = raw;
        raw[12] = 0;
        assert_eq!(
            decode(&raw, Variant::LegacyParity, Utc::now()),
            Err(DecodeError::NullRead)
        );
    }

    #[test]
    fn zero_rssi_with_quality_is_accepted() {
        let raw = modern_packet(5, 0, &[]);
        let s = decode(&raw, Variant::ModernCrc, Utc::now()).unwrap();
        assert_eq!(s.rssi, -RSSI_OFFSET);
    }

    #[test]
    fn binary_temperature_offset_is_per_variant() {
        let extra = [EXTRA_BINARY_TEMP, 130];
        let modern = decode(&modern_packet(1, 100, &extra), Variant::ModernCrc, Utc::now()).unwrap();
        assert_eq!(modern.temperature_c, 65.0 - 40.0);

        let legacy = decode(&legacy_packet(1, 1, &extra), Variant::LegacyParity, Utc::now()).unwrap();
        assert_eq!(legacy.temperature_c, 65.0);

        let custom = Decoder::new(Variant::LegacyParity)
            .with_binary_temp_offset(40.0)
            .decode(&legacy_packet(1, 1, &extra), Utc::now())
            .unwrap();
        assert_eq!(custom.temperature_c, 25.0);
    }

    #[test]
    fn precise_temperature() {
        let raw = modern_packet(1, 100, &[EXTRA_TEMP, 1, 88]);
        let s = decode(&raw, Variant::ModernCrc, Utc::now()).unwrap();
        assert_eq!(s.temperature(), Some(21.5));
        assert_eq!(s.humidity(), None);
        assert_eq!(s.light(), None);
    }

    #[test]
    fn light_only() {
        let raw = modern_packet(1, 100, &[EXTRA_LIGHT, 0xC8]);
        let s = decode(&raw, Variant::ModernCrc, Utc::now()).unwrap();
        assert_eq!(s.light(), Some(0xC8));
        assert_eq!(s.temperature(), None);
    }

    #[test]
    fn climate_fields() {
        let raw = modern_packet(1, 100, &[EXTRA_CLIMATE, 1, 88, 2, 136]);
        let s = decode(&raw, Variant::ModernCrc, Utc::now()).unwrap();
        assert_eq!(s.temperature(), Some(21.5));
        assert_eq!(s.humidity(), Some(40.5));
    }

    #[test]
    fn moisture_history_and_battery() {
        let extra = [
            EXTRA_MOISTURE | EXTRA_HISTORY | EXTRA_BATTERY,
            0x01,
            0x02,
            9,
            9,
            9,
            9,
            9,
            9,
            0x0C,
            0x1C,
            0x00,
            0x2A,
        ];
        let s = decode(&modern_packet(1, 100, &extra), Variant::ModernCrc, Utc::now()).unwrap();
        assert_eq!(s.moisture(), Some(0x0102));
        assert_abs_diff_eq!(s.battery().unwrap(), 3.1, epsilon = 1e-6);
        assert_eq!(s.joules(), Some(42));
        assert_eq!(s.temperature(), None);
    }

    #[test]
    fn every_field_in_mask_order() {
        let extra = [
            0x7F, 130, 1, 88, 0x10, 1, 96, 2, 136, 0, 5, 1, 2, 3, 4, 5, 6, 0x0B, 0xB8, 0, 7,
        ];
        assert_eq!(extra.len(), 21);
        // One byte over the segment maximum.
        assert_eq!(
            decode(&modern_packet(1, 100, &extra), Variant::ModernCrc, Utc::now()),
            Err(DecodeError::Truncated {
                needed: 35,
                available: 34
            })
        );

        let extra = [0x7E, 1, 88, 0x10, 1, 96, 2, 136, 0, 5, 1, 2, 3, 4, 5, 6, 0x0B, 0xB8, 0, 7];
        let s = decode(&modern_packet(1, 100, &extra), Variant::ModernCrc, Utc::now()).unwrap();
        // The climate field comes after the precise temperature and wins.
        assert_eq!(s.temperature(), Some(22.0));
        assert_eq!(s.humidity(), Some(40.5));
        assert_eq!(s.light(), Some(0x10));
        assert_eq!(s.moisture(), Some(5));
        assert_abs_diff_eq!(s.battery().unwrap(), 3.0, epsilon = 1e-6);
        assert_eq!(s.joules(), Some(7));
    }

    #[test]
    fn oversized_extra_length_is_truncated() {
        let mut raw = vec![30, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 100, 0xAA];
        assert_eq!(
            decode(&raw, Variant::LegacyParity, Utc::now()),
            Err(DecodeError::Truncated {
                needed: 44,
                available: 14
            })
        );
        raw.resize(60, 0);
        assert!(matches!(
            decode(&raw, Variant::LegacyParity, Utc::now()),
            Err(DecodeError::Truncated { needed: 44, available: 34 })
        ));
    }

    #[test]
    fn short_header_is_truncated() {
        let raw = modern_packet(1, 100, &[]);
        assert_eq!(
            decode(&raw[..10], Variant::ModernCrc, Utc::now()),
            Err(DecodeError::Truncated {
                needed: PIP_HEADER_SIZE,
                available: 10
            })
        );
    }

    #[test]
    fn declared_extra_beyond_buffer_is_truncated() {
        let mut raw = modern_packet(1, 100, &[EXTRA_LIGHT, 7]);
        raw[0] = 5;
        assert_eq!(
            decode(&raw, Variant::ModernCrc, Utc::now()),
            Err(DecodeError::Truncated {
                needed: PIP_HEADER_SIZE + 5,
                available: PIP_HEADER_SIZE + 2
            })
        );
    }

    #[test]
    fn field_beyond_declared_extra_is_truncated() {
        // Battery needs four bytes, only two are declared. Trailing buffer bytes are ignored.
        let mut raw = modern_packet(1, 100, &[EXTRA_BATTERY, 0x0C, 0x1C]);
        raw.extend_from_slice(&[0, 0]);
        assert_eq!(
            decode(&raw, Variant::ModernCrc, Utc::now()),
            Err(DecodeError::Truncated {
                needed: PIP_HEADER_SIZE + 5,
                available: PIP_HEADER_SIZE + 3
            })
        );
    }

    #[test]
    fn variant_wire_tags() {
        assert_eq!(u8::from(Variant::LegacyParity), 0);
        assert_eq!(Variant::try_from(1u8).unwrap(), Variant::ModernCrc);
        assert!(Variant::try_from(7u8).is_err());
        assert_eq!(Variant::LegacyParity.tag_id_bits(), 21);
        assert!(Variant::ModernCrc.has_crc_ok() && !Variant::ModernCrc.has_parity());
    }
}

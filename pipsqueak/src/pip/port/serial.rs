//! Serial Port
//!
//! Readers enumerate as USB serial devices. The host asks for the next queued
//! packet by writing the get-next-packet command and the reader answers with
//! 13 bytes of packet plus up to 20 bytes of extra data. Anything shorter than
//! a packet means the reader queue was empty.

use super::{DeviceInfo, Discover, RawPacket, RawPort, RecvError};
use crate::pip::proto::{Variant, PIP_MAX_EXTRA_SIZE, PIP_PACKET_LEN};
use chrono::Utc;
use std::io::{self, Read, Write};
use std::time::Duration;

/// Host to reader command requesting the oldest queued packet.
pub static LM_GET_NEXT_PACKET: u8 = 0x13;

static DEFAULT_RATE: u32 = 115200;

/// 8051 based reader (Silicon Labs bridge).
pub static LEGACY_VID_PID: (u16, u16) = (0x10C4, 0x0003);
/// MSP430 based reader (TI CDC).
pub static MODERN_VID_PID: (u16, u16) = (0x2047, 0x0300);

/// Maps a USB identity to the reader variant speaking through it.
pub fn variant_for_usb(vid: u16, pid: u16) -> Option<Variant> {
    match (vid, pid) {
        id if id == LEGACY_VID_PID => Some(Variant::LegacyParity),
        id if id == MODERN_VID_PID => Some(Variant::ModernCrc),
        _ => None,
    }
}

/// Lists attached readers. Other serial devices are skipped.
pub fn enum_devices() -> Result<Vec<DeviceInfo>, serialport::Error> {
    let mut devices = Vec::new();
    for p in serialport::available_ports()? {
        if let serialport::SerialPortType::UsbPort(info) = &p.port_type {
            let Some(variant) = variant_for_usb(info.vid, info.pid) else {
                continue;
            };
            #[cfg(target_os = "macos")]
            if p.port_name.starts_with("/dev/tty.") {
                continue;
            }
            devices.push(DeviceInfo {
                name: p.port_name.clone(),
                variant,
            });
        } // else ignore other types: bluetooth, pci, unknown
    }
    Ok(devices)
}

/// RawPort polling one reader over a serial line.
pub struct Port {
    name: String,
    variant: Variant,
    port: Box<dyn serialport::SerialPort>,
}

impl Port {
    pub fn open(dev: &DeviceInfo, timeout: Duration) -> io::Result<Port> {
        let port = serialport::new(&dev.name, DEFAULT_RATE)
            .timeout(timeout)
            .open()?;
        Ok(Port {
            name: dev.name.clone(),
            variant: dev.variant,
            port,
        })
    }

    fn read_reply(&mut self) -> Result<Vec<u8>, RecvError> {
        let mut buf = [0u8; PIP_PACKET_LEN + PIP_MAX_EXTRA_SIZE];
        let mut len = 0;
        while len < PIP_PACKET_LEN {
            match self.port.read(&mut buf[len..]) {
                Ok(0) => return Err(RecvError::Disconnected),
                Ok(n) => len += n,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) => return Err(e.into()),
            }
        }
        if len >= PIP_PACKET_LEN {
            let pending = self.port.bytes_to_read().map_err(io::Error::from)? as usize;
            let want = pending.min(buf.len() - len);
            if want > 0 {
                self.port.read_exact(&mut buf[len..len + want])?;
                len += want;
            }
        }
        Ok(buf[..len].to_vec())
    }
}

impl RawPort for Port {
    fn name(&self) -> &str {
        &self.name
    }

    fn variant(&self) -> Variant {
        self.variant
    }

    fn recv(&mut self) -> Result<RawPacket, RecvError> {
        self.port.write_all(&[LM_GET_NEXT_PACKET])?;
        let reply = self.read_reply()?;
        RawPacket::from_reader(self.variant, &reply, Utc::now()).ok_or(RecvError::NotReady)
    }
}

/// Discovers readers among the system's serial ports.
pub struct SerialDiscover {
    pub timeout: Duration,
}

impl Discover for SerialDiscover {
    fn scan(&mut self) -> io::Result<Vec<DeviceInfo>> {
        enum_devices().map_err(io::Error::from)
    }

    fn open(&mut self, dev: &DeviceInfo) -> io::Result<Box<dyn RawPort>> {
        Ok(Box::new(Port::open(dev, self.timeout)?))
    }
}

//! Raw packet sources
//!
//! A `RawPort` hands out complete reader packets as byte buffers, tagged with
//! the wire variant that produced them. The `DevicePool` is the polling
//! boundary: it owns every active port, applies the bounded retry policy,
//! drops ports that went away, and merges newly attached readers on a coarse
//! rescan interval. Everything above the pool only ever sees `RawPacket`s.

pub mod replay;
pub mod serial;

use super::proto::Variant;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::io;
use std::time::{Duration, Instant};

/// Possible errors when receiving from a `RawPort`
#[derive(Debug)]
pub enum RecvError {
    /// No packets available at this time.
    NotReady,
    /// This port got disconnected.
    Disconnected,
    /// Low level IO error.
    IO(io::Error),
}

impl From<io::Error> for RecvError {
    fn from(err: io::Error) -> RecvError {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => RecvError::NotReady,
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::NotFound => RecvError::Disconnected,
            _ => RecvError::IO(err),
        }
    }
}

/// One packet as read from a device, ready to decode.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPacket {
    pub variant: Variant,
    /// Extra length byte followed by the reader's packet.
    pub data: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

impl RawPacket {
    /// Builds the decoder input from the bytes a reader returned for one poll.
    /// Returns `None` if the reader did not have a packet.
    pub fn from_reader(variant: Variant, bytes: &[u8], received_at: DateTime<Utc>) -> Option<RawPacket> {
        if bytes.len() < super::proto::PIP_PACKET_LEN {
            return None;
        }
        let extra = (bytes.len() - super::proto::PIP_PACKET_LEN).min(u8::MAX as usize);
        let mut data = Vec::with_capacity(bytes.len() + 1);
        data.push(extra as u8);
        data.extend_from_slice(bytes);
        Some(RawPacket {
            variant,
            data,
            received_at,
        })
    }
}

/// Generic interface for a packet source.
pub trait RawPort {
    /// Stable name used to avoid opening the same device twice.
    fn name(&self) -> &str;

    fn variant(&self) -> Variant;

    /// Returns a packet, or RecvError::NotReady if one is not available within the
    /// port's timeout. Disconnected means the port should be dropped.
    fn recv(&mut self) -> Result<RawPacket, RecvError>;
}

/// Identity of an attached reader, as found by a `Discover`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub variant: Variant,
}

/// Finds and opens readers.
pub trait Discover {
    fn scan(&mut self) -> io::Result<Vec<DeviceInfo>>;
    fn open(&mut self, dev: &DeviceInfo) -> io::Result<Box<dyn RawPort>>;
}

struct Slot {
    port: Box<dyn RawPort>,
}

/// Upper bound on packets taken from one port in one poll, so a chatty
/// device cannot starve the keyboard.
static MAX_PACKETS_PER_POLL: usize = 64;

/// The set of active ports.
pub struct DevicePool {
    slots: Vec<Slot>,
    discover: Option<Box<dyn Discover>>,
    read_retries: usize,
    rescan_interval: Duration,
    last_scan: Option<Instant>,
    removed: Vec<String>,
    added: Vec<String>,
}

impl DevicePool {
    pub fn new(read_retries: usize, rescan_interval: Duration) -> DevicePool {
        DevicePool {
            slots: Vec::new(),
            discover: None,
            read_retries,
            rescan_interval,
            last_scan: None,
            removed: Vec::new(),
            added: Vec::new(),
        }
    }

    pub fn with_discover(mut self, discover: Box<dyn Discover>) -> DevicePool {
        self.discover = Some(discover);
        self
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.slots.iter().map(|s| s.port.name().to_string()).collect()
    }

    /// Adds a port unless one with the same name is already active.
    pub fn add(&mut self, port: Box<dyn RawPort>) -> bool {
        if self.slots.iter().any(|s| s.port.name() == port.name()) {
            return false;
        }
        log::info!("attached {} reader {}", port.variant(), port.name());
        self.added.push(port.name().to_string());
        self.slots.push(Slot { port });
        true
    }

    /// Names of ports attached or dropped since the last call.
    pub fn take_changes(&mut self) -> (Vec<String>, Vec<String>) {
        (
            std::mem::take(&mut self.added),
            std::mem::take(&mut self.removed),
        )
    }

    /// Rescans if the rescan interval elapsed (or no scan ever happened).
    pub fn maybe_rescan(&mut self, now: Instant) -> usize {
        let due = match self.last_scan {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.rescan_interval,
        };
        if !due {
            return 0;
        }
        self.last_scan = Some(now);
        self.rescan()
    }

    /// Opens every discovered reader not already active. Returns how many were added.
    pub fn rescan(&mut self) -> usize {
        let Some(mut discover) = self.discover.take() else {
            return 0;
        };
        let mut added = 0;
        match discover.scan() {
            Ok(devices) => {
                let active: HashSet<String> = self.names().into_iter().collect();
                for dev in devices.iter().filter(|d| !active.contains(&d.name)) {
                    match discover.open(dev) {
                        Ok(port) => {
                            if self.add(port) {
                                added += 1;
                            }
                        }
                        Err(err) => log::warn!("failed to open {}: {}", dev.name, err),
                    }
                }
            }
            Err(err) => log::warn!("device scan failed: {}", err),
        }
        self.discover = Some(discover);
        added
    }

    /// Reads what is available from every port, in port order. Ports that
    /// disconnect or keep failing for `read_retries` attempts are dropped.
    pub fn poll(&mut self) -> Vec<RawPacket> {
        let mut packets = Vec::new();
        let retries = self.read_retries.max(1);
        let mut i = 0;
        while i < self.slots.len() {
            let mut keep = true;
            let mut failures = 0;
            let mut taken = 0;
            while taken < MAX_PACKETS_PER_POLL {
                match self.slots[i].port.recv() {
                    Ok(pkt) => {
                        packets.push(pkt);
                        taken += 1;
                        failures = 0;
                    }
                    Err(RecvError::NotReady) => break,
                    Err(RecvError::Disconnected) => {
                        keep = false;
                        break;
                    }
                    Err(RecvError::IO(err)) => {
                        failures += 1;
                        log::debug!("read error on {}: {}", self.slots[i].port.name(), err);
                        if failures >= retries {
                            keep = false;
                            break;
                        }
                    }
                }
            }
            if keep {
                i += 1;
            } else {
                let slot = self.slots.remove(i);
                log::warn!("dropped reader {}", slot.port.name());
                self.removed.push(slot.port.name().to_string());
            }
        }
        packets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct ScriptedPort {
        name: String,
        script: VecDeque<Result<u8, RecvError>>,
    }

    impl ScriptedPort {
        fn boxed(name: &str, script: Vec<Result<u8, RecvError>>) -> Box<dyn RawPort> {
            Box::new(ScriptedPort {
                name: name.to_string(),
                script: script.into(),
            })
        }
    }

    impl RawPort for ScriptedPort {
        fn name(&self) -> &str {
            &self.name
        }
        fn variant(&self) -> Variant {
            Variant::ModernCrc
        }
        fn recv(&mut self) -> Result<RawPacket, RecvError> {
            match self.script.pop_front() {
                Some(Ok(tag)) => Ok(RawPacket {
                    variant: Variant::ModernCrc,
                    data: vec![tag],
                    received_at: Utc::now(),
                }),
                Some(Err(e)) => Err(e),
                None => Err(RecvError::NotReady),
            }
        }
    }

    fn io_err() -> RecvError {
        RecvError::IO(io::Error::new(io::ErrorKind::Other, "usb stall"))
    }

    fn tags(pkts: &[RawPacket]) -> Vec<u8> {
        pkts.iter().map(|p| p.data[0]).collect()
    }

    #[test]
    fn packets_keep_device_read_order() {
        let mut pool = DevicePool::new(3, Duration::from_secs(30));
        pool.add(ScriptedPort::boxed("a", vec![Ok(1), Ok(2), Err(RecvError::NotReady), Ok(5)]));
        pool.add(ScriptedPort::boxed("b", vec![Ok(3), Ok(4)]));
        assert_eq!(tags(&pool.poll()), vec![1, 2, 3, 4]);
        assert_eq!(tags(&pool.poll()), vec![5]);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut pool = DevicePool::new(3, Duration::from_secs(30));
        assert!(pool.add(ScriptedPort::boxed("a", vec![])));
        assert!(!pool.add(ScriptedPort::boxed("a", vec![])));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn transient_errors_are_retried() {
        let mut pool = DevicePool::new(3, Duration::from_secs(30));
        pool.add(ScriptedPort::boxed("a", vec![Err(io_err()), Err(io_err()), Ok(7)]));
        assert_eq!(tags(&pool.poll()), vec![7]);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn failing_port_is_dropped_after_retries() {
        let mut pool = DevicePool::new(2, Duration::from_secs(30));
        pool.add(ScriptedPort::boxed("a", vec![Err(io_err()), Err(io_err()), Ok(7)]));
        pool.add(ScriptedPort::boxed("b", vec![Ok(8)]));
        assert_eq!(tags(&pool.poll()), vec![8]);
        assert_eq!(pool.names(), vec!["b".to_string()]);
        let (added, removed) = pool.take_changes();
        assert_eq!(added, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(removed, vec!["a".to_string()]);
    }

    #[test]
    fn disconnected_port_is_dropped() {
        let mut pool = DevicePool::new(3, Duration::from_secs(30));
        pool.add(ScriptedPort::boxed("a", vec![Ok(1), Err(RecvError::Disconnected)]));
        assert_eq!(tags(&pool.poll()), vec![1]);
        assert!(pool.is_empty());
    }

    struct FakeDiscover {
        devices: Vec<DeviceInfo>,
        opened: usize,
    }

    impl Discover for FakeDiscover {
        fn scan(&mut self) -> io::Result<Vec<DeviceInfo>> {
            Ok(self.devices.clone())
        }
        fn open(&mut self, dev: &DeviceInfo) -> io::Result<Box<dyn RawPort>> {
            self.opened += 1;
            Ok(ScriptedPort::boxed(&dev.name, vec![]))
        }
    }

    #[test]
    fn rescan_merges_without_duplicates() {
        let dev = |n: &str| DeviceInfo {
            name: n.to_string(),
            variant: Variant::LegacyParity,
        };
        let discover = FakeDiscover {
            devices: vec![dev("x"), dev("y")],
            opened: 0,
        };
        let mut pool =
            DevicePool::new(3, Duration::from_secs(30)).with_discover(Box::new(discover));
        let t0 = Instant::now();
        assert_eq!(pool.maybe_rescan(t0), 2);
        assert_eq!(pool.maybe_rescan(t0 + Duration::from_secs(1)), 0);
        assert_eq!(pool.maybe_rescan(t0 + Duration::from_secs(31)), 0);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn reader_bytes_get_extra_length_prefix() {
        let now = Utc::now();
        assert_eq!(RawPacket::from_reader(Variant::ModernCrc, &[0; 12], now), None);
        let pkt = RawPacket::from_reader(Variant::ModernCrc, &[9; 15], now).unwrap();
        assert_eq!(pkt.data.len(), 16);
        assert_eq!(pkt.data[0], 2);
        assert_eq!(pkt.data[1], 9);
    }

    #[test]
    fn io_error_kinds_map_to_recv_errors() {
        let e = |k| RecvError::from(io::Error::from(k));
        assert!(matches!(e(io::ErrorKind::TimedOut), RecvError::NotReady));
        assert!(matches!(e(io::ErrorKind::BrokenPipe), RecvError::Disconnected));
        assert!(matches!(e(io::ErrorKind::PermissionDenied), RecvError::IO(_)));
    }
}

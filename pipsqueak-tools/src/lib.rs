use clap::Args;
use pipsqueak::pip::port::replay::ReplayPort;
use pipsqueak::pip::port::serial::{self, SerialDiscover};
use pipsqueak::pip::port::{DeviceInfo, DevicePool, Discover, RawPort};
use pipsqueak::pip::{Decoder, Variant};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

pub mod config;
pub mod input;
pub mod term;

pub use config::{ConfigError, Settings, SettingsArgs};

#[derive(Args, Debug, Clone, Default)]
pub struct PipOpts {
    /// Serial port of a reader; may be repeated. Readers are found by USB id when omitted
    #[arg(short = 'd', long = "device", value_name = "PORT")]
    pub devices: Vec<String>,

    /// Read packets from a capture file instead of readers
    #[arg(long, value_name = "FILE", conflicts_with = "devices")]
    pub replay: Option<PathBuf>,

    /// Wire format of --device readers with an unknown USB id (legacy or modern)
    #[arg(long)]
    pub variant: Option<Variant>,

    /// YAML settings file
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,
}

impl PipOpts {
    /// Wire format for a named port, from its USB id when it is listed.
    pub fn variant_of(&self, name: &str) -> Variant {
        if let Some(v) = self.variant {
            return v;
        }
        serial::enum_devices()
            .ok()
            .and_then(|devs| devs.into_iter().find(|d| d.name == name))
            .map(|d| d.variant)
            .unwrap_or(Variant::ModernCrc)
    }

    /// Builds the pool of packet sources. Replays are paced to their
    /// original timing when `paced` is set.
    pub fn open_pool(&self, settings: &Settings, paced: bool) -> io::Result<DevicePool> {
        let mut pool = DevicePool::new(settings.read_retries, settings.rescan_interval());
        if let Some(path) = &self.replay {
            pool.add(Box::new(ReplayPort::open(path, paced)?));
            return Ok(pool);
        }
        let discover: Box<dyn Discover> = if self.devices.is_empty() {
            Box::new(SerialDiscover {
                timeout: settings.poll_timeout(),
            })
        } else {
            let devices = self
                .devices
                .iter()
                .map(|name| DeviceInfo {
                    name: name.clone(),
                    variant: self.variant_of(name),
                })
                .collect();
            Box::new(FixedDiscover {
                devices,
                timeout: settings.poll_timeout(),
            })
        };
        let mut pool = pool.with_discover(discover);
        pool.rescan();
        Ok(pool)
    }
}

/// Reopens a fixed list of serial ports.
struct FixedDiscover {
    devices: Vec<DeviceInfo>,
    timeout: Duration,
}

impl Discover for FixedDiscover {
    fn scan(&mut self) -> io::Result<Vec<DeviceInfo>> {
        Ok(self.devices.clone())
    }

    fn open(&mut self, dev: &DeviceInfo) -> io::Result<Box<dyn RawPort>> {
        Ok(Box::new(serial::Port::open(dev, self.timeout)?))
    }
}

/// One decoder per wire format, sharing the configured temperature offset.
pub struct Decoders {
    legacy: Decoder,
    modern: Decoder,
}

impl Decoders {
    pub fn new(binary_temp_offset: Option<f32>) -> Decoders {
        let make = |variant| match binary_temp_offset {
            Some(offset) => Decoder::new(variant).with_binary_temp_offset(offset),
            None => Decoder::new(variant),
        };
        Decoders {
            legacy: make(Variant::LegacyParity),
            modern: make(Variant::ModernCrc),
        }
    }

    pub fn get(&self, variant: Variant) -> &Decoder {
        match variant {
            Variant::LegacyParity => &self.legacy,
            Variant::ModernCrc => &self.modern,
        }
    }
}

pub enum LogTarget {
    Stderr,
    File(PathBuf),
}

/// Installs the global logger. `RUST_LOG` overrides the `info` default.
pub fn init_logging(target: LogTarget) -> io::Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.format_timestamp_millis();
    if let LogTarget::File(path) = target {
        let file = File::create(path)?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    let _ = builder.try_init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use clap::Parser;
    use pipsqueak::pip::port::replay::CaptureWriter;
    use pipsqueak::pip::RawPacket;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        pip: PipOpts,
    }

    #[test]
    fn options_parse() {
        let cli = Cli::parse_from(["pip", "-d", "/dev/ttyUSB0", "--variant", "legacy"]);
        assert_eq!(cli.pip.devices, vec!["/dev/ttyUSB0".to_string()]);
        assert_eq!(cli.pip.variant_of("/dev/ttyUSB0"), Variant::LegacyParity);
        assert!(Cli::try_parse_from(["pip", "-d", "/dev/ttyUSB0", "--replay", "x.pip"]).is_err());
        assert!(Cli::try_parse_from(["pip", "--variant", "bogus"]).is_err());
    }

    #[test]
    fn decoders_share_offset() {
        let d = Decoders::new(Some(12.5));
        assert_eq!(d.get(Variant::LegacyParity).binary_temp_offset(), 12.5);
        assert_eq!(d.get(Variant::ModernCrc).variant(), Variant::ModernCrc);
        let d = Decoders::new(None);
        assert_eq!(d.get(Variant::ModernCrc).binary_temp_offset(), 40.0);
    }

    #[test]
    fn replay_pool_yields_capture() {
        let path = std::env::temp_dir().join(format!("pipsqueak-tools-{}.pip", std::process::id()));
        let start = Utc::now();
        let mut w = CaptureWriter::new(File::create(&path).unwrap(), start);
        let mut data = vec![0u8; 14];
        data[1] = 0x12;
        data[11] = 60;
        data[12] = 0x80 | 0x30;
        w.write(&RawPacket {
            variant: Variant::ModernCrc,
            data,
            received_at: start,
        })
        .unwrap();
        w.flush().unwrap();
        drop(w);

        let opts = PipOpts {
            replay: Some(path.clone()),
            ..Default::default()
        };
        let mut pool = opts.open_pool(&Settings::default(), false).unwrap();
        assert_eq!(pool.len(), 1);
        let pkts = pool.poll();
        assert_eq!(pkts.len(), 1);
        assert_eq!(pkts[0].data[1], 0x12);
        std::fs::remove_file(&path).unwrap();
    }
}

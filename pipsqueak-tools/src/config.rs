//! Settings file
//!
//! Every field is optional in the YAML file. Command line flags take
//! precedence over the file.

use clap::Args;
use pipsqueak::dash::IdFormat;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid settings in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdDisplay {
    #[default]
    Decimal,
    Hex,
}

impl From<IdDisplay> for IdFormat {
    fn from(d: IdDisplay) -> IdFormat {
        match d {
            IdDisplay::Decimal => IdFormat::Decimal,
            IdDisplay::Hex => IdFormat::Hex,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Seconds without a key press before the screen saver starts. 0 disables it.
    pub idle_timeout_s: u64,
    pub history_capacity: usize,
    pub default_interval_ms: i64,
    pub record_dir: PathBuf,
    pub id_format: IdDisplay,
    pub csv_hex_column: bool,
    pub csv_moisture_column: bool,
    pub rescan_interval_s: u64,
    pub poll_timeout_ms: u64,
    pub idle_sleep_ms: u64,
    pub read_retries: usize,
    /// Packets weaker than this are ignored.
    pub min_rssi: Option<f32>,
    /// Replaces the per-variant offset of the binary sensing temperature.
    pub binary_temp_offset: Option<f32>,
    pub log_file: PathBuf,
    pub fps: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            idle_timeout_s: 3600,
            history_capacity: pipsqueak::data::DEFAULT_HISTORY_CAPACITY,
            default_interval_ms: pipsqueak::data::DEFAULT_INTERVAL_MS,
            record_dir: PathBuf::from("."),
            id_format: IdDisplay::Decimal,
            csv_hex_column: true,
            csv_moisture_column: true,
            rescan_interval_s: 30,
            poll_timeout_ms: 100,
            idle_sleep_ms: 50,
            read_retries: 3,
            min_rssi: None,
            binary_temp_offset: None,
            log_file: PathBuf::from("pip-console.log"),
            fps: 10,
        }
    }
}

impl Settings {
    pub fn from_yaml(text: &str) -> Result<Settings, serde_yaml::Error> {
        if text.trim().is_empty() {
            return Ok(Settings::default());
        }
        serde_yaml::from_str(text)
    }

    /// Defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Settings, ConfigError> {
        let Some(path) = path else {
            return Ok(Settings::default());
        };
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Settings::from_yaml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn merge(&mut self, args: &SettingsArgs) {
        if let Some(v) = args.idle_timeout {
            self.idle_timeout_s = v;
        }
        if let Some(v) = args.history {
            self.history_capacity = v;
        }
        if let Some(v) = &args.record_dir {
            self.record_dir = v.clone();
        }
        if args.hex {
            self.id_format = IdDisplay::Hex;
        }
        if let Some(v) = args.min_rssi {
            self.min_rssi = Some(v);
        }
        if let Some(v) = args.binary_temp_offset {
            self.binary_temp_offset = Some(v);
        }
        if let Some(v) = &args.log_file {
            self.log_file = v.clone();
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_s)
    }

    pub fn rescan_interval(&self) -> Duration {
        Duration::from_secs(self.rescan_interval_s.max(1))
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms.max(1))
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }

    pub fn frame(&self) -> Duration {
        Duration::from_millis(1000 / self.fps.max(1))
    }
}

/// Command line overrides for the settings file.
#[derive(Args, Debug, Clone, Default)]
pub struct SettingsArgs {
    /// Seconds without input before the screen saver starts (0 disables it)
    #[arg(long = "idle-timeout", value_name = "SECONDS")]
    pub idle_timeout: Option<u64>,

    /// Samples kept per tag for the history view
    #[arg(long = "history", value_name = "N")]
    pub history: Option<usize>,

    /// Directory for recordings and snapshots
    #[arg(long = "record-dir", value_name = "DIR")]
    pub record_dir: Option<PathBuf>,

    /// Show tag ids in hex
    #[arg(short = 'x', long = "hex")]
    pub hex: bool,

    /// Ignore packets weaker than this (dBm)
    #[arg(long = "min-rssi", allow_negative_numbers = true)]
    pub min_rssi: Option<f32>,

    /// Offset subtracted from the binary sensing temperature
    #[arg(long = "binary-temp-offset", allow_negative_numbers = true)]
    pub binary_temp_offset: Option<f32>,

    /// Log file
    #[arg(long = "log-file", value_name = "FILE")]
    pub log_file: Option<PathBuf>,
}

// src/settings.rs
//
// ttytap settings, loaded from an optional TOML file. Every field has a
// default so a partial (or missing) file is fine; command-line flags are
// applied on top by the CLI.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::io::capture::DEFAULT_DEDUP_LIFETIME;
use crate::io::serial::{Parity, SerialConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TapSettings {
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default)]
    pub parity: Parity,
    /// Seconds a payload suppresses identical payloads in monitor mode (0 disables)
    #[serde(default = "default_dedup_lifetime_secs")]
    pub dedup_lifetime_secs: f64,
    /// Directory for log files (None = stderr only)
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_baud_rate() -> u32 {
    115_200
}
fn default_data_bits() -> u8 {
    8
}
fn default_stop_bits() -> u8 {
    1
}
fn default_dedup_lifetime_secs() -> f64 {
    3.0
}

impl Default for TapSettings {
    fn default() -> Self {
        Self {
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: Parity::default(),
            dedup_lifetime_secs: default_dedup_lifetime_secs(),
            log_dir: None,
        }
    }
}

impl TapSettings {
    /// Load settings from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let settings: TapSettings = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.baud_rate == 0 {
            return Err(ConfigError::Invalid {
                field: "baud_rate",
                reason: "must be non-zero".to_string(),
            });
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(ConfigError::Invalid {
                field: "data_bits",
                reason: format!("{} is not one of 5, 6, 7, 8", self.data_bits),
            });
        }
        if !(1..=2).contains(&self.stop_bits) {
            return Err(ConfigError::Invalid {
                field: "stop_bits",
                reason: format!("{} is not one of 1, 2", self.stop_bits),
            });
        }
        // Also catches values too large for a Duration
        if Duration::try_from_secs_f64(self.dedup_lifetime_secs).is_err() {
            return Err(ConfigError::Invalid {
                field: "dedup_lifetime_secs",
                reason: format!("{} is not a usable number of seconds", self.dedup_lifetime_secs),
            });
        }
        Ok(())
    }

    pub fn serial_config(&self) -> SerialConfig {
        SerialConfig {
            baud_rate: self.baud_rate,
            data_bits: self.data_bits,
            stop_bits: self.stop_bits,
            parity: self.parity,
        }
    }

    /// Dedup window. Falls back to the default for values `validate` rejects.
    pub fn dedup_lifetime(&self) -> Duration {
        Duration::try_from_secs_f64(self.dedup_lifetime_secs).unwrap_or(DEFAULT_DEDUP_LIFETIME)
    }
}

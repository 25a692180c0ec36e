//! Server configuration.
//!
//! Values come from [`ServerConfig::default`], optionally overlaid by a TOML
//! file, then by command-line flags in `ringlogd`.
//!
//! ```toml
//! bind_addr = "0.0.0.0:9000"
//! mode = "device"
//! device_capacity = 10
//! timestamp_interval_secs = 10
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ringlog_buffer::DEFAULT_CAPACITY;
use ringlog_error::{Result, RinglogError};
use serde::Deserialize;

pub const DEFAULT_PORT: u16 = 9000;
pub const DEFAULT_DATA_FILE: &str = "/var/tmp/aesdsocketdata";
pub const DEFAULT_CHUNK_SIZE: usize = 1024;
pub const DEFAULT_TIMESTAMP_INTERVAL_SECS: u64 = 10;

/// Which storage backs the shared log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreMode {
    /// Unbounded append-only file, removed at shutdown.
    #[default]
    Log,
    /// Bounded in-memory ring exposed as a character device.
    Device,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub mode: StoreMode,
    /// Backing file in [`StoreMode::Log`].
    pub data_file: PathBuf,
    /// Ring slots in [`StoreMode::Device`].
    pub device_capacity: usize,
    /// Period of the timestamp record; 0 disables it. Never runs in device mode.
    pub timestamp_interval_secs: u64,
    /// Receive and stream chunk size in bytes.
    pub chunk_size: usize,
    /// Detach from the controlling terminal after binding.
    pub daemon: bool,
    /// Diagnostic log destination; stderr when unset.
    pub log_file: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            mode: StoreMode::Log,
            data_file: PathBuf::from(DEFAULT_DATA_FILE),
            device_capacity: DEFAULT_CAPACITY,
            timestamp_interval_secs: DEFAULT_TIMESTAMP_INTERVAL_SECS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            daemon: false,
            log_file: None,
        }
    }
}

impl ServerConfig {
    /// Parse a TOML document; absent keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|err| RinglogError::Config {
            detail: err.to_string(),
        })
    }

    /// Read and parse a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|err| RinglogError::Config {
            detail: format!("cannot read {}: {err}", path.display()),
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(RinglogError::Config {
                detail: "chunk_size must be > 0".to_owned(),
            });
        }
        match self.mode {
            StoreMode::Device if self.device_capacity == 0 => Err(RinglogError::Config {
                detail: "device_capacity must be > 0".to_owned(),
            }),
            StoreMode::Log if self.data_file.as_os_str().is_empty() => Err(RinglogError::Config {
                detail: "data_file must be set in log mode".to_owned(),
            }),
            _ => Ok(()),
        }
    }

    /// Timestamp period, or `None` when the task must not run.
    #[must_use]
    pub fn timestamp_interval(&self) -> Option<Duration> {
        match self.mode {
            StoreMode::Device => None,
            StoreMode::Log if self.timestamp_interval_secs == 0 => None,
            StoreMode::Log => Some(Duration::from_secs(self.timestamp_interval_secs)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_classic_deployment() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.mode, StoreMode::Log);
        assert_eq!(config.data_file, PathBuf::from("/var/tmp/aesdsocketdata"));
        assert_eq!(config.device_capacity, 10);
        assert_eq!(config.timestamp_interval(), Some(Duration::from_secs(10)));
        config.validate().unwrap();
    }

    #[test]
    fn toml_overrides_only_given_keys() {
        let config = ServerConfig::from_toml_str(
            r#"
            bind_addr = "127.0.0.1:9100"
            mode = "device"
            device_capacity = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:9100".parse().unwrap());
        assert_eq!(config.mode, StoreMode::Device);
        assert_eq!(config.device_capacity, 4);
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.timestamp_interval(), None);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = ServerConfig::from_toml_str("prot = 9000").unwrap_err();
        assert!(err.is_fatal_setup());
    }

    #[test]
    fn validation_catches_zero_sizes() {
        let config = ServerConfig {
            chunk_size: 0,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());

        let config = ServerConfig {
            mode: StoreMode::Device,
            device_capacity: 0,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_interval_disables_timestamps() {
        let config = ServerConfig {
            timestamp_interval_secs: 0,
            ..ServerConfig::default()
        };
        assert_eq!(config.timestamp_interval(), None);
    }

    #[test]
    fn load_reports_missing_file_as_config_error() {
        let err = ServerConfig::load(Path::new("/nonexistent/ringlog.toml")).unwrap_err();
        assert!(matches!(err, RinglogError::Config { .. }));
    }
}

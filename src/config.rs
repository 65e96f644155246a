//! Service configuration.
//!
//! Settings are loaded from an optional TOML file plus `LASERCTL_*`
//! environment overrides (double underscore as the section separator, e.g.
//! `LASERCTL_SERVER__BIND`). Every field has a default, so the service runs
//! without any configuration present.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::AppResult;
use crate::ports;

/// Top-level settings for the control service.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub serial: SerialSettings,
    pub command: CommandSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            serial: SerialSettings::default(),
            command: CommandSettings::default(),
        }
    }
}

/// HTTP control server settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Bind address for the control API.
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3050".to_string(),
        }
    }
}

/// Serial link settings.
///
/// Framing is fixed at 8 data bits, 1 stop bit, no parity; the device does
/// not negotiate. Only the parameters below are adjustable.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Line speed in baud.
    pub baud_rate: u32,
    /// Delay after opening before the device accepts traffic.
    #[serde(with = "humantime_serde")]
    pub settle_delay: Duration,
    /// Capacity of the buffered byte queue between the receive loop and the
    /// response dispatcher.
    pub receive_buffer: usize,
    /// Directory listed for device enumeration.
    pub device_dir: PathBuf,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: 921_600,
            settle_delay: Duration::from_millis(500),
            receive_buffer: 128,
            device_dir: PathBuf::from(ports::DEVICE_DIR),
        }
    }
}

/// Per-exchange command settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CommandSettings {
    /// Deadline applied to every request/response exchange.
    #[serde(with = "humantime_serde")]
    pub exchange_timeout: Duration,
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            exchange_timeout: Duration::from_secs(1),
        }
    }
}

impl Settings {
    /// Load settings from an optional file, with environment overrides on top.
    pub fn new(path: Option<&Path>) -> AppResult<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let loaded = builder
            .add_source(Environment::with_prefix("LASERCTL").separator("__"))
            .build()?;
        Ok(loaded.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = Settings::new(None).unwrap();
        assert_eq!(settings.server.bind, "0.0.0.0:3050");
        assert_eq!(settings.serial.baud_rate, 921_600);
        assert_eq!(settings.serial.settle_delay, Duration::from_millis(500));
        assert_eq!(settings.command.exchange_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_file_overrides() {
        let mut file = tempfile::NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            "[server]\nbind = \"127.0.0.1:4000\"\n\n[serial]\nbaud_rate = 115200\nsettle_delay = \"50ms\"\n"
        )
        .unwrap();

        let settings = Settings::new(Some(file.path())).unwrap();
        assert_eq!(settings.server.bind, "127.0.0.1:4000");
        assert_eq!(settings.serial.baud_rate, 115_200);
        assert_eq!(settings.serial.settle_delay, Duration::from_millis(50));
        // untouched sections keep their defaults
        assert_eq!(settings.command.exchange_timeout, Duration::from_secs(1));
    }
}

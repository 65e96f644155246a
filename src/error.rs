//! Custom error types for the application.
//!
//! This module defines the primary error type, `LaserError`, for the entire
//! service. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the failures that can occur between the HTTP
//! boundary and the serial wire:
//!
//! - **`NotOpen` / `AlreadyOpen` / `OpenFailed`**: serial link lifecycle
//!   violations and transport-level open errors.
//! - **`NoSink` / `NotFound`**: misuse of the correlation engine — a request
//!   registered without a result channel, or an unregister for an entry that
//!   was already resolved or evicted.
//! - **`DeadlineExceeded` / `Disconnected`**: a per-exchange timeout, or the
//!   serial stream ending while the exchange was still outstanding. Both name
//!   the command that failed.
//! - **`UnknownDevice` / `DeviceList`**: device enumeration failures when
//!   connecting by name.
//!
//! By using `#[from]`, `LaserError` can be seamlessly created from underlying
//! error types, simplifying error handling throughout the service with the
//! `?` operator.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, LaserError>;

#[derive(Error, Debug)]
pub enum LaserError {
    #[error("serial link is not open")]
    NotOpen,

    #[error("serial link is already open on {0}")]
    AlreadyOpen(String),

    #[error("failed to open serial link {path}: {source}")]
    OpenFailed {
        path: String,
        #[source]
        source: tokio_serial::Error,
    },

    #[error("pending request carries no result sink")]
    NoSink,

    #[error("request not found in the pending set")]
    NotFound,

    #[error("{command} exchange timed out")]
    DeadlineExceeded { command: &'static str },

    #[error("serial link closed while {command} was outstanding")]
    Disconnected { command: &'static str },

    #[error("unknown serial device: {0}")]
    UnknownDevice(String),

    #[error("failed to list serial devices in {}: {source}", .dir.display())]
    DeviceList {
        dir: PathBuf,
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LaserError::DeadlineExceeded {
            command: "get-power",
        };
        assert_eq!(err.to_string(), "get-power exchange timed out");
    }

    #[test]
    fn test_unknown_device_display() {
        let err = LaserError::UnknownDevice("usb-FTDI_FT232R".into());
        assert!(err.to_string().contains("usb-FTDI_FT232R"));
    }
}

//! Serial device enumeration.
//!
//! Stable device identifiers live as symlinks under `/dev/serial/by-id`;
//! each link resolves to the real tty node. Enumeration is a plain directory
//! listing, so callers can connect either by the stable name or by the
//! resolved path.

use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::error::{AppResult, LaserError};

/// Default directory listed for device enumeration.
pub const DEVICE_DIR: &str = "/dev/serial/by-id";

/// One enumerated serial device: stable name and resolved tty path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SerialDevice {
    pub name: String,
    pub path: String,
}

/// List the serial devices present under `dir`.
///
/// Entries that are not readable symlinks are skipped rather than failing
/// the whole listing.
pub fn list_serial_ports(dir: &Path) -> AppResult<Vec<SerialDevice>> {
    let entries = fs::read_dir(dir).map_err(|source| LaserError::DeviceList {
        dir: dir.to_path_buf(),
        source,
    })?;

    let mut devices = Vec::new();
    for entry in entries.flatten() {
        let link = dir.join(entry.file_name());
        let Ok(target) = fs::read_link(&link) else {
            continue;
        };
        let joined = dir.join(&target);
        let resolved = fs::canonicalize(&joined).unwrap_or(joined);
        devices.push(SerialDevice {
            name: entry.file_name().to_string_lossy().into_owned(),
            path: resolved.to_string_lossy().into_owned(),
        });
    }
    devices.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(devices)
}

/// Resolve a stable device name to its tty path.
pub fn resolve_name(dir: &Path, name: &str) -> AppResult<String> {
    list_serial_ports(dir)?
        .into_iter()
        .find(|device| device.name == name)
        .map(|device| device.path)
        .ok_or_else(|| LaserError::UnknownDevice(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_directory_errors() {
        let err = list_serial_ports(Path::new("/nonexistent/serial/by-id")).unwrap_err();
        assert!(matches!(err, LaserError::DeviceList { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_lists_symlinked_devices() {
        let dir = tempfile::tempdir().unwrap();
        let tty = dir.path().join("ttyUSB9");
        std::fs::write(&tty, b"").unwrap();
        let by_id = dir.path().join("by-id");
        std::fs::create_dir(&by_id).unwrap();
        std::os::unix::fs::symlink("../ttyUSB9", by_id.join("usb-Acme_Laser-if00")).unwrap();

        let devices = list_serial_ports(&by_id).unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name, "usb-Acme_Laser-if00");
        assert!(devices[0].path.ends_with("ttyUSB9"));

        let path = resolve_name(&by_id, "usb-Acme_Laser-if00").unwrap();
        assert_eq!(path, devices[0].path);
    }

    #[cfg(unix)]
    #[test]
    fn test_unknown_name() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_name(dir.path(), "usb-missing").unwrap_err();
        assert!(matches!(err, LaserError::UnknownDevice(_)));
    }
}

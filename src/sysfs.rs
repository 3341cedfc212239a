//! Sysfs gateway: integer, float and string I/O on kernel attribute files.
//!
//! Not every sensor exposes every attribute, so read and write failures here
//! are routine. They are logged at low severity and surfaced as
//! [`MuxError::Sysfs`]; callers decide whether an absent attribute is fatal.
//! It almost never is: the layout planner treats unreadable channels as
//! disabled.
//!
//! [`IioPaths`] collects the root directories and formats every kernel path
//! the core touches. The roots are configurable so tests can point the core
//! at a scratch directory instead of `/sys` and `/dev`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::error::{MuxError, Result};

/// Root directories for the kernel interfaces the core talks to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IioPaths {
    /// Directory holding the per-device sysfs trees (`iio:deviceN/...`).
    pub sysfs_root: PathBuf,
    /// Directory holding the character device nodes (`iio:deviceN`).
    pub dev_root: PathBuf,
}

impl Default for IioPaths {
    fn default() -> Self {
        Self {
            sysfs_root: PathBuf::from("/sys/bus/iio/devices"),
            dev_root: PathBuf::from("/dev"),
        }
    }
}

impl IioPaths {
    /// Sysfs directory of one IIO device.
    pub fn device_dir(&self, dev_num: u32) -> PathBuf {
        self.sysfs_root.join(format!("iio:device{dev_num}"))
    }

    /// `buffer/enable` attribute (integer 0/1).
    pub fn buffer_enable(&self, dev_num: u32) -> PathBuf {
        self.device_dir(dev_num).join("buffer").join("enable")
    }

    /// `trigger/current_trigger` attribute (string).
    pub fn current_trigger(&self, dev_num: u32) -> PathBuf {
        self.device_dir(dev_num)
            .join("trigger")
            .join("current_trigger")
    }

    /// A per-channel attribute under `scan_elements/` (`_en`, `_type` or
    /// `_index` file, named by the catalog).
    pub fn scan_element(&self, dev_num: u32, attr: &str) -> PathBuf {
        self.device_dir(dev_num).join("scan_elements").join(attr)
    }

    /// `<tag>_sampling_frequency` attribute (integer Hz).
    pub fn sampling_frequency(&self, dev_num: u32, tag: &str) -> PathBuf {
        self.device_dir(dev_num)
            .join(format!("{tag}_sampling_frequency"))
    }

    /// Character device node (`/dev/iio:deviceN` by default).
    pub fn device_node(&self, dev_num: u32) -> PathBuf {
        self.dev_root.join(format!("iio:device{dev_num}"))
    }
}

fn unavailable(path: &Path, source: io::Error) -> MuxError {
    MuxError::Sysfs {
        path: path.to_path_buf(),
        source,
    }
}

/// Read a whole attribute file as a trimmed string.
pub fn read_str(path: &Path) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(raw) => {
            let value = raw.trim_end().to_string();
            trace!(path = %path.display(), %value, "sysfs read");
            Ok(value)
        }
        Err(e) => {
            debug!(path = %path.display(), error = %e, "cannot read sysfs attribute");
            Err(unavailable(path, e))
        }
    }
}

/// Read an attribute as a signed integer.
pub fn read_int(path: &Path) -> Result<i64> {
    let raw = read_str(path)?;
    raw.trim().parse().map_err(|e| {
        warn!(path = %path.display(), value = %raw, "sysfs attribute is not an integer");
        unavailable(path, io::Error::new(io::ErrorKind::InvalidData, e))
    })
}

/// Read an attribute as a float.
pub fn read_float(path: &Path) -> Result<f64> {
    let raw = read_str(path)?;
    raw.trim().parse().map_err(|e| {
        warn!(path = %path.display(), value = %raw, "sysfs attribute is not a float");
        unavailable(path, io::Error::new(io::ErrorKind::InvalidData, e))
    })
}

/// Write a string to an attribute file.
pub fn write_str(path: &Path, value: &str) -> Result<()> {
    match fs::write(path, value) {
        Ok(()) => {
            trace!(path = %path.display(), %value, "sysfs write");
            Ok(())
        }
        Err(e) => {
            debug!(path = %path.display(), %value, error = %e, "cannot write sysfs attribute");
            Err(unavailable(path, e))
        }
    }
}

/// Write a decimal integer to an attribute file.
pub fn write_int(path: &Path, value: i64) -> Result<()> {
    write_str(path, &value.to_string())
}

/// Write a float to an attribute file.
pub fn write_float(path: &Path, value: f64) -> Result<()> {
    write_str(path, &value.to_string())
}

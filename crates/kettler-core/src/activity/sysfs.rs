//! Linux sysfs GPIO input

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::PinReader;

/// GPIO input read through `/sys/class/gpio`
#[derive(Debug)]
pub struct SysfsPin {
    value_path: PathBuf,
}

impl SysfsPin {
    /// Export `pin` (BCM numbering on a Raspberry Pi) if needed and configure
    /// it as an input.
    pub fn open(pin: u32) -> io::Result<Self> {
        Self::open_in(Path::new("/sys/class/gpio"), pin)
    }

    /// Same as [`SysfsPin::open`] with a different sysfs root
    pub fn open_in(root: &Path, pin: u32) -> io::Result<Self> {
        let pin_dir = root.join(format!("gpio{pin}"));
        if !pin_dir.exists() {
            fs::write(root.join("export"), pin.to_string())?;
            tracing::debug!(pin, "Exported GPIO pin");
        }

        let direction = pin_dir.join("direction");
        if direction.exists() {
            fs::write(&direction, "in")?;
        }

        Ok(Self {
            value_path: pin_dir.join("value"),
        })
    }
}

impl PinReader for SysfsPin {
    fn read_level(&mut self) -> io::Result<bool> {
        let raw = fs::read_to_string(&self.value_path)?;
        match raw.trim() {
            "0" => Ok(false),
            "1" => Ok(true),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected GPIO value {other:?}"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_exported_pin() {
        let root = tempfile::tempdir().unwrap();
        let pin_dir = root.path().join("gpio17");
        fs::create_dir(&pin_dir).unwrap();
        fs::write(pin_dir.join("direction"), "out").unwrap();
        fs::write(pin_dir.join("value"), "1\n").unwrap();

        let mut pin = SysfsPin::open_in(root.path(), 17).unwrap();
        assert!(pin.read_level().unwrap());
        assert_eq!(fs::read_to_string(pin_dir.join("direction")).unwrap(), "in");

        fs::write(pin_dir.join("value"), "0\n").unwrap();
        assert!(!pin.read_level().unwrap());
    }

    #[test]
    fn test_garbage_value_is_error() {
        let root = tempfile::tempdir().unwrap();
        let pin_dir = root.path().join("gpio4");
        fs::create_dir(&pin_dir).unwrap();
        fs::write(pin_dir.join("value"), "x").unwrap();

        let mut pin = SysfsPin::open_in(root.path(), 4).unwrap();
        assert_eq!(
            pin.read_level().unwrap_err().kind(),
            io::ErrorKind::InvalidData
        );
    }
}

//! Digital output drivers.
//!
//! The relay core only needs to drive a pin high or low; this module provides
//! the [`OutputPin`] seam and the drivers that hand out pins:
//!
//! - [`SysfsDriver`]: the Linux `/sys/class/gpio` interface found on Raspberry Pi
//!   and similar boards. The pin is exported and configured as an output when
//!   opened.
//! - [`DryRunDriver`]: logs every write without touching hardware, used by
//!   `--dry-run` and on development machines.
//! - `RecordingDriver` (tests and `testing-support`): remembers every level
//!   written so assertions can check the physical side of a transition.
//!
//! Writes have no failure channel. A sysfs write error is logged and the relay
//! keeps its logical state.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{RelayError, RelayResult};
use crate::logger::Logger;

/// A single digital output.
#[cfg_attr(test, mockall::automock)]
pub trait OutputPin: Send {
    /// Drive the output high (relay ON).
    fn set_high(&mut self);

    /// Drive the output low (relay OFF).
    fn set_low(&mut self);
}

/// Hands out output pins by GPIO number.
pub trait OutputDriver: Send + Sync {
    /// Open `gpio` as an output.
    fn open(&self, gpio: u8) -> RelayResult<Box<dyn OutputPin>>;

    /// Human-readable driver name for startup logs.
    fn name(&self) -> &'static str;
}

// # Sysfs

/// Driver for the Linux sysfs GPIO interface.
pub struct SysfsDriver {
    base: PathBuf,
    logger: Logger,
}

impl SysfsDriver {
    pub fn new(logger: Logger) -> Self {
        Self::with_base("/sys/class/gpio", logger)
    }

    /// Use an alternative sysfs root (tests, containers with remapped sysfs).
    pub fn with_base(base: impl Into<PathBuf>, logger: Logger) -> Self {
        Self {
            base: base.into(),
            logger,
        }
    }
}

impl OutputDriver for SysfsDriver {
    fn open(&self, gpio: u8) -> RelayResult<Box<dyn OutputPin>> {
        Ok(Box::new(SysfsPin::open(&self.base, gpio, self.logger.clone())?))
    }

    fn name(&self) -> &'static str {
        "sysfs"
    }
}

/// Output pin backed by `/sys/class/gpio/gpioN/value`.
pub struct SysfsPin {
    gpio: u8,
    value_path: PathBuf,
    logger: Logger,
}

impl SysfsPin {
    fn open(base: &Path, gpio: u8, logger: Logger) -> RelayResult<Self> {
        let pin_dir = base.join(format!("gpio{gpio}"));
        let unavailable =
            |e: std::io::Error| RelayError::OutputUnavailable(format!("GPIO {gpio}: {e}"));

        if !pin_dir.exists() {
            fs::write(base.join("export"), gpio.to_string()).map_err(unavailable)?;
        }
        fs::write(pin_dir.join("direction"), "out").map_err(unavailable)?;

        Ok(Self {
            gpio,
            value_path: pin_dir.join("value"),
            logger,
        })
    }

    fn write_level(&mut self, level: &str) {
        if let Err(e) = fs::write(&self.value_path, level) {
            log_error!(
                self.logger,
                "failed to write {level} to GPIO {}: {e}",
                self.gpio
            );
        }
    }
}

impl OutputPin for SysfsPin {
    fn set_high(&mut self) {
        self.write_level("1");
    }

    fn set_low(&mut self) {
        self.write_level("0");
    }
}

// # Dry run

/// Driver that only logs pin writes.
pub struct DryRunDriver {
    logger: Logger,
}

impl DryRunDriver {
    pub fn new(logger: Logger) -> Self {
        Self { logger }
    }
}

impl OutputDriver for DryRunDriver {
    fn open(&self, gpio: u8) -> RelayResult<Box<dyn OutputPin>> {
        Ok(Box::new(DryRunPin {
            gpio,
            logger: self.logger.clone(),
        }))
    }

    fn name(&self) -> &'static str {
        "dry-run"
    }
}

struct DryRunPin {
    gpio: u8,
    logger: Logger,
}

impl OutputPin for DryRunPin {
    fn set_high(&mut self) {
        log_debug!(self.logger, "GPIO {} -> high", self.gpio);
    }

    fn set_low(&mut self) {
        log_debug!(self.logger, "GPIO {} -> low", self.gpio);
    }
}

// # Recording (tests)

#[cfg(any(test, feature = "testing-support"))]
pub use recording::{RecordingDriver, RecordingPin};

#[cfg(any(test, feature = "testing-support"))]
mod recording {
    use super::{OutputDriver, OutputPin};
    use crate::error::RelayResult;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// Pin that remembers every level written to it. Clones share history.
    #[derive(Clone, Default)]
    pub struct RecordingPin {
        writes: Arc<Mutex<Vec<bool>>>,
    }

    impl RecordingPin {
        /// Every level written so far, `true` for high.
        pub fn writes(&self) -> Vec<bool> {
            self.writes.lock().unwrap().clone()
        }

        /// The last level written, if any.
        pub fn level(&self) -> Option<bool> {
            self.writes.lock().unwrap().last().copied()
        }
    }

    impl OutputPin for RecordingPin {
        fn set_high(&mut self) {
            self.writes.lock().unwrap().push(true);
        }

        fn set_low(&mut self) {
            self.writes.lock().unwrap().push(false);
        }
    }

    /// Driver handing out [`RecordingPin`]s, retrievable by GPIO number.
    #[derive(Default)]
    pub struct RecordingDriver {
        pins: Mutex<HashMap<u8, RecordingPin>>,
    }

    impl RecordingDriver {
        pub fn new() -> Self {
            Self::default()
        }

        /// The pin opened for `gpio` (created on demand).
        pub fn pin(&self, gpio: u8) -> RecordingPin {
            self.pins.lock().unwrap().entry(gpio).or_default().clone()
        }
    }

    impl OutputDriver for RecordingDriver {
        fn open(&self, gpio: u8) -> RelayResult<Box<dyn OutputPin>> {
            Ok(Box::new(self.pin(gpio)))
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::LogFormat;

    #[test]
    fn test_sysfs_pin_exports_and_writes_levels() {
        let dir = tempfile::tempdir().unwrap();
        // Simulate the kernel having created the pin directory on export
        fs::create_dir(dir.path().join("gpio17")).unwrap();

        let driver = SysfsDriver::with_base(dir.path(), Logger::disabled());
        let mut pin = driver.open(17).unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("gpio17/direction")).unwrap(),
            "out"
        );

        pin.set_high();
        assert_eq!(
            fs::read_to_string(dir.path().join("gpio17/value")).unwrap(),
            "1"
        );
        pin.set_low();
        assert_eq!(
            fs::read_to_string(dir.path().join("gpio17/value")).unwrap(),
            "0"
        );
    }

    #[test]
    fn test_sysfs_open_fails_without_gpio_interface() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("no-such-sysfs");
        let driver = SysfsDriver::with_base(&missing, Logger::disabled());
        assert!(matches!(
            driver.open(4),
            Err(RelayError::OutputUnavailable(_))
        ));
    }

    #[test]
    fn test_dry_run_pin_logs_writes() {
        let log = Logger::memory(LogFormat::Pretty);
        let mut pin = DryRunDriver::new(log.clone()).open(22).unwrap();
        pin.set_high();
        pin.set_low();
        assert_eq!(
            log.captured(),
            vec!["┣[DEBUG] GPIO 22 -> high", "┣[DEBUG] GPIO 22 -> low"]
        );
    }

    #[test]
    fn test_recording_driver_shares_pin_history() {
        let driver = RecordingDriver::new();
        let mut pin = driver.open(5).unwrap();
        pin.set_high();
        assert_eq!(driver.pin(5).writes(), vec![true]);
        assert_eq!(driver.pin(5).level(), Some(true));
        assert_eq!(driver.pin(6).level(), None);
    }
}

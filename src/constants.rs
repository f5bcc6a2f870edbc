//! Application-wide constants and defaults.
//!
//! Values here are shared between the CLI, configuration loading and the
//! scheduling engine so that defaults stay consistent across entry points.

use std::time::Duration;

// # Application Defaults

/// Default HTTP listen address carried in the configuration document.
pub const DEFAULT_LISTEN_ADDR: &str = ":8011";

/// Default IANA timezone used when neither CLI nor document provides one.
pub const DEFAULT_TIMEZONE: &str = "Europe/Rome";

/// Configuration file name searched in the user config directory.
pub const CONFIG_FILE_NAME: &str = "pirelay.json";

/// Application directory under the user config directory.
pub const CONFIG_DIR_NAME: &str = "pirelay";

/// Lock file name placed in the runtime directory.
pub const LOCK_FILE_NAME: &str = "pirelay.lock";

// # Schedule Names

/// Reserved schedule name owned by the solar subsystem for sunrise.
pub const SUNRISE_SCHEDULE: &str = "sunrise";

/// Reserved schedule name owned by the solar subsystem for sunset.
pub const SUNSET_SCHEDULE: &str = "sunset";

// # Scheduler Timing

/// Upper bound for a single blocking wait in the scheduler driver.
///
/// The driver re-reads the clock at least this often so that wall clock
/// jumps (NTP sync, suspend/resume) are noticed.
pub const MAX_SCHEDULER_WAIT: Duration = Duration::from_secs(60);

/// Wait chunk used when the time source is simulated.
pub const SIMULATED_POLL_INTERVAL: Duration = Duration::from_millis(10);

// # Validation Limits

/// Highest BCM GPIO number exposed on the Raspberry Pi header.
pub const MAXIMUM_GPIO: u8 = 27;

pub const MINIMUM_LATITUDE: f64 = -90.0;
pub const MAXIMUM_LATITUDE: f64 = 90.0;
pub const MINIMUM_LONGITUDE: f64 = -180.0;
pub const MAXIMUM_LONGITUDE: f64 = 180.0;

// # Exit Codes

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;

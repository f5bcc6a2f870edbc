//! Configuration system for pirelay.
//!
//! The configuration document describes the daemon and every relay it drives:
//!
//! ```json
//! {
//!   "listen_addr": ":8011",
//!   "location": [41.9, 12.5],
//!   "timezone": "Europe/Rome",
//!   "relays": [
//!     {
//!       "name": "garden",
//!       "gpio": 17,
//!       "state": 0,
//!       "schedules": [{"name": "evening", "at": "18h30m0s", "state": 1, "for": "2h0m0s"}],
//!       "sun": {"enabled": false}
//!     }
//!   ]
//! }
//! ```
//!
//! The same document can be written in TOML when the file name ends in
//! `.toml`. Command-line values act as defaults; anything present in the
//! document overrides them.
//!
//! ## Configuration Sources
//!
//! 1. The file given with `-c/--config`.
//! 2. **XDG_CONFIG_HOME**/pirelay/pirelay.json, if it exists.
//! 3. Otherwise the command-line values alone.
//!
//! ## Location
//!
//! `location` is a `[latitude, longitude]` pair. `[0, 0]` (or a missing
//! field) means "no location", which keeps older documents working; solar
//! schedules then fail validation.

pub mod loading;
pub mod validation;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::args::RunOptions;
use crate::error::RelayResult;
use crate::logger::Logger;
use crate::relay::RelayDefinition;
use crate::solar::Location;

pub use loading::{default_config_path, load, load_from_path};
pub use validation::validate_config;

/// The resolved configuration: command-line defaults with the document
/// applied on top.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Config {
    pub listen_addr: String,
    #[serde(serialize_with = "serialize_location")]
    pub location: Option<Location>,
    pub timezone: String,
    pub relays: Vec<RelayDefinition>,
}

impl Config {
    /// Configuration carrying only the command-line settings.
    pub fn from_run_options(options: &RunOptions) -> RelayResult<Self> {
        Ok(Self {
            listen_addr: options.listen_addr.clone(),
            location: Location::from_pair([options.latitude, options.longitude])?,
            timezone: options.timezone.clone(),
            relays: Vec::new(),
        })
    }

    /// Pretty-printed JSON form, as written by `--dump-config`.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Log the effective configuration.
    pub fn log_summary(&self, log: &Logger) {
        log_block_start!(log, "Loaded configuration");
        log_indented!(log, "Listen address: {}", self.listen_addr);
        log_indented!(log, "Timezone: {}", self.timezone);
        match self.location {
            Some(location) => log_indented!(log, "Location: {location}"),
            None => log_indented!(log, "Location: unset"),
        }
        log_indented!(log, "Relays: {}", self.relays.len());
        for relay in &self.relays {
            log_debug!(
                log,
                "{} on GPIO {}: {} schedule(s), sun {}",
                relay.effective_name(),
                relay.gpio,
                relay.schedules.len(),
                if relay.sun.enabled { "enabled" } else { "disabled" }
            );
        }
    }
}

fn serialize_location<S: Serializer>(
    location: &Option<Location>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    Location::to_pair(*location).serialize(serializer)
}

/// Decode a `[lat, lon]` pair where `[0, 0]` or `null` means unset.
pub(crate) fn deserialize_location<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Location>, D::Error> {
    match Option::<[f64; 2]>::deserialize(deserializer)? {
        Some(pair) => Location::from_pair(pair).map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}

//! Configuration validation functionality.
//!
//! Rejects documents that could never start: unknown timezones, coordinates
//! out of range, GPIO numbers the header does not have, duplicate relays and
//! solar schedules without a location. Relay construction repeats the
//! timezone and location checks; doing them here reports every problem with
//! the relay's name before any pin is touched.

use anyhow::Result;
use chrono_tz::Tz;
use std::collections::HashSet;

use super::Config;
use crate::constants::*;

/// Comprehensive configuration validation
pub fn validate_config(config: &Config) -> Result<()> {
    if config.timezone.is_empty() {
        anyhow::bail!("timezone must be provided to work/update schedules");
    }
    if config.timezone.parse::<Tz>().is_err() {
        anyhow::bail!("unknown timezone {:?}", config.timezone);
    }

    if let Some(location) = config.location {
        if !(MINIMUM_LATITUDE..=MAXIMUM_LATITUDE).contains(&location.latitude) {
            anyhow::bail!(
                "latitude must be between -90 and 90 degrees (got {})",
                location.latitude
            );
        }
        if !(MINIMUM_LONGITUDE..=MAXIMUM_LONGITUDE).contains(&location.longitude) {
            anyhow::bail!(
                "longitude must be between -180 and 180 degrees (got {})",
                location.longitude
            );
        }
    }

    let mut gpios = HashSet::new();
    let mut names = HashSet::new();
    for relay in &config.relays {
        let name = relay.effective_name();

        if relay.gpio > MAXIMUM_GPIO {
            anyhow::bail!(
                "relay {name}: GPIO {} is out of range (0-{MAXIMUM_GPIO})",
                relay.gpio
            );
        }
        if !gpios.insert(relay.gpio) {
            anyhow::bail!("relay {name}: GPIO {} is already in use", relay.gpio);
        }
        if !names.insert(name.clone()) {
            anyhow::bail!("relay name {name} is already in use");
        }
        if relay.sun.enabled && config.location.is_none() {
            anyhow::bail!(
                "relay {name}: location coordinates must be provided to work sunset/sunrise schedules"
            );
        }

        let mut schedule_names = HashSet::new();
        for entry in &relay.schedules {
            if !schedule_names.insert(entry.name.as_str()) {
                anyhow::bail!("relay {name}: schedule {} is defined twice", entry.name);
            }
        }
    }

    Ok(())
}

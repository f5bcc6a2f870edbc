//! Sunrise and sunset instants for a location and date.
//!
//! The astronomy itself is delegated to the `sunrise` crate. The
//! [`SolarCalculator`] trait keeps the scheduling engine independent of it so
//! tests can pin sunrise/sunset to known instants.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sunrise::{Coordinates, SolarDay, SolarEvent};

use crate::constants::{MAXIMUM_LATITUDE, MAXIMUM_LONGITUDE, MINIMUM_LATITUDE, MINIMUM_LONGITUDE};
use crate::error::{RelayError, RelayResult};

/// A geographic coordinate pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    /// Validated constructor.
    pub fn new(latitude: f64, longitude: f64) -> RelayResult<Self> {
        if !(MINIMUM_LATITUDE..=MAXIMUM_LATITUDE).contains(&latitude) {
            return Err(RelayError::InvalidConfiguration(format!(
                "latitude must be between -90 and 90 degrees (got {latitude})"
            )));
        }
        if !(MINIMUM_LONGITUDE..=MAXIMUM_LONGITUDE).contains(&longitude) {
            return Err(RelayError::InvalidConfiguration(format!(
                "longitude must be between -180 and 180 degrees (got {longitude})"
            )));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    /// Decode the document's `[lat, lon]` pair, where `[0, 0]` means unset.
    pub fn from_pair(pair: [f64; 2]) -> RelayResult<Option<Self>> {
        if pair == [0.0, 0.0] {
            return Ok(None);
        }
        Self::new(pair[0], pair[1]).map(Some)
    }

    /// Encode back to the document pair, `[0, 0]` for unset.
    pub fn to_pair(location: Option<Self>) -> [f64; 2] {
        location.map_or([0.0, 0.0], |l| [l.latitude, l.longitude])
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4}°, {:.4}°", self.latitude, self.longitude)
    }
}

/// Sunrise and sunset of one day, in UTC.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SunTimes {
    pub sunrise: DateTime<Utc>,
    pub sunset: DateTime<Utc>,
}

/// Computes sunrise and sunset for a location on a calendar date.
pub trait SolarCalculator: Send + Sync {
    fn sun_times(&self, location: Location, date: NaiveDate) -> RelayResult<SunTimes>;
}

/// Calculator backed by the `sunrise` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct AstronomicalCalculator;

impl SolarCalculator for AstronomicalCalculator {
    fn sun_times(&self, location: Location, date: NaiveDate) -> RelayResult<SunTimes> {
        let coord = Coordinates::new(location.latitude, location.longitude).ok_or_else(|| {
            RelayError::InvalidConfiguration(format!("invalid coordinates {location}"))
        })?;
        let solar_day = SolarDay::new(coord, date);
        Ok(SunTimes {
            sunrise: solar_day.event_time(SolarEvent::Sunrise),
            sunset: solar_day.event_time(SolarEvent::Sunset),
        })
    }
}

/// Calculator returning the same wall-clock sunrise and sunset every day.
///
/// Times are UTC offsets from the start of the requested date.
#[derive(Debug, Clone, Copy)]
pub struct FixedSunTimes {
    pub sunrise: chrono::NaiveTime,
    pub sunset: chrono::NaiveTime,
}

impl SolarCalculator for FixedSunTimes {
    fn sun_times(&self, _location: Location, date: NaiveDate) -> RelayResult<SunTimes> {
        Ok(SunTimes {
            sunrise: date.and_time(self.sunrise).and_utc(),
            sunset: date.and_time(self.sunset).and_utc(),
        })
    }
}

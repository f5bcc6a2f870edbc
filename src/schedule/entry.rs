//! Schedule entries and the solar schedule configuration, with their wire
//! encoding.
//!
//! Decoding is strict about required fields so that malformed documents are
//! rejected before any relay is touched:
//!
//! - schedule: `name` and `at` are required; `state` defaults to OFF and
//!   `for` to zero (permanent).
//! - sun: `enabled` is required; `rise_state` and `set_state` are required
//!   when enabled; offsets default to zero.

use chrono::TimeDelta;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value, json};

use crate::duration::{format_duration, parse_duration};
use crate::error::{RelayError, RelayResult};
use crate::relay::{RelayState, parse_state};

fn malformed(msg: impl Into<String>) -> RelayError {
    RelayError::MalformedScheduleDocument(msg.into())
}

fn object<'a>(value: &'a Value, what: &str) -> RelayResult<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| malformed(format!("{what} must be an object")))
}

fn duration_field(object: &Map<String, Value>, key: &str) -> RelayResult<Option<TimeDelta>> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => parse_duration(s)
            .map(Some)
            .map_err(|e| malformed(format!("{key}: {e}"))),
        Some(other) => Err(malformed(format!(
            "{key} must be a duration string, got {other}"
        ))),
    }
}

/// One named trigger: an offset from local midnight, the state to switch to,
/// and how long to hold it before reverting (zero = permanent).
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleEntry {
    pub name: String,
    pub at: TimeDelta,
    pub state: RelayState,
    pub hold: TimeDelta,
}

impl ScheduleEntry {
    pub fn new(name: impl Into<String>, at: TimeDelta, state: RelayState) -> Self {
        Self {
            name: name.into(),
            at,
            state,
            hold: TimeDelta::zero(),
        }
    }

    pub fn held_for(mut self, hold: TimeDelta) -> Self {
        self.hold = hold;
        self
    }

    /// Decode `{name, at, state?, for?}`.
    pub fn from_value(value: &Value) -> RelayResult<Self> {
        let object = object(value, "schedule")?;

        let name = match object.get("name") {
            Some(Value::String(name)) if !name.is_empty() => name.clone(),
            Some(Value::String(_)) => return Err(malformed("schedule name cannot be empty")),
            Some(other) => return Err(malformed(format!("invalid schedule name {other}"))),
            None => return Err(malformed("missing name for schedule")),
        };
        let at = duration_field(object, "at")?
            .ok_or_else(|| malformed(format!("missing at for schedule {name}")))?;
        let state = match object.get("state") {
            Some(v) => parse_state(v)?,
            None => RelayState::Off,
        };
        let hold = duration_field(object, "for")?.unwrap_or_else(TimeDelta::zero);
        if hold < TimeDelta::zero() {
            return Err(malformed(format!(
                "hold duration for schedule {name} cannot be negative"
            )));
        }

        Ok(Self {
            name,
            at,
            state,
            hold,
        })
    }

    pub fn to_value(&self) -> Value {
        json!({
            "name": self.name,
            "at": format_duration(self.at),
            "state": self.state,
            "for": format_duration(self.hold),
        })
    }
}

impl Serialize for ScheduleEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ScheduleEntry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(&value).map_err(serde::de::Error::custom)
    }
}

/// Decode a schedule list, accepting either an array of entries or an object
/// keyed by schedule name.
pub fn schedules_from_value(value: &Value) -> RelayResult<Vec<ScheduleEntry>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items.iter().map(ScheduleEntry::from_value).collect(),
        Value::Object(map) => map
            .iter()
            .map(|(name, item)| {
                let mut item = item.clone();
                if let Some(fields) = item.as_object_mut() {
                    fields
                        .entry("name")
                        .or_insert_with(|| Value::String(name.clone()));
                }
                ScheduleEntry::from_value(&item)
            })
            .collect(),
        other => Err(malformed(format!("schedules must be a list, got {other}"))),
    }
}

/// Solar scheduling: which state to switch to at sunrise and sunset, each
/// shifted by an offset (negative = earlier).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SunConfig {
    pub enabled: bool,
    pub rise_state: RelayState,
    pub rise_offset: TimeDelta,
    pub set_state: RelayState,
    pub set_offset: TimeDelta,
}

impl SunConfig {
    /// Enabled solar scheduling with zero offsets.
    pub fn enabled(rise_state: RelayState, set_state: RelayState) -> Self {
        Self {
            enabled: true,
            rise_state,
            rise_offset: TimeDelta::zero(),
            set_state,
            set_offset: TimeDelta::zero(),
        }
    }

    pub fn with_offsets(mut self, rise_offset: TimeDelta, set_offset: TimeDelta) -> Self {
        self.rise_offset = rise_offset;
        self.set_offset = set_offset;
        self
    }

    /// Decode `{enabled, rise_state?, rise_offset?, set_state?, set_offset?}`.
    pub fn from_value(value: &Value) -> RelayResult<Self> {
        let object = object(value, "sun config")?;

        let enabled = match object.get("enabled") {
            Some(Value::Bool(b)) => *b,
            Some(other) => return Err(malformed(format!("invalid enabled setting {other}"))),
            None => return Err(malformed("missing enabled setting for sun config")),
        };
        let state_field = |key: &str, event: &str| -> RelayResult<RelayState> {
            match object.get(key) {
                Some(v) => parse_state(v),
                None if enabled => Err(malformed(format!("missing state setting for {event}"))),
                None => Ok(RelayState::Off),
            }
        };
        let rise_state = state_field("rise_state", "sunrise")?;
        let set_state = state_field("set_state", "sunset")?;

        Ok(Self {
            enabled,
            rise_state,
            rise_offset: duration_field(object, "rise_offset")?.unwrap_or_else(TimeDelta::zero),
            set_state,
            set_offset: duration_field(object, "set_offset")?.unwrap_or_else(TimeDelta::zero),
        })
    }

    pub fn to_value(&self) -> Value {
        json!({
            "enabled": self.enabled,
            "rise_state": self.rise_state,
            "rise_offset": format_duration(self.rise_offset),
            "set_state": self.set_state,
            "set_offset": format_duration(self.set_offset),
        })
    }
}

impl Serialize for SunConfig {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SunConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(&value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_decoding_defaults() {
        let entry = ScheduleEntry::from_value(&json!({"name": "evening", "at": "18h30m"})).unwrap();
        assert_eq!(entry.name, "evening");
        assert_eq!(entry.at, TimeDelta::hours(18) + TimeDelta::minutes(30));
        assert_eq!(entry.state, RelayState::Off);
        assert_eq!(entry.hold, TimeDelta::zero());
    }

    #[test]
    fn test_schedule_wire_shape() {
        let entry = ScheduleEntry::new(
            "evening",
            TimeDelta::hours(18) + TimeDelta::minutes(30),
            RelayState::On,
        )
        .held_for(TimeDelta::hours(2));
        assert_eq!(
            entry.to_value(),
            json!({"name": "evening", "at": "18h30m0s", "state": 1, "for": "2h0m0s"})
        );
        let back: ScheduleEntry = serde_json::from_value(entry.to_value()).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn test_schedule_missing_required_fields() {
        let missing_name = ScheduleEntry::from_value(&json!({"at": "1h"}));
        assert_eq!(
            missing_name,
            Err(RelayError::MalformedScheduleDocument(
                "missing name for schedule".to_string()
            ))
        );
        assert!(ScheduleEntry::from_value(&json!({"name": "x"})).is_err());
        assert!(ScheduleEntry::from_value(&json!({"name": "x", "at": 3600})).is_err());
        assert!(
            ScheduleEntry::from_value(&json!({"name": "x", "at": "1h", "state": "dim"})).is_err()
        );
    }

    #[test]
    fn test_schedules_accept_map_encoding() {
        let list = schedules_from_value(&json!({
            "morning": {"at": "7h", "state": "on"},
            "night": {"name": "night", "at": "23h"}
        }))
        .unwrap();
        let names: Vec<_> = list.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["morning", "night"]);
        assert!(schedules_from_value(&json!("nope")).is_err());
    }

    #[test]
    fn test_sun_config_requires_states_when_enabled() {
        assert!(SunConfig::from_value(&json!({})).is_err());
        assert!(SunConfig::from_value(&json!({"enabled": true, "rise_state": 1})).is_err());

        let disabled = SunConfig::from_value(&json!({"enabled": false})).unwrap();
        assert_eq!(disabled, SunConfig::default());

        let sun = SunConfig::from_value(&json!({
            "enabled": true,
            "rise_state": "off",
            "set_state": true,
            "set_offset": "-30m"
        }))
        .unwrap();
        assert_eq!(sun.rise_state, RelayState::Off);
        assert_eq!(sun.set_state, RelayState::On);
        assert_eq!(sun.set_offset, TimeDelta::minutes(-30));
        assert_eq!(sun.to_value()["set_offset"], "-30m0s");
    }
}

//! Relay states and change requests.

use chrono::TimeDelta;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

use crate::duration::{format_duration, parse_duration};
use crate::error::{RelayError, RelayResult};

/// Physical state of a relay.
///
/// On the wire a state is written as the integer `1` (ON) or `0` (OFF) and
/// read back from any form accepted by [`parse_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RelayState {
    On,
    #[default]
    Off,
}

impl RelayState {
    /// The opposite state.
    pub fn inverse(self) -> Self {
        match self {
            RelayState::On => RelayState::Off,
            RelayState::Off => RelayState::On,
        }
    }

    fn as_wire(self) -> u8 {
        match self {
            RelayState::On => 1,
            RelayState::Off => 0,
        }
    }
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayState::On => write!(f, "ON"),
            RelayState::Off => write!(f, "OFF"),
        }
    }
}

/// Parse an external state representation.
///
/// Accepts booleans, the strings `"on"`/`"off"` in any letter case, and the
/// numbers `1`/`0`. Everything else is an [`RelayError::InvalidStateValue`].
pub fn parse_state(value: &Value) -> RelayResult<RelayState> {
    match value {
        Value::Bool(true) => Ok(RelayState::On),
        Value::Bool(false) => Ok(RelayState::Off),
        Value::String(s) if s.eq_ignore_ascii_case("on") => Ok(RelayState::On),
        Value::String(s) if s.eq_ignore_ascii_case("off") => Ok(RelayState::Off),
        Value::String(s) => Err(RelayError::InvalidStateValue(format!(
            "invalid state string {s:?}"
        ))),
        Value::Number(n) => match n.as_f64() {
            Some(v) if v == 1.0 => Ok(RelayState::On),
            Some(v) if v == 0.0 => Ok(RelayState::Off),
            _ => Err(RelayError::InvalidStateValue(format!(
                "invalid state number {n}"
            ))),
        },
        other => Err(RelayError::InvalidStateValue(format!(
            "invalid state type {other}"
        ))),
    }
}

impl Serialize for RelayState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_wire())
    }
}

impl<'de> Deserialize<'de> for RelayState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        parse_state(&value).map_err(serde::de::Error::custom)
    }
}

/// What a change request asks the relay to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeTarget {
    Set(RelayState),
    Toggle,
}

/// An externally submitted change: set or toggle, optionally held for a while
/// before reverting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayChange {
    pub target: ChangeTarget,
    pub hold: TimeDelta,
}

impl RelayChange {
    pub fn set(state: RelayState) -> Self {
        Self {
            target: ChangeTarget::Set(state),
            hold: TimeDelta::zero(),
        }
    }

    pub fn toggle() -> Self {
        Self {
            target: ChangeTarget::Toggle,
            hold: TimeDelta::zero(),
        }
    }

    /// Revert after `hold`; zero keeps the change permanent.
    pub fn held_for(mut self, hold: TimeDelta) -> Self {
        self.hold = hold;
        self
    }

    /// Decode `{"state": <state> | "toggle" | -1, "for": "<duration>"}`.
    ///
    /// A missing `state` means off.
    pub fn from_value(value: &Value) -> RelayResult<Self> {
        let malformed = RelayError::InvalidChangeRequest;
        let object = value
            .as_object()
            .ok_or_else(|| malformed("change request must be an object".to_string()))?;

        let target = match object.get("state") {
            None => ChangeTarget::Set(RelayState::Off),
            Some(Value::String(s)) if s.eq_ignore_ascii_case("toggle") => ChangeTarget::Toggle,
            Some(Value::Number(n)) if n.as_i64() == Some(-1) => ChangeTarget::Toggle,
            Some(v) => ChangeTarget::Set(parse_state(v)?),
        };
        let hold = match object.get("for") {
            None | Some(Value::Null) => TimeDelta::zero(),
            Some(Value::String(s)) => parse_duration(s).map_err(malformed)?,
            Some(other) => return Err(malformed(format!("invalid duration {other}"))),
        };
        if hold < TimeDelta::zero() {
            return Err(malformed("hold duration cannot be negative".to_string()));
        }
        Ok(Self { target, hold })
    }
}

impl fmt::Display for RelayChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.target {
            ChangeTarget::Set(state) => write!(f, "set {state}")?,
            ChangeTarget::Toggle => write!(f, "toggle")?,
        }
        if self.hold > TimeDelta::zero() {
            write!(f, " for {}", format_duration(self.hold))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_state_accepted_forms() {
        assert_eq!(parse_state(&json!(true)).unwrap(), RelayState::On);
        assert_eq!(parse_state(&json!(false)).unwrap(), RelayState::Off);
        assert_eq!(parse_state(&json!("off")).unwrap(), RelayState::Off);
        assert_eq!(parse_state(&json!("ON")).unwrap(), RelayState::On);
        assert_eq!(parse_state(&json!("On")).unwrap(), RelayState::On);
        assert_eq!(parse_state(&json!(1)).unwrap(), RelayState::On);
        assert_eq!(parse_state(&json!(0.0)).unwrap(), RelayState::Off);
    }

    #[test]
    fn test_parse_state_rejects_everything_else() {
        for bad in [json!(2), json!(-1), json!("maybe"), json!(null), json!([1])] {
            assert!(matches!(
                parse_state(&bad),
                Err(RelayError::InvalidStateValue(_))
            ));
        }
    }

    #[test]
    fn test_state_wire_encoding() {
        assert_eq!(serde_json::to_value(RelayState::On).unwrap(), json!(1));
        let decoded: RelayState = serde_json::from_value(json!("off")).unwrap();
        assert_eq!(decoded, RelayState::Off);
        assert!(serde_json::from_value::<RelayState>(json!(7)).is_err());
    }

    #[test]
    fn test_change_request_decoding() {
        let change = RelayChange::from_value(&json!({"state": "on", "for": "2h"})).unwrap();
        assert_eq!(
            change,
            RelayChange::set(RelayState::On).held_for(TimeDelta::hours(2))
        );
        assert_eq!(change.to_string(), "set ON for 2h0m0s");

        let toggle = RelayChange::from_value(&json!({"state": -1})).unwrap();
        assert_eq!(toggle, RelayChange::toggle());

        assert!(RelayChange::from_value(&json!({"state": "on", "for": "-5m"})).is_err());
        assert!(RelayChange::from_value(&json!("on")).is_err());
    }

    #[test]
    fn test_change_request_without_state_turns_off() {
        let change = RelayChange::from_value(&json!({"for": "10m"})).unwrap();
        assert_eq!(
            change,
            RelayChange::set(RelayState::Off).held_for(TimeDelta::minutes(10))
        );
        assert_eq!(
            RelayChange::from_value(&json!({})).unwrap(),
            RelayChange::set(RelayState::Off)
        );
    }

    #[test]
    fn test_bad_change_request_is_not_a_schedule_error() {
        assert_eq!(
            RelayChange::from_value(&json!([1])),
            Err(RelayError::InvalidChangeRequest(
                "change request must be an object".to_string()
            ))
        );
        assert!(matches!(
            RelayChange::from_value(&json!({"state": 1, "for": 30})),
            Err(RelayError::InvalidChangeRequest(_))
        ));
    }
}

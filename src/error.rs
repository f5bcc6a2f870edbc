//! Domain errors for relay construction, state parsing and schedule handling.
//!
//! These are the errors surfaced to callers of the relay API (the HTTP layer,
//! the configuration loader). Application plumbing wraps them in
//! `anyhow::Error` with context where they cross into startup code.

use thiserror::Error;

/// Errors produced by the relay and scheduling core.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RelayError {
    /// Timezone missing or unknown, or solar scheduling without a location.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A state representation that is not a bool, "on"/"off" or 0/1.
    #[error("invalid state value: {0}")]
    InvalidStateValue(String),

    /// Removal of a schedule name that the relay does not hold.
    #[error("schedule {schedule} for relay {relay} not found")]
    ScheduleNotFound { schedule: String, relay: String },

    /// A schedule, sun or relay document missing required fields.
    #[error("malformed schedule document: {0}")]
    MalformedScheduleDocument(String),

    /// A change request that is not an object or carries a bad hold.
    #[error("invalid change request: {0}")]
    InvalidChangeRequest(String),

    /// A relay with the same GPIO or name already exists.
    #[error("{0}")]
    Conflict(String),

    /// The output driver could not open the relay's GPIO.
    #[error("output unavailable: {0}")]
    OutputUnavailable(String),

    /// Attempt to add `sunrise`/`sunset` while solar scheduling owns them.
    #[error("schedule name {0} is reserved while sun scheduling is enabled")]
    ReservedSchedule(String),
}

pub type RelayResult<T> = std::result::Result<T, RelayError>;

//! # pirelay library
//!
//! Relay controller for GPIO outputs driven by clock and sunrise/sunset
//! schedules.
//!
//! This library exists to enable testing of the scheduling internals and to
//! keep CLI dispatch (main.rs) separate from the relay logic.
//!
//! ## Architecture
//!
//! - **Relays**: `relay` holds the per-relay state machine, timed reversion
//!   and the command intake
//! - **Scheduling**: `schedule` for the schedule table and solar window,
//!   `scheduler` for the per-relay driver thread
//! - **Controller**: `controller` owns the relay list and the shared defaults
//! - **Configuration**: `config` for the JSON/TOML document and validation
//! - **Hardware**: `gpio` output drivers, `solar` sunrise/sunset calculation
//! - **Infrastructure**: time source abstraction, signal handling, lock file,
//!   logging

// Import macros from logger module for use in all submodules
#[macro_use]
pub mod logger;

pub mod args;
pub mod config;
pub mod constants;
pub mod controller;
pub mod duration;
pub mod error;
pub mod gpio;
pub mod lock;
pub mod relay;
pub mod schedule;
pub mod signals;
pub mod solar;
pub mod time_source;

mod scheduler;

pub use controller::{Controller, ControllerSettings};
pub use error::{RelayError, RelayResult};
pub use relay::{Relay, RelayChange, RelayContext, RelayDefinition, RelayOptions, RelayState};

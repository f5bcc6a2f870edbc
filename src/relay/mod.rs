//! Relay state machine.
//!
//! A [`Relay`] owns one digital output and is the single serialization point
//! for everything that changes it: direct commands, the command intake
//! thread, the scheduler driver and deferred reversions. All of them go
//! through the relay's mutex, which guards the name, the state, the schedule
//! table, the solar configuration and the output write.
//!
//! ## Timed reversion
//!
//! `timed_set`/`timed_toggle` with a non-zero hold spawn a thread that sleeps
//! for the hold and then applies the inverse state. Every transition bumps a
//! generation counter and the reversion thread remembers the generation its
//! own transition produced. When it wakes up it only reverts if no other
//! transition happened in between, so a newer command is never undone by an
//! older timer.
//!
//! ## Threads per relay
//!
//! - the command intake, for the relay's whole lifetime ([`intake`]);
//! - the scheduler driver, while schedules are running
//!   ([`crate::scheduler`]);
//! - one short-lived thread per pending reversion.

pub mod intake;
mod state;

pub use intake::CommandSender;
pub use state::{ChangeTarget, RelayChange, RelayState, parse_state};

use chrono::{DateTime, TimeDelta, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use crate::error::{RelayError, RelayResult};
use crate::gpio::{OutputDriver, OutputPin};
use crate::logger::Logger;
use crate::schedule::{
    ScheduleEntry, ScheduleTable, SolarWindow, SunConfig, is_solar_name, next_local_midnight,
    schedules_from_value,
};
use crate::scheduler::{self, SchedulerHandle};
use crate::solar::{AstronomicalCalculator, Location, SolarCalculator};
use crate::time_source::{RealTimeSource, TimeSource};

/// Collaborators shared by every relay of a process.
#[derive(Clone)]
pub struct RelayContext {
    pub clock: Arc<dyn TimeSource>,
    pub solar: Arc<dyn SolarCalculator>,
    pub driver: Arc<dyn OutputDriver>,
    pub logger: Logger,
}

impl RelayContext {
    pub fn new(
        clock: Arc<dyn TimeSource>,
        solar: Arc<dyn SolarCalculator>,
        driver: Arc<dyn OutputDriver>,
        logger: Logger,
    ) -> Self {
        Self {
            clock,
            solar,
            driver,
            logger,
        }
    }

    /// Wall clock and astronomical sun times.
    pub fn system(driver: Arc<dyn OutputDriver>, logger: Logger) -> Self {
        Self::new(
            Arc::new(RealTimeSource),
            Arc::new(AstronomicalCalculator),
            driver,
            logger,
        )
    }
}

/// Per-relay settings inherited from the configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayOptions {
    /// IANA timezone name used for local midnight.
    pub timezone: String,
    pub location: Option<Location>,
}

/// Wire form of a relay: what the configuration document holds and what
/// [`Relay::snapshot`] returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayDefinition {
    #[serde(default)]
    pub name: String,
    pub gpio: u8,
    #[serde(default)]
    pub state: RelayState,
    #[serde(default, deserialize_with = "deserialize_schedules")]
    pub schedules: Vec<ScheduleEntry>,
    #[serde(default)]
    pub sun: SunConfig,
}

fn deserialize_schedules<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<ScheduleEntry>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    schedules_from_value(&value).map_err(serde::de::Error::custom)
}

impl RelayDefinition {
    pub fn new(gpio: u8) -> Self {
        Self {
            name: String::new(),
            gpio,
            state: RelayState::Off,
            schedules: Vec::new(),
            sun: SunConfig::default(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_state(mut self, state: RelayState) -> Self {
        self.state = state;
        self
    }

    pub fn with_schedule(mut self, entry: ScheduleEntry) -> Self {
        self.schedules.push(entry);
        self
    }

    pub fn with_sun(mut self, sun: SunConfig) -> Self {
        self.sun = sun;
        self
    }

    /// The name the relay will carry: the given one, or `GPIO{n}`.
    pub fn effective_name(&self) -> String {
        if self.name.is_empty() {
            format!("GPIO{}", self.gpio)
        } else {
            self.name.clone()
        }
    }
}

struct RelayCore {
    name: String,
    state: RelayState,
    generation: u64,
    schedules: ScheduleTable,
    sun: SunConfig,
    pin: Box<dyn OutputPin>,
}

#[derive(Default)]
struct DriverSlot {
    handle: Option<SchedulerHandle>,
    stopped: bool,
}

struct RelayInner {
    gpio: u8,
    timezone: Tz,
    location: Option<Location>,
    ctx: RelayContext,
    core: Mutex<RelayCore>,
    // Lock order: driver before core
    driver: Mutex<DriverSlot>,
    commands: CommandSender,
    intake: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a relay. Clones refer to the same relay.
#[derive(Clone)]
pub struct Relay {
    inner: Arc<RelayInner>,
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("gpio", &self.inner.gpio)
            .field("name", &self.name())
            .field("state", &self.state())
            .finish()
    }
}

impl Relay {
    /// Create a relay, drive its output to the initial state and start its
    /// schedules and command intake.
    ///
    /// Fails with [`RelayError::InvalidConfiguration`] when the timezone is
    /// empty or unknown, or when solar scheduling is enabled without a
    /// location, and with [`RelayError::OutputUnavailable`] when the driver
    /// cannot open the GPIO.
    pub fn new(
        definition: RelayDefinition,
        options: RelayOptions,
        ctx: RelayContext,
    ) -> RelayResult<Self> {
        if options.timezone.is_empty() {
            return Err(RelayError::InvalidConfiguration(
                "timezone must be provided to work/update schedules".to_string(),
            ));
        }
        let timezone: Tz = options.timezone.parse().map_err(|_| {
            RelayError::InvalidConfiguration(format!("unknown timezone {}", options.timezone))
        })?;
        if definition.sun.enabled && options.location.is_none() {
            return Err(RelayError::InvalidConfiguration(
                "location coordinates and timezone must be provided to work sunset/sunrise schedules"
                    .to_string(),
            ));
        }

        let name = definition.effective_name();
        let pin = ctx.driver.open(definition.gpio)?;
        let (commands, command_rx) = intake::channel();

        let relay = Self {
            inner: Arc::new(RelayInner {
                gpio: definition.gpio,
                timezone,
                location: options.location,
                core: Mutex::new(RelayCore {
                    name,
                    state: definition.state,
                    generation: 0,
                    schedules: ScheduleTable::from_entries(definition.schedules),
                    sun: definition.sun,
                    pin,
                }),
                ctx,
                driver: Mutex::new(DriverSlot::default()),
                commands,
                intake: Mutex::new(None),
            }),
        };

        {
            let mut core = relay.core();
            let initial = core.state;
            relay.write(&mut core, initial);
            relay.rebuild_schedules(&mut core)?;
        }
        relay.ensure_driver();

        match intake::spawn(relay.clone(), command_rx) {
            Ok(handle) => *lock(&relay.inner.intake) = Some(handle),
            Err(e) => log_error!(
                relay.logger(),
                "failed to start command intake for relay {}: {e}",
                relay.name()
            ),
        }

        log_block_start!(
            relay.logger(),
            "added relay {} on GPIO {} with initial state {}",
            relay.name(),
            relay.gpio(),
            relay.state()
        );
        for (name, at) in relay.list_schedules() {
            log_indented!(relay.logger(), "{name} next at {}", at.format("%Y-%m-%d %H:%M:%S %Z"));
        }
        Ok(relay)
    }

    // # Accessors

    pub fn gpio(&self) -> u8 {
        self.inner.gpio
    }

    pub fn name(&self) -> String {
        self.core().name.clone()
    }

    pub fn state(&self) -> RelayState {
        self.core().state
    }

    pub fn timezone(&self) -> Tz {
        self.inner.timezone
    }

    pub fn location(&self) -> Option<Location> {
        self.inner.location
    }

    pub fn sun(&self) -> SunConfig {
        self.core().sun
    }

    /// Whether the scheduler driver thread is running.
    pub fn is_scheduling(&self) -> bool {
        lock(&self.inner.driver).handle.is_some()
    }

    /// Wire view of the relay, including the materialized solar entries.
    pub fn snapshot(&self) -> RelayDefinition {
        let core = self.core();
        RelayDefinition {
            name: core.name.clone(),
            gpio: self.inner.gpio,
            state: core.state,
            schedules: core.schedules.entries(),
            sun: core.sun,
        }
    }

    pub fn rename(&self, name: impl Into<String>) {
        let name = name.into();
        let mut core = self.core();
        log_decorated!(self.logger(), "renamed relay {} to {name}", core.name);
        core.name = name;
    }

    // # State transitions

    /// Drive the output to `target`. The output is written even when the relay
    /// is already in that state.
    pub fn set_state(&self, target: RelayState) {
        self.transition(ChangeTarget::Set(target), TimeDelta::zero());
    }

    /// Flip the state. Returns the new state.
    pub fn toggle(&self) -> RelayState {
        self.transition(ChangeTarget::Toggle, TimeDelta::zero())
    }

    /// Set `target` now and revert to its inverse after `hold` unless a newer
    /// transition happens first. A zero hold is permanent.
    pub fn timed_set(&self, target: RelayState, hold: TimeDelta) {
        self.transition(ChangeTarget::Set(target), hold);
    }

    /// Toggle now and toggle back after `hold` unless superseded.
    pub fn timed_toggle(&self, hold: TimeDelta) -> RelayState {
        self.transition(ChangeTarget::Toggle, hold)
    }

    /// Apply an externally submitted change request.
    pub fn apply(&self, change: RelayChange) -> RelayState {
        log_debug!(self.logger(), "relay {}: {change}", self.name());
        self.transition(change.target, change.hold)
    }

    /// Sender for the relay's command intake.
    pub fn commands(&self) -> CommandSender {
        self.inner.commands.clone()
    }

    fn transition(&self, target: ChangeTarget, hold: TimeDelta) -> RelayState {
        let (state, generation) = {
            let mut core = self.core();
            let state = match target {
                ChangeTarget::Set(state) => state,
                ChangeTarget::Toggle => core.state.inverse(),
            };
            (state, self.write(&mut core, state))
        };
        if hold > TimeDelta::zero() {
            self.spawn_reversion(state.inverse(), hold, generation);
        }
        state
    }

    /// Write the output and record the state. Returns the new generation.
    fn write(&self, core: &mut RelayCore, target: RelayState) -> u64 {
        match target {
            RelayState::On => core.pin.set_high(),
            RelayState::Off => core.pin.set_low(),
        }
        core.state = target;
        core.generation += 1;
        log_decorated!(
            self.logger(),
            "turned {target} relay {} on GPIO {}",
            core.name,
            self.inner.gpio
        );
        core.generation
    }

    fn spawn_reversion(&self, revert_to: RelayState, hold: TimeDelta, generation: u64) {
        let Ok(sleep_for) = hold.to_std() else {
            return;
        };
        let relay = self.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("relay-{}-revert", self.inner.gpio))
            .spawn(move || {
                relay.inner.ctx.clock.sleep(sleep_for);
                relay.revert(revert_to, generation);
            });
        if let Err(e) = spawned {
            log_error!(
                self.logger(),
                "failed to schedule reversion for relay {}: {e}",
                self.name()
            );
        }
    }

    fn revert(&self, target: RelayState, generation: u64) {
        let mut core = self.core();
        if core.generation != generation {
            log_debug!(
                self.logger(),
                "reversion of relay {} to {target} superseded",
                core.name
            );
            return;
        }
        self.write(&mut core, target);
    }

    // # Schedules

    /// Insert or replace a clock schedule and arm it.
    ///
    /// `sunrise`/`sunset` are rejected with [`RelayError::ReservedSchedule`]
    /// while solar scheduling is enabled.
    pub fn add_schedule(&self, entry: ScheduleEntry) -> RelayResult<()> {
        {
            let mut core = self.core();
            if core.sun.enabled && is_solar_name(&entry.name) {
                return Err(RelayError::ReservedSchedule(entry.name));
            }
            let name = entry.name.clone();
            let now = self.now();
            core.schedules.insert(entry);
            core.schedules.arm(&name, self.inner.timezone, now);
            log_decorated!(self.logger(), "added schedule {name} for relay {}", core.name);
        }
        self.ensure_driver();
        Ok(())
    }

    /// Remove a schedule and its pending trigger.
    pub fn remove_schedule(&self, name: &str) -> RelayResult<()> {
        {
            let mut core = self.core();
            if core.schedules.remove(name).is_none() {
                return Err(RelayError::ScheduleNotFound {
                    schedule: name.to_string(),
                    relay: core.name.clone(),
                });
            }
            log_decorated!(self.logger(), "removed schedule {name} for relay {}", core.name);
        }
        if let Some(handle) = &lock(&self.inner.driver).handle {
            handle.rearm();
        }
        Ok(())
    }

    /// Next fire instant of every schedule, in the relay's timezone.
    pub fn list_schedules(&self) -> BTreeMap<String, DateTime<Tz>> {
        let now = self.now();
        self.core().schedules.upcoming(self.inner.timezone, now)
    }

    /// Recompute the table for today (including the solar catch-up) and run
    /// the scheduler driver. Returns whether a driver is running, which is
    /// not the case for an empty table.
    pub fn start_schedules(&self) -> RelayResult<bool> {
        let mut slot = lock(&self.inner.driver);
        slot.stopped = false;
        let has_entries = {
            let mut core = self.core();
            self.rebuild_schedules(&mut core)?;
            !core.schedules.is_empty()
        };
        if !has_entries {
            return Ok(false);
        }
        if let Some(handle) = &slot.handle {
            handle.rearm();
        } else {
            slot.handle = self.spawn_driver();
        }
        Ok(slot.handle.is_some())
    }

    /// Stop the scheduler driver and disarm every pending trigger. Pending
    /// reversions still fire.
    pub fn stop_schedules(&self) {
        let handle = {
            let mut slot = lock(&self.inner.driver);
            slot.stopped = true;
            slot.handle.take()
        };
        if let Some(handle) = handle {
            handle.stop();
        }
        self.core().schedules.disarm_all();
        log_decorated!(self.logger(), "stopped schedules for relay {}", self.name());
    }

    /// Replace the solar configuration, restarting the schedules.
    pub fn set_sun(&self, sun: SunConfig) -> RelayResult<()> {
        if sun.enabled && self.inner.location.is_none() {
            return Err(RelayError::InvalidConfiguration(
                "location coordinates must be provided to work sunset/sunrise schedules"
                    .to_string(),
            ));
        }
        self.stop_schedules();
        self.core().sun = sun;
        self.start_schedules()?;
        Ok(())
    }

    /// Turn solar scheduling on or off. Enabling re-creates the
    /// `sunrise`/`sunset` entries and applies the catch-up state; disabling
    /// removes them.
    pub fn set_sun_enabled(&self, enabled: bool) -> RelayResult<()> {
        let mut sun = self.sun();
        sun.enabled = enabled;
        self.set_sun(sun)
    }

    /// Stop the scheduler driver and the command intake.
    pub fn shutdown(&self) {
        self.stop_schedules();
        let handle = lock(&self.inner.intake).take();
        if let Some(handle) = handle {
            self.inner.commands.stop();
            if handle.join().is_err() {
                log_error!(self.logger(), "command intake for relay {} panicked", self.name());
            }
        }
    }

    fn rebuild_schedules(&self, core: &mut RelayCore) -> RelayResult<()> {
        let now = self.now();
        let window = self.solar_window(&core.sun, now)?;
        core.schedules.recompute(self.inner.timezone, now, window.as_ref());

        if let Some(window) = window {
            core.schedules.materialize_solar(&window, self.inner.timezone, now);
            let state = window.state_at(now);
            let sun_is_up = window.sunrise <= now && now < window.sunset;
            log_decorated!(
                self.logger(),
                "sun is {}, turning relay {} {state}",
                if sun_is_up { "up" } else { "down" },
                core.name
            );
            self.write(core, state);
        }
        Ok(())
    }

    fn solar_window(
        &self,
        sun: &SunConfig,
        now: DateTime<Utc>,
    ) -> RelayResult<Option<SolarWindow>> {
        if !sun.enabled {
            return Ok(None);
        }
        let location = self.inner.location.ok_or_else(|| {
            RelayError::InvalidConfiguration(
                "location coordinates must be provided to work sunset/sunrise schedules"
                    .to_string(),
            )
        })?;
        SolarWindow::compute(
            self.inner.ctx.solar.as_ref(),
            location,
            sun,
            self.inner.timezone,
            now,
        )
        .map(Some)
    }

    fn ensure_driver(&self) {
        let mut slot = lock(&self.inner.driver);
        if slot.stopped {
            return;
        }
        if let Some(handle) = &slot.handle {
            handle.rearm();
            return;
        }
        if self.core().schedules.is_empty() {
            return;
        }
        slot.handle = self.spawn_driver();
    }

    fn spawn_driver(&self) -> Option<SchedulerHandle> {
        match scheduler::spawn(self.clone()) {
            Ok(handle) => Some(handle),
            Err(e) => {
                log_error!(
                    self.logger(),
                    "failed to start scheduler for relay {}: {e}",
                    self.name()
                );
                None
            }
        }
    }

    // # Scheduler driver hooks

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.inner.ctx.clock.now()
    }

    pub(crate) fn clock(&self) -> &dyn TimeSource {
        self.inner.ctx.clock.as_ref()
    }

    pub(crate) fn logger(&self) -> &Logger {
        &self.inner.ctx.logger
    }

    pub(crate) fn pending_triggers(&self) -> Vec<(DateTime<Utc>, String)> {
        self.core().schedules.pending()
    }

    /// Start of the next local calendar day.
    pub(crate) fn next_day_boundary(&self) -> DateTime<Utc> {
        next_local_midnight(self.inner.timezone, self.now()).with_timezone(&Utc)
    }

    /// Run the schedule `name` if its trigger is still armed for `at`.
    pub(crate) fn fire_scheduled(&self, name: &str, at: DateTime<Utc>) -> bool {
        let due = self.core().schedules.take_due(name, at);
        let Some(entry) = due else {
            return false;
        };
        log_info!(
            self.logger(),
            "running schedule {name} for relay {}",
            self.name()
        );
        self.timed_set(entry.state, entry.hold);
        true
    }

    /// Re-derive every trigger for the day that just started.
    pub(crate) fn recompute_day(&self) {
        let now = self.now();
        let mut core = self.core();
        let window = match self.solar_window(&core.sun, now) {
            Ok(window) => window,
            Err(e) => {
                log_error!(self.logger(), "sun times for relay {}: {e}", core.name);
                None
            }
        };
        core.schedules.disarm_all();
        core.schedules.recompute(self.inner.timezone, now, window.as_ref());
        log_block_start!(self.logger(), "updated schedules for relay {}", core.name);
    }

    pub(crate) fn disarm_schedules(&self) {
        self.core().schedules.disarm_all();
    }

    fn core(&self) -> MutexGuard<'_, RelayCore> {
        lock(&self.inner.core)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

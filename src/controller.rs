//! Configuration-level owner of the relay list.
//!
//! The controller holds the defaults every relay inherits (timezone and
//! location) and the list of relays created so far. Its lock protects only
//! the list: relays serialize their own state.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::config::Config;
use crate::error::{RelayError, RelayResult};
use crate::relay::{Relay, RelayContext, RelayDefinition, RelayOptions};
use crate::solar::Location;

/// Settings shared by all relays of a controller.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerSettings {
    pub listen_addr: String,
    pub timezone: String,
    pub location: Option<Location>,
}

impl From<&Config> for ControllerSettings {
    fn from(config: &Config) -> Self {
        Self {
            listen_addr: config.listen_addr.clone(),
            timezone: config.timezone.clone(),
            location: config.location,
        }
    }
}

pub struct Controller {
    settings: ControllerSettings,
    ctx: RelayContext,
    relays: Mutex<Vec<Relay>>,
}

impl Controller {
    pub fn new(settings: ControllerSettings, ctx: RelayContext) -> Self {
        Self {
            settings,
            ctx,
            relays: Mutex::new(Vec::new()),
        }
    }

    /// Create every relay of `config`. The first failure stops the relays
    /// created so far and is returned.
    pub fn from_config(config: &Config, ctx: RelayContext) -> RelayResult<Self> {
        let controller = Self::new(ControllerSettings::from(config), ctx);
        for definition in &config.relays {
            if let Err(e) = controller.add_relay(definition.clone()) {
                controller.shutdown();
                return Err(e);
            }
        }
        Ok(controller)
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    /// Create a relay with the controller's timezone and location.
    ///
    /// Fails with [`RelayError::Conflict`] when the GPIO or the name is
    /// already taken, or with whatever relay construction reports.
    pub fn add_relay(&self, definition: RelayDefinition) -> RelayResult<Relay> {
        let mut relays = self.relays();
        let name = definition.effective_name();

        if relays.iter().any(|r| r.gpio() == definition.gpio) {
            return Err(RelayError::Conflict(format!(
                "relay on GPIO {} already exists",
                definition.gpio
            )));
        }
        if relays.iter().any(|r| r.name() == name) {
            return Err(RelayError::Conflict(format!(
                "relay named {name} already exists"
            )));
        }

        let options = RelayOptions {
            timezone: self.settings.timezone.clone(),
            location: self.settings.location,
        };
        let relay = Relay::new(definition, options, self.ctx.clone())?;
        relays.push(relay.clone());
        Ok(relay)
    }

    /// Relays in creation order.
    pub fn relays(&self) -> MutexGuard<'_, Vec<Relay>> {
        self.relays.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look a relay up by name or GPIO number.
    pub fn find(&self, key: &str) -> Option<Relay> {
        let gpio = key.parse::<u8>().ok();
        self.relays()
            .iter()
            .find(|r| Some(r.gpio()) == gpio || r.name() == key)
            .cloned()
    }

    /// The configuration document describing the current relays.
    pub fn document(&self) -> Config {
        Config {
            listen_addr: self.settings.listen_addr.clone(),
            location: self.settings.location,
            timezone: self.settings.timezone.clone(),
            relays: self.relays().iter().map(Relay::snapshot).collect(),
        }
    }

    /// Stop the scheduler and command intake of every relay.
    pub fn shutdown(&self) {
        for relay in self.relays().iter() {
            relay.shutdown();
        }
    }
}

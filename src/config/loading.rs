//! Configuration loading functionality.
//!
//! Handles locating the configuration document, decoding it as JSON or TOML
//! and applying it over the command-line defaults.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use super::validation::validate_config;
use super::{Config, deserialize_location};
use crate::constants::{CONFIG_DIR_NAME, CONFIG_FILE_NAME};
use crate::relay::RelayDefinition;
use crate::solar::Location;

/// The document as written: every field optional so that absent fields keep
/// their command-line value.
#[derive(Debug, Default, Deserialize)]
struct ConfigDocument {
    listen_addr: Option<String>,
    // Outer Option: field present; inner: [0, 0] means unset
    #[serde(default, deserialize_with = "deserialize_present_location")]
    location: Option<Option<Location>>,
    timezone: Option<String>,
    relays: Option<Vec<RelayDefinition>>,
}

fn deserialize_present_location<'de, D: serde::Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<Option<Location>>, D::Error> {
    deserialize_location(deserializer).map(Some)
}

impl ConfigDocument {
    fn apply(self, mut config: Config) -> Config {
        if let Some(listen_addr) = self.listen_addr {
            config.listen_addr = listen_addr;
        }
        if let Some(location) = self.location {
            config.location = location;
        }
        if let Some(timezone) = self.timezone {
            config.timezone = timezone;
        }
        if let Some(relays) = self.relays {
            config.relays = relays;
        }
        config
    }
}

/// `XDG_CONFIG_HOME/pirelay/pirelay.json` (or the platform equivalent).
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Load the configuration.
///
/// An explicit path must exist. Without one, the default path is used when a
/// file is there; otherwise `defaults` is validated and returned as is.
pub fn load(explicit: Option<&Path>, defaults: Config) -> Result<Config> {
    if let Some(path) = explicit {
        return load_from_path(path, defaults);
    }

    match default_config_path().filter(|path| path.exists()) {
        Some(path) => load_from_path(&path, defaults),
        None => {
            validate_config(&defaults)?;
            Ok(defaults)
        }
    }
}

/// Load a configuration document from `path` and apply it over `defaults`.
pub fn load_from_path(path: &Path, defaults: Config) -> Result<Config> {
    if !path.exists() {
        anyhow::bail!("configuration file not found at {}", path.display());
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;

    let document = parse_document(path, &content)
        .with_context(|| format!("Failed to parse config from {}", path.display()))?;

    let config = document.apply(defaults);
    validate_config(&config)
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;

    Ok(config)
}

fn parse_document(path: &Path, content: &str) -> Result<ConfigDocument> {
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    if is_toml {
        Ok(toml::from_str(content)?)
    } else {
        Ok(serde_json::from_str(content)?)
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Configuration: host endpoints, hardware ports, rack policy, and the
//! plugin whitelist.

use crate::routing::RoutingMode;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// Host endpoints and request timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// REST control plane base URL.
    #[serde(default = "default_url")]
    pub url: String,
    /// Address of the newline-delimited event stream.
    #[serde(default = "default_events_addr")]
    pub events_addr: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Grace period for self-echoes still unmatched when an edit commits.
    #[serde(default = "default_echo_timeout_ms")]
    pub echo_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            events_addr: default_events_addr(),
            request_timeout_ms: default_request_timeout_ms(),
            echo_timeout_ms: default_echo_timeout_ms(),
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn echo_timeout(&self) -> Duration {
        Duration::from_millis(self.echo_timeout_ms)
    }
}

fn default_url() -> String {
    "http://127.0.0.1:18181".to_string()
}

fn default_events_addr() -> String {
    "127.0.0.1:18182".to_string()
}

fn default_request_timeout_ms() -> u64 {
    5000
}

fn default_echo_timeout_ms() -> u64 {
    2000
}

/// Hardware terminal configuration. Non-empty port arrays override
/// whatever the host reports.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HardwareConfig {
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub midi_inputs: Vec<String>,
    #[serde(default)]
    pub midi_outputs: Vec<String>,
    /// All-to-all routing at the capture terminal.
    #[serde(default)]
    pub join_audio_inputs: bool,
    /// All-to-all routing at the playback terminal.
    #[serde(default)]
    pub join_audio_outputs: bool,
}

/// Policy for structural changes that originate outside this client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalPolicy {
    /// Adopt external edits into the mirror.
    #[default]
    Mirror,
    /// Issue the compensating request to revert external edits.
    Enforce,
}

/// Chain-level policy knobs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RackConfig {
    #[serde(default)]
    pub slots_limit: Option<usize>,
    #[serde(default)]
    pub routing_mode: RoutingMode,
    #[serde(default)]
    pub external_policy: ExternalPolicy,
}

/// One whitelisted plugin. Port-list overrides, when present, replace the
/// host-reported lists verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfig {
    pub name: String,
    pub uri: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub inputs: Option<Vec<String>>,
    #[serde(default)]
    pub outputs: Option<Vec<String>>,
    #[serde(default)]
    pub midi_inputs: Option<Vec<String>>,
    #[serde(default)]
    pub midi_outputs: Option<Vec<String>>,
    #[serde(default)]
    pub join_audio_inputs: bool,
    #[serde(default)]
    pub join_audio_outputs: bool,
    #[serde(default)]
    pub join_midi_inputs: bool,
    #[serde(default)]
    pub join_midi_outputs: bool,
}

/// Complete client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub hardware: HardwareConfig,
    #[serde(default)]
    pub rack: RackConfig,
    #[serde(default)]
    pub plugins: Vec<PluginConfig>,
}

impl Config {
    pub fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Load configuration from a file, falling back to defaults when the
    /// file does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("no config found at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;
        info!(
            "loaded config from {:?}: {} whitelisted plugins",
            path,
            config.plugins.len()
        );
        Ok(config)
    }
}

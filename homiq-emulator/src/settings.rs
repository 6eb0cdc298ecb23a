//! Emulator settings

use std::path::{Path, PathBuf};

use anyhow::Context;
use homiq_bridge::ServerConfig;
use homiq_sim::DEFAULT_EVENT_CAPACITY;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Environment variable that overrides the listening port
pub const PORT_ENV: &str = "TCP_PORT";

/// Persisted emulator settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// TCP listener configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Fixture file replacing the built-in seed data
    #[serde(default)]
    pub fixture: Option<PathBuf>,
    /// Event log ring size
    #[serde(default = "default_event_log_capacity")]
    pub event_log_capacity: usize,
}

fn default_event_log_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            fixture: None,
            event_log_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl Settings {
    /// Get the XDG config directory for the emulator
    /// Uses $XDG_CONFIG_HOME/homiq-emulator, falls back to ~/.config/homiq-emulator
    fn config_dir() -> Option<PathBuf> {
        if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_config);
            if path.is_absolute() {
                return Some(path.join("homiq-emulator"));
            }
        }

        dirs::home_dir().map(|h| h.join(".config").join("homiq-emulator"))
    }

    /// Default settings file path
    pub fn default_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("settings.json"))
    }

    /// Load settings from `path`, or the default location
    ///
    /// A missing or unreadable file yields the defaults.
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path.map(Path::to_path_buf).or_else(Self::default_path) else {
            return Self::default();
        };

        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) => {
                debug!("No settings at {}: {}", path.display(), e);
                return Self::default();
            }
        };

        match serde_json::from_str(&text) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Ignoring invalid settings file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Save settings to `path`, or the default location
    pub fn save(&self, path: Option<&Path>) -> anyhow::Result<PathBuf> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(Self::default_path)
            .context("Could not determine settings path")?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let json = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        Ok(path)
    }

    /// Apply the `TCP_PORT` override, if set to a valid port
    pub fn apply_port_env(&mut self, value: Option<&str>) {
        let Some(value) = value else {
            return;
        };
        match value.trim().parse::<u16>() {
            Ok(port) => self.server.port = port,
            Err(_) => warn!("Ignoring {}={:?}: not a port number", PORT_ENV, value),
        }
    }
}

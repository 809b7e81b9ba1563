//! Arbor Configuration Module
//!
//! Settings shared by a graph and every view derived from it.
//!
//! ## Priority Order (highest to lowest)
//!
//! 1. Environment variables (`ARBOR_ROOT_ID`, `ARBOR_ISOLATE_PANICS`)
//! 2. Config file (TOML, see [`ArborConfig::load`])
//! 3. Defaults

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ArborError, Result};
use crate::graph::Priority;

/// Default id of the implicit root node
pub const DEFAULT_ROOT_ID: &str = "root";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ArborConfig {
    /// Id of the implicit root. Reserved: no node may use it.
    pub root_id: String,

    /// Priority used by the shorthand mutation helpers
    pub default_priority: Priority,

    /// Run a full recompute when a filtered view is created
    pub refresh_new_views: bool,

    /// Catch panics raised by filter predicates and subscribers
    pub isolate_panics: bool,
}

impl Default for ArborConfig {
    fn default() -> Self {
        Self {
            root_id: DEFAULT_ROOT_ID.to_string(),
            default_priority: Priority::Low,
            refresh_new_views: true,
            isolate_panics: true,
        }
    }
}

impl ArborConfig {
    /// Parse configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| ArborError::ConfigError {
            reason: format!("Failed to parse config: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
    ///
    /// Returns default config if file doesn't exist.
    /// Returns error if file exists but is malformed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| ArborError::ConfigError {
            reason: format!("Failed to read config file: {}", e),
        })?;

        Self::from_toml_str(&content)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| ArborError::ConfigError {
            reason: format!("Failed to serialize config: {}", e),
        })?;

        fs::write(path.as_ref(), content).map_err(|e| ArborError::ConfigError {
            reason: format!("Failed to write config file: {}", e),
        })
    }

    /// Merge with environment variables
    ///
    /// Environment variables take precedence over config file values.
    pub fn with_env(mut self) -> Self {
        if let Ok(root_id) = std::env::var("ARBOR_ROOT_ID") {
            if !root_id.is_empty() {
                self.root_id = root_id;
            }
        }

        if let Ok(flag) = std::env::var("ARBOR_ISOLATE_PANICS") {
            match flag.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => self.isolate_panics = true,
                "0" | "false" | "no" => self.isolate_panics = false,
                other => tracing::warn!(value = other, "ignoring invalid ARBOR_ISOLATE_PANICS"),
            }
        }

        self
    }

    fn validate(&self) -> Result<()> {
        if self.root_id.is_empty() {
            return Err(ArborError::ConfigError {
                reason: "root_id must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

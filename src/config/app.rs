//! Application configuration structures.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::validation::{ConfigError, expand_env_vars};

// =============================================================================
// Constants
// =============================================================================

/// Default database file.
pub const DEFAULT_DB_PATH: &str = "logserial.db";

/// Default look-back window for queries without an explicit start (1 hour).
pub const DEFAULT_QUERY_WINDOW: Duration = Duration::from_secs(3600);

fn default_query_window() -> Duration {
    DEFAULT_QUERY_WINDOW
}

// =============================================================================
// Database Configuration
// =============================================================================

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database file path, or `:memory:` (default: "logserial.db").
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_DB_PATH.to_string(),
        }
    }
}

// =============================================================================
// Query Configuration
// =============================================================================

/// Defaults for the `query` command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Look-back window when no start is given (default: 1h).
    #[serde(default = "default_query_window", with = "humantime_serde")]
    pub default_window: Duration,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_window: DEFAULT_QUERY_WINDOW,
        }
    }
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Serial devices to ingest from, one supervisor each.
    #[serde(default)]
    pub devices: Vec<String>,

    /// Query defaults.
    #[serde(default)]
    pub query: QueryConfig,
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// `${VAR}` and `${VAR:-default}` references are expanded before parsing.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(&expand_env_vars(content))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.path.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "database path must not be empty".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for device in &self.devices {
            if device.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "device path must not be empty".to_string(),
                ));
            }
            if !seen.insert(device.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate device: '{}'",
                    device
                )));
            }
        }

        if self.query.default_window.is_zero() {
            return Err(ConfigError::ValidationError(
                "query default_window must be non-zero".to_string(),
            ));
        }

        Ok(())
    }
}

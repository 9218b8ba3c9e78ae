//! Configuration module for seriallog.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Database settings (path)
//! - Device list
//! - Query defaults

mod app;
mod validation;

pub use app::{AppConfig, DatabaseConfig, QueryConfig};
pub use validation::{ConfigError, expand_env_vars, parse_duration};

// Re-export constants
pub use app::{DEFAULT_DB_PATH, DEFAULT_QUERY_WINDOW};

//! Engine configuration
//!
//! Loaded from TOML; every key is optional.
//!
//! ```toml
//! [database]
//! path = "catalog.db"
//! busy_timeout_ms = 5000
//!
//! [schema]
//! path = "schema.yaml"
//!
//! [retry]
//! max_attempts = 3
//! backoff_ms = 50
//!
//! [logging]
//! profile = "production"
//! ```

use std::path::{Path, PathBuf};

use catalog_core::errors::{ExError, ExErrorKind};
use catalog_core::logging_facility::Profile;
use catalog_store::db::DEFAULT_BUSY_TIMEOUT_MS;
use catalog_store::errors::{io_error, Result};
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("catalog.db"),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    pub path: Option<PathBuf>,
}

/// Change-set retry policy
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per submission, first one included
    pub max_attempts: u32,
    /// Pause before attempt `n` is `n * backoff_ms`
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub profile: Profile,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub database: DatabaseConfig,
    pub schema: SchemaConfig,
    pub retry: RetryConfig,
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// # Errors
    ///
    /// `Serialization` on malformed TOML, `InvalidInput` when
    /// `retry.max_attempts` is zero.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(text).map_err(|e| {
            ExError::new(ExErrorKind::Serialization)
                .with_op("load_config")
                .with_message(e.to_string())
        })?;
        if config.retry.max_attempts == 0 {
            return Err(ExError::new(ExErrorKind::InvalidInput)
                .with_op("load_config")
                .with_message("retry.max_attempts must be at least 1"));
        }
        Ok(config)
    }

    /// # Errors
    ///
    /// `Io` if the file cannot be read, otherwise as [`Self::from_toml_str`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| io_error("load_config", e))?;
        Self::from_toml_str(&text)
    }
}

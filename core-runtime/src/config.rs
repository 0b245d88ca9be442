//! # Core Configuration Module
//!
//! Provides configuration management for the catalog core.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `CoreConfig`
//! instance holding the storage, ordering and logging settings. It enforces
//! fail-fast validation so a misconfigured pool is rejected before any
//! connection is opened.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//!
//! let config = CoreConfig::builder()
//!     .database_path("/var/lib/catalog/catalog.db")
//!     .max_connections(8)
//!     .build()
//!     .expect("Failed to build config");
//! ```
//!
//! The same settings can be loaded from JSON:
//!
//! ```ignore
//! let config = CoreConfig::from_json_str(r#"{
//!     "database": { "location": { "file": "catalog.db" }, "max_connections": 8 },
//!     "ordering": { "serialize_mutations": true }
//! }"#)?;
//! ```

use crate::error::{Error, Result};
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Where the SQLite database lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseLocation {
    /// Database file on disk (created if missing)
    File(PathBuf),
    /// Private in-memory database, gone when the pool closes
    InMemory,
}

/// Connection pool settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    pub location: DatabaseLocation,

    /// Minimum number of pooled connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Maximum number of pooled connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Maximum time to wait for a pooled connection, in seconds
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,

    /// How long a statement waits on a locked database before failing, in
    /// milliseconds
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_min_connections() -> u32 {
    1
}

fn default_max_connections() -> u32 {
    5
}

fn default_acquire_timeout_secs() -> u64 {
    30
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

impl DatabaseSettings {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

/// Playlist ordering behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderingSettings {
    /// Serialize append/remove/reorder per playlist inside this process
    #[serde(default = "default_serialize_mutations")]
    pub serialize_mutations: bool,
}

fn default_serialize_mutations() -> bool {
    true
}

impl Default for OrderingSettings {
    fn default() -> Self {
        Self {
            serialize_mutations: default_serialize_mutations(),
        }
    }
}

/// Core configuration for the catalog core.
///
/// Use [`CoreConfigBuilder`] or [`CoreConfig::from_json_str`] to construct
/// instances; both run [`CoreConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreConfig {
    pub database: DatabaseSettings,

    #[serde(default)]
    pub ordering: OrderingSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Parses and validates a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: CoreConfig = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("Invalid configuration document: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Database file path is not empty
    /// - Connection limits are consistent
    /// - Timeouts are non-zero
    pub fn validate(&self) -> Result<()> {
        let db = &self.database;

        if let DatabaseLocation::File(path) = &db.location {
            if path.as_os_str().is_empty() {
                return Err(Error::Config("Database path cannot be empty".to_string()));
            }
        }

        if db.max_connections == 0 {
            return Err(Error::Config(
                "Max connections must be at least 1".to_string(),
            ));
        }

        if db.min_connections > db.max_connections {
            return Err(Error::Config(format!(
                "Min connections ({}) exceeds max connections ({})",
                db.min_connections, db.max_connections
            )));
        }

        if db.acquire_timeout_secs == 0 {
            return Err(Error::Config(
                "Acquire timeout must be greater than 0 seconds".to_string(),
            ));
        }

        if db.busy_timeout_ms == 0 {
            return Err(Error::Config(
                "Busy timeout must be greater than 0 ms. \
                 A zero timeout turns every concurrent write into a conflict."
                    .to_string(),
            ));
        }

        Ok(())
    }
}

/// Builder for [`CoreConfig`].
#[derive(Debug, Default)]
pub struct CoreConfigBuilder {
    location: Option<DatabaseLocation>,
    min_connections: Option<u32>,
    max_connections: Option<u32>,
    acquire_timeout: Option<Duration>,
    busy_timeout: Option<Duration>,
    serialize_playlist_mutations: Option<bool>,
    logging: Option<LoggingConfig>,
}

impl CoreConfigBuilder {
    /// Sets the database file path.
    ///
    /// # Examples
    ///
    /// ```
    /// use core_runtime::config::CoreConfig;
    ///
    /// let builder = CoreConfig::builder()
    ///     .database_path("/path/to/catalog.db");
    /// ```
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.location = Some(DatabaseLocation::File(path.into()));
        self
    }

    /// Uses a private in-memory database.
    pub fn in_memory(mut self) -> Self {
        self.location = Some(DatabaseLocation::InMemory);
        self
    }

    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = Some(min);
        self
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = Some(max);
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    /// Sets how long a statement waits on a locked database.
    ///
    /// Default: 5 seconds
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = Some(timeout);
        self
    }

    /// Serialize playlist mutations per playlist within this process.
    ///
    /// Default: `true`
    pub fn serialize_playlist_mutations(mut self, enabled: bool) -> Self {
        self.serialize_playlist_mutations = Some(enabled);
        self
    }

    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = Some(logging);
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// # Errors
    ///
    /// Returns an error if no database location was set or if
    /// [`CoreConfig::validate`] rejects the values.
    pub fn build(self) -> Result<CoreConfig> {
        let location = self.location.ok_or_else(|| {
            Error::Config(
                "Database location is required. Use .database_path() or .in_memory() to set it."
                    .to_string(),
            )
        })?;

        let config = CoreConfig {
            database: DatabaseSettings {
                location,
                min_connections: self.min_connections.unwrap_or_else(default_min_connections),
                max_connections: self.max_connections.unwrap_or_else(default_max_connections),
                acquire_timeout_secs: self
                    .acquire_timeout
                    .map(|d| d.as_secs())
                    .unwrap_or_else(default_acquire_timeout_secs),
                busy_timeout_ms: self
                    .busy_timeout
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or_else(default_busy_timeout_ms),
            },
            ordering: OrderingSettings {
                serialize_mutations: self
                    .serialize_playlist_mutations
                    .unwrap_or_else(default_serialize_mutations),
            },
            logging: self.logging.unwrap_or_default(),
        };

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogLevel;

    #[test]
    fn test_builder_requires_database_location() {
        let result = CoreConfig::builder().max_connections(4).build();

        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Database location is required"));
    }

    #[test]
    fn test_builder_defaults() {
        let config = CoreConfig::builder()
            .database_path("/db/catalog.db")
            .build()
            .unwrap();

        assert_eq!(
            config.database.location,
            DatabaseLocation::File(PathBuf::from("/db/catalog.db"))
        );
        assert_eq!(config.database.min_connections, 1);
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.database.acquire_timeout(), Duration::from_secs(30));
        assert_eq!(config.database.busy_timeout(), Duration::from_secs(5));
        assert!(config.ordering.serialize_mutations);
    }

    #[test]
    fn test_builder_overrides() {
        let config = CoreConfig::builder()
            .in_memory()
            .min_connections(2)
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(60))
            .busy_timeout(Duration::from_millis(250))
            .serialize_playlist_mutations(false)
            .build()
            .unwrap();

        assert_eq!(config.database.location, DatabaseLocation::InMemory);
        assert_eq!(config.database.min_connections, 2);
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.database.acquire_timeout_secs, 60);
        assert_eq!(config.database.busy_timeout_ms, 250);
        assert!(!config.ordering.serialize_mutations);
    }

    #[test]
    fn test_validate_rejects_empty_path() {
        let result = CoreConfig::builder().database_path("").build();

        assert!(result.unwrap_err().to_string().contains("cannot be empty"));
    }

    #[test]
    fn test_validate_rejects_zero_max_connections() {
        let result = CoreConfig::builder()
            .in_memory()
            .min_connections(0)
            .max_connections(0)
            .build();

        assert!(result.unwrap_err().to_string().contains("at least 1"));
    }

    #[test]
    fn test_validate_rejects_min_above_max() {
        let result = CoreConfig::builder()
            .in_memory()
            .min_connections(8)
            .max_connections(2)
            .build();

        assert!(result.unwrap_err().to_string().contains("exceeds max"));
    }

    #[test]
    fn test_validate_rejects_zero_busy_timeout() {
        let result = CoreConfig::builder()
            .in_memory()
            .busy_timeout(Duration::ZERO)
            .build();

        assert!(result.unwrap_err().to_string().contains("Busy timeout"));
    }

    #[test]
    fn test_from_json_str() {
        let config = CoreConfig::from_json_str(
            r#"{
                "database": { "location": { "file": "catalog.db" }, "max_connections": 8 },
                "ordering": { "serialize_mutations": false },
                "logging": { "level": "debug" }
            }"#,
        )
        .unwrap();

        assert_eq!(
            config.database.location,
            DatabaseLocation::File(PathBuf::from("catalog.db"))
        );
        assert_eq!(config.database.max_connections, 8);
        assert_eq!(config.database.min_connections, 1);
        assert!(!config.ordering.serialize_mutations);
        assert_eq!(config.logging.level, LogLevel::Debug);
    }

    #[test]
    fn test_from_json_str_in_memory_defaults() {
        let config =
            CoreConfig::from_json_str(r#"{ "database": { "location": "in_memory" } }"#).unwrap();

        assert_eq!(config.database.location, DatabaseLocation::InMemory);
        assert!(config.ordering.serialize_mutations);
    }

    #[test]
    fn test_from_json_str_validates() {
        let result = CoreConfig::from_json_str(
            r#"{ "database": { "location": "in_memory", "max_connections": 0 } }"#,
        );

        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_from_json_str_rejects_malformed_document() {
        let result = CoreConfig::from_json_str("{ not json");

        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Invalid configuration document"));
    }

    #[test]
    fn test_config_is_cloneable() {
        let config = CoreConfig::builder().in_memory().build().unwrap();
        let cloned = config.clone();
        assert_eq!(config, cloned);
    }
}

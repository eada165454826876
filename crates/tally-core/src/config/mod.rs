//! Application configuration with layered loading.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//!
//! 1. **Compiled defaults**: hardcoded in struct `Default` implementations
//! 2. **Config file**: TOML file specified by the `TALLY_CONFIG` env var
//! 3. **Environment variables**: `TALLY__*` overrides for specific fields
//!
//! # Configuration Sections
//!
//! - [`TenantConfig`]: one entry per (guild, poll-type) namespace
//! - [`SchedulerConfig`]: expiration sweep interval
//! - [`StorageConfig`]: store backend selection and retry budget
//! - [`crate::scoring::ScoringConfig`]: multi-select matching policy
//! - [`LoggingConfig`]: log level and format
//!
//! # Validation
//!
//! Configuration is validated at load time: duplicate tenant keys, a zero
//! scheduler interval, or a missing database URL for the sqlite backend
//! return errors rather than failing later at runtime.
//!
//! # Example
//!
//! ```toml
//! [scheduler]
//! tick_interval_seconds = 60
//!
//! [storage]
//! backend = "sqlite"
//! database_url = "sqlite://./db/tally.db"
//!
//! [[tenants]]
//! poll_type = "world_pvp"
//! guild_id = 123456789
//! admin_role_id = 987654321
//! dashboard_command = "pvp-dashboard"
//! ```

use crate::scoring::ScoringConfig;
use crate::storage::RetryPolicy;
use crate::types::GuildId;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration for one tenant: a (guild, poll-type) namespace.
///
/// Immutable after load; the registry is populated from these entries at
/// startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    /// Poll-type identifier (e.g. "world_pvp"). Unique per guild.
    pub poll_type: String,

    /// Guild this tenant belongs to.
    pub guild_id: GuildId,

    /// Role allowed to create, close, and reveal polls for this tenant.
    pub admin_role_id: u64,

    /// Name of the command that renders this tenant's leaderboard dashboard.
    pub dashboard_command: String,
}

/// Expiration scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Interval between deadline sweeps in seconds. Must be greater than 0.
    /// Defaults to `60`.
    #[serde(default = "default_tick_interval_seconds")]
    pub tick_interval_seconds: u64,
}

fn default_tick_interval_seconds() -> u64 {
    60
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { tick_interval_seconds: 60 }
    }
}

/// Store backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// Non-durable in-memory store, for embedding and tests.
    #[default]
    Memory,
    /// Durable `SQLite` store.
    Sqlite,
}

/// Persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Which store backend to use. Defaults to `memory`.
    #[serde(default)]
    pub backend: StorageBackend,

    /// Database URL for the sqlite backend. Defaults to
    /// `sqlite://./db/tally.db`.
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Retry budget for transient backend failures.
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_database_url() -> String {
    "sqlite://./db/tally.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            database_url: default_database_url(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Application logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g. "trace", "debug", "info", "warn", "error").
    /// Defaults to `"info"`.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: `"json"` or `"pretty"`. Defaults to `"pretty"`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: "pretty".to_string() }
    }
}

/// Root application configuration containing all subsystem settings.
///
/// Environment overrides use the `TALLY__` prefix with `__` as the nesting
/// separator (e.g. `TALLY__SCHEDULER__TICK_INTERVAL_SECONDS=30`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TallyConfig {
    /// Tenant namespaces served by this process.
    #[serde(default)]
    pub tenants: Vec<TenantConfig>,

    /// Expiration scheduler settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Persistence settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Scoring policy settings.
    #[serde(default)]
    pub scoring: ScoringConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TallyConfig {
    /// Loads configuration from a TOML file with environment overrides.
    ///
    /// The file is optional: with no file present, compiled defaults plus
    /// environment variables apply.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be parsed or the resulting
    /// configuration fails validation.
    pub fn from_file<P: AsRef<Path>>(config_path: P) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .set_default("scheduler.tick_interval_seconds", 60)?
            .set_default("storage.backend", "memory")?
            .set_default("storage.database_url", "sqlite://./db/tally.db")?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name(&config_path.as_ref().to_string_lossy()).required(false))
            .add_source(Environment::with_prefix("TALLY").separator("__"))
            .build()?;

        let config: Self = builder.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from `config/tally.toml`, overridable via the
    /// `TALLY_CONFIG` environment variable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if loading or validation fails.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("TALLY_CONFIG").unwrap_or_else(|_| "config/tally.toml".to_string());
        Self::from_file(&config_path)
    }

    /// Validates cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Message`] describing the first violation found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.tick_interval_seconds == 0 {
            return Err(ConfigError::Message(
                "scheduler.tick_interval_seconds must be greater than 0".into(),
            ));
        }
        if self.storage.backend == StorageBackend::Sqlite && self.storage.database_url.is_empty() {
            return Err(ConfigError::Message(
                "storage.database_url is required for the sqlite backend".into(),
            ));
        }
        if self.storage.retry.max_attempts == 0 {
            return Err(ConfigError::Message(
                "storage.retry.max_attempts must be greater than 0".into(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for tenant in &self.tenants {
            if tenant.poll_type.is_empty() {
                return Err(ConfigError::Message("tenant poll_type cannot be empty".into()));
            }
            if !seen.insert((tenant.guild_id, tenant.poll_type.clone())) {
                return Err(ConfigError::Message(format!(
                    "duplicate tenant configuration for guild {} poll type '{}'",
                    tenant.guild_id, tenant.poll_type
                )));
            }
        }
        Ok(())
    }
}

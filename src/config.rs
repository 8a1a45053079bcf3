// ABOUTME: TOML configuration file parsing and validation
// ABOUTME: Converts the migration config into typed sections per mode

use crate::warehouse::client::WarehouseConfig;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Which migration pipeline to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Export/import through the platform file API.
    File,
    /// Cross-account replica database plus SQL copy.
    Database,
}

/// One Storage project endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectConfig {
    pub url: String,
    pub token: String,
}

/// Settings for the database-replica strategy.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub user: String,
    pub password: String,
    /// Warehouse used for replica refresh and bulk copy.
    pub warehouse: String,
    pub source_database: String,
    /// Defaults to `{source_database}_REPLICA`.
    #[serde(default)]
    pub replica_database: Option<String>,
    pub target_database: String,
    pub source_region: String,
    pub source_account: String,
    #[serde(default)]
    pub include_workspace_schemas: Vec<String>,
    #[serde(default)]
    pub include_external_schemas: Vec<String>,
}

impl DatabaseConfig {
    pub fn connection(&self) -> WarehouseConfig {
        WarehouseConfig {
            host: self.host.clone(),
            user: self.user.clone(),
            password: self.password.clone(),
        }
    }

    pub fn replica_database(&self) -> String {
        self.replica_database
            .clone()
            .unwrap_or_else(|| format!("{}_REPLICA", self.source_database))
    }
}

/// Settings for the replication-setup command, which talks to the source
/// account directly.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplicationConfig {
    pub source_host: String,
    pub source_user: String,
    pub source_password: String,
    /// Project databases are named `{database_prefix}_{project_id}`.
    pub database_prefix: String,
    /// Replicas are named `{replica_prefix}_{project_id}_REPLICA`; defaults
    /// to the database prefix.
    #[serde(default)]
    pub replica_prefix: Option<String>,
}

impl ReplicationConfig {
    pub fn source_connection(&self) -> WarehouseConfig {
        WarehouseConfig {
            host: self.source_host.clone(),
            user: self.source_user.clone(),
            password: self.source_password.clone(),
        }
    }

    pub fn replica_prefix(&self) -> &str {
        self.replica_prefix.as_deref().unwrap_or(&self.database_prefix)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_mode")]
    pub mode: Mode,
    #[serde(default)]
    pub dry_run: bool,
    /// Carry source row timestamps through exports and imports.
    #[serde(default)]
    pub preserve_timestamp: bool,
    /// Explicit table whitelist; empty means auto-discovery (file mode) or
    /// every replica table (database mode).
    #[serde(default)]
    pub tables: Vec<String>,
    /// Override for the sliced-export size above which the chunked transfer
    /// pipeline takes over.
    #[serde(default)]
    pub large_file_threshold_bytes: Option<u64>,
    pub source: ProjectConfig,
    pub destination: ProjectConfig,
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    pub replication: Option<ReplicationConfig>,
}

fn default_mode() -> Mode {
    Mode::File
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at {}", path.display()))?;
        let config: Config = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse TOML config at {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.mode == Mode::Database && self.database.is_none() {
            bail!("Mode \"database\" requires a [database] section in the config");
        }
        Ok(())
    }

    /// The [database] section, for paths that already validated the mode.
    pub fn database(&self) -> Result<&DatabaseConfig> {
        self.database
            .as_ref()
            .context("Missing [database] section in the config")
    }

    pub fn replication(&self) -> Result<&ReplicationConfig> {
        self.replication
            .as_ref()
            .context("Missing [replication] section in the config")
    }
}

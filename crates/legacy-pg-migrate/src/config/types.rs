//! Configuration type definitions.

use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Legacy database configuration (MySQL).
    pub source: SourceConfig,

    /// Target database configuration (PostgreSQL).
    pub target: TargetConfig,

    /// Migration behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,
}

/// Legacy database (MySQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 3306).
    #[serde(default = "default_mysql_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// MySQL SSL mode (default: "preferred").
    #[serde(default = "default_preferred")]
    pub ssl_mode: String,
}

impl std::fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// Target database (PostgreSQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Schema holding the migrated tables (default: "public").
    #[serde(default = "default_public_schema")]
    pub schema: String,

    /// SSL mode (default: "require").
    #[serde(default = "default_require")]
    pub ssl_mode: String,
}

impl std::fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// Migration behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Batch size for entities whose mapping does not set one (default: 500).
    #[serde(default = "default_batch_size")]
    pub default_batch_size: usize,

    /// Entities migrated concurrently within one dependency level.
    /// 1 keeps the run strictly sequential (default: 1).
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Entity keys to migrate. Empty means every entity in the registry.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<String>,

    /// Schema for the id mapping and migration log tables
    /// (default: "legacy_migration").
    #[serde(default = "default_control_schema")]
    pub control_schema: String,

    /// Maximum MySQL connections. Derived from workers if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_source_connections: Option<usize>,

    /// Maximum PostgreSQL connections. Derived from workers if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_target_connections: Option<usize>,

    /// Skip the join-table phase after the entities (default: false).
    #[serde(default)]
    pub skip_relationships: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            default_batch_size: default_batch_size(),
            workers: default_workers(),
            entities: Vec::new(),
            control_schema: default_control_schema(),
            max_source_connections: None,
            max_target_connections: None,
            skip_relationships: false,
        }
    }
}

impl MigrationConfig {
    pub fn get_max_source_connections(&self) -> usize {
        self.max_source_connections
            .unwrap_or_else(|| (self.workers * 2).clamp(4, 32))
    }

    /// Entity runners share the target pool with the id store and the
    /// migration log, so the derived size leaves headroom for both.
    pub fn get_max_target_connections(&self) -> usize {
        self.max_target_connections
            .unwrap_or_else(|| (self.workers * 2 + 2).clamp(4, 34))
    }
}

// Default value functions for serde
pub(crate) fn default_mysql_port() -> u16 {
    3306
}

pub(crate) fn default_pg_port() -> u16 {
    5432
}

fn default_public_schema() -> String {
    "public".to_string()
}

fn default_preferred() -> String {
    "preferred".to_string()
}

fn default_require() -> String {
    "require".to_string()
}

fn default_batch_size() -> usize {
    500
}

fn default_workers() -> usize {
    1
}

fn default_control_schema() -> String {
    "legacy_migration".to_string()
}

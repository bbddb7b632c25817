//! Configuration validation.

use super::Config;
use crate::core::identifier::validate_identifier;
use crate::error::{MigrateError, Result};
use crate::mapping::EntityKey;
use crate::target::tls::SslMode;

const MYSQL_SSL_MODES: &[&str] = &[
    "disabled",
    "preferred",
    "required",
    "verify_ca",
    "verify_identity",
];

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Source validation
    if config.source.host.is_empty() {
        return Err(MigrateError::Config("source.host is required".into()));
    }
    if config.source.database.is_empty() {
        return Err(MigrateError::Config("source.database is required".into()));
    }
    if config.source.user.is_empty() {
        return Err(MigrateError::Config("source.user is required".into()));
    }
    if !MYSQL_SSL_MODES.contains(&config.source.ssl_mode.to_lowercase().as_str()) {
        return Err(MigrateError::Config(format!(
            "source.ssl_mode must be one of {}, got '{}'",
            MYSQL_SSL_MODES.join(", "),
            config.source.ssl_mode
        )));
    }

    // Target validation
    if config.target.host.is_empty() {
        return Err(MigrateError::Config("target.host is required".into()));
    }
    if config.target.database.is_empty() {
        return Err(MigrateError::Config("target.database is required".into()));
    }
    if config.target.user.is_empty() {
        return Err(MigrateError::Config("target.user is required".into()));
    }
    validate_identifier(&config.target.schema)?;
    SslMode::parse(&config.target.ssl_mode)?;

    // Cannot migrate onto the legacy database itself
    if config.source.host == config.target.host
        && config.source.port == config.target.port
        && config.source.database == config.target.database
    {
        return Err(MigrateError::Config(
            "source and target cannot be the same database".into(),
        ));
    }

    let migration = &config.migration;
    if migration.default_batch_size == 0 {
        return Err(MigrateError::Config(
            "migration.default_batch_size must be at least 1".into(),
        ));
    }
    if migration.workers == 0 {
        return Err(MigrateError::Config(
            "migration.workers must be at least 1".into(),
        ));
    }
    if let Some(0) = migration.max_source_connections {
        return Err(MigrateError::Config(
            "migration.max_source_connections must be at least 1".into(),
        ));
    }
    if let Some(0) = migration.max_target_connections {
        return Err(MigrateError::Config(
            "migration.max_target_connections must be at least 1".into(),
        ));
    }
    validate_identifier(&migration.control_schema)?;
    for entity in &migration.entities {
        entity.parse::<EntityKey>()?;
    }

    Ok(())
}

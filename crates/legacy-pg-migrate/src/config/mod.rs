//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::{MigrateError, Result};
use sha2::{Digest, Sha256};
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file, then apply environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Build a configuration purely from the environment.
    ///
    /// Unset variables fall back to the defaults the portal's deployment has
    /// always used for its local databases.
    pub fn from_env() -> Result<Self> {
        let mut config = Config {
            source: SourceConfig {
                host: "localhost".to_string(),
                port: default_mysql_port(),
                database: "sabercon".to_string(),
                user: "root".to_string(),
                password: "root".to_string(),
                ssl_mode: "preferred".to_string(),
            },
            target: TargetConfig {
                host: "localhost".to_string(),
                port: default_pg_port(),
                database: "portal_sabercon".to_string(),
                user: "postgres".to_string(),
                password: "root".to_string(),
                schema: "public".to_string(),
                ssl_mode: "disable".to_string(),
            },
            migration: MigrationConfig::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Override connection settings from `MYSQL_*` and `PG_*` variables.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Override connection settings using `lookup` to read variables.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let port = |key: &str, value: String| -> Result<u16> {
            value
                .parse()
                .map_err(|_| MigrateError::Config(format!("{} must be a port number, got '{}'", key, value)))
        };

        if let Some(v) = get("MYSQL_HOST") {
            self.source.host = v;
        }
        if let Some(v) = get("MYSQL_PORT") {
            self.source.port = port("MYSQL_PORT", v)?;
        }
        if let Some(v) = get("MYSQL_DATABASE") {
            self.source.database = v;
        }
        if let Some(v) = get("MYSQL_USER") {
            self.source.user = v;
        }
        if let Some(v) = get("MYSQL_PASSWORD") {
            self.source.password = v;
        }

        if let Some(v) = get("PG_HOST") {
            self.target.host = v;
        }
        if let Some(v) = get("PG_PORT") {
            self.target.port = port("PG_PORT", v)?;
        }
        if let Some(v) = get("PG_DATABASE") {
            self.target.database = v;
        }
        if let Some(v) = get("PG_USER") {
            self.target.user = v;
        }
        if let Some(v) = get("PG_PASSWORD") {
            self.target.password = v;
        }

        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// SHA256 of the configuration, used to tell runs apart in logs.
    pub fn hash(&self) -> String {
        let yaml = serde_yaml::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(yaml.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    const YAML: &str = r#"
source:
  host: legacy-db
  database: sabercon
  user: root
  password: secret
target:
  host: pg
  database: portal
  user: postgres
  password: secret
  ssl_mode: disable
migration:
  workers: 2
  entities: [role, user]
"#;

    #[test]
    fn test_from_yaml_applies_defaults() {
        let config = Config::from_yaml(YAML).unwrap();
        assert_eq!(config.source.port, 3306);
        assert_eq!(config.target.port, 5432);
        assert_eq!(config.target.schema, "public");
        assert_eq!(config.migration.default_batch_size, 500);
        assert_eq!(config.migration.workers, 2);
        assert_eq!(config.migration.control_schema, "legacy_migration");
        assert_eq!(config.migration.entities, vec!["role", "user"]);
        assert!(!config.migration.skip_relationships);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(YAML.as_bytes()).unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.migration.workers, 2);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = Config::load("/nonexistent/legacy-migrate.yaml").unwrap_err();
        assert!(matches!(err, MigrateError::Io(_)));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::from_yaml(YAML).unwrap();
        let env: HashMap<&str, &str> = [
            ("MYSQL_HOST", "mysql.internal"),
            ("MYSQL_PORT", "3307"),
            ("PG_DATABASE", "portal_staging"),
            ("PG_PASSWORD", ""),
        ]
        .into_iter()
        .collect();
        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.source.host, "mysql.internal");
        assert_eq!(config.source.port, 3307);
        assert_eq!(config.target.database, "portal_staging");
        // Empty values leave the file setting alone.
        assert_eq!(config.target.password, "secret");
    }

    #[test]
    fn test_env_override_rejects_bad_port() {
        let mut config = Config::from_yaml(YAML).unwrap();
        let err = config
            .apply_overrides(|k| (k == "PG_PORT").then(|| "abc".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("PG_PORT"));
    }

    #[test]
    fn test_hash_changes_with_config() {
        let a = Config::from_yaml(YAML).unwrap();
        let mut b = a.clone();
        assert_eq!(a.hash(), b.hash());
        b.migration.workers = 4;
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_derived_pool_sizes() {
        let mut migration = MigrationConfig::default();
        assert_eq!(migration.get_max_source_connections(), 4);
        assert_eq!(migration.get_max_target_connections(), 4);
        migration.workers = 8;
        assert_eq!(migration.get_max_source_connections(), 16);
        assert_eq!(migration.get_max_target_connections(), 18);
        migration.max_target_connections = Some(3);
        assert_eq!(migration.get_max_target_connections(), 3);
    }
}

//! Error types for the migration library.

use thiserror::Error;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, bad registry, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source (legacy MySQL) connection or query error
    #[error("Source database error: {0}")]
    Source(#[from] sqlx::Error),

    /// Target (PostgreSQL) connection or query error
    #[error("Target database error: {0}")]
    Target(#[from] tokio_postgres::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// An entity migration halted the run
    #[error("Migration of entity '{entity}' failed: {source}")]
    Entity {
        entity: String,
        #[source]
        source: Box<MigrateError>,
    },

    /// Data transfer failed for a specific table
    #[error("Transfer failed for table {table}: {message}")]
    Transfer { table: String, message: String },

    /// The mapping registry declares a dependency cycle
    #[error("Cyclic dependency between entities: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    /// Entity key that is not part of the registry
    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    /// A single record could not be converted
    #[error("Conversion failed for {entity} record {}: {message}", .legacy_id.map(|id| id.to_string()).unwrap_or_else(|| "<no id>".to_string()))]
    Conversion {
        entity: String,
        legacy_id: Option<i64>,
        message: String,
    },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Migration was cancelled (SIGINT, etc.)
    #[error("Migration cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl ToString, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Transfer error
    pub fn transfer(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Transfer {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Wrap an error with the entity whose migration it halted.
    ///
    /// Cancellation is passed through untouched so callers can still match on it.
    pub fn entity(entity: impl Into<String>, source: MigrateError) -> Self {
        match source {
            MigrateError::Cancelled => MigrateError::Cancelled,
            other => MigrateError::Entity {
                entity: entity.into(),
                source: Box::new(other),
            },
        }
    }

    /// Whether the error means a store is unreachable rather than that one
    /// statement was rejected.
    ///
    /// Row-level fallbacks use this to tell a malformed row apart from a lost
    /// connection, which must halt the entity.
    pub fn is_connection_error(&self) -> bool {
        match self {
            MigrateError::Pool { .. } | MigrateError::Io(_) => true,
            MigrateError::Source(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            ),
            MigrateError::Target(e) => {
                e.is_closed()
                    || std::error::Error::source(e)
                        .map(|s| s.is::<std::io::Error>())
                        .unwrap_or(false)
            }
            MigrateError::Entity { source, .. } => source.is_connection_error(),
            _ => false,
        }
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_)
            | MigrateError::CyclicDependency { .. }
            | MigrateError::UnknownEntity(_)
            | MigrateError::Yaml(_) => 2,
            MigrateError::Cancelled => 130,
            _ => 1,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_names_entities() {
        let err = MigrateError::CyclicDependency {
            cycle: vec!["user".into(), "role".into(), "user".into()],
        };
        assert_eq!(
            err.to_string(),
            "Cyclic dependency between entities: user -> role -> user"
        );
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_conversion_message_without_id() {
        let err = MigrateError::Conversion {
            entity: "video".into(),
            legacy_id: None,
            message: "missing id".into(),
        };
        assert!(err.to_string().contains("<no id>"));
    }

    #[test]
    fn test_entity_wrap_keeps_cancellation() {
        let err = MigrateError::entity("user", MigrateError::Cancelled);
        assert!(matches!(err, MigrateError::Cancelled));
        assert_eq!(err.exit_code(), 130);
    }

    #[test]
    fn test_entity_wrap_reports_chain() {
        let err = MigrateError::entity("user", MigrateError::pool("refused", "getting connection"));
        assert!(err.is_connection_error());
        let detailed = err.format_detailed();
        assert!(detailed.contains("entity 'user'"));
        assert!(detailed.contains("Caused by"));
    }

    #[test]
    fn test_statement_errors_are_not_connection_errors() {
        let err = MigrateError::transfer("users", "bad value");
        assert!(!err.is_connection_error());
    }
}

//! # legacy-pg-migrate
//!
//! Migrates the legacy MySQL portal database into the PostgreSQL portal
//! schema.
//!
//! Unlike a table copy, every entity is reshaped on the way: legacy integer
//! keys become UUIDs, field names are mapped, references between entities
//! are re-pointed through a persistent id mapping store, and join tables are
//! rebuilt once every entity has landed. Features:
//!
//! - **Dependency ordering** resolved from the mapping registry
//! - **Idempotent re-runs** through the id mapping store and conflict-tolerant inserts
//! - **Per-record isolation** so one bad row never sinks its batch
//! - **Parallel levels** of independent entities with a bounded worker pool
//! - **Migration log** kept in the target database
//!
//! ## Example
//!
//! ```rust,no_run
//! use legacy_pg_migrate::{Config, Migrator};
//!
//! #[tokio::main]
//! async fn main() -> legacy_pg_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let migrator = Migrator::connect(config).await?;
//!     let report = migrator.run_full_migration().await?;
//!     println!("{}", report);
//!     migrator.disconnect().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod idmap;
pub mod mapping;
pub mod orchestrator;
pub mod report;
pub mod source;
pub mod state;
pub mod target;
pub mod transfer;
pub mod verify;

#[cfg(test)]
mod testing;

// Re-exports for convenient access
pub use config::{Config, MigrationConfig, SourceConfig, TargetConfig};
pub use error::{MigrateError, Result};
pub use mapping::{EntityKey, MappingRegistry};
pub use orchestrator::{HealthCheckResult, Migrator};
pub use report::MigrationReport;
pub use state::LogEntry;
pub use verify::VerifyResult;

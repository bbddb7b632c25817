//! Migration log trait.
//!
//! Implementations:
//!
//! - **PostgreSQL**: `PgMigrationLog` in `db.rs`, next to the id mappings.
//! - **Memory**: `MemoryMigrationLog` in `memory.rs`, for tests.
//!
//! The orchestrator works with `Arc<dyn MigrationLog>` without knowing the
//! concrete type.

use async_trait::async_trait;

use super::LogEntry;
use crate::error::Result;

/// Persists one row per finished entity or relationship run.
#[async_trait]
pub trait MigrationLog: Send + Sync {
    /// Create the log table if absent. Idempotent.
    async fn init_schema(&self) -> Result<()>;

    /// Append an entry.
    async fn record(&self, entry: &LogEntry) -> Result<()>;

    /// The `limit` most recent entries, newest first.
    async fn recent(&self, limit: usize) -> Result<Vec<LogEntry>>;

    /// Get the backend type name for logging.
    fn backend_type(&self) -> &'static str;
}

//! Legacy source database access.

mod mysql;

pub use mysql::MysqlReader;

use async_trait::async_trait;

use crate::core::Record;
use crate::error::Result;

/// Reads paginated record batches from the legacy store.
///
/// Implementations must return rows in a stable order for a given
/// `order_by`, so that offset pagination neither skips nor repeats rows.
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Number of rows in a table.
    async fn count(&self, table: &str) -> Result<i64>;

    /// Up to `limit` rows starting at `offset`, ordered by `order_by` ascending.
    async fn extract_batch(
        &self,
        table: &str,
        order_by: &[&str],
        offset: u64,
        limit: usize,
    ) -> Result<Vec<Record>>;

    /// Check the store is reachable.
    async fn ping(&self) -> Result<()>;

    /// Get the database type name.
    fn db_type(&self) -> &str;

    /// Release connections.
    async fn close(&self);
}

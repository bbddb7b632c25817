//! Legacy id to new id correspondences.
//!
//! The [`IdMappingStore`] is the only state shared between entity runs: each
//! entity records the new id minted for every legacy row it converts, and
//! later entities resolve their foreign keys through it. Because an existing
//! correspondence is always reused, a re-run produces the same new ids and
//! conflict-tolerant inserts turn into no-ops.
//!
//! Implementations:
//!
//! - **PostgreSQL**: [`PgIdStore`] in `db.rs`, the durable store.
//! - **Memory**: [`MemoryIdStore`], for tests and dry runs.

mod cache;
mod db;

pub use cache::IdentifierCache;
pub use db::PgIdStore;

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{MigrateError, Result};

/// Result of [`IdMappingStore::assign`].
#[derive(Debug, Clone, Default)]
pub struct Assignment {
    /// New id for every requested legacy id.
    pub ids: HashMap<i64, Uuid>,
    /// Legacy ids whose correspondence was created by this call.
    pub minted: HashSet<i64>,
}

impl Assignment {
    pub fn get(&self, legacy_id: i64) -> Option<Uuid> {
        self.ids.get(&legacy_id).copied()
    }

    pub fn was_minted(&self, legacy_id: i64) -> bool {
        self.minted.contains(&legacy_id)
    }
}

/// Durable store of `(source_table, legacy_id) -> new_id`.
///
/// Both `(source_table, legacy_id)` and `(source_table, new_id)` are unique.
#[async_trait]
pub trait IdMappingStore: Send + Sync {
    /// Create the backing table if absent. Idempotent.
    async fn init_schema(&self) -> Result<()>;

    /// Get-or-create the new ids for `legacy_ids`.
    ///
    /// Correspondences are persisted before this returns, so any converter
    /// running afterwards can resolve them.
    async fn assign(&self, source_table: &str, legacy_ids: &[i64]) -> Result<Assignment>;

    /// Existing correspondences for `legacy_ids`. Unknown ids are absent.
    async fn lookup(&self, source_table: &str, legacy_ids: &[i64]) -> Result<HashMap<i64, Uuid>>;

    /// Remove one correspondence, only if it still points at `new_id`.
    async fn retract(&self, source_table: &str, legacy_id: i64, new_id: Uuid) -> Result<()>;

    /// Number of correspondences recorded for a table.
    async fn count(&self, source_table: &str) -> Result<i64>;

    /// Backend type name for logging.
    fn backend_type(&self) -> &'static str;
}

/// In-memory id store.
#[derive(Debug, Default)]
pub struct MemoryIdStore {
    tables: Mutex<HashMap<String, HashMap<i64, Uuid>>>,
}

impl MemoryIdStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, HashMap<String, HashMap<i64, Uuid>>>> {
        self.tables
            .lock()
            .map_err(|_| MigrateError::Config("id store lock poisoned".into()))
    }
}

#[async_trait]
impl IdMappingStore for MemoryIdStore {
    async fn init_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn assign(&self, source_table: &str, legacy_ids: &[i64]) -> Result<Assignment> {
        let mut tables = self.tables()?;
        let table = tables.entry(source_table.to_string()).or_default();
        let mut assignment = Assignment::default();
        for &legacy_id in legacy_ids {
            let new_id = *table.entry(legacy_id).or_insert_with(|| {
                assignment.minted.insert(legacy_id);
                Uuid::new_v4()
            });
            assignment.ids.insert(legacy_id, new_id);
        }
        Ok(assignment)
    }

    async fn lookup(&self, source_table: &str, legacy_ids: &[i64]) -> Result<HashMap<i64, Uuid>> {
        let tables = self.tables()?;
        let Some(table) = tables.get(source_table) else {
            return Ok(HashMap::new());
        };
        Ok(legacy_ids
            .iter()
            .filter_map(|id| table.get(id).map(|new_id| (*id, *new_id)))
            .collect())
    }

    async fn retract(&self, source_table: &str, legacy_id: i64, new_id: Uuid) -> Result<()> {
        let mut tables = self.tables()?;
        if let Some(table) = tables.get_mut(source_table) {
            if table.get(&legacy_id) == Some(&new_id) {
                table.remove(&legacy_id);
            }
        }
        Ok(())
    }

    async fn count(&self, source_table: &str) -> Result<i64> {
        Ok(self
            .tables()?
            .get(source_table)
            .map(|t| t.len() as i64)
            .unwrap_or(0))
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_assign_is_get_or_create() {
        let store = MemoryIdStore::new();
        let first = store.assign("user", &[1, 2]).await.unwrap();
        assert_eq!(first.minted, HashSet::from([1, 2]));

        let second = store.assign("user", &[2, 3]).await.unwrap();
        assert_eq!(second.get(2), first.get(2));
        assert!(!second.was_minted(2));
        assert!(second.was_minted(3));
        assert_eq!(store.count("user").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_tables_are_independent() {
        let store = MemoryIdStore::new();
        let users = store.assign("user", &[1]).await.unwrap();
        let roles = store.assign("role", &[1]).await.unwrap();
        assert_ne!(users.get(1), roles.get(1));
        assert!(store.lookup("tag", &[1]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_retract_requires_matching_new_id() {
        let store = MemoryIdStore::new();
        let assigned = store.assign("video", &[7]).await.unwrap();
        let id = assigned.get(7).unwrap();

        store.retract("video", 7, Uuid::new_v4()).await.unwrap();
        assert_eq!(store.lookup("video", &[7]).await.unwrap().get(&7), Some(&id));

        store.retract("video", 7, id).await.unwrap();
        assert!(store.lookup("video", &[7]).await.unwrap().is_empty());
    }
}

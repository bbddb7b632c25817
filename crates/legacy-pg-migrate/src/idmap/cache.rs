//! Read-through cache in front of the id mapping store.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use uuid::Uuid;

use super::IdMappingStore;
use crate::error::Result;
use crate::mapping::{EntityKey, IdResolver, MappingRegistry};

/// Per-run cache of legacy id correspondences.
///
/// Nothing is loaded up front: each batch calls [`prefetch`](Self::prefetch)
/// with the legacy ids it references, and only ids not seen before go to the
/// store. Misses are cached too, so a dangling reference costs one query.
pub struct IdentifierCache {
    store: Arc<dyn IdMappingStore>,
    source_tables: HashMap<EntityKey, String>,
    entries: HashMap<EntityKey, HashMap<i64, Option<Uuid>>>,
}

impl IdentifierCache {
    pub fn new(store: Arc<dyn IdMappingStore>, registry: &MappingRegistry) -> Self {
        let source_tables = EntityKey::ALL
            .iter()
            .map(|k| (*k, registry.source_table_of(*k)))
            .collect();
        Self {
            store,
            source_tables,
            entries: HashMap::new(),
        }
    }

    fn source_table(&self, entity: EntityKey) -> &str {
        self.source_tables
            .get(&entity)
            .map(String::as_str)
            .unwrap_or_else(|| entity.as_str())
    }

    /// Load the correspondences of `legacy_ids` that are not cached yet.
    pub async fn prefetch<I>(&mut self, entity: EntityKey, legacy_ids: I) -> Result<()>
    where
        I: IntoIterator<Item = i64>,
    {
        let known = self.entries.get(&entity);
        let wanted: BTreeSet<i64> = legacy_ids
            .into_iter()
            .filter(|id| known.map(|k| !k.contains_key(id)).unwrap_or(true))
            .collect();
        if wanted.is_empty() {
            return Ok(());
        }

        let wanted: Vec<i64> = wanted.into_iter().collect();
        let found = self
            .store
            .lookup(self.source_table(entity), &wanted)
            .await?;

        let slot = self.entries.entry(entity).or_default();
        for id in wanted {
            slot.insert(id, found.get(&id).copied());
        }
        Ok(())
    }

    /// Record a correspondence the caller just created.
    pub fn insert(&mut self, entity: EntityKey, legacy_id: i64, new_id: Uuid) {
        self.entries
            .entry(entity)
            .or_default()
            .insert(legacy_id, Some(new_id));
    }

    /// Mark a correspondence as gone after it was retracted.
    pub fn forget(&mut self, entity: EntityKey, legacy_id: i64) {
        self.entries
            .entry(entity)
            .or_default()
            .insert(legacy_id, None);
    }

    pub fn get(&self, entity: EntityKey, legacy_id: i64) -> Option<Uuid> {
        self.entries
            .get(&entity)
            .and_then(|e| e.get(&legacy_id))
            .copied()
            .flatten()
    }

    /// Number of cached entries, hits and misses alike.
    pub fn len(&self) -> usize {
        self.entries.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl IdResolver for IdentifierCache {
    fn resolve(&self, entity: EntityKey, legacy_id: i64) -> Option<Uuid> {
        self.get(entity, legacy_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idmap::MemoryIdStore;

    #[tokio::test]
    async fn test_prefetch_reads_through() {
        let store = Arc::new(MemoryIdStore::new());
        let assigned = store.assign("institution", &[1, 2]).await.unwrap();
        let registry = MappingRegistry::portal().unwrap();

        let mut cache = IdentifierCache::new(store.clone(), &registry);
        assert_eq!(cache.resolve(EntityKey::Institution, 1), None);

        cache
            .prefetch(EntityKey::Institution, [1, 3, 1])
            .await
            .unwrap();
        assert_eq!(cache.resolve(EntityKey::Institution, 1), assigned.get(1));
        assert_eq!(cache.resolve(EntityKey::Institution, 3), None);
        // Only 1 and 3 were requested; 2 stays unloaded.
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_insert_and_forget() {
        let store = Arc::new(MemoryIdStore::new());
        let registry = MappingRegistry::portal().unwrap();
        let mut cache = IdentifierCache::new(store, &registry);

        let id = Uuid::new_v4();
        cache.insert(EntityKey::User, 10, id);
        assert_eq!(cache.resolve(EntityKey::User, 10), Some(id));

        cache.forget(EntityKey::User, 10);
        assert_eq!(cache.resolve(EntityKey::User, 10), None);
    }

    #[tokio::test]
    async fn test_cached_miss_is_not_refetched() {
        let store = Arc::new(MemoryIdStore::new());
        let registry = MappingRegistry::portal().unwrap();
        let mut cache = IdentifierCache::new(store.clone(), &registry);

        cache.prefetch(EntityKey::Role, [5]).await.unwrap();
        store.assign("role", &[5]).await.unwrap();
        cache.prefetch(EntityKey::Role, [5]).await.unwrap();
        assert_eq!(cache.resolve(EntityKey::Role, 5), None);
    }
}

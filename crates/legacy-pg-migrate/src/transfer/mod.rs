//! Batch pipeline: extract, convert, load.
//!
//! One entity is migrated by walking its legacy table in primary key order,
//! one batch at a time. Per batch:
//! - new ids are assigned (get-or-create) and persisted before conversion
//! - the foreign keys the batch references are prefetched into the cache
//! - each record is converted; a conversion error drops only that record
//! - the batch is loaded with conflict-tolerant inserts
//!
//! A correspondence minted in this batch for a record that never reached the
//! target is retracted again, so later lookups yield NULL rather than a new
//! id with no row behind it.

mod convert;
mod relationship;

pub use convert::{convert_record, Conversion};

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::core::Record;
use crate::error::{MigrateError, Result};
use crate::idmap::{Assignment, IdMappingStore, IdentifierCache};
use crate::mapping::{EntityKey, MappingRegistry, MigrationMapping};
use crate::source::SourceReader;
use crate::state::{MigrationProgress, ProgressTracker};
use crate::target::{BulkLoader, OnConflict};

/// Counts for one processed batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub fetched: usize,
    /// Rows now present in the target.
    pub migrated: u64,
    /// Rows dropped by conversion or rejected by the target.
    pub failed: u64,
    /// Foreign keys that did not resolve and were written as NULL.
    pub unresolved: usize,
}

/// Migrates entities and join tables between the two stores.
///
/// Cheap to clone; clones share stores, tracker and cancellation token, so
/// concurrent entity tasks each get their own handle.
#[derive(Clone)]
pub struct TransferEngine {
    source: Arc<dyn SourceReader>,
    loader: BulkLoader,
    ids: Arc<dyn IdMappingStore>,
    registry: Arc<MappingRegistry>,
    tracker: Arc<ProgressTracker>,
    cancel: CancellationToken,
    default_batch_size: usize,
}

impl TransferEngine {
    pub fn new(
        source: Arc<dyn SourceReader>,
        loader: BulkLoader,
        ids: Arc<dyn IdMappingStore>,
        registry: Arc<MappingRegistry>,
        tracker: Arc<ProgressTracker>,
        default_batch_size: usize,
    ) -> Self {
        Self {
            source,
            loader,
            ids,
            registry,
            tracker,
            cancel: CancellationToken::new(),
            default_batch_size: default_batch_size.max(1),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(MigrateError::Cancelled);
        }
        Ok(())
    }

    /// Migrate every row of one entity.
    ///
    /// The final progress is recorded whether the run succeeds or not. An
    /// error here means the entity could not be finished (lost connection,
    /// failed extraction, cancellation); record-level problems are counted
    /// in the progress instead.
    pub async fn migrate_entity(&self, key: EntityKey) -> Result<MigrationProgress> {
        let mapping = self
            .registry
            .get(key)
            .ok_or_else(|| MigrateError::UnknownEntity(key.to_string()))?;

        let mut progress =
            MigrationProgress::new(key.as_str(), &mapping.source_table, &mapping.target_table);
        info!(
            "Migrating {}: {} -> {}",
            key, mapping.source_table, mapping.target_table
        );

        let result = self.run_entity(mapping, &mut progress).await;
        match &result {
            Ok(()) => {
                progress.complete();
                info!(
                    "{}: completed, {}/{} migrated, {} failed in {:.1}s",
                    key,
                    progress.migrated_records,
                    progress.total_records,
                    progress.failed_records,
                    progress.elapsed().num_milliseconds() as f64 / 1000.0
                );
            }
            Err(e) => {
                progress.fail(e.to_string());
                error!("{}: migration failed: {}", key, e);
            }
        }
        self.tracker.finish(&progress).await;

        result
            .map(|_| progress)
            .map_err(|e| MigrateError::entity(key.as_str(), e))
    }

    async fn run_entity(
        &self,
        mapping: &MigrationMapping,
        progress: &mut MigrationProgress,
    ) -> Result<()> {
        let total = self.source.count(&mapping.source_table).await?;
        progress.start(total);

        let batch_size = mapping.effective_batch_size(self.default_batch_size);
        let mut cache = IdentifierCache::new(self.ids.clone(), &self.registry);
        let mut offset: u64 = 0;
        let mut batch_no = 0usize;

        loop {
            self.check_cancelled()?;

            let started = Instant::now();
            let raw = self
                .source
                .extract_batch(&mapping.source_table, &["id"], offset, batch_size)
                .await?;
            if raw.is_empty() {
                break;
            }
            batch_no += 1;
            offset += raw.len() as u64;

            let stats = self.process_batch(mapping, &raw, &mut cache).await?;
            progress.migrated_records += stats.migrated as i64;
            progress.failed_records += stats.failed as i64;

            info!(
                "{}: batch {} ({} rows) {} migrated, {} failed [{}/{}] in {:?}",
                mapping.key,
                batch_no,
                stats.fetched,
                stats.migrated,
                stats.failed,
                progress.migrated_records,
                progress.total_records,
                started.elapsed()
            );

            if raw.len() < batch_size {
                break;
            }
        }

        Ok(())
    }

    /// Convert and load one batch of raw records.
    pub async fn process_batch(
        &self,
        mapping: &MigrationMapping,
        raw: &[Record],
        cache: &mut IdentifierCache,
    ) -> Result<BatchStats> {
        let key = mapping.key;
        let mut stats = BatchStats {
            fetched: raw.len(),
            ..BatchStats::default()
        };

        let assignment = if mapping.generates_id {
            let legacy_ids: Vec<i64> = raw.iter().filter_map(Record::legacy_id).collect();
            self.ids.assign(&mapping.source_table, &legacy_ids).await?
        } else {
            Assignment::default()
        };
        for (legacy_id, new_id) in &assignment.ids {
            cache.insert(key, *legacy_id, *new_id);
        }

        for (entity, field) in mapping.lookup_entities() {
            let referenced: Vec<i64> = raw
                .iter()
                .filter_map(|r| r.value(field).as_i64())
                .filter(|id| *id != 0)
                .collect();
            cache.prefetch(entity, referenced).await?;
        }

        let mut converted = Vec::with_capacity(raw.len());
        let mut origins = Vec::with_capacity(raw.len());
        for record in raw {
            let legacy_id = record.legacy_id();
            let new_id = legacy_id.and_then(|id| assignment.get(id));

            if mapping.generates_id && legacy_id.is_none() {
                error!("{}: record without a usable id dropped", key);
                stats.failed += 1;
                continue;
            }

            match convert_record(record, mapping, new_id, &*cache) {
                Ok(conversion) => {
                    stats.unresolved += conversion.unresolved;
                    converted.push(conversion.record);
                    origins.push(legacy_id);
                }
                Err(message) => {
                    let err = MigrateError::Conversion {
                        entity: key.to_string(),
                        legacy_id,
                        message,
                    };
                    error!("{}", err);
                    stats.failed += 1;
                    self.release(mapping, legacy_id, &assignment, cache).await?;
                }
            }
        }

        let on_conflict = if mapping.generates_id {
            OnConflict::id()
        } else {
            OnConflict::Any
        };
        let outcome = self
            .loader
            .load(&mapping.target_table, &converted, &on_conflict)
            .await?;
        stats.migrated = outcome.landed();

        for idx in &outcome.failed {
            stats.failed += 1;
            let legacy_id = origins.get(*idx).copied().flatten();
            self.release(mapping, legacy_id, &assignment, cache).await?;
        }

        if stats.unresolved > 0 {
            warn!(
                "{}: {} foreign keys had no migrated counterpart and were set to NULL",
                key, stats.unresolved
            );
        }

        Ok(stats)
    }

    /// Retract a correspondence minted for a record that was not loaded.
    async fn release(
        &self,
        mapping: &MigrationMapping,
        legacy_id: Option<i64>,
        assignment: &Assignment,
        cache: &mut IdentifierCache,
    ) -> Result<()> {
        let Some(legacy_id) = legacy_id else {
            return Ok(());
        };
        if !assignment.was_minted(legacy_id) {
            return Ok(());
        }
        if let Some(new_id) = assignment.get(legacy_id) {
            self.ids
                .retract(&mapping.source_table, legacy_id, new_id)
                .await?;
            cache.forget(mapping.key, legacy_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SqlValue;
    use crate::idmap::MemoryIdStore;
    use crate::mapping::{RelationshipMapping, ValueConverter};
    use crate::state::{MemoryMigrationLog, TaskStatus};
    use crate::testing::{FakeSource, FakeTarget};

    struct Harness {
        source: Arc<FakeSource>,
        target: Arc<FakeTarget>,
        ids: Arc<MemoryIdStore>,
        log: Arc<MemoryMigrationLog>,
        engine: TransferEngine,
    }

    fn harness(mappings: Vec<MigrationMapping>, relationships: Vec<RelationshipMapping>) -> Harness {
        let source = Arc::new(FakeSource::new());
        let target = Arc::new(FakeTarget::new());
        let ids = Arc::new(MemoryIdStore::new());
        let log = Arc::new(MemoryMigrationLog::new());
        let registry = Arc::new(MappingRegistry::new(mappings, relationships).unwrap());
        let engine = TransferEngine::new(
            source.clone(),
            BulkLoader::new(target.clone()),
            ids.clone(),
            registry,
            Arc::new(ProgressTracker::new(log.clone())),
            500,
        );
        Harness {
            source,
            target,
            ids,
            log,
            engine,
        }
    }

    fn row(fields: &[(&str, SqlValue)]) -> Record {
        fields.iter().cloned().collect()
    }

    fn genre_mapping() -> MigrationMapping {
        MigrationMapping::new(EntityKey::Genre, "genres")
            .generates_id()
            .field("name", "name")
            .skip(&["version"])
            .batch_size(2)
    }

    #[tokio::test]
    async fn test_simple_entity_without_dependencies() {
        let h = harness(vec![genre_mapping()], vec![]);
        h.source.add_rows(
            "genre",
            vec![
                row(&[("id", SqlValue::I64(1)), ("name", "A".into()), ("version", SqlValue::I64(7))]),
                row(&[("id", SqlValue::I64(2)), ("name", "B".into()), ("version", SqlValue::I64(7))]),
            ],
        );

        let progress = h.engine.migrate_entity(EntityKey::Genre).await.unwrap();
        assert_eq!(progress.total_records, 2);
        assert_eq!(progress.migrated_records, 2);
        assert_eq!(progress.status, TaskStatus::Completed);

        let rows = h.target.rows("genres");
        assert_eq!(rows.len(), 2);
        let names: Vec<_> = rows.iter().map(|r| r.value("name").clone()).collect();
        assert_eq!(names, vec![SqlValue::from("A"), SqlValue::from("B")]);
        for r in &rows {
            assert!(matches!(r.value("id"), SqlValue::Uuid(_)));
            assert!(!r.contains("version"));
        }
        assert_eq!(h.ids.count("genre").await.unwrap(), 2);
        assert_eq!(h.log.entries().len(), 1);
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let h = harness(vec![genre_mapping()], vec![]);
        h.source.add_rows(
            "genre",
            (1_i64..=5)
                .map(|i| row(&[("id", SqlValue::I64(i)), ("name", format!("g{}", i).into())]))
                .collect(),
        );

        h.engine.migrate_entity(EntityKey::Genre).await.unwrap();
        let first_ids: Vec<_> = h
            .target
            .rows("genres")
            .iter()
            .map(|r| r.value("id").clone())
            .collect();

        let again = h.engine.migrate_entity(EntityKey::Genre).await.unwrap();
        assert_eq!(again.migrated_records, 5);
        let rows = h.target.rows("genres");
        assert_eq!(rows.len(), 5);
        let second_ids: Vec<_> = rows.iter().map(|r| r.value("id").clone()).collect();
        assert_eq!(first_ids, second_ids);
    }

    #[tokio::test]
    async fn test_one_bad_record_does_not_sink_the_batch() {
        fn reject_poison(v: &SqlValue, _: &Record) -> std::result::Result<SqlValue, String> {
            match v.as_str() {
                Some("poison") => Err("unparseable value".into()),
                _ => Ok(v.clone()),
            }
        }
        let mapping = MigrationMapping::new(EntityKey::Tag, "tags")
            .generates_id()
            .convert("name", ValueConverter::Derive(reject_poison));
        let h = harness(vec![mapping], vec![]);
        h.source.add_rows(
            "tag",
            vec![
                row(&[("id", SqlValue::I64(1)), ("name", "a".into())]),
                row(&[("id", SqlValue::I64(2)), ("name", "poison".into())]),
                row(&[("id", SqlValue::I64(3)), ("name", "c".into())]),
            ],
        );

        let progress = h.engine.migrate_entity(EntityKey::Tag).await.unwrap();
        assert_eq!(progress.migrated_records, 2);
        assert_eq!(progress.failed_records, 1);
        assert_eq!(h.target.rows("tags").len(), 2);
        // The dropped record's correspondence was retracted.
        assert_eq!(h.ids.count("tag").await.unwrap(), 2);
        assert!(h.ids.lookup("tag", &[2]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_row_is_isolated_and_retracted() {
        let mapping = MigrationMapping::new(EntityKey::Theme, "themes")
            .generates_id()
            .field("name", "name");
        let h = harness(vec![mapping], vec![]);
        h.target.reject_value(SqlValue::from("too long"));
        h.source.add_rows(
            "theme",
            vec![
                row(&[("id", SqlValue::I64(1)), ("name", "ok".into())]),
                row(&[("id", SqlValue::I64(2)), ("name", "too long".into())]),
            ],
        );

        let progress = h.engine.migrate_entity(EntityKey::Theme).await.unwrap();
        assert_eq!(progress.migrated_records, 1);
        assert_eq!(progress.failed_records, 1);
        assert!(h.ids.lookup("theme", &[2]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dependent_entity_with_missing_parent() {
        let parent = MigrationMapping::new(EntityKey::Institution, "institutions")
            .generates_id()
            .field("name", "name");
        let child = MigrationMapping::new(EntityKey::Unit, "units")
            .generates_id()
            .field("name", "name")
            .lookup("institution_id", EntityKey::Institution)
            .depends_on(&[EntityKey::Institution]);
        let h = harness(vec![parent, child], vec![]);
        h.source
            .add_rows("institution", vec![row(&[("id", SqlValue::I64(1)), ("name", "i".into())])]);
        h.source.add_rows(
            "unit",
            vec![
                row(&[("id", SqlValue::I64(10)), ("name", "u1".into()), ("institution_id", SqlValue::I64(1))]),
                row(&[("id", SqlValue::I64(11)), ("name", "u2".into()), ("institution_id", SqlValue::I64(99))]),
            ],
        );

        h.engine.migrate_entity(EntityKey::Institution).await.unwrap();
        let progress = h.engine.migrate_entity(EntityKey::Unit).await.unwrap();
        assert_eq!(progress.migrated_records, 2);

        let institution_id = h.target.rows("institutions")[0].value("id").clone();
        let units = h.target.rows("units");
        assert_eq!(units[0].value("institution_id"), &institution_id);
        assert_eq!(units[1].value("institution_id"), &SqlValue::Null);
    }

    #[tokio::test]
    async fn test_source_failure_marks_entity_failed() {
        let h = harness(vec![genre_mapping()], vec![]);
        h.source.add_rows("genre", vec![row(&[("id", SqlValue::I64(1))])]);
        h.source.set_offline(true);

        let err = h.engine.migrate_entity(EntityKey::Genre).await.unwrap_err();
        assert!(matches!(err, MigrateError::Entity { ref entity, .. } if entity == "genre"));
        let logged = h.log.entries();
        assert_eq!(logged[0].status, TaskStatus::Failed);
        assert!(logged[0].error_message.is_some());
    }

    #[tokio::test]
    async fn test_cancellation_stops_between_batches() {
        let cancel = CancellationToken::new();
        let h = harness(vec![genre_mapping()], vec![]);
        let engine = h.engine.clone().with_cancellation(cancel.clone());
        h.source.add_rows("genre", vec![row(&[("id", SqlValue::I64(1))])]);
        cancel.cancel();

        let err = engine.migrate_entity(EntityKey::Genre).await.unwrap_err();
        assert!(matches!(err, MigrateError::Cancelled));
        assert!(h.target.rows("genres").is_empty());
        assert_eq!(h.log.entries()[0].status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn test_unregistered_entity_is_rejected() {
        let h = harness(vec![genre_mapping()], vec![]);
        let err = h.engine.migrate_entity(EntityKey::Video).await.unwrap_err();
        assert!(matches!(err, MigrateError::UnknownEntity(_)));
    }
}

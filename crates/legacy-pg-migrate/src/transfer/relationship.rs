//! Join-table migration.
//!
//! Runs after every entity finished, so the id mapping store is complete.
//! A join row is written only when all of its endpoints resolve; otherwise it
//! is left out and counted as skipped.

use std::time::Instant;

use tracing::{error, info, warn};
use uuid::Uuid;

use super::TransferEngine;
use crate::core::{Record, SqlValue};
use crate::error::{MigrateError, Result};
use crate::idmap::IdentifierCache;
use crate::mapping::RelationshipMapping;
use crate::state::MigrationProgress;
use crate::target::OnConflict;

/// Deterministic id of a join row, so a re-run inserts the same keys.
pub fn join_row_id(target_table: &str, endpoints: &[Uuid]) -> Uuid {
    let mut name = target_table.to_string();
    for id in endpoints {
        name.push(':');
        name.push_str(&id.to_string());
    }
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
}

impl TransferEngine {
    /// Migrate one join table.
    ///
    /// Like [`migrate_entity`](Self::migrate_entity), the final progress is
    /// always recorded.
    pub async fn migrate_relationship(
        &self,
        relationship: &RelationshipMapping,
    ) -> Result<MigrationProgress> {
        let mut progress = MigrationProgress::new(
            &relationship.name,
            &relationship.source_table,
            &relationship.target_table,
        );
        info!(
            "Migrating relationship {}: {} -> {}",
            relationship.name, relationship.source_table, relationship.target_table
        );

        let result = self.run_relationship(relationship, &mut progress).await;
        match &result {
            Ok(()) => {
                progress.complete();
                info!(
                    "{}: completed, {} linked, {} skipped, {} failed",
                    relationship.name,
                    progress.migrated_records,
                    progress.skipped_records,
                    progress.failed_records
                );
            }
            Err(e) => {
                progress.fail(e.to_string());
                error!("{}: relationship migration failed: {}", relationship.name, e);
            }
        }
        self.tracker.finish(&progress).await;

        result
            .map(|_| progress)
            .map_err(|e| MigrateError::entity(relationship.name.as_str(), e))
    }

    async fn run_relationship(
        &self,
        relationship: &RelationshipMapping,
        progress: &mut MigrationProgress,
    ) -> Result<()> {
        let total = self.source.count(&relationship.source_table).await?;
        progress.start(total);

        let order_by: Vec<&str> = relationship
            .endpoints
            .iter()
            .map(|e| e.source_field.as_str())
            .collect();
        let batch_size = relationship
            .batch_size
            .unwrap_or(self.default_batch_size)
            .max(1);
        let mut cache = IdentifierCache::new(self.ids.clone(), &self.registry);
        let mut offset: u64 = 0;

        loop {
            self.check_cancelled()?;

            let started = Instant::now();
            let raw = self
                .source
                .extract_batch(&relationship.source_table, &order_by, offset, batch_size)
                .await?;
            if raw.is_empty() {
                break;
            }
            offset += raw.len() as u64;

            for endpoint in &relationship.endpoints {
                let referenced: Vec<i64> = raw
                    .iter()
                    .filter_map(|r| r.value(&endpoint.source_field).as_i64())
                    .collect();
                cache.prefetch(endpoint.entity, referenced).await?;
            }

            let mut links = Vec::with_capacity(raw.len());
            let mut skipped = 0i64;
            for row in &raw {
                match resolve_link(relationship, row, &cache) {
                    Some(link) => links.push(link),
                    None => skipped += 1,
                }
            }

            let outcome = self
                .loader
                .load(&relationship.target_table, &links, &OnConflict::Any)
                .await?;
            progress.migrated_records += outcome.landed() as i64;
            progress.failed_records += outcome.failed.len() as i64;
            progress.skipped_records += skipped;

            if skipped > 0 {
                warn!(
                    "{}: {} rows skipped, an endpoint was not migrated",
                    relationship.name, skipped
                );
            }
            info!(
                "{}: {} rows linked [{}/{}] in {:?}",
                relationship.name,
                outcome.landed(),
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
}

/// The target join row for `row`, or `None` if an endpoint does not resolve.
fn resolve_link(
    relationship: &RelationshipMapping,
    row: &Record,
    cache: &IdentifierCache,
) -> Option<Record> {
    let mut resolved = Vec::with_capacity(relationship.endpoints.len());
    for endpoint in &relationship.endpoints {
        let legacy_id = row.value(&endpoint.source_field).as_i64()?;
        resolved.push(cache.get(endpoint.entity, legacy_id)?);
    }

    let mut link = Record::new();
    if relationship.generates_id {
        link.set(
            "id",
            join_row_id(&relationship.target_table, &resolved),
        );
    }
    for (endpoint, id) in relationship.endpoints.iter().zip(resolved) {
        link.set(endpoint.target_field.as_str(), SqlValue::Uuid(id));
    }
    Some(link)
}

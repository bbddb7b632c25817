//! Migration orchestrator - main workflow coordinator.

mod order;

pub use order::{dependency_levels, resolve_order, select};

use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;
use crate::error::{MigrateError, Result};
use crate::idmap::{IdMappingStore, PgIdStore};
use crate::mapping::{EntityKey, MappingRegistry};
use crate::report::MigrationReport;
use crate::source::{MysqlReader, SourceReader};
use crate::state::{LogEntry, MigrationLog, MigrationProgress, PgMigrationLog, ProgressTracker};
use crate::target::{BulkLoader, PgWriter, TargetWriter};
use crate::transfer::TransferEngine;
use crate::verify::{verify_counts, VerifyResult};

/// Result of a connectivity check.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResult {
    pub healthy: bool,
    pub source_connected: bool,
    pub source_latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_error: Option<String>,
    pub target_connected: bool,
    pub target_latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_error: Option<String>,
}

/// Drives a legacy migration end to end.
pub struct Migrator {
    config: Config,
    registry: Arc<MappingRegistry>,
    source: Arc<dyn SourceReader>,
    target: Arc<dyn TargetWriter>,
    ids: Arc<dyn IdMappingStore>,
    tracker: Arc<ProgressTracker>,
    cancel: CancellationToken,
}

impl Migrator {
    /// Connect to both stores and bootstrap the control schema.
    pub async fn connect(config: Config) -> Result<Self> {
        let source = MysqlReader::new(
            &config.source,
            config.migration.get_max_source_connections(),
        )
        .await?;
        let target = PgWriter::new(
            &config.target,
            config.migration.get_max_target_connections(),
        )
        .await?;

        let schema = &config.migration.control_schema;
        let ids = PgIdStore::new(target.pool(), schema)?;
        let log = PgMigrationLog::new(target.pool(), schema)?;
        ids.init_schema().await?;
        log.init_schema().await?;
        info!(
            "Control tables ready in schema {} (config {})",
            schema,
            config.hash()
        );

        Self::from_parts(
            config,
            Arc::new(source),
            Arc::new(target),
            Arc::new(ids),
            Arc::new(log),
        )
    }

    /// Assemble a migrator from already connected stores.
    pub fn from_parts(
        config: Config,
        source: Arc<dyn SourceReader>,
        target: Arc<dyn TargetWriter>,
        ids: Arc<dyn IdMappingStore>,
        log: Arc<dyn MigrationLog>,
    ) -> Result<Self> {
        Ok(Self {
            config,
            registry: Arc::new(MappingRegistry::portal()?),
            source,
            target,
            ids,
            tracker: Arc::new(ProgressTracker::new(log)),
            cancel: CancellationToken::new(),
        })
    }

    /// Replace the portal registry.
    pub fn with_registry(mut self, registry: MappingRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn registry(&self) -> &MappingRegistry {
        &self.registry
    }

    fn engine(&self) -> TransferEngine {
        TransferEngine::new(
            self.source.clone(),
            BulkLoader::new(self.target.clone()),
            self.ids.clone(),
            self.registry.clone(),
            self.tracker.clone(),
            self.config.migration.default_batch_size,
        )
        .with_cancellation(self.cancel.clone())
    }

    /// Entities the next run will migrate, in order.
    pub fn plan(&self) -> Result<Vec<EntityKey>> {
        plan(&self.registry, &self.config.migration.entities)
    }

    /// Migrate every selected entity in dependency order, then the join
    /// tables, and report.
    ///
    /// Halts at the first entity that cannot be finished; entities already
    /// migrated stay migrated, and a re-run continues from the id mappings.
    pub async fn run_full_migration(&self) -> Result<MigrationReport> {
        let started_at = Utc::now();
        let start = Instant::now();

        // Cycles are rejected here, before any store is touched.
        let order = self.plan()?;
        self.tracker.reset();

        let workers = self.config.migration.workers.max(1);
        info!(
            "Phase 1: migrating {} entities with {} worker(s)",
            order.len(),
            workers
        );
        if workers == 1 {
            let engine = self.engine();
            for key in &order {
                engine.migrate_entity(*key).await?;
            }
        } else {
            for (depth, level) in dependency_levels(&self.registry, &order)
                .into_iter()
                .enumerate()
            {
                info!("Level {}: {:?}", depth, level);
                self.migrate_level(level, workers).await?;
            }
        }

        if self.config.migration.skip_relationships {
            info!("Phase 2: skipped (skip_relationships)");
        } else {
            info!("Phase 2: migrating {} relationships", self.registry.relationships().len());
            self.migrate_relationships().await?;
        }

        let report = self.generate_report(started_at);
        info!(
            "Migration finished in {:?}: {}/{} records ({:.2}%)",
            start.elapsed(),
            report.migrated_records,
            report.total_records,
            report.success_rate
        );
        Ok(report)
    }

    /// Run the entities of one dependency level concurrently.
    ///
    /// Every started entity is awaited before the first error is returned.
    async fn migrate_level(&self, level: Vec<EntityKey>, workers: usize) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(workers));
        let engine = self.engine();
        let mut handles = Vec::with_capacity(level.len());

        for key in level {
            if self.cancel.is_cancelled() {
                break;
            }
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| MigrateError::Config(format!("worker pool closed: {}", e)))?;
            let engine = engine.clone();
            let handle = tokio::spawn(async move {
                let result = engine.migrate_entity(key).await;
                drop(permit);
                result
            });
            handles.push((key, handle));
        }

        let mut first_error = None;
        for (key, handle) in handles {
            let result = match handle.await {
                Ok(result) => result.map(|_| ()),
                Err(e) => Err(MigrateError::entity(
                    key.as_str(),
                    MigrateError::transfer(key.as_str(), format!("task failed: {}", e)),
                )),
            };
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }

        if self.cancel.is_cancelled() && first_error.is_none() {
            return Err(MigrateError::Cancelled);
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Migrate a single entity, assuming its dependencies are already done.
    pub async fn migrate_table(&self, key: EntityKey) -> Result<MigrationProgress> {
        if !self.registry.contains(key) {
            return Err(MigrateError::UnknownEntity(key.to_string()));
        }
        self.engine().migrate_entity(key).await
    }

    /// Migrate every join table.
    ///
    /// A failing join table is logged and the next one still runs; only
    /// cancellation stops the phase.
    pub async fn migrate_relationships(&self) -> Result<Vec<MigrationProgress>> {
        let engine = self.engine();
        let mut done = Vec::new();
        for relationship in self.registry.relationships() {
            match engine.migrate_relationship(relationship).await {
                Ok(progress) => done.push(progress),
                Err(MigrateError::Cancelled) => return Err(MigrateError::Cancelled),
                Err(e) => error!("{}", e.format_detailed()),
            }
        }
        Ok(done)
    }

    /// Summary of the runs finished since the last full migration started.
    pub fn generate_report(&self, started_at: DateTime<Utc>) -> MigrationReport {
        let names: Vec<&str> = self
            .registry
            .relationships()
            .iter()
            .map(|r| r.name.as_str())
            .collect();
        MigrationReport::from_progress(started_at, &self.tracker.snapshot(), &names)
    }

    /// Compare source and target row counts. Read-only.
    pub async fn verify_migration(&self) -> Result<VerifyResult> {
        verify_counts(&self.source, &self.target, &self.registry).await
    }

    /// Latest migration log entries, newest first.
    pub async fn history(&self, limit: usize) -> Result<Vec<LogEntry>> {
        self.tracker.log().recent(limit).await
    }

    /// Test both connections.
    pub async fn health_check(&self) -> HealthCheckResult {
        let started = Instant::now();
        let source = self.source.ping().await;
        let source_latency_ms = started.elapsed().as_millis() as u64;

        let started = Instant::now();
        let target = self.target.ping().await;
        let target_latency_ms = started.elapsed().as_millis() as u64;

        HealthCheckResult {
            healthy: source.is_ok() && target.is_ok(),
            source_connected: source.is_ok(),
            source_latency_ms,
            source_error: source.err().map(|e| e.to_string()),
            target_connected: target.is_ok(),
            target_latency_ms,
            target_error: target.err().map(|e| e.to_string()),
        }
    }

    /// Release both connection pools.
    pub async fn disconnect(&self) {
        self.source.close().await;
        self.target.close().await;
        info!("Disconnected from {} and {}", self.source.db_type(), self.target.db_type());
    }
}

/// Resolve the order of `registry` and narrow it to `selection` (entity keys).
///
/// Needs no connection, so it also backs dry runs.
pub fn plan(registry: &MappingRegistry, selection: &[String]) -> Result<Vec<EntityKey>> {
    let order = resolve_order(registry)?;
    let mut selected = Vec::with_capacity(selection.len());
    for name in selection {
        let key = EntityKey::from_str(name)?;
        if !registry.contains(key) {
            return Err(MigrateError::UnknownEntity(name.clone()));
        }
        selected.push(key);
    }
    Ok(select(&order, &selected))
}

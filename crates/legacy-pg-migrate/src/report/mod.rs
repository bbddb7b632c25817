//! Final migration summary.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::state::{MigrationProgress, TaskStatus};

/// Outcome of one entity or join table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityReport {
    pub entity: String,
    pub target_table: String,
    pub status: TaskStatus,
    pub total_records: i64,
    pub migrated_records: i64,
    pub failed_records: i64,
    pub skipped_records: i64,
    pub duration_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl From<&MigrationProgress> for EntityReport {
    fn from(p: &MigrationProgress) -> Self {
        Self {
            entity: p.entity.clone(),
            target_table: p.target_table.clone(),
            status: p.status,
            total_records: p.total_records,
            migrated_records: p.migrated_records,
            failed_records: p.failed_records,
            skipped_records: p.skipped_records,
            duration_seconds: p.elapsed().num_milliseconds() as f64 / 1000.0,
            error_message: p.error_message.clone(),
        }
    }
}

/// Aggregate report of a migration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationReport {
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,

    pub entities: Vec<EntityReport>,
    pub relationships: Vec<EntityReport>,

    /// Sum of source rows over all entities.
    pub total_records: i64,
    /// Sum of migrated rows over all entities.
    pub migrated_records: i64,
    pub failed_records: i64,
    /// `migrated / total` in percent; 100 when there was nothing to migrate.
    pub success_rate: f64,

    pub entities_completed: usize,
    pub entities_failed: usize,
    pub relationships_linked: i64,
    pub relationships_skipped: i64,
}

impl MigrationReport {
    /// Build a report from finished runs.
    ///
    /// `relationship_names` tells join-table runs apart from entity runs.
    pub fn from_progress(
        started_at: DateTime<Utc>,
        progress: &[MigrationProgress],
        relationship_names: &[&str],
    ) -> Self {
        let completed_at = Utc::now();
        let (relationships, entities): (Vec<_>, Vec<_>) = progress
            .iter()
            .partition(|p| relationship_names.contains(&p.entity.as_str()));

        let entities: Vec<EntityReport> = entities.into_iter().map(EntityReport::from).collect();
        let relationships: Vec<EntityReport> =
            relationships.into_iter().map(EntityReport::from).collect();

        let total_records: i64 = entities.iter().map(|e| e.total_records).sum();
        let migrated_records: i64 = entities.iter().map(|e| e.migrated_records).sum();
        let failed_records: i64 = entities.iter().map(|e| e.failed_records).sum();

        Self {
            started_at,
            completed_at,
            duration_seconds: (completed_at - started_at).num_milliseconds() as f64 / 1000.0,
            entities_completed: entities
                .iter()
                .filter(|e| e.status == TaskStatus::Completed)
                .count(),
            entities_failed: entities
                .iter()
                .filter(|e| e.status == TaskStatus::Failed)
                .count(),
            relationships_linked: relationships.iter().map(|r| r.migrated_records).sum(),
            relationships_skipped: relationships.iter().map(|r| r.skipped_records).sum(),
            success_rate: success_rate(migrated_records, total_records),
            total_records,
            migrated_records,
            failed_records,
            entities,
            relationships,
        }
    }

    /// Whether every entity and join table completed.
    pub fn is_success(&self) -> bool {
        self.entities_failed == 0
            && self
                .relationships
                .iter()
                .all(|r| r.status == TaskStatus::Completed)
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn success_rate(migrated: i64, total: i64) -> f64 {
    if total <= 0 {
        return 100.0;
    }
    migrated as f64 * 100.0 / total as f64
}

impl fmt::Display for MigrationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Migration report")?;
        writeln!(f, "================")?;
        for e in &self.entities {
            write!(
                f,
                "{:<20} {:<11} {:>8}/{:<8} failed {:>6}",
                e.entity,
                crate::state::task_status_to_str(e.status),
                e.migrated_records,
                e.total_records,
                e.failed_records
            )?;
            if let Some(msg) = &e.error_message {
                write!(f, "  ({})", msg)?;
            }
            writeln!(f)?;
        }
        for r in &self.relationships {
            writeln!(
                f,
                "{:<20} {:<11} {:>8} linked, {} skipped",
                r.entity,
                crate::state::task_status_to_str(r.status),
                r.migrated_records,
                r.skipped_records
            )?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "Entities: {} completed, {} failed",
            self.entities_completed, self.entities_failed
        )?;
        writeln!(
            f,
            "Records:  {}/{} migrated ({:.2}%), {} failed",
            self.migrated_records, self.total_records, self.success_rate, self.failed_records
        )?;
        write!(f, "Duration: {:.1}s", self.duration_seconds)
    }
}

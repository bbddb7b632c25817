//! Per-entity progress and the migration log.

mod backend;
mod db;
mod memory;
mod tracker;

pub use backend::MigrationLog;
pub use db::PgMigrationLog;
pub use memory::MemoryMigrationLog;
pub use tracker::ProgressTracker;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MigrateError, Result};

/// Task status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

pub(crate) fn task_status_to_str(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "pending",
        TaskStatus::InProgress => "in_progress",
        TaskStatus::Completed => "completed",
        TaskStatus::Failed => "failed",
    }
}

pub(crate) fn str_to_task_status(s: &str) -> Result<TaskStatus> {
    match s {
        "pending" => Ok(TaskStatus::Pending),
        "in_progress" => Ok(TaskStatus::InProgress),
        "completed" => Ok(TaskStatus::Completed),
        "failed" => Ok(TaskStatus::Failed),
        _ => Err(MigrateError::Config(format!("Invalid task status: {}", s))),
    }
}

/// Progress of one entity (or join table) run.
///
/// Lives only for the duration of that run; its final state is written to
/// the [`MigrationLog`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationProgress {
    /// Entity key or relationship name.
    pub entity: String,
    pub source_table: String,
    pub target_table: String,

    /// Source rows counted when the run started.
    pub total_records: i64,

    /// Rows present in the target after the run, new or already there.
    pub migrated_records: i64,

    /// Rows dropped by conversion or rejected by the target.
    pub failed_records: i64,

    /// Join rows left out because an endpoint did not resolve.
    #[serde(default)]
    pub skipped_records: i64,

    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    pub error_message: Option<String>,
}

impl MigrationProgress {
    pub fn new(
        entity: impl Into<String>,
        source_table: impl Into<String>,
        target_table: impl Into<String>,
    ) -> Self {
        Self {
            entity: entity.into(),
            source_table: source_table.into(),
            target_table: target_table.into(),
            total_records: 0,
            migrated_records: 0,
            failed_records: 0,
            skipped_records: 0,
            start_time: Utc::now(),
            end_time: None,
            status: TaskStatus::Pending,
            error_message: None,
        }
    }

    pub fn start(&mut self, total_records: i64) {
        self.total_records = total_records;
        self.start_time = Utc::now();
        self.status = TaskStatus::InProgress;
    }

    pub fn complete(&mut self) {
        self.status = TaskStatus::Completed;
        self.end_time = Some(Utc::now());
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.error_message = Some(message.into());
        self.end_time = Some(Utc::now());
    }

    /// Wall-clock duration, up to now if still running.
    pub fn elapsed(&self) -> chrono::Duration {
        self.end_time.unwrap_or_else(Utc::now) - self.start_time
    }
}

/// One persisted row of the migration log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub table_name: String,
    pub total_records: i64,
    pub migrated_records: i64,
    pub failed_records: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    pub error_message: Option<String>,
}

impl From<&MigrationProgress> for LogEntry {
    fn from(p: &MigrationProgress) -> Self {
        Self {
            table_name: p.source_table.clone(),
            total_records: p.total_records,
            migrated_records: p.migrated_records,
            failed_records: p.failed_records,
            start_time: p.start_time,
            end_time: p.end_time,
            status: p.status,
            error_message: p.error_message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_status_strings() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::InProgress,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ] {
            assert_eq!(str_to_task_status(task_status_to_str(status)).unwrap(), status);
        }
        assert!(str_to_task_status("running").is_err());
    }

    #[test]
    fn test_progress_lifecycle() {
        let mut progress = MigrationProgress::new("genre", "genre", "genres");
        assert_eq!(progress.status, TaskStatus::Pending);

        progress.start(10);
        assert_eq!(progress.status, TaskStatus::InProgress);
        assert_eq!(progress.total_records, 10);
        assert!(progress.end_time.is_none());

        progress.fail("connection reset");
        assert_eq!(progress.status, TaskStatus::Failed);
        assert_eq!(progress.error_message.as_deref(), Some("connection reset"));
        assert!(progress.end_time.is_some());

        let entry = LogEntry::from(&progress);
        assert_eq!(entry.table_name, "genre");
        assert_eq!(entry.status, TaskStatus::Failed);
    }
}

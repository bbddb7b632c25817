//! Collects finished runs and forwards them to the migration log.

use std::sync::{Arc, Mutex};

use tracing::warn;

use super::{LogEntry, MigrationLog, MigrationProgress};

/// Final progress of every run in this process, plus the durable log.
///
/// A log write that fails is reported and otherwise ignored: losing an
/// audit row must not halt a migration that is otherwise healthy.
pub struct ProgressTracker {
    log: Arc<dyn MigrationLog>,
    finished: Mutex<Vec<MigrationProgress>>,
}

impl ProgressTracker {
    pub fn new(log: Arc<dyn MigrationLog>) -> Self {
        Self {
            log,
            finished: Mutex::new(Vec::new()),
        }
    }

    pub fn log(&self) -> &Arc<dyn MigrationLog> {
        &self.log
    }

    /// Record a run that completed or failed.
    pub async fn finish(&self, progress: &MigrationProgress) {
        if let Err(e) = self.log.record(&LogEntry::from(progress)).await {
            warn!(
                "{}: could not write migration log ({}): {}",
                progress.entity,
                self.log.backend_type(),
                e
            );
        }
        match self.finished.lock() {
            Ok(mut finished) => finished.push(progress.clone()),
            Err(_) => warn!("{}: progress list lock poisoned", progress.entity),
        }
    }

    /// Finished runs in completion order.
    pub fn snapshot(&self) -> Vec<MigrationProgress> {
        self.finished
            .lock()
            .map(|f| f.clone())
            .unwrap_or_default()
    }

    /// Forget runs from a previous call, keeping the log.
    pub fn reset(&self) {
        if let Ok(mut finished) = self.finished.lock() {
            finished.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{MemoryMigrationLog, TaskStatus};

    #[tokio::test]
    async fn test_finish_records_and_logs() {
        let log = Arc::new(MemoryMigrationLog::new());
        let tracker = ProgressTracker::new(log.clone());

        let mut progress = MigrationProgress::new("role", "role", "roles");
        progress.start(3);
        progress.migrated_records = 3;
        progress.complete();
        tracker.finish(&progress).await;

        assert_eq!(tracker.snapshot().len(), 1);
        assert_eq!(log.entries()[0].status, TaskStatus::Completed);

        tracker.reset();
        assert!(tracker.snapshot().is_empty());
        assert_eq!(log.entries().len(), 1);
    }
}

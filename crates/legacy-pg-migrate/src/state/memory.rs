//! In-memory migration log.

use std::sync::Mutex;

use async_trait::async_trait;

use super::{LogEntry, MigrationLog};
use crate::error::{MigrateError, Result};

/// Keeps log entries in memory for the life of the process.
#[derive(Default)]
pub struct MemoryMigrationLog {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemoryMigrationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every entry, oldest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .map(|e| e.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MigrationLog for MemoryMigrationLog {
    async fn init_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn record(&self, entry: &LogEntry) -> Result<()> {
        self.entries
            .lock()
            .map_err(|_| MigrateError::Config("migration log lock poisoned".into()))?
            .push(entry.clone());
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<LogEntry>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| MigrateError::Config("migration log lock poisoned".into()))?;
        Ok(entries.iter().rev().take(limit).cloned().collect())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

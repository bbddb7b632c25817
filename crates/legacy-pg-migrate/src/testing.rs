//! In-memory stores for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::core::{Record, SqlValue};
use crate::error::{MigrateError, Result};
use crate::source::SourceReader;
use crate::target::{OnConflict, TargetWriter};

/// Legacy tables held in memory.
#[derive(Default)]
pub struct FakeSource {
    tables: Mutex<HashMap<String, Vec<Record>>>,
    offline: AtomicBool,
    calls: AtomicUsize,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_rows(&self, table: &str, rows: Vec<Record>) {
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .extend(rows);
    }

    /// Make every call fail like a dropped connection.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of calls that reached the store.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn enter(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(MigrateError::Source(sqlx::Error::PoolClosed));
        }
        Ok(())
    }
}

#[async_trait]
impl SourceReader for FakeSource {
    async fn count(&self, table: &str) -> Result<i64> {
        self.enter()?;
        Ok(self
            .tables
            .lock()
            .unwrap()
            .get(table)
            .map(|rows| rows.len() as i64)
            .unwrap_or(0))
    }

    async fn extract_batch(
        &self,
        table: &str,
        order_by: &[&str],
        offset: u64,
        limit: usize,
    ) -> Result<Vec<Record>> {
        self.enter()?;
        let mut rows = self
            .tables
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default();
        rows.sort_by_key(|r| {
            order_by
                .iter()
                .map(|f| r.value(f).as_i64().unwrap_or(i64::MIN))
                .collect::<Vec<_>>()
        });
        Ok(rows.into_iter().skip(offset as usize).take(limit).collect())
    }

    async fn ping(&self) -> Result<()> {
        self.enter()
    }

    fn db_type(&self) -> &str {
        "memory"
    }

    async fn close(&self) {}
}

/// Target tables held in memory, with conflict-tolerant inserts.
#[derive(Default)]
pub struct FakeTarget {
    tables: Mutex<HashMap<String, Vec<Record>>>,
    rejected: Mutex<Vec<SqlValue>>,
    offline: AtomicBool,
    statements: AtomicUsize,
}

impl FakeTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject any statement carrying `value`, like a constraint violation.
    pub fn reject_value(&self, value: SqlValue) {
        self.rejected.lock().unwrap().push(value);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn rows(&self, table: &str) -> Vec<Record> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of INSERT statements received.
    pub fn statements(&self) -> usize {
        self.statements.load(Ordering::SeqCst)
    }
}

fn conflicts(existing: &Record, row: &Record, on_conflict: &OnConflict) -> bool {
    match on_conflict {
        OnConflict::Column(col) => existing.value(col) == row.value(col),
        OnConflict::Any if row.contains("id") => existing.value("id") == row.value("id"),
        OnConflict::Any => existing == row,
    }
}

#[async_trait]
impl TargetWriter for FakeTarget {
    async fn insert_batch(
        &self,
        table: &str,
        columns: &[String],
        rows: &[Vec<SqlValue>],
        on_conflict: &OnConflict,
    ) -> Result<u64> {
        self.statements.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(MigrateError::pool("connection refused", "fake target"));
        }
        {
            let rejected = self.rejected.lock().unwrap();
            if rows.iter().flatten().any(|v| rejected.contains(v)) {
                return Err(MigrateError::transfer(table, "value rejected by constraint"));
            }
        }

        let mut tables = self.tables.lock().unwrap();
        let stored = tables.entry(table.to_string()).or_default();
        let mut inserted = 0;
        for values in rows {
            let row: Record = columns.iter().cloned().zip(values.iter().cloned()).collect();
            if stored.iter().any(|existing| conflicts(existing, &row, on_conflict)) {
                continue;
            }
            stored.push(row);
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn row_count(&self, table: &str) -> Result<i64> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(MigrateError::pool("connection refused", "fake target"));
        }
        Ok(self.rows(table).len() as i64)
    }

    async fn ping(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(MigrateError::pool("connection refused", "fake target"));
        }
        Ok(())
    }

    fn db_type(&self) -> &str {
        "memory"
    }

    async fn close(&self) {}
}

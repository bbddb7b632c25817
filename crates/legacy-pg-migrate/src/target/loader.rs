//! Batch loading with per-row fallback.

use std::sync::Arc;

use tracing::{debug, error, warn};

use super::{OnConflict, TargetWriter, MAX_BIND_PARAMS};
use crate::core::{Record, SqlValue};
use crate::error::Result;

/// What happened to a loaded batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadOutcome {
    /// Rows inserted by this load.
    pub written: u64,
    /// Rows skipped because their conflict key already existed.
    pub already_present: u64,
    /// Positions (in the input slice) of rows that could not be inserted.
    pub failed: Vec<usize>,
}

impl LoadOutcome {
    /// Rows now present in the target, new or not.
    pub fn landed(&self) -> u64 {
        self.written + self.already_present
    }
}

/// Writes converted records through a [`TargetWriter`].
///
/// A batch goes out as one multi-row insert. If the target rejects it, the
/// batch is replayed row by row so one malformed row only costs itself.
/// Connection errors are never absorbed by the fallback.
#[derive(Clone)]
pub struct BulkLoader {
    writer: Arc<dyn TargetWriter>,
}

impl BulkLoader {
    pub fn new(writer: Arc<dyn TargetWriter>) -> Self {
        Self { writer }
    }

    pub async fn load(
        &self,
        table: &str,
        records: &[Record],
        on_conflict: &OnConflict,
    ) -> Result<LoadOutcome> {
        let mut outcome = LoadOutcome::default();
        if records.is_empty() {
            return Ok(outcome);
        }

        let columns = column_union(records);
        let rows: Vec<Vec<SqlValue>> = records
            .iter()
            .map(|r| columns.iter().map(|c| r.value(c).clone()).collect())
            .collect();

        let chunk_rows = (MAX_BIND_PARAMS / columns.len().max(1)).max(1);
        for (chunk_idx, chunk) in rows.chunks(chunk_rows).enumerate() {
            let base = chunk_idx * chunk_rows;
            match self
                .writer
                .insert_batch(table, &columns, chunk, on_conflict)
                .await
            {
                Ok(inserted) => {
                    outcome.written += inserted;
                    outcome.already_present += (chunk.len() as u64).saturating_sub(inserted);
                }
                Err(e) if e.is_connection_error() => return Err(e),
                Err(e) => {
                    warn!(
                        "{}: batch insert of {} rows failed, retrying row by row: {}",
                        table,
                        chunk.len(),
                        e
                    );
                    self.load_rows(table, &columns, chunk, base, on_conflict, &mut outcome)
                        .await?;
                }
            }
        }

        debug!(
            "{}: loaded {} new, {} existing, {} failed",
            table,
            outcome.written,
            outcome.already_present,
            outcome.failed.len()
        );
        Ok(outcome)
    }

    async fn load_rows(
        &self,
        table: &str,
        columns: &[String],
        rows: &[Vec<SqlValue>],
        base: usize,
        on_conflict: &OnConflict,
        outcome: &mut LoadOutcome,
    ) -> Result<()> {
        for (i, row) in rows.iter().enumerate() {
            match self
                .writer
                .insert_row(table, columns, row.clone(), on_conflict)
                .await
            {
                Ok(0) => outcome.already_present += 1,
                Ok(n) => outcome.written += n,
                Err(e) if e.is_connection_error() => return Err(e),
                Err(e) => {
                    error!("{}: row {} rejected: {}", table, base + i, e);
                    outcome.failed.push(base + i);
                }
            }
        }
        Ok(())
    }
}

/// Field names of all records, in first-seen order.
fn column_union(records: &[Record]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for record in records {
        for name in record.names() {
            if !columns.iter().any(|c| c == name) {
                columns.push(name.to_string());
            }
        }
    }
    columns
}

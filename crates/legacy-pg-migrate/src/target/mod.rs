//! PostgreSQL target access and bulk loading.

mod loader;
mod postgres;
pub mod tls;

pub use loader::{BulkLoader, LoadOutcome};
pub use postgres::PgWriter;

use async_trait::async_trait;

use crate::core::identifier::{qualify_pg, quote_pg, quote_pg_list};
use crate::core::SqlValue;
use crate::error::{MigrateError, Result};

/// PostgreSQL's limit on bind parameters in a single statement.
pub const MAX_BIND_PARAMS: usize = 65535;

/// Conflict target of a conflict-tolerant insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OnConflict {
    /// `ON CONFLICT ("<column>") DO NOTHING`
    Column(String),
    /// `ON CONFLICT DO NOTHING`, any unique constraint.
    Any,
}

impl OnConflict {
    pub fn id() -> Self {
        OnConflict::Column("id".to_string())
    }

    fn to_sql(&self) -> Result<String> {
        match self {
            OnConflict::Column(col) => Ok(format!("ON CONFLICT ({}) DO NOTHING", quote_pg(col)?)),
            OnConflict::Any => Ok("ON CONFLICT DO NOTHING".to_string()),
        }
    }
}

/// Writes rows to the target store.
///
/// Inserts never overwrite: a row whose conflict key already exists is left
/// untouched and not counted.
#[async_trait]
pub trait TargetWriter: Send + Sync {
    /// Insert `rows` (each aligned with `columns`) in one statement.
    ///
    /// Returns the number of rows actually inserted.
    async fn insert_batch(
        &self,
        table: &str,
        columns: &[String],
        rows: &[Vec<SqlValue>],
        on_conflict: &OnConflict,
    ) -> Result<u64>;

    /// Insert a single row.
    async fn insert_row(
        &self,
        table: &str,
        columns: &[String],
        row: Vec<SqlValue>,
        on_conflict: &OnConflict,
    ) -> Result<u64> {
        self.insert_batch(table, columns, &[row], on_conflict).await
    }

    /// Number of rows in a target table.
    async fn row_count(&self, table: &str) -> Result<i64>;

    /// Check the store is reachable.
    async fn ping(&self) -> Result<()>;

    /// Get the database type name.
    fn db_type(&self) -> &str;

    /// Release connections.
    async fn close(&self);
}

/// Build a multi-row conflict-tolerant INSERT.
///
/// Placeholders carry no cast: the server infers each parameter's type from
/// its destination column and parses the text form with that column's input
/// function, so a legacy string lands in a `date` or `integer` column as it
/// would from a literal. NULLs are written inline and never take a parameter
/// slot.
pub fn build_insert_sql(
    schema: &str,
    table: &str,
    columns: &[String],
    rows: &[Vec<SqlValue>],
    on_conflict: &OnConflict,
) -> Result<(String, Vec<String>)> {
    if columns.is_empty() || rows.is_empty() {
        return Err(MigrateError::transfer(table, "insert without columns or rows"));
    }

    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES ",
        qualify_pg(schema, table)?,
        quote_pg_list(columns)?
    );
    let mut params: Vec<String> = Vec::new();

    for (row_idx, row) in rows.iter().enumerate() {
        if row.len() != columns.len() {
            return Err(MigrateError::transfer(
                table,
                format!(
                    "row {} has {} values for {} columns",
                    row_idx,
                    row.len(),
                    columns.len()
                ),
            ));
        }
        if row_idx > 0 {
            sql.push_str(", ");
        }
        sql.push('(');
        for (col_idx, value) in row.iter().enumerate() {
            if col_idx > 0 {
                sql.push_str(", ");
            }
            match value.to_pg_text() {
                None => sql.push_str("NULL"),
                Some(text) => {
                    params.push(text);
                    sql.push_str(&format!("${}", params.len()));
                }
            }
        }
        sql.push(')');
    }

    if params.len() > MAX_BIND_PARAMS {
        return Err(MigrateError::transfer(
            table,
            format!(
                "{} bind parameters exceed the limit of {}",
                params.len(),
                MAX_BIND_PARAMS
            ),
        ));
    }

    sql.push(' ');
    sql.push_str(&on_conflict.to_sql()?);

    Ok((sql, params))
}

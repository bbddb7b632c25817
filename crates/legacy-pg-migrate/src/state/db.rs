//! Database-backed migration log.
//!
//! Stores one row per entity run in `<control_schema>.migration_log` on the
//! target database, so the history survives restarts and can be audited
//! alongside the id mappings.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;

use super::{str_to_task_status, task_status_to_str, LogEntry, MigrationLog};
use crate::core::identifier::qualify_pg;
use crate::core::quote_pg;
use crate::error::{MigrateError, Result};

/// PostgreSQL migration log.
pub struct PgMigrationLog {
    pool: Pool,
    schema: String,
    table: String,
}

impl PgMigrationLog {
    /// Create a log writing into `schema`.
    pub fn new(pool: Pool, schema: &str) -> Result<Self> {
        Ok(Self {
            pool,
            schema: quote_pg(schema)?,
            table: qualify_pg(schema, "migration_log")?,
        })
    }

    async fn client(&self, context: &str) -> Result<deadpool_postgres::Object> {
        self.pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, context.to_string()))
    }
}

#[async_trait]
impl MigrationLog for PgMigrationLog {
    async fn init_schema(&self) -> Result<()> {
        let conn = self.client("initializing migration log").await?;

        conn.execute(&format!("CREATE SCHEMA IF NOT EXISTS {}", self.schema), &[])
            .await?;

        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                    table_name TEXT NOT NULL,
                    total_records BIGINT NOT NULL DEFAULT 0,
                    migrated_records BIGINT NOT NULL DEFAULT 0,
                    failed_records BIGINT NOT NULL DEFAULT 0,
                    start_time TIMESTAMPTZ NOT NULL,
                    end_time TIMESTAMPTZ,
                    status TEXT NOT NULL CHECK (status IN ('pending', 'in_progress', 'completed', 'failed')),
                    error_message TEXT,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )",
                self.table
            ),
            &[],
        )
        .await?;

        Ok(())
    }

    async fn record(&self, entry: &LogEntry) -> Result<()> {
        let conn = self.client("writing migration log").await?;
        conn.execute(
            &format!(
                "INSERT INTO {}
                 (table_name, total_records, migrated_records, failed_records,
                  start_time, end_time, status, error_message)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
                self.table
            ),
            &[
                &entry.table_name,
                &entry.total_records,
                &entry.migrated_records,
                &entry.failed_records,
                &entry.start_time,
                &entry.end_time,
                &task_status_to_str(entry.status),
                &entry.error_message,
            ],
        )
        .await?;
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<LogEntry>> {
        let conn = self.client("reading migration log").await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT table_name, total_records, migrated_records, failed_records,
                            start_time, end_time, status, error_message
                     FROM {}
                     ORDER BY created_at DESC
                     LIMIT $1",
                    self.table
                ),
                &[&(limit as i64)],
            )
            .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let start_time: DateTime<Utc> = row.get(4);
            let end_time: Option<DateTime<Utc>> = row.get(5);
            let status_str: String = row.get(6);
            entries.push(LogEntry {
                table_name: row.get(0),
                total_records: row.get(1),
                migrated_records: row.get(2),
                failed_records: row.get(3),
                start_time,
                end_time,
                status: str_to_task_status(&status_str)?,
                error_message: row.get(7),
            });
        }
        Ok(entries)
    }

    fn backend_type(&self) -> &'static str {
        "postgres"
    }
}

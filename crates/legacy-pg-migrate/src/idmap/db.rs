//! PostgreSQL-backed id mapping store.
//!
//! Correspondences live in `<control_schema>.legacy_id_mappings` on the
//! target database, next to the migrated data, so they survive restarts and
//! stay available for auditing after the migration.

use std::collections::{BTreeSet, HashMap, HashSet};

use async_trait::async_trait;
use deadpool_postgres::Pool;
use tracing::debug;
use uuid::Uuid;

use super::{Assignment, IdMappingStore};
use crate::core::identifier::qualify_pg;
use crate::core::quote_pg;
use crate::error::{MigrateError, Result};

/// Durable id mapping store.
pub struct PgIdStore {
    pool: Pool,
    schema: String,
    table: String,
}

impl PgIdStore {
    /// Create a store writing into `schema`.
    pub fn new(pool: Pool, schema: &str) -> Result<Self> {
        Ok(Self {
            pool,
            schema: quote_pg(schema)?,
            table: qualify_pg(schema, "legacy_id_mappings")?,
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
impl IdMappingStore for PgIdStore {
    async fn init_schema(&self) -> Result<()> {
        let client = self.client("initializing id mapping table").await?;

        client
            .execute(&format!("CREATE SCHEMA IF NOT EXISTS {}", self.schema), &[])
            .await?;

        client
            .execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {} (
                        source_table TEXT NOT NULL,
                        legacy_id BIGINT NOT NULL,
                        new_id UUID NOT NULL,
                        migrated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                        PRIMARY KEY (source_table, legacy_id),
                        UNIQUE (source_table, new_id)
                    )",
                    self.table
                ),
                &[],
            )
            .await?;

        Ok(())
    }

    async fn assign(&self, source_table: &str, legacy_ids: &[i64]) -> Result<Assignment> {
        let unique: BTreeSet<i64> = legacy_ids.iter().copied().collect();
        if unique.is_empty() {
            return Ok(Assignment::default());
        }
        let ids: Vec<i64> = unique.into_iter().collect();
        let candidates: Vec<Uuid> = ids.iter().map(|_| Uuid::new_v4()).collect();

        let client = self.client("assigning new ids").await?;

        // Rows that already have a correspondence keep it; RETURNING only
        // reports the ones created here.
        let inserted = client
            .query(
                &format!(
                    "INSERT INTO {} (source_table, legacy_id, new_id)
                     SELECT $1, t.legacy_id, t.new_id
                     FROM UNNEST($2::bigint[], $3::uuid[]) AS t(legacy_id, new_id)
                     ON CONFLICT (source_table, legacy_id) DO NOTHING
                     RETURNING legacy_id",
                    self.table
                ),
                &[&source_table, &ids, &candidates],
            )
            .await?;
        let minted: HashSet<i64> = inserted.iter().map(|r| r.get(0)).collect();

        let rows = client
            .query(
                &format!(
                    "SELECT legacy_id, new_id FROM {}
                     WHERE source_table = $1 AND legacy_id = ANY($2)",
                    self.table
                ),
                &[&source_table, &ids],
            )
            .await?;
        let ids: HashMap<i64, Uuid> = rows.iter().map(|r| (r.get(0), r.get(1))).collect();

        debug!(
            "{}: assigned {} ids ({} new)",
            source_table,
            ids.len(),
            minted.len()
        );

        Ok(Assignment { ids, minted })
    }

    async fn lookup(&self, source_table: &str, legacy_ids: &[i64]) -> Result<HashMap<i64, Uuid>> {
        if legacy_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let client = self.client("looking up id mappings").await?;
        let rows = client
            .query(
                &format!(
                    "SELECT legacy_id, new_id FROM {}
                     WHERE source_table = $1 AND legacy_id = ANY($2)",
                    self.table
                ),
                &[&source_table, &legacy_ids],
            )
            .await?;
        Ok(rows.iter().map(|r| (r.get(0), r.get(1))).collect())
    }

    async fn retract(&self, source_table: &str, legacy_id: i64, new_id: Uuid) -> Result<()> {
        let client = self.client("retracting id mapping").await?;
        client
            .execute(
                &format!(
                    "DELETE FROM {}
                     WHERE source_table = $1 AND legacy_id = $2 AND new_id = $3",
                    self.table
                ),
                &[&source_table, &legacy_id, &new_id],
            )
            .await?;
        Ok(())
    }

    async fn count(&self, source_table: &str) -> Result<i64> {
        let client = self.client("counting id mappings").await?;
        let row = client
            .query_one(
                &format!(
                    "SELECT COUNT(*) FROM {} WHERE source_table = $1",
                    self.table
                ),
                &[&source_table],
            )
            .await?;
        Ok(row.get(0))
    }

    fn backend_type(&self) -> &'static str {
        "postgres"
    }
}

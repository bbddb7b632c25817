//! PostgreSQL target writer.
//!
//! Uses deadpool-postgres for connection pooling. The pool is shared with the
//! id mapping store and the migration log, which live in the control schema
//! of the same database.

use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use tokio_postgres::types::{to_sql_checked, Format, IsNull, ToSql, Type};
use tokio_postgres::Config as PgConfig;
use tracing::{debug, info, warn};

use super::tls::{make_tls_connect, SslMode};
use super::{build_insert_sql, OnConflict, TargetWriter};
use crate::config::TargetConfig;
use crate::core::identifier::qualify_pg;
use crate::core::SqlValue;
use crate::error::{MigrateError, Result};

/// Connection pool timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// A parameter sent in text format, whatever type the server inferred.
///
/// The server runs the destination column's input function on it, exactly
/// as for a quoted literal.
#[derive(Debug)]
struct TextParam<'a>(&'a str);

impl ToSql for TextParam<'_> {
    fn to_sql(
        &self,
        _ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        out.put_slice(self.0.as_bytes());
        Ok(IsNull::No)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    fn encode_format(&self, _ty: &Type) -> Format {
        Format::Text
    }

    to_sql_checked!();
}

/// PostgreSQL target writer.
pub struct PgWriter {
    pool: Pool,
    schema: String,
}

impl PgWriter {
    /// Create a new PostgreSQL writer from configuration.
    pub async fn new(config: &TargetConfig, max_conns: usize) -> Result<Self> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(config.port);
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);

        // Connection options for reliability
        pg_config.keepalives(true);
        pg_config.keepalives_idle(Duration::from_secs(30));
        pg_config.connect_timeout(POOL_CONNECTION_TIMEOUT);

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let pool = match make_tls_connect(SslMode::parse(&config.ssl_mode)?)? {
            None => {
                warn!("PostgreSQL TLS is disabled. Credentials will be transmitted in plaintext.");
                let mgr = Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config);
                Pool::builder(mgr)
                    .max_size(max_conns)
                    .build()
                    .map_err(|e| MigrateError::pool(e, "creating PostgreSQL target pool"))?
            }
            Some(tls) => {
                let mgr = Manager::from_config(pg_config, tls, mgr_config);
                Pool::builder(mgr)
                    .max_size(max_conns)
                    .build()
                    .map_err(|e| MigrateError::pool(e, "creating PostgreSQL target pool (TLS)"))?
            }
        };

        // Test connection
        let client = pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, "testing PostgreSQL target connection"))?;
        client.simple_query("SELECT 1").await?;

        info!(
            "Connected to PostgreSQL target: {}:{}/{} (schema {})",
            config.host, config.port, config.database, config.schema
        );

        Ok(Self {
            pool,
            schema: config.schema.clone(),
        })
    }

    /// Handle to the pool, for the control-schema stores.
    pub fn pool(&self) -> Pool {
        self.pool.clone()
    }

    async fn client(&self, context: &str) -> Result<deadpool_postgres::Object> {
        self.pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, context.to_string()))
    }
}

#[async_trait]
impl TargetWriter for PgWriter {
    async fn insert_batch(
        &self,
        table: &str,
        columns: &[String],
        rows: &[Vec<SqlValue>],
        on_conflict: &OnConflict,
    ) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let (sql, params) = build_insert_sql(&self.schema, table, columns, rows, on_conflict)?;
        let text: Vec<TextParam<'_>> = params.iter().map(|p| TextParam(p.as_str())).collect();
        let refs: Vec<&(dyn ToSql + Sync)> =
            text.iter().map(|p| p as &(dyn ToSql + Sync)).collect();

        let client = self.client("inserting batch").await?;
        let inserted = client.execute(sql.as_str(), &refs).await?;

        debug!(
            "{}: inserted {} of {} rows",
            table,
            inserted,
            rows.len()
        );
        Ok(inserted)
    }

    async fn row_count(&self, table: &str) -> Result<i64> {
        let client = self.client("counting target rows").await?;
        let row = client
            .query_one(
                &format!("SELECT COUNT(*) FROM {}", qualify_pg(&self.schema, table)?),
                &[],
            )
            .await?;
        Ok(row.get(0))
    }

    async fn ping(&self) -> Result<()> {
        let client = self.client("pinging PostgreSQL target").await?;
        client.simple_query("SELECT 1").await?;
        Ok(())
    }

    fn db_type(&self) -> &str {
        "postgres"
    }

    async fn close(&self) {
        self.pool.close();
    }
}

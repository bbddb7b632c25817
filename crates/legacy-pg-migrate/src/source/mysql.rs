//! MySQL reader for the legacy portal database.
//!
//! Uses SQLx for connection pooling. Row values are decoded by the type name
//! the server reports for each result column, so `SELECT *` works without
//! loading the table schema first.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow, MySqlSslMode};
use sqlx::{Column, Row, TypeInfo, ValueRef};
use tracing::{debug, info};

use super::SourceReader;
use crate::config::SourceConfig;
use crate::core::identifier::{quote_mysql, quote_mysql_list};
use crate::core::{Record, SqlValue};
use crate::error::{MigrateError, Result};

/// Connection pool timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Legacy MySQL source reader.
pub struct MysqlReader {
    pool: MySqlPool,
}

impl MysqlReader {
    /// Create a new MySQL reader from configuration.
    pub async fn new(config: &SourceConfig, max_conns: usize) -> Result<Self> {
        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.database)
            .username(&config.user)
            .password(&config.password)
            .ssl_mode(parse_ssl_mode(&config.ssl_mode)?);

        let pool = MySqlPoolOptions::new()
            .max_connections(max_conns as u32)
            .acquire_timeout(POOL_CONNECTION_TIMEOUT)
            .connect_with(options)
            .await
            .map_err(|e| MigrateError::pool(e, "creating MySQL source pool"))?;

        // Test connection
        sqlx::query("SELECT 1")
            .fetch_one(&pool)
            .await
            .map_err(|e| MigrateError::pool(e, "testing MySQL source connection"))?;

        info!(
            "Connected to MySQL source: {}:{}/{}",
            config.host, config.port, config.database
        );

        Ok(Self { pool })
    }

    /// Convert a MySQL row into a record keyed by column name.
    fn row_to_record(row: &MySqlRow) -> Record {
        row.columns()
            .iter()
            .map(|col| {
                let value = decode_value(row, col.ordinal(), col.type_info().name());
                (col.name().to_string(), value)
            })
            .collect()
    }
}

fn parse_ssl_mode(mode: &str) -> Result<MySqlSslMode> {
    match mode.to_lowercase().as_str() {
        "disabled" => Ok(MySqlSslMode::Disabled),
        "preferred" => Ok(MySqlSslMode::Preferred),
        "required" => Ok(MySqlSslMode::Required),
        "verify_ca" => Ok(MySqlSslMode::VerifyCa),
        "verify_identity" => Ok(MySqlSslMode::VerifyIdentity),
        other => Err(MigrateError::Config(format!(
            "Invalid source ssl_mode '{}'",
            other
        ))),
    }
}

/// Decode one column by the server-reported type name.
///
/// Values the driver cannot decode (zero dates, out-of-range TIME) become
/// NULL, which is what the legacy application saw for them as well.
fn decode_value(row: &MySqlRow, idx: usize, type_name: &str) -> SqlValue {
    let is_null: bool = row.try_get_raw(idx).map(|r| r.is_null()).unwrap_or(true);
    if is_null {
        return SqlValue::Null;
    }

    let upper = type_name.to_ascii_uppercase();
    let unsigned = upper.ends_with(" UNSIGNED");
    let base = upper.trim_end_matches(" UNSIGNED");

    let decoded = match base {
        // tinyint(1)
        "BOOLEAN" => row.try_get::<bool, _>(idx).map(SqlValue::Bool),

        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" if unsigned => {
            row.try_get::<u64, _>(idx).map(|v| match i64::try_from(v) {
                Ok(n) => SqlValue::I64(n),
                Err(_) => SqlValue::Decimal(Decimal::from(v)),
            })
        }
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            row.try_get::<i64, _>(idx).map(SqlValue::I64)
        }
        "BIT" => row.try_get::<u64, _>(idx).map(|v| SqlValue::I64(v as i64)),
        "YEAR" => row.try_get::<u16, _>(idx).map(|v| SqlValue::I64(v as i64)),

        "FLOAT" => row.try_get::<f32, _>(idx).map(|v| SqlValue::F64(v as f64)),
        "DOUBLE" => row.try_get::<f64, _>(idx).map(SqlValue::F64),
        "DECIMAL" => row.try_get::<Decimal, _>(idx).map(SqlValue::Decimal),

        "DATE" => row.try_get::<chrono::NaiveDate, _>(idx).map(SqlValue::Date),
        "TIME" => row.try_get::<chrono::NaiveTime, _>(idx).map(SqlValue::Time),
        "DATETIME" | "TIMESTAMP" => row
            .try_get::<chrono::NaiveDateTime, _>(idx)
            .map(SqlValue::DateTime),

        "BINARY" | "VARBINARY" | "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "GEOMETRY" => {
            row.try_get::<Vec<u8>, _>(idx).map(SqlValue::Bytes)
        }

        // CHAR, VARCHAR, TEXT variants, ENUM, SET, JSON
        _ => row.try_get::<String, _>(idx).map(SqlValue::Text),
    };

    decoded.unwrap_or_else(|e| {
        debug!("column {} ({}): decoding as NULL: {}", idx, type_name, e);
        SqlValue::Null
    })
}

#[async_trait]
impl SourceReader for MysqlReader {
    async fn count(&self, table: &str) -> Result<i64> {
        let query = format!("SELECT COUNT(*) AS cnt FROM {}", quote_mysql(table)?);
        let row: MySqlRow = sqlx::query(&query).fetch_one(&self.pool).await?;
        Ok(row.try_get::<i64, _>("cnt")?)
    }

    async fn extract_batch(
        &self,
        table: &str,
        order_by: &[&str],
        offset: u64,
        limit: usize,
    ) -> Result<Vec<Record>> {
        let mut query = format!("SELECT * FROM {}", quote_mysql(table)?);
        if !order_by.is_empty() {
            query.push_str(&format!(" ORDER BY {}", quote_mysql_list(order_by)?));
        }
        query.push_str(" LIMIT ? OFFSET ?");

        let rows: Vec<MySqlRow> = sqlx::query(&query)
            .bind(limit as u64)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        debug!(
            "{}: fetched {} rows at offset {}",
            table,
            rows.len(),
            offset
        );

        Ok(rows.iter().map(Self::row_to_record).collect())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    fn db_type(&self) -> &str {
        "mysql"
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ssl_mode() {
        assert!(matches!(parse_ssl_mode("disabled"), Ok(MySqlSslMode::Disabled)));
        assert!(matches!(parse_ssl_mode("Preferred"), Ok(MySqlSslMode::Preferred)));
        assert!(matches!(
            parse_ssl_mode("verify_identity"),
            Ok(MySqlSslMode::VerifyIdentity)
        ));
        assert!(parse_ssl_mode("require").is_err());
    }
}

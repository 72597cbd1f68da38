use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::info;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use crate::error::SinkError;
use crate::models::{Alert, AlertStats, StoredAlert};
use crate::reporter::AlertSink;

/// SQLite history of emitted alerts, keyed by `(transaction_hash, log_index)`.
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // an in-memory database only lives as long as its single connection
        let max_connections = if database_url.contains(":memory:") { 1 } else { 4 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        let db = Self { pool };
        db.create_tables().await?;
        Ok(db)
    }

    async fn create_tables(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS alerts (
                transaction_hash TEXT NOT NULL,
                log_index INTEGER NOT NULL,
                block_number INTEGER NOT NULL,
                from_address TEXT NOT NULL,
                to_address TEXT NOT NULL,
                token_amount TEXT NOT NULL,
                fiat_value TEXT NOT NULL,
                timestamp TEXT,
                created_at TEXT NOT NULL,
                UNIQUE(transaction_hash, log_index)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_alerts_block ON alerts(block_number)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_alerts_from ON alerts(from_address)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_alerts_to ON alerts(to_address)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Returns false when the alert was already recorded.
    pub async fn insert_alert(&self, alert: &Alert) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO alerts
            (transaction_hash, log_index, block_number, from_address, to_address, token_amount, fiat_value, timestamp, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(alert.transaction_hash_hex())
        .bind(alert.log_index as i64)
        .bind(alert.block_number as i64)
        .bind(alert.sender_checksum())
        .bind(alert.recipient_checksum())
        .bind(alert.token_amount.normalize().to_string())
        .bind(alert.fiat_value.normalize().to_string())
        .bind(alert.timestamp)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn query_alerts(
        &self,
        address: Option<&str>,
        from_block: Option<u64>,
        to_block: Option<u64>,
        limit: i64,
    ) -> Result<Vec<StoredAlert>, sqlx::Error> {
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM alerts WHERE 1=1");

        if let Some(addr) = address {
            let addr = addr.to_lowercase();
            query
                .push(" AND (lower(from_address) = ")
                .push_bind(addr.clone())
                .push(" OR lower(to_address) = ")
                .push_bind(addr)
                .push(")");
        }
        if let Some(from) = from_block {
            query.push(" AND block_number >= ").push_bind(from as i64);
        }
        if let Some(to) = to_block {
            query.push(" AND block_number <= ").push_bind(to as i64);
        }
        query
            .push(" ORDER BY block_number DESC, log_index ASC LIMIT ")
            .push_bind(limit);

        let rows = query.build().fetch_all(&self.pool).await?;

        let mut alerts = Vec::with_capacity(rows.len());
        for row in rows {
            alerts.push(StoredAlert {
                transaction_hash: row.try_get("transaction_hash")?,
                log_index: row.try_get("log_index")?,
                block_number: row.try_get("block_number")?,
                from_address: row.try_get("from_address")?,
                to_address: row.try_get("to_address")?,
                token_amount: row.try_get("token_amount")?,
                fiat_value: row.try_get("fiat_value")?,
                timestamp: row.try_get::<Option<DateTime<Utc>>, _>("timestamp")?,
                created_at: row.try_get("created_at")?,
            });
        }

        Ok(alerts)
    }

    pub async fn get_stats(&self) -> Result<AlertStats, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(DISTINCT from_address) AS senders,
                COUNT(DISTINCT to_address) AS recipients,
                MIN(block_number) AS min_block,
                MAX(block_number) AS max_block
            FROM alerts
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(AlertStats {
            total_alerts: row.try_get("total")?,
            unique_senders: row.try_get("senders")?,
            unique_recipients: row.try_get("recipients")?,
            latest_block: row.try_get("max_block")?,
            earliest_block: row.try_get("min_block")?,
        })
    }
}

#[async_trait]
impl AlertSink for Database {
    fn name(&self) -> &'static str {
        "history"
    }

    async fn emit(&mut self, alerts: &[Alert]) -> Result<(), SinkError> {
        let mut inserted = 0;
        for alert in alerts {
            if self.insert_alert(alert).await? {
                inserted += 1;
            }
        }
        if !alerts.is_empty() {
            info!(
                "Recorded {} new alerts in history ({} already known)",
                inserted,
                alerts.len() - inserted
            );
        }
        Ok(())
    }
}

// SQLite store for raw scrap records. Uses sqlx for async + connection pooling.
// Written by the record writer task; the aggregator never reads from it.

use crate::models::ScrapRecord;
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tracing::instrument;

pub struct ScrapRepo {
    pool: SqlitePool,
    retention_ms: i64,
}

impl ScrapRepo {
    /// Connect to SQLite at `path`, create parent dir and DB if missing, enable WAL + pragmas.
    pub async fn connect(
        path: &str,
        retention_days: u32,
        max_pool_size: u32,
    ) -> anyhow::Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_pool_size)
            .connect_with(opts)
            .await?;
        let retention_ms = (retention_days as i64) * 24 * 60 * 60 * 1000;
        Ok(Self { pool, retention_ms })
    }

    pub async fn init(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scrap_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                machine_id TEXT NOT NULL,
                scrap_index INTEGER NOT NULL,
                value REAL NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_scrap_key_created_at ON scrap_records(machine_id, scrap_index, created_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_scrap_created_at ON scrap_records(created_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    #[instrument(skip(self, records), fields(repo = "scrap", operation = "save_records", records_count = records.len()))]
    pub async fn save_records(&self, records: &[ScrapRecord]) -> anyhow::Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for r in records {
            sqlx::query(
                "INSERT INTO scrap_records (machine_id, scrap_index, value, created_at) VALUES ($1, $2, $3, $4)",
            )
            .bind(&r.machine_id)
            .bind(r.scrap_index as i64)
            .bind(r.value)
            .bind(r.timestamp_ms)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Delete records older than the retention window. Returns rows removed.
    #[instrument(skip(self), fields(repo = "scrap", operation = "prune_old_data"))]
    pub async fn prune_old_data(&self) -> anyhow::Result<u64> {
        let cutoff = chrono::Utc::now().timestamp_millis() - self.retention_ms;
        let r = sqlx::query("DELETE FROM scrap_records WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(r.rows_affected())
    }

    pub async fn count_records(&self) -> anyhow::Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM scrap_records")
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n as u64)
    }

    /// Most recent records (by insertion), returned oldest first.
    pub async fn get_recent_records(&self, limit: u32) -> anyhow::Result<Vec<ScrapRecord>> {
        let rows = sqlx::query(
            "SELECT machine_id, scrap_index, value, created_at
             FROM scrap_records ORDER BY id DESC LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(Self::parse_record_row(&row)?);
        }
        out.reverse();
        Ok(out)
    }

    /// Sum and count of stored values for one key in `(cutoff_ms, upto_ms]`.
    /// Lets an operator cross-check a live aggregate against what was persisted.
    #[instrument(skip(self), fields(repo = "scrap", operation = "window_totals"))]
    pub async fn window_totals(
        &self,
        machine_id: &str,
        scrap_index: u32,
        cutoff_ms: i64,
        upto_ms: i64,
    ) -> anyhow::Result<(f64, u64)> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(value), 0.0) AS total, COUNT(*) AS n FROM scrap_records
             WHERE machine_id = $1 AND scrap_index = $2 AND created_at > $3 AND created_at <= $4",
        )
        .bind(machine_id)
        .bind(scrap_index as i64)
        .bind(cutoff_ms)
        .bind(upto_ms)
        .fetch_one(&self.pool)
        .await?;
        let total: f64 = row.try_get("total")?;
        let n: i64 = row.try_get("n")?;
        Ok((total, n as u64))
    }

    fn parse_record_row(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<ScrapRecord> {
        let machine_id: String = row.try_get("machine_id")?;
        let scrap_index: i64 = row.try_get("scrap_index")?;
        let value: f64 = row.try_get("value")?;
        let created_at: i64 = row.try_get("created_at")?;
        Ok(ScrapRecord {
            machine_id,
            scrap_index: u32::try_from(scrap_index)?,
            value,
            timestamp_ms: created_at,
        })
    }
}

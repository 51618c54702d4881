//! Local SQLite persistence for the mutation queue
//!
//! Pending writes survive an app restart: rows are inserted on enqueue,
//! removed on drain and inserted again when a drain has to be retried.

use crate::error::{SyncError, SyncResult};
use crate::queue::{Operation, QueuedOperation};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use uuid::Uuid;

/// Configuration for the local queue database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalDbConfig {
    /// Path to the database file
    pub db_path: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Whether to enable WAL mode
    pub enable_wal: bool,
}

impl Default for LocalDbConfig {
    fn default() -> Self {
        Self {
            db_path: "heirloom_queue.db".to_string(),
            max_connections: 5,
            enable_wal: true,
        }
    }
}

/// Local database handle
pub struct LocalDatabase {
    pool: SqlitePool,
}

impl LocalDatabase {
    /// Open (creating if needed) the database at `config.db_path`
    pub async fn new(config: LocalDbConfig) -> SyncResult<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", config.db_path))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        if config.enable_wal {
            sqlx::query("PRAGMA journal_mode = WAL")
                .execute(&pool)
                .await?;
        }

        let db = Self { pool };
        db.initialize_schema().await?;

        tracing::debug!(db_path = %config.db_path, "Opened local queue database");
        Ok(db)
    }

    async fn initialize_schema(&self) -> SyncResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS mutation_queue (
                id TEXT PRIMARY KEY,
                seq INTEGER NOT NULL,
                operation TEXT NOT NULL,
                data TEXT NOT NULL,
                priority INTEGER NOT NULL DEFAULT 0,
                attempts INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_mutation_queue_seq ON mutation_queue(seq)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Insert or replace a queued operation
    pub async fn insert(&self, op: &QueuedOperation) -> SyncResult<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO mutation_queue (
                id, seq, operation, data, priority, attempts, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(op.id.to_string())
        .bind(op.seq)
        .bind(serde_json::to_string(&op.operation)?)
        .bind(op.data.to_string())
        .bind(op.priority)
        .bind(op.attempts)
        .bind(op.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Delete the given operations in one transaction
    pub async fn remove(&self, ids: &[Uuid]) -> SyncResult<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for id in ids {
            sqlx::query("DELETE FROM mutation_queue WHERE id = ?")
                .bind(id.to_string())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    /// Every persisted operation, in insertion order
    pub async fn load_pending(&self) -> SyncResult<Vec<QueuedOperation>> {
        let rows = sqlx::query(
            r#"
            SELECT id, seq, operation, data, priority, attempts, created_at
            FROM mutation_queue
            ORDER BY seq ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id")?;
            let operation: String = row.try_get("operation")?;
            let data: String = row.try_get("data")?;
            let created_at: String = row.try_get("created_at")?;

            entries.push(QueuedOperation {
                id: Uuid::parse_str(&id)
                    .map_err(|e| SyncError::Internal(format!("Invalid UUID: {}", e)))?,
                seq: row.try_get("seq")?,
                operation: serde_json::from_str::<Operation>(&operation)?,
                data: serde_json::from_str(&data)?,
                priority: row.try_get("priority")?,
                attempts: row.try_get("attempts")?,
                created_at: DateTime::parse_from_rfc3339(&created_at)
                    .map_err(|e| SyncError::Internal(format!("Invalid timestamp: {}", e)))?
                    .with_timezone(&Utc),
            });
        }

        Ok(entries)
    }

    /// Close database connections
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

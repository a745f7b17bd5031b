//! Durable checkpoint storage in SQLite
//!
//! One row per checkpoint, keyed by `(thread_id, checkpoint_id)`. The
//! autoincrement `seq` column fixes insertion order, so "latest" and the
//! newest-first listing never depend on timestamps. The parent link is
//! resolved inside the `INSERT` itself, which keeps `put` to one statement
//! regardless of how long the history is.

use crate::checkpoint::{Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointTuple};
use crate::error::Result;
use crate::memory::require_thread_id;
use crate::traits::{CheckpointSaver, CheckpointStream};
use async_trait::async_trait;
use chrono::Utc;
use futures::stream;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS checkpoints (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    thread_id TEXT NOT NULL,
    checkpoint_id TEXT NOT NULL,
    parent_checkpoint_id TEXT,
    step INTEGER NOT NULL,
    checkpoint TEXT NOT NULL,
    metadata TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (thread_id, checkpoint_id)
)";

const CREATE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_checkpoints_thread_seq ON checkpoints (thread_id, seq)";

const COLUMNS: &str = "thread_id, checkpoint_id, parent_checkpoint_id, checkpoint, metadata";

/// Checkpoint saver backed by a SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteCheckpointSaver {
    pool: SqlitePool,
}

impl SqliteCheckpointSaver {
    /// Open (or create) the database file at `path`
    ///
    /// # Arguments
    /// * `path` - Database file; missing parent directories are created
    ///
    /// # Returns
    /// A saver with its table in place, or a storage error
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new().max_connections(5).connect_with(options).await?;
        Self::from_pool(pool).await
    }

    /// Connect with a SQLite URL such as `sqlite:runs.db`
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().max_connections(5).connect_with(options).await?;
        Self::from_pool(pool).await
    }

    /// Private in-memory database, mostly for tests.
    ///
    /// Every SQLite connection to `:memory:` is its own database, so the pool
    /// is pinned to a single connection.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::from_pool(pool).await
    }

    /// Use an existing pool, creating the table if needed
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::query(CREATE_TABLE).execute(&pool).await?;
        sqlx::query(CREATE_INDEX).execute(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn tuple_from_row(row: &SqliteRow) -> Result<CheckpointTuple> {
    let thread_id: String = row.try_get("thread_id")?;
    let checkpoint_id: String = row.try_get("checkpoint_id")?;
    let parent: Option<String> = row.try_get("parent_checkpoint_id")?;
    let checkpoint: String = row.try_get("checkpoint")?;
    let metadata: String = row.try_get("metadata")?;

    Ok(CheckpointTuple {
        config: CheckpointConfig::for_thread(thread_id.clone()).with_checkpoint_id(checkpoint_id),
        checkpoint: serde_json::from_str(&checkpoint)?,
        metadata: serde_json::from_str(&metadata)?,
        parent_config: parent.map(|id| CheckpointConfig::for_thread(thread_id).with_checkpoint_id(id)),
    })
}

#[async_trait]
impl CheckpointSaver for SqliteCheckpointSaver {
    async fn get_tuple(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>> {
        let thread_id = require_thread_id(config)?;
        let row = match &config.checkpoint_id {
            Some(id) => {
                sqlx::query(&format!(
                    "SELECT {COLUMNS} FROM checkpoints WHERE thread_id = ? AND checkpoint_id = ?"
                ))
                .bind(thread_id)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {COLUMNS} FROM checkpoints WHERE thread_id = ? ORDER BY seq DESC LIMIT 1"
                ))
                .bind(thread_id)
                .fetch_optional(&self.pool)
                .await?
            }
        };
        row.as_ref().map(tuple_from_row).transpose()
    }

    async fn list(
        &self,
        config: &CheckpointConfig,
        limit: Option<usize>,
    ) -> Result<CheckpointStream> {
        let thread_id = require_thread_id(config)?;
        // SQLite treats a negative LIMIT as no limit
        let limit = limit.map(|n| n as i64).unwrap_or(-1);
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM checkpoints WHERE thread_id = ? ORDER BY seq DESC LIMIT ?"
        ))
        .bind(thread_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let results: Vec<Result<CheckpointTuple>> = rows.iter().map(tuple_from_row).collect();
        Ok(Box::pin(stream::iter(results)))
    }

    async fn put(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
    ) -> Result<CheckpointConfig> {
        let thread_id = require_thread_id(config)?;
        let checkpoint_id = checkpoint.id.clone();
        let body = serde_json::to_string(&checkpoint)?;
        let meta = serde_json::to_string(&metadata)?;

        // Without an explicit parent, the thread's latest checkpoint is the parent
        let parent: Option<String> = sqlx::query_scalar(
            "INSERT INTO checkpoints (thread_id, checkpoint_id, parent_checkpoint_id, step, checkpoint, metadata, created_at)
             VALUES (?1, ?2, COALESCE(?3, (SELECT checkpoint_id FROM checkpoints WHERE thread_id = ?1 ORDER BY seq DESC LIMIT 1)), ?4, ?5, ?6, ?7)
             RETURNING parent_checkpoint_id",
        )
        .bind(thread_id)
        .bind(&checkpoint_id)
        .bind(config.checkpoint_id.as_deref())
        .bind(metadata.step)
        .bind(&body)
        .bind(&meta)
        .bind(Utc::now().to_rfc3339())
        .fetch_one(&self.pool)
        .await?;

        debug!(
            thread_id = %thread_id,
            checkpoint_id = %checkpoint_id,
            parent = ?parent,
            step = metadata.step,
            "Checkpoint written"
        );
        Ok(CheckpointConfig::for_thread(thread_id).with_checkpoint_id(checkpoint_id))
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM checkpoints WHERE thread_id = ?")
            .bind(thread_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

//! In-memory checkpoint storage
//!
//! [`InMemoryCheckpointSaver`] keeps every checkpoint of every thread in a
//! `HashMap` behind a tokio `RwLock`. Data lives as long as the process;
//! use [`SqliteCheckpointSaver`](crate::SqliteCheckpointSaver) when a run must
//! survive a restart.

use crate::checkpoint::{Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointTuple};
use crate::error::{CheckpointError, Result};
use crate::traits::{CheckpointSaver, CheckpointStream};
use async_trait::async_trait;
use futures::stream;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

type CheckpointStorage = Arc<RwLock<HashMap<String, Vec<CheckpointTuple>>>>;

/// Process-lifetime checkpoint saver.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCheckpointSaver {
    storage: CheckpointStorage,
}

impl InMemoryCheckpointSaver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of threads with at least one checkpoint
    pub async fn thread_count(&self) -> usize {
        self.storage.read().await.len()
    }

    /// Total number of stored checkpoints
    pub async fn checkpoint_count(&self) -> usize {
        self.storage.read().await.values().map(Vec::len).sum()
    }

    pub async fn clear(&self) {
        self.storage.write().await.clear();
    }
}

pub(crate) fn require_thread_id(config: &CheckpointConfig) -> Result<&str> {
    config
        .thread_id
        .as_deref()
        .ok_or_else(|| CheckpointError::Invalid("thread_id is required".to_string()))
}

/// Pick the addressed tuple out of a thread's history.
fn select_tuple(
    entries: &[CheckpointTuple],
    config: &CheckpointConfig,
) -> Option<CheckpointTuple> {
    match &config.checkpoint_id {
        Some(id) => entries.iter().find(|e| &e.checkpoint.id == id).cloned(),
        None => entries.last().cloned(),
    }
}

/// Build the stored tuple for a `put`.
fn new_tuple(
    thread_id: &str,
    config: &CheckpointConfig,
    checkpoint: Checkpoint,
    metadata: CheckpointMetadata,
    previous: Option<&CheckpointTuple>,
) -> CheckpointTuple {
    let stored = CheckpointConfig::for_thread(thread_id).with_checkpoint_id(checkpoint.id.clone());
    let parent_config = match &config.checkpoint_id {
        Some(_) => Some(config.clone()),
        None => previous.map(|p| p.config.clone()),
    };

    CheckpointTuple {
        config: stored,
        checkpoint,
        metadata,
        parent_config,
    }
}

#[async_trait]
impl CheckpointSaver for InMemoryCheckpointSaver {
    async fn get_tuple(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>> {
        let thread_id = require_thread_id(config)?;
        let storage = self.storage.read().await;

        Ok(storage
            .get(thread_id)
            .and_then(|entries| select_tuple(entries, config)))
    }

    async fn list(
        &self,
        config: &CheckpointConfig,
        limit: Option<usize>,
    ) -> Result<CheckpointStream> {
        let thread_id = require_thread_id(config)?;
        let storage = self.storage.read().await;

        let results: Vec<Result<CheckpointTuple>> = storage
            .get(thread_id)
            .map(|entries| {
                entries
                    .iter()
                    .rev()
                    .take(limit.unwrap_or(usize::MAX))
                    .cloned()
                    .map(Ok)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Box::pin(stream::iter(results)))
    }

    async fn put(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
    ) -> Result<CheckpointConfig> {
        let thread_id = require_thread_id(config)?;
        let mut storage = self.storage.write().await;
        let entries = storage.entry(thread_id.to_string()).or_default();

        let tuple = new_tuple(thread_id, config, checkpoint, metadata, entries.last());
        let stored = tuple.config.clone();
        entries.push(tuple);

        Ok(stored)
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        self.storage.write().await.remove(thread_id);
        Ok(())
    }
}

//! The [`CheckpointSaver`] trait implemented by every storage backend

use crate::checkpoint::{Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointTuple};
use crate::error::Result;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

/// Stream of checkpoint tuples, newest first
pub type CheckpointStream = Pin<Box<dyn Stream<Item = Result<CheckpointTuple>> + Send>>;

/// Persistence backend for run checkpoints.
///
/// Implementations key checkpoints by `thread_id` and keep them in insertion
/// order. A config without `checkpoint_id` addresses the latest checkpoint.
#[async_trait]
pub trait CheckpointSaver: Send + Sync {
    /// Fetch a checkpoint without its metadata
    async fn get(&self, config: &CheckpointConfig) -> Result<Option<Checkpoint>> {
        Ok(self.get_tuple(config).await?.map(|tuple| tuple.checkpoint))
    }

    /// Fetch a checkpoint with config and metadata
    async fn get_tuple(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>>;

    /// List the checkpoints of a thread, newest first
    async fn list(&self, config: &CheckpointConfig, limit: Option<usize>)
        -> Result<CheckpointStream>;

    /// Store a checkpoint and return the config addressing it
    async fn put(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
    ) -> Result<CheckpointConfig>;

    /// Remove every checkpoint of a thread
    async fn delete_thread(&self, thread_id: &str) -> Result<()>;
}

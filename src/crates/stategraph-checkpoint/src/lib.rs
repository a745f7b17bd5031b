//! # stategraph-checkpoint
//!
//! Persistence for stategraph runs. After every super-step the executor
//! records the run's state values together with its resumption [`Cursor`];
//! a later call with the same run id picks up from there, possibly in a
//! different process.
//!
//! ## Backends
//!
//! - [`InMemoryCheckpointSaver`]: process lifetime only, the default for tests
//! - [`SqliteCheckpointSaver`]: a SQLite database, survives restarts
//!
//! Any other store can implement [`CheckpointSaver`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use stategraph_checkpoint::{
//!     Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointSaver, CheckpointSource,
//!     Cursor, InMemoryCheckpointSaver, PendingTask,
//! };
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let saver = InMemoryCheckpointSaver::new();
//! let config = CheckpointConfig::for_thread("run-1");
//!
//! let checkpoint = Checkpoint::new(
//!     json!({"topic": "renewable energy"}),
//!     Cursor::new(vec![PendingTask::node("create_analysts")]),
//! );
//! saver
//!     .put(&config, checkpoint, CheckpointMetadata::new(CheckpointSource::Loop, 0))
//!     .await?;
//!
//! let latest = saver.get_tuple(&config).await?;
//! assert!(latest.is_some());
//! # Ok(())
//! # }
//! ```

pub mod checkpoint;
pub mod error;
pub mod memory;
pub mod sqlite;
pub mod traits;

pub use checkpoint::{
    Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointSource, CheckpointTuple, Cursor,
    PendingTask, CHECKPOINT_VERSION,
};
pub use error::{CheckpointError, Result};
pub use memory::InMemoryCheckpointSaver;
pub use sqlite::SqliteCheckpointSaver;
pub use traits::{CheckpointSaver, CheckpointStream};

//! Core checkpoint data structures
//!
//! A [`Checkpoint`] is the persisted form of one run after a super-step: the
//! full state values plus the [`Cursor`] describing what runs next. Every
//! type here is plain serde data so any backend can store it.
//!
//! ```text
//! CheckpointTuple
//!  ├─ config    { thread_id: "run-1", checkpoint_id: "uuid" }
//!  ├─ checkpoint
//!  │   ├─ values  { "messages": [...], "sections": [...] }
//!  │   └─ cursor  { next: [PendingTask], interrupted_before, joins }
//!  └─ metadata  { source: Loop, step: 3, updated_by }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Current checkpoint format version.
pub const CHECKPOINT_VERSION: u32 = 1;

/// One task scheduled for the next super-step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingTask {
    /// Node to execute
    pub node: String,

    /// Per-branch input overlay for fan-out tasks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arg: Option<Value>,

    /// Fan-out enumeration index, if the task came from a send
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<usize>,
}

impl PendingTask {
    /// A plain task triggered by an edge
    pub fn node(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            arg: None,
            branch: None,
        }
    }

    /// A fan-out task with its own input overlay
    pub fn send(node: impl Into<String>, arg: Value, branch: usize) -> Self {
        Self {
            node: node.into(),
            arg: Some(arg),
            branch: Some(branch),
        }
    }

    /// Whether the task was spawned by a send
    pub fn is_send(&self) -> bool {
        self.branch.is_some()
    }
}

/// Resumption pointer of a run.
///
/// An empty `next` list means the run reached a terminal state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    /// Tasks to execute in the next super-step, in enumeration order
    #[serde(default)]
    pub next: Vec<PendingTask>,

    /// Node the run is suspended in front of, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupted_before: Option<String>,

    /// Set once a suspended run has been resumed, so the interrupt
    /// does not fire again for the same tasks
    #[serde(default)]
    pub resumed: bool,

    /// Join edge progress: target node -> sources completed so far
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub joins: BTreeMap<String, BTreeSet<String>>,
}

impl Cursor {
    /// Cursor pointing at the given tasks
    pub fn new(next: Vec<PendingTask>) -> Self {
        Self {
            next,
            ..Default::default()
        }
    }

    /// No more work scheduled
    pub fn is_terminal(&self) -> bool {
        self.next.is_empty()
    }

    /// Whether the run sits at an interrupt point
    pub fn is_interrupted(&self) -> bool {
        self.interrupted_before.is_some() && !self.resumed
    }

    /// Names of the scheduled nodes, duplicates kept for fan-out tasks
    pub fn next_nodes(&self) -> Vec<String> {
        self.next.iter().map(|t| t.node.clone()).collect()
    }
}

/// Snapshot of a run after one super-step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Format version
    pub v: u32,

    /// Unique checkpoint id
    pub id: String,

    /// Creation time
    pub ts: DateTime<Utc>,

    /// Full state values
    pub values: Value,

    /// What runs next
    pub cursor: Cursor,
}

impl Checkpoint {
    /// Create a checkpoint with a fresh id and the current timestamp
    pub fn new(values: Value, cursor: Cursor) -> Self {
        Self {
            v: CHECKPOINT_VERSION,
            id: uuid::Uuid::new_v4().to_string(),
            ts: Utc::now(),
            values,
            cursor,
        }
    }
}

/// How a checkpoint came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointSource {
    /// Written when a run starts from caller input
    Input,
    /// Written by the execution loop after a super-step
    Loop,
    /// Written by an external state patch
    Update,
    /// Written when a run suspends without a fresh super-step record
    Interrupt,
}

/// Metadata stored alongside a checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub source: CheckpointSource,

    /// Super-step number; -1 for the input checkpoint
    pub step: i64,

    /// Node an external patch was attributed to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,

    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl CheckpointMetadata {
    pub fn new(source: CheckpointSource, step: i64) -> Self {
        Self {
            source,
            step,
            updated_by: None,
            extra: HashMap::new(),
        }
    }

    pub fn with_updated_by(mut self, node: impl Into<String>) -> Self {
        self.updated_by = Some(node.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Identifies a run, and optionally one checkpoint inside it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    pub thread_id: Option<String>,

    /// Specific checkpoint; `None` means the latest
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<String>,
}

impl CheckpointConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Config addressing the latest checkpoint of a thread
    pub fn for_thread(thread_id: impl Into<String>) -> Self {
        Self::new().with_thread_id(thread_id)
    }

    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_checkpoint_id(mut self, checkpoint_id: impl Into<String>) -> Self {
        self.checkpoint_id = Some(checkpoint_id.into());
        self
    }
}

/// A stored checkpoint with its addressing config and metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointTuple {
    pub config: CheckpointConfig,
    pub checkpoint: Checkpoint,
    pub metadata: CheckpointMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_config: Option<CheckpointConfig>,
}

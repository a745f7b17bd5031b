//! Configuration and result types of compiled graph execution

use crate::graph::NodeId;
use crate::interrupt::ResumeCommand;
use crate::retry::RetryPolicy;
use crate::stream::NodeFilter;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stategraph_checkpoint::{CheckpointMetadata, CheckpointTuple};
use std::time::Duration;

/// Default maximum number of super-steps per call
pub const DEFAULT_RECURSION_LIMIT: usize = 25;

/// Executor settings fixed at construction time
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorConfig {
    /// Upper bound for one attempt of one task; expiry fails the task
    pub node_timeout: Option<Duration>,

    /// Maximum number of super-steps a single call may run
    pub recursion_limit: usize,

    pub retry_policy: Option<RetryPolicy>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            node_timeout: None,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            retry_policy: None,
        }
    }
}

impl ExecutorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node_timeout(mut self, timeout: Duration) -> Self {
        self.node_timeout = Some(timeout);
        self
    }

    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }
}

/// Per-call settings
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub run_id: String,

    /// Patch resuming a suspended run
    pub resume: Option<ResumeCommand>,

    /// Nodes whose events reach the caller
    pub stream_nodes: NodeFilter,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl RunConfig {
    /// Config for a fresh run with a random id
    pub fn new() -> Self {
        Self::for_run(uuid::Uuid::new_v4().to_string())
    }

    pub fn for_run(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            resume: None,
            stream_nodes: NodeFilter::all(),
        }
    }

    pub fn with_resume(mut self, resume: ResumeCommand) -> Self {
        self.resume = Some(resume);
        self
    }

    /// Only stream events of `nodes` (terminal events always pass)
    pub fn with_stream_nodes<I, S>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        self.stream_nodes = NodeFilter::only(nodes);
        self
    }
}

/// How a call ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Interrupted { node: NodeId },
}

/// Result of [`CompiledGraph::invoke_with_config`](super::CompiledGraph::invoke_with_config)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub run_id: String,
    pub state: Value,
    pub status: RunStatus,
    /// Super-steps executed by this call
    pub steps: usize,
}

impl RunOutcome {
    pub fn is_interrupted(&self) -> bool {
        matches!(self.status, RunStatus::Interrupted { .. })
    }
}

/// A persisted point of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub values: Value,

    /// Nodes scheduled next; empty once the run completed
    pub next: Vec<NodeId>,

    /// Interrupt point the run is waiting at
    pub interrupted_before: Option<NodeId>,

    pub step: i64,
    pub checkpoint_id: String,
    pub created_at: DateTime<Utc>,
    pub metadata: CheckpointMetadata,
}

impl From<CheckpointTuple> for StateSnapshot {
    fn from(tuple: CheckpointTuple) -> Self {
        let cursor = &tuple.checkpoint.cursor;
        Self {
            next: cursor.next_nodes(),
            interrupted_before: cursor
                .is_interrupted()
                .then(|| cursor.interrupted_before.clone())
                .flatten(),
            step: tuple.metadata.step,
            checkpoint_id: tuple.checkpoint.id,
            created_at: tuple.checkpoint.ts,
            values: tuple.checkpoint.values,
            metadata: tuple.metadata,
        }
    }
}

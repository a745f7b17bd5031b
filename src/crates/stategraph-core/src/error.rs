//! Error types for graph construction and execution

use crate::state::StateError;
use serde::{Deserialize, Serialize};
use stategraph_checkpoint::CheckpointError;
use thiserror::Error;

/// Result type for graph operations
pub type Result<T> = std::result::Result<T, GraphError>;

/// One failed task of a super-step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchFailure {
    /// Node the task executed
    pub node: String,

    /// Fan-out index, for tasks spawned by a send
    pub branch: Option<usize>,

    /// Rendered error
    pub error: String,
}

fn summarize(failures: &[BranchFailure]) -> String {
    failures
        .iter()
        .map(|f| match f.branch {
            Some(b) => format!("{}[{}]: {}", f.node, b, f.error),
            None => format!("{}: {}", f.node, f.error),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors that can occur while building or running a graph
#[derive(Error, Debug)]
pub enum GraphError {
    /// Graph definition is invalid
    #[error("Graph validation failed: {0}")]
    Validation(String),

    /// A partial state named a field the schema does not declare
    #[error("Unknown state field '{field}'{}", .node.as_ref().map(|n| format!(" written by '{}'", n)).unwrap_or_default())]
    UnknownField { field: String, node: Option<String> },

    /// A reducer could not combine two values
    #[error("State error: {0}")]
    State(String),

    /// Node execution failed
    #[error("Node '{node}' execution failed: {error}")]
    NodeExecution { node: String, error: String },

    /// Tool lookup or invocation failed
    #[error("Tool '{tool}' dispatch failed: {error}")]
    ToolDispatch { tool: String, error: String },

    /// Language model call failed or returned unusable output
    #[error("Model error: {0}")]
    Model(String),

    /// Operation exceeded its time budget
    #[error("Operation '{operation}' timed out after {duration_ms}ms")]
    Timeout { operation: String, duration_ms: u64 },

    /// One or more tasks of a super-step failed; siblings ran to completion
    #[error("{} task(s) failed in step {step}: {}", .failures.len(), summarize(.failures))]
    BranchFailures { step: i64, failures: Vec<BranchFailure> },

    /// A router produced a destination the graph does not know
    #[error("Router of '{node}' returned unknown destination '{label}'")]
    InvalidRoute { node: String, label: String },

    /// Resume request does not fit the run's cursor
    #[error("Resume protocol violation: {0}")]
    ResumeProtocol(String),

    /// Execution suspended before an interrupt point
    #[error("Execution interrupted before node '{node}'")]
    Interrupted { node: String },

    /// Too many super-steps in one call
    #[error("Recursion limit of {limit} super-steps reached")]
    RecursionLimit { limit: usize },

    /// No live state for the run id
    #[error("Run not found: {0}")]
    RunNotFound(String),

    /// Checkpoint backend error
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl GraphError {
    /// Create a node execution error
    pub fn node_execution(node: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self::NodeExecution {
            node: node.into(),
            error: error.to_string(),
        }
    }

    /// Attribute a state error to the node whose write caused it
    pub fn from_state(error: StateError, node: Option<&str>) -> Self {
        match error {
            StateError::UnknownField { field } => Self::UnknownField {
                field,
                node: node.map(str::to_string),
            },
            other => Self::State(other.to_string()),
        }
    }

    /// Whether the error aborts the run structurally rather than failing a branch
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::UnknownField { .. }
                | Self::InvalidRoute { .. }
                | Self::ResumeProtocol(_)
                | Self::Validation(_)
                | Self::RecursionLimit { .. }
        )
    }
}

impl From<StateError> for GraphError {
    fn from(error: StateError) -> Self {
        Self::from_state(error, None)
    }
}

//! Routing results and dynamic fan-out
//!
//! A conditional edge's router returns a [`ConditionalEdgeResult`]: one label,
//! several labels (parallel successors), or a list of [`Send`]s. Each `Send`
//! becomes its own task in the next super-step, seeded with the shared state
//! overlaid with the send's argument.
//!
//! ```rust
//! use stategraph_core::{ConditionalEdgeResult, Send};
//! use serde_json::json;
//!
//! let analysts = vec!["economist", "engineer"];
//! let result: ConditionalEdgeResult = analysts
//!     .iter()
//!     .map(|a| Send::new("conduct_interview", json!({"analyst": a})))
//!     .collect::<Vec<_>>()
//!     .into();
//! assert!(matches!(result, ConditionalEdgeResult::Sends(ref s) if s.len() == 2));
//! ```

use crate::graph::NodeId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One fan-out branch: run `node` with `arg` overlaid on the shared state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Send {
    pub node: NodeId,
    pub arg: Value,
}

impl Send {
    pub fn new(node: impl Into<NodeId>, arg: Value) -> Self {
        Self {
            node: node.into(),
            arg,
        }
    }
}

/// What a router decided.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionalEdgeResult {
    /// A single label
    Node(String),
    /// Several labels, all scheduled in the next super-step
    Nodes(Vec<String>),
    /// Dynamic fan-out
    Sends(Vec<Send>),
}

impl From<&str> for ConditionalEdgeResult {
    fn from(label: &str) -> Self {
        Self::Node(label.to_string())
    }
}

impl From<String> for ConditionalEdgeResult {
    fn from(label: String) -> Self {
        Self::Node(label)
    }
}

impl From<Vec<&str>> for ConditionalEdgeResult {
    fn from(labels: Vec<&str>) -> Self {
        Self::Nodes(labels.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<String>> for ConditionalEdgeResult {
    fn from(labels: Vec<String>) -> Self {
        Self::Nodes(labels)
    }
}

impl From<Vec<Send>> for ConditionalEdgeResult {
    fn from(sends: Vec<Send>) -> Self {
        Self::Sends(sends)
    }
}

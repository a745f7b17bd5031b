//! Human-in-the-loop interrupt points
//!
//! A compiled graph can be told to stop *before* entering certain nodes. The
//! run then suspends with its cursor pointing at that node until the caller
//! resumes it with a [`ResumeCommand`]: a state patch plus the node the patch
//! is attributed to.
//!
//! Two attributions are accepted:
//!
//! - the suspended node itself: the patch is that node's output and the node
//!   is skipped (typical for no-op "wait for human" placeholders);
//! - a direct predecessor of the suspended node: the patch is recorded as the
//!   predecessor's output and the suspended node then executes.

use crate::graph::NodeId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Nodes the executor must not enter without external input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptConfig {
    pub interrupt_before: Vec<NodeId>,
}

impl InterruptConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interrupt_before<I, S>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        self.interrupt_before.extend(nodes.into_iter().map(Into::into));
        self
    }

    pub fn should_interrupt_before(&self, node: &str) -> bool {
        self.interrupt_before.iter().any(|n| n == node)
    }

    pub fn is_empty(&self) -> bool {
        self.interrupt_before.is_empty()
    }
}

/// External input resuming a suspended run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeCommand {
    /// Partial state to merge
    pub patch: Value,

    /// Node the patch is attributed to
    pub as_node: NodeId,
}

impl ResumeCommand {
    pub fn new(patch: Value, as_node: impl Into<NodeId>) -> Self {
        Self {
            patch,
            as_node: as_node.into(),
        }
    }
}

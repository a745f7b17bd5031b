//! Events produced while a run executes
//!
//! The stream of a run is a sequence of [`StreamEvent::Update`]s, one per
//! node execution, in task enumeration order within a super-step. Sub-graph
//! internal updates carry a `namespace` naming the parent node and branch.
//! They are delivered while the branch runs: the first branch streams live,
//! later branches are held back until every earlier branch finished. The stream ends with either
//! [`StreamEvent::Interrupted`] or [`StreamEvent::Completed`], or with an
//! error item when the run aborts.

use crate::error::Result;
use crate::graph::NodeId;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::pin::Pin;
use tokio::sync::mpsc;

/// One event of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A node finished and its partial state was merged
    Update {
        node: NodeId,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        namespace: Vec<String>,
        update: Value,
    },

    /// A task of the current super-step failed
    TaskFailed {
        node: NodeId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        branch: Option<usize>,
        error: String,
    },

    /// The run suspended before `node`
    Interrupted { node: NodeId },

    /// The run reached a terminal state
    Completed { state: Value },
}

impl StreamEvent {
    pub fn update(node: impl Into<NodeId>, update: Value) -> Self {
        Self::Update {
            node: node.into(),
            namespace: Vec::new(),
            update,
        }
    }

    /// Node the event refers to
    pub fn node(&self) -> Option<&str> {
        match self {
            Self::Update { node, .. } | Self::TaskFailed { node, .. } | Self::Interrupted { node } => {
                Some(node)
            }
            Self::Completed { .. } => None,
        }
    }

    /// `(node, partial_state)` view of an update event
    pub fn as_update(&self) -> Option<(&str, &Value)> {
        match self {
            Self::Update { node, update, .. } => Some((node, update)),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Interrupted { .. } | Self::Completed { .. })
    }

    /// Prefix the namespace of an update with `segment`
    pub(crate) fn nested_under(mut self, segment: &str) -> Self {
        if let Self::Update { namespace, .. } = &mut self {
            namespace.insert(0, segment.to_string());
        }
        self
    }
}

/// Stream of run events
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// Channel a nested run reports its internal events on
pub type NestedEvents = mpsc::UnboundedSender<StreamEvent>;

/// Restricts node events to a set of "nodes to display".
///
/// Terminal events always pass.
#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    nodes: Option<HashSet<NodeId>>,
}

impl NodeFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn only<I, S>(nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        Self {
            nodes: Some(nodes.into_iter().map(Into::into).collect()),
        }
    }

    pub fn passes(&self, event: &StreamEvent) -> bool {
        match (&self.nodes, event) {
            (None, _) => true,
            (Some(_), e) if e.is_terminal() => true,
            (Some(nodes), e) => e.node().map(|n| nodes.contains(n)).unwrap_or(true),
        }
    }
}

/// Where a run sends its events.
#[derive(Debug)]
pub(crate) enum EventSink {
    /// Events are dropped
    Discard,
    /// Events go to the parent task, used by nested runs
    Forward(NestedEvents),
    /// Events go to a streaming consumer
    Channel(mpsc::Sender<Result<StreamEvent>>),
}

impl EventSink {
    pub(crate) async fn emit(&mut self, event: StreamEvent) {
        match self {
            Self::Discard => {}
            Self::Forward(tx) => {
                if !event.is_terminal() {
                    let _ = tx.send(event);
                }
            }
            Self::Channel(tx) => {
                // A dropped receiver only means nobody is listening any more
                let _ = tx.send(Ok(event)).await;
            }
        }
    }
}

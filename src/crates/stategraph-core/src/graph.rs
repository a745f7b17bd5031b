//! Graph definition: nodes, edges and entry points
//!
//! A [`Graph`] is the validated, immutable structure a
//! [`CompiledGraph`](crate::CompiledGraph) executes. It is normally built
//! through [`StateGraph`](crate::StateGraph) rather than by hand.
//!
//! # Edges
//!
//! - [`Edge::Direct`]: `A → B`, fires whenever `A` completes.
//! - [`Edge::Conditional`]: `A → router(state) → {label: node}`; the router may
//!   pick one label, several labels, or return [`Send`](crate::Send)s for a
//!   dynamic fan-out.
//! - [`JoinEdge`]: `{A, B, C} → D`, fires once every source completed.
//!
//! Routers are evaluated after the whole super-step merged, so they observe
//! every write of the step that just finished.

use crate::error::{GraphError, Result};
use crate::send::ConditionalEdgeResult;
use crate::stream::NestedEvents;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Node identifier
pub type NodeId = String;

/// Virtual node marking where execution begins
pub const START: &str = "__start__";

/// Virtual node marking a terminal destination
pub const END: &str = "__end__";

/// Future returned by a node function
pub type NodeFuture = Pin<Box<dyn Future<Output = Result<Value>> + Send>>;

/// A node function: full state in, partial state out
pub type NodeExecutor = Arc<dyn Fn(Value) -> NodeFuture + Send + Sync>;

/// A router: state in, routing decision out
pub type RouterFn = Arc<dyn Fn(&Value) -> ConditionalEdgeResult + Send + Sync>;

/// Outgoing edge of a node
#[derive(Clone)]
pub enum Edge {
    /// Unconditional edge to a specific node
    Direct(NodeId),

    /// Router-selected destinations.
    ///
    /// `branches` maps router labels to nodes. An empty map means labels are
    /// node names.
    Conditional {
        router: RouterFn,
        branches: HashMap<String, NodeId>,
    },
}

impl std::fmt::Debug for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Edge::Direct(node_id) => f.debug_tuple("Direct").field(node_id).finish(),
            Edge::Conditional { branches, .. } => f
                .debug_struct("Conditional")
                .field("router", &"<function>")
                .field("branches", branches)
                .finish(),
        }
    }
}

impl Edge {
    /// Every node this edge can lead to (END excluded)
    pub fn targets(&self) -> Vec<&str> {
        match self {
            Edge::Direct(to) => vec![to.as_str()],
            Edge::Conditional { branches, .. } => branches.values().map(String::as_str).collect(),
        }
        .into_iter()
        .filter(|t| *t != END)
        .collect()
    }
}

/// Barrier edge: `target` runs once all `sources` completed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinEdge {
    pub sources: BTreeSet<NodeId>,
    pub target: NodeId,
}

/// Result of running a compiled graph as a node of another graph
#[derive(Debug, Clone, Default)]
pub struct SubgraphOutput {
    /// Final state of the nested run
    pub state: Value,

    /// Net writes: every internal update folded with the child's reducers
    pub writes: Value,
}

/// A compiled graph usable as a node.
///
/// Nested runs have no interrupts and no persistence: they run to completion
/// inside the parent task. Internal events are sent on `events` as they
/// happen; the parent adds its namespace segment.
pub trait SubgraphExecutor: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the graph declares interrupt points
    fn has_interrupts(&self) -> bool;

    fn run_nested(
        &self,
        input: Value,
        events: NestedEvents,
    ) -> Pin<Box<dyn Future<Output = Result<SubgraphOutput>> + Send>>;
}

/// What a node does when scheduled
#[derive(Clone)]
pub enum NodeKind {
    Function(NodeExecutor),

    /// Produces no state change; its outgoing edges still fire
    Noop,

    /// A compiled graph run to completion per task.
    ///
    /// `outputs` restricts which child fields flow back to the parent.
    Subgraph {
        graph: Arc<dyn SubgraphExecutor>,
        outputs: Option<Vec<String>>,
    },
}

impl std::fmt::Debug for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeKind::Function(_) => f.write_str("Function(<function>)"),
            NodeKind::Noop => f.write_str("Noop"),
            NodeKind::Subgraph { graph, outputs } => f
                .debug_struct("Subgraph")
                .field("graph", &graph.name())
                .field("outputs", outputs)
                .finish(),
        }
    }
}

/// A node record
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub name: NodeId,
    pub kind: NodeKind,
}

impl NodeSpec {
    pub fn is_noop(&self) -> bool {
        matches!(self.kind, NodeKind::Noop)
    }
}

/// Validated graph structure
#[derive(Debug, Clone, Default)]
pub struct Graph {
    pub nodes: HashMap<NodeId, NodeSpec>,

    /// Nodes in insertion order
    pub node_order: Vec<NodeId>,

    /// Outgoing edges by source, in declaration order
    pub edges: HashMap<NodeId, Vec<Edge>>,

    pub joins: Vec<JoinEdge>,

    /// Nodes scheduled in the first super-step
    pub entries: Vec<NodeId>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, node: &str) -> bool {
        self.nodes.contains_key(node)
    }

    pub fn node(&self, node: &str) -> Option<&NodeSpec> {
        self.nodes.get(node)
    }

    pub fn edges_from(&self, node: &str) -> &[Edge] {
        self.edges.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether `from` has an edge (of any kind) that can lead to `to`
    pub fn is_predecessor(&self, from: &str, to: &str) -> bool {
        self.edges_from(from).iter().any(|e| e.targets().contains(&to))
            || self
                .joins
                .iter()
                .any(|j| j.target == to && j.sources.contains(from))
    }

    pub fn validate(&self) -> Result<()> {
        if self.entries.is_empty() {
            return Err(GraphError::Validation(
                "graph has no entry point; add an edge from START".to_string(),
            ));
        }
        for entry in &self.entries {
            if !self.contains(entry) {
                return Err(GraphError::Validation(format!(
                    "entry point '{}' does not exist",
                    entry
                )));
            }
        }

        for (from, edges) in &self.edges {
            if !self.contains(from) {
                return Err(GraphError::Validation(format!("edge source '{}' does not exist", from)));
            }
            for edge in edges {
                for to in edge.targets() {
                    if !self.contains(to) {
                        return Err(GraphError::Validation(format!(
                            "edge target '{}' (from '{}') does not exist",
                            to, from
                        )));
                    }
                }
            }
        }

        let mut join_targets = BTreeSet::new();
        for join in &self.joins {
            if join.sources.is_empty() {
                return Err(GraphError::Validation(format!(
                    "join into '{}' has no sources",
                    join.target
                )));
            }
            if !join_targets.insert(join.target.as_str()) {
                return Err(GraphError::Validation(format!(
                    "node '{}' has more than one join edge",
                    join.target
                )));
            }
            for node in join.sources.iter().chain(std::iter::once(&join.target)) {
                if !self.contains(node) {
                    return Err(GraphError::Validation(format!(
                        "join references unknown node '{}'",
                        node
                    )));
                }
            }
        }

        Ok(())
    }
}

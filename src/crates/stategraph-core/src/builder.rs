//! Fluent builder for graph definitions
//!
//! ```rust
//! use stategraph_core::{StateGraph, StateSchema, END, START};
//! use serde_json::json;
//!
//! # tokio_test_block(async {
//! let mut graph = StateGraph::new(StateSchema::new().append("log"));
//! graph.add_node("a", |_state| async move { Ok(json!({"log": ["a"]})) });
//! graph.add_node("b", |_state| async move { Ok(json!({"log": ["b"]})) });
//! graph.add_edge(START, "a");
//! graph.add_edge("a", "b");
//! graph.add_edge("b", END);
//!
//! let compiled = graph.compile().unwrap();
//! let state = compiled.invoke(json!({})).await.unwrap();
//! assert_eq!(state["log"], json!(["a", "b"]));
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```
//!
//! Structural mistakes (duplicate node names, dangling edges, a sub-graph with
//! interrupt points) are collected while building and reported by
//! [`StateGraph::compile`].

use crate::compiled::CompiledGraph;
use crate::error::{GraphError, Result};
use crate::graph::{Edge, Graph, JoinEdge, NodeExecutor, NodeId, NodeKind, NodeSpec, SubgraphExecutor, END, START};
use crate::interrupt::InterruptConfig;
use crate::send::{ConditionalEdgeResult, Send};
use crate::state::StateSchema;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Builder for a state graph
pub struct StateGraph {
    schema: StateSchema,
    graph: Graph,
    interrupts: InterruptConfig,
    name: String,
    errors: Vec<String>,
}

impl StateGraph {
    pub fn new(schema: StateSchema) -> Self {
        Self {
            schema,
            graph: Graph::new(),
            interrupts: InterruptConfig::new(),
            name: "graph".to_string(),
            errors: Vec::new(),
        }
    }

    /// Name used in logs and for nested runs
    pub fn set_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = name.into();
        self
    }

    pub fn schema(&self) -> &StateSchema {
        &self.schema
    }

    fn insert_node(&mut self, id: NodeId, kind: NodeKind) -> &mut Self {
        if id == START || id == END {
            self.errors.push(format!("'{}' is a reserved node name", id));
            return self;
        }
        if self.graph.nodes.contains_key(&id) {
            self.errors.push(format!("node '{}' is defined twice", id));
            return self;
        }
        self.graph.node_order.push(id.clone());
        self.graph.nodes.insert(id.clone(), NodeSpec { name: id, kind });
        self
    }

    /// Add a node running `f(state) -> partial_state`
    pub fn add_node<F, Fut>(&mut self, id: impl Into<NodeId>, f: F) -> &mut Self
    where
        F: Fn(Value) -> Fut + std::marker::Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + std::marker::Send + 'static,
    {
        let executor: NodeExecutor = Arc::new(move |state| Box::pin(f(state)));
        self.insert_node(id.into(), NodeKind::Function(executor))
    }

    /// Add a node that does nothing, typically a "wait for human" interrupt point
    pub fn add_noop_node(&mut self, id: impl Into<NodeId>) -> &mut Self {
        self.insert_node(id.into(), NodeKind::Noop)
    }

    /// Add a compiled graph as a node.
    ///
    /// Every child field that is also a parent field flows back to the parent.
    pub fn add_subgraph(&mut self, id: impl Into<NodeId>, subgraph: CompiledGraph) -> &mut Self {
        self.insert_subgraph(id.into(), Arc::new(subgraph), None)
    }

    /// Add a compiled graph as a node, keeping only `outputs` of its writes
    pub fn add_subgraph_with_outputs<I, S>(
        &mut self,
        id: impl Into<NodeId>,
        subgraph: CompiledGraph,
        outputs: I,
    ) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let outputs = outputs.into_iter().map(Into::into).collect();
        self.insert_subgraph(id.into(), Arc::new(subgraph), Some(outputs))
    }

    fn insert_subgraph(
        &mut self,
        id: NodeId,
        graph: Arc<dyn SubgraphExecutor>,
        outputs: Option<Vec<String>>,
    ) -> &mut Self {
        if graph.has_interrupts() {
            self.errors.push(format!(
                "sub-graph '{}' (node '{}') declares interrupt points; only the outermost graph may interrupt",
                graph.name(),
                id
            ));
            return self;
        }
        if let Some(outputs) = &outputs {
            for field in outputs {
                if !self.schema.contains(field) {
                    self.errors.push(format!(
                        "sub-graph node '{}' outputs undeclared field '{}'",
                        id, field
                    ));
                }
            }
        }
        self.insert_node(id, NodeKind::Subgraph { graph, outputs })
    }

    /// Add `from → to`; an edge from START makes `to` an entry node
    pub fn add_edge(&mut self, from: impl Into<NodeId>, to: impl Into<NodeId>) -> &mut Self {
        let from = from.into();
        let to = to.into();
        if from == START {
            return self.set_entry(to);
        }
        self.graph.edges.entry(from).or_default().push(Edge::Direct(to));
        self
    }

    /// Schedule `node` in the first super-step
    pub fn set_entry(&mut self, node: impl Into<NodeId>) -> &mut Self {
        let node = node.into();
        if !self.graph.entries.contains(&node) {
            self.graph.entries.push(node);
        }
        self
    }

    /// Add a router-driven edge.
    ///
    /// `branches` maps router labels to nodes; pass an empty list to let the
    /// router return node names directly.
    pub fn add_conditional_edge<F, R, I, K, V>(
        &mut self,
        from: impl Into<NodeId>,
        router: F,
        branches: I,
    ) -> &mut Self
    where
        F: Fn(&Value) -> R + std::marker::Send + Sync + 'static,
        R: Into<ConditionalEdgeResult>,
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<NodeId>,
    {
        let branches: HashMap<String, NodeId> = branches
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let edge = Edge::Conditional {
            router: Arc::new(move |state| router(state).into()),
            branches,
        };
        self.graph.edges.entry(from.into()).or_default().push(edge);
        self
    }

    /// Add a dynamic fan-out: one task per [`Send`] returned by `fanout`
    pub fn add_fanout<F>(&mut self, from: impl Into<NodeId>, fanout: F) -> &mut Self
    where
        F: Fn(&Value) -> Vec<Send> + std::marker::Send + Sync + 'static,
    {
        self.add_conditional_edge(from, move |state: &Value| ConditionalEdgeResult::Sends(fanout(state)), Vec::<(String, String)>::new())
    }

    /// `target` runs once every node of `sources` has completed
    pub fn add_join_edge<I, S>(&mut self, sources: I, target: impl Into<NodeId>) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        self.graph.joins.push(JoinEdge {
            sources: sources.into_iter().map(Into::into).collect(),
            target: target.into(),
        });
        self
    }

    /// Suspend runs before entering any of `nodes`
    pub fn interrupt_before<I, S>(&mut self, nodes: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        self.interrupts = std::mem::take(&mut self.interrupts).with_interrupt_before(nodes);
        self
    }

    /// Validate and freeze the graph
    pub fn compile(self) -> Result<CompiledGraph> {
        if let Some(error) = self.errors.first() {
            return Err(GraphError::Validation(error.clone()));
        }
        self.graph.validate()?;
        for node in &self.interrupts.interrupt_before {
            if !self.graph.contains(node) {
                return Err(GraphError::Validation(format!(
                    "interrupt point '{}' is not a node",
                    node
                )));
            }
        }

        tracing::debug!(
            graph = %self.name,
            nodes = self.graph.nodes.len(),
            entries = ?self.graph.entries,
            "Compiled graph"
        );

        Ok(CompiledGraph::new(
            self.name,
            self.graph,
            self.schema,
            self.interrupts,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> StateSchema {
        StateSchema::new().append("log")
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let mut graph = StateGraph::new(schema());
        graph.add_noop_node("a");
        graph.add_noop_node("a");
        graph.add_edge(START, "a");
        assert!(matches!(graph.compile(), Err(GraphError::Validation(msg)) if msg.contains("twice")));
    }

    #[test]
    fn test_unknown_interrupt_point_rejected() {
        let mut graph = StateGraph::new(schema());
        graph.add_noop_node("a");
        graph.add_edge(START, "a");
        graph.interrupt_before(["b"]);
        assert!(graph.compile().is_err());
    }

    #[test]
    fn test_subgraph_with_interrupts_rejected() {
        let mut child = StateGraph::new(schema());
        child.add_noop_node("wait");
        child.add_edge(START, "wait");
        child.interrupt_before(["wait"]);
        let child = child.compile().unwrap();

        let mut parent = StateGraph::new(schema());
        parent.add_subgraph("child", child);
        parent.add_edge(START, "child");
        match parent.compile() {
            Err(GraphError::Validation(msg)) => assert!(msg.contains("interrupt")),
            other => panic!("expected validation error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_entries_from_start_edges() {
        let mut graph = StateGraph::new(schema());
        graph.add_node("a", |_| async { Ok(json!({})) });
        graph.add_node("b", |_| async { Ok(json!({})) });
        graph.add_edge(START, "a").add_edge(START, "b").add_edge(START, "a");
        let compiled = graph.compile().unwrap();
        assert_eq!(compiled.graph().entries, vec!["a".to_string(), "b".to_string()]);
    }
}

//! # stategraph-core
//!
//! Graph-structured workflow orchestration over a shared, reducer-typed state.
//!
//! ## Concepts
//!
//! - **State**: a JSON object whose fields are declared in a [`StateSchema`],
//!   each with a reducer (overwrite, append or string-concat). Nodes return
//!   partial states; the executor merges them, rejecting undeclared fields.
//! - **Nodes**: async functions `state -> partial_state`, no-op placeholders,
//!   or whole compiled graphs ([`StateGraph::add_subgraph`]).
//! - **Edges**: plain, conditional (one or many destinations), dynamic
//!   fan-out with [`Send`], and join edges.
//! - **Super-steps**: all tasks scheduled together run concurrently against
//!   the same snapshot; their outputs merge in task order after the barrier.
//! - **Checkpoints**: after every super-step the state and cursor are stored
//!   by a [`CheckpointSaver`], keyed by run id.
//! - **Interrupts**: a run can suspend before chosen nodes and resume with a
//!   patch attributed to a node.
//! - **Streaming**: `(node, partial_state)` events as they are merged.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use stategraph_core::{StateGraph, StateSchema, END, START};
//! use serde_json::json;
//!
//! let mut graph = StateGraph::new(StateSchema::new().overwrite("topic").append("sections"));
//! graph.add_node("plan", |state| async move {
//!     Ok(json!({"sections": [format!("About {}", state["topic"])]}))
//! });
//! graph.add_edge(START, "plan");
//! graph.add_edge("plan", END);
//!
//! let state = graph.compile()?.invoke(json!({"topic": "wind"})).await?;
//! ```

pub mod builder;
pub mod compiled;
pub mod error;
pub mod graph;
pub mod interrupt;
pub mod llm;
pub mod messages;
pub mod retry;
pub mod send;
pub mod state;
pub mod store;
pub mod stream;
pub mod tool;

pub use builder::StateGraph;
pub use compiled::{CompiledGraph, ExecutorConfig, RunConfig, RunOutcome, RunStatus, StateSnapshot};
pub use error::{BranchFailure, GraphError, Result};
pub use graph::{Edge, Graph, JoinEdge, NodeId, NodeKind, NodeSpec, SubgraphExecutor, SubgraphOutput, END, START};
pub use interrupt::{InterruptConfig, ResumeCommand};
pub use llm::{extract_json, json_candidates, structured_output, ChatConfig, ChatModel, ChatRequest, ChatResponse, UsageMetadata};
pub use messages::{buffer_string, messages_from_state, messages_update, Message, Role};
pub use retry::RetryPolicy;
pub use send::{ConditionalEdgeResult, Send};
pub use state::{
    overlay, AppendReducer, ConcatReducer, OverwriteReducer, Reducer, StateError, StateSchema,
};
pub use store::StateStore;
pub use stream::{EventStream, NestedEvents, NodeFilter, StreamEvent};
pub use tool::{tools_condition, Tool, ToolCall, ToolError, ToolNode, ToolRegistry, ToolResult};

pub use stategraph_checkpoint::{
    CheckpointConfig, CheckpointSaver, CheckpointSource, InMemoryCheckpointSaver, SqliteCheckpointSaver,
};

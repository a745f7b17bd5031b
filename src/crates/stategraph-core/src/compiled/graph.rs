//! CompiledGraph struct and constructors

use super::types::ExecutorConfig;
use crate::error::Result;
use crate::graph::{Graph, SubgraphExecutor, SubgraphOutput};
use crate::interrupt::InterruptConfig;
use crate::state::StateSchema;
use crate::store::StateStore;
use crate::stream::{EventSink, NestedEvents};
use serde_json::Value;
use stategraph_checkpoint::{CheckpointSaver, Cursor, InMemoryCheckpointSaver};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// An executable graph.
///
/// Cloning is cheap: the definition, the live state store and the
/// checkpointer are shared between clones.
#[derive(Clone)]
pub struct CompiledGraph {
    pub(crate) name: String,
    pub(crate) graph: Arc<Graph>,
    pub(crate) schema: Arc<StateSchema>,
    pub(crate) store: StateStore,
    pub(crate) checkpointer: Arc<dyn CheckpointSaver>,
    pub(crate) interrupts: InterruptConfig,
    pub(crate) config: ExecutorConfig,
}

impl CompiledGraph {
    pub(crate) fn new(name: String, graph: Graph, schema: StateSchema, interrupts: InterruptConfig) -> Self {
        let schema = Arc::new(schema);
        Self {
            name,
            graph: Arc::new(graph),
            store: StateStore::new(schema.clone()),
            schema,
            checkpointer: Arc::new(InMemoryCheckpointSaver::new()),
            interrupts,
            config: ExecutorConfig::default(),
        }
    }

    /// Persist runs with `saver` instead of the process-local default
    pub fn with_checkpointer(mut self, saver: Arc<dyn CheckpointSaver>) -> Self {
        self.checkpointer = saver;
        self
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn schema(&self) -> &StateSchema {
        &self.schema
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn interrupts(&self) -> &InterruptConfig {
        &self.interrupts
    }

    pub fn checkpointer(&self) -> Arc<dyn CheckpointSaver> {
        self.checkpointer.clone()
    }

    /// Run to completion as a node of a parent graph
    async fn run_nested_inner(&self, input: Value, events: NestedEvents) -> Result<SubgraphOutput> {
        let run_id = format!("{}:{}", self.name, uuid::Uuid::new_v4());
        let state = self.schema.initial_state(&self.schema.project(&input))?;
        self.store.insert(&run_id, state).await;

        let mut sink = EventSink::Forward(events);
        let cursor = Cursor::new(self.entry_tasks());
        let result = self.run_loop(&run_id, cursor, -1, &mut sink, false).await;
        self.store.remove(&run_id).await;

        let exit = result?;
        Ok(SubgraphOutput {
            state: exit.state,
            writes: exit.writes,
        })
    }
}

impl std::fmt::Debug for CompiledGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledGraph")
            .field("name", &self.name)
            .field("graph", &self.graph)
            .field("schema", &self.schema)
            .field("interrupts", &self.interrupts)
            .field("config", &self.config)
            .finish()
    }
}

impl SubgraphExecutor for CompiledGraph {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_interrupts(&self) -> bool {
        !self.interrupts.is_empty()
    }

    fn run_nested(
        &self,
        input: Value,
        events: NestedEvents,
    ) -> Pin<Box<dyn Future<Output = Result<SubgraphOutput>> + Send>> {
        let graph = self.clone();
        Box::pin(async move { graph.run_nested_inner(input, events).await })
    }
}

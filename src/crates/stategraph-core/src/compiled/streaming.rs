//! Entry points: invoke, stream and start_or_resume

use super::graph::CompiledGraph;
use super::types::{RunConfig, RunOutcome, RunStatus};
use crate::error::{GraphError, Result};
use crate::interrupt::ResumeCommand;
use crate::stream::{EventSink, EventStream, NodeFilter, StreamEvent};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{error, info};

impl CompiledGraph {
    /// Run a fresh run to completion and return its final state.
    ///
    /// A run that stops at an interrupt point yields
    /// [`GraphError::Interrupted`]; use [`invoke_with_config`](Self::invoke_with_config)
    /// with a known run id to resume it later.
    ///
    /// # Arguments
    ///
    /// * `input` - Initial state; every field must be declared in the schema
    ///
    /// # Returns
    ///
    /// Final state once no task is left
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use stategraph_core::{StateGraph, StateSchema, END, START};
    /// use serde_json::json;
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let mut graph = StateGraph::new(StateSchema::new().overwrite("topic").append("sections"));
    /// graph.add_node("outline", |state| async move {
    ///     Ok(json!({"sections": [format!("Outline of {}", state["topic"])]}))
    /// });
    /// graph.add_edge(START, "outline");
    /// graph.add_edge("outline", END);
    ///
    /// let state = graph.compile()?.invoke(json!({"topic": "wind"})).await?;
    /// assert_eq!(state["sections"].as_array().map(Vec::len), Some(1));
    /// # Ok(())
    /// # }
    /// ```
    pub async fn invoke(&self, input: Value) -> Result<Value> {
        let outcome = self.invoke_with_config(Some(input), RunConfig::new()).await?;
        match outcome.status {
            RunStatus::Completed => Ok(outcome.state),
            RunStatus::Interrupted { node } => Err(GraphError::Interrupted { node }),
        }
    }

    /// Start, continue or resume the run named by `config`
    pub async fn invoke_with_config(&self, input: Option<Value>, config: RunConfig) -> Result<RunOutcome> {
        self.execute(input, config, &mut EventSink::Discard).await
    }

    #[tracing::instrument(skip(self, input, config, sink), fields(graph = %self.name, run_id = %config.run_id))]
    pub(crate) async fn execute(
        &self,
        input: Option<Value>,
        config: RunConfig,
        sink: &mut EventSink,
    ) -> Result<RunOutcome> {
        let run_id = config.run_id;
        let prepared = self.prepare(&run_id, input, config.resume.as_ref()).await?;

        let result = self
            .run_loop(&run_id, prepared.cursor, prepared.step, sink, true)
            .await;
        self.store.remove(&run_id).await;

        let exit = match result {
            Ok(exit) => exit,
            Err(e) => {
                error!(run_id = %run_id, error = %e, "Run aborted");
                return Err(e);
            }
        };

        if exit.status == RunStatus::Completed {
            info!(run_id = %run_id, steps = exit.steps, "Run completed");
            sink.emit(StreamEvent::Completed {
                state: exit.state.clone(),
            })
            .await;
        }

        Ok(RunOutcome {
            run_id,
            state: exit.state,
            status: exit.status,
            steps: exit.steps,
        })
    }

    /// Stream the events of a fresh run
    pub fn stream(&self, input: Value) -> EventStream {
        self.stream_with_config(Some(input), RunConfig::new())
    }

    /// Stream the events of the run named by `config`.
    ///
    /// Node events are filtered by `config.stream_nodes`. The stream ends with
    /// [`StreamEvent::Interrupted`], [`StreamEvent::Completed`], or an error.
    ///
    /// # Arguments
    ///
    /// * `input` - Initial state for a new run or another turn; `None` to continue
    /// * `config` - Run id, optional resume command and node filter
    ///
    /// # Returns
    ///
    /// An [`EventStream`] fed by a spawned task. Updates of sub-graph branches
    /// arrive while the branch runs, in task enumeration order.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let mut events = compiled.stream_with_config(
    ///     Some(json!({"topic": "geothermal"})),
    ///     RunConfig::for_run("run-1").with_stream_nodes(["finalize_report"]),
    /// );
    /// while let Some(event) = events.next().await {
    ///     println!("{:?}", event?);
    /// }
    /// ```
    pub fn stream_with_config(&self, input: Option<Value>, config: RunConfig) -> EventStream {
        let (tx, mut rx) = mpsc::channel(100);
        let filter = config.stream_nodes.clone();
        let graph = self.clone();

        let errors = tx.clone();
        tokio::spawn(async move {
            let mut sink = EventSink::Channel(tx);
            if let Err(e) = graph.execute(input, config, &mut sink).await {
                let _ = errors.send(Err(e)).await;
            }
        });

        Box::pin(async_stream::stream! {
            while let Some(item) = rx.recv().await {
                match &item {
                    Ok(event) if !filter.passes(event) => continue,
                    _ => yield item,
                }
            }
        })
    }

    /// Single entry point for callers driving a run turn by turn.
    ///
    /// - `input` starts a run (or another turn of a finished one);
    /// - `patch` with `as_node` resumes a run suspended at an interrupt point;
    /// - neither continues the run from its last checkpoint.
    ///
    /// A patch without a node (or a node without a patch) is a
    /// [`GraphError::ResumeProtocol`] error, reported through the stream.
    ///
    /// # Arguments
    ///
    /// * `run_id` - Run to start or pick up
    /// * `input` - New input, exclusive with `patch`
    /// * `patch` - Partial state applied as the output of `as_node`
    /// * `as_node` - Node the patch is attributed to
    /// * `stream_nodes` - Nodes whose updates reach the caller
    ///
    /// # Returns
    ///
    /// The run's [`EventStream`]
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// // First turn stops before `user_input`
    /// let events = compiled.start_or_resume("run-1", Some(json!({})), None, None, NodeFilter::all());
    ///
    /// // The user's reply is recorded as the output of `agent`
    /// let events = compiled.start_or_resume(
    ///     "run-1",
    ///     None,
    ///     Some(json!({"messages": [Message::human("renewable energy")]})),
    ///     Some("agent".to_string()),
    ///     NodeFilter::only(["create_analysts", "finalize_report"]),
    /// );
    /// ```
    pub fn start_or_resume(
        &self,
        run_id: impl Into<String>,
        input: Option<Value>,
        patch: Option<Value>,
        as_node: Option<String>,
        stream_nodes: NodeFilter,
    ) -> EventStream {
        let mut config = RunConfig::for_run(run_id);
        config.stream_nodes = stream_nodes;

        let resume = match (patch, as_node) {
            (Some(patch), Some(node)) => Some(ResumeCommand::new(patch, node)),
            (None, None) => None,
            (Some(_), None) => {
                return error_stream(GraphError::ResumeProtocol(
                    "a resume patch needs the node it is attributed to".to_string(),
                ))
            }
            (None, Some(node)) => {
                return error_stream(GraphError::ResumeProtocol(format!(
                    "resuming as '{}' requires a patch",
                    node
                )))
            }
        };
        config.resume = resume;
        self.stream_with_config(input, config)
    }
}

fn error_stream(error: GraphError) -> EventStream {
    Box::pin(futures::stream::once(async move { Err(error) }))
}

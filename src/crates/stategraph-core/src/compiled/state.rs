//! Run preparation, state inspection and external state updates
//!
//! Every check here happens before the first write: a rejected call leaves
//! both the checkpoint history and the live state untouched.

use super::execution::NextTasks;
use super::graph::CompiledGraph;
use super::types::StateSnapshot;
use crate::error::{GraphError, Result};
use crate::interrupt::ResumeCommand;
use futures::StreamExt;
use serde_json::Value;
use stategraph_checkpoint::{
    CheckpointConfig, CheckpointMetadata, CheckpointSource, CheckpointTuple, Cursor,
};
use tracing::{debug, info};

/// Where the loop starts for a call
pub(crate) struct Prepared {
    pub(crate) cursor: Cursor,
    pub(crate) step: i64,
}

impl CompiledGraph {
    async fn latest(&self, run_id: &str) -> Result<Option<CheckpointTuple>> {
        Ok(self
            .checkpointer
            .get_tuple(&CheckpointConfig::for_thread(run_id))
            .await?)
    }

    /// Snapshot of the latest checkpoint of a run
    pub async fn get_state(&self, run_id: &str) -> Result<StateSnapshot> {
        self.latest(run_id)
            .await?
            .map(StateSnapshot::from)
            .ok_or_else(|| GraphError::RunNotFound(run_id.to_string()))
    }

    /// Every checkpoint of a run, newest first
    pub async fn state_history(&self, run_id: &str) -> Result<Vec<StateSnapshot>> {
        let mut stream = self
            .checkpointer
            .list(&CheckpointConfig::for_thread(run_id), None)
            .await?;
        let mut snapshots = Vec::new();
        while let Some(tuple) = stream.next().await {
            snapshots.push(StateSnapshot::from(tuple?));
        }
        Ok(snapshots)
    }

    /// Apply a patch to a suspended run, attributed to `as_node`.
    ///
    /// If `as_node` is the node the run is suspended before, the patch is that
    /// node's output: the node is skipped and its outgoing edges fire. If
    /// `as_node` is a direct predecessor, the patch is recorded as the
    /// predecessor's output and the suspended node runs on the next call.
    /// Anything else is a [`GraphError::ResumeProtocol`] error.
    ///
    /// # Arguments
    ///
    /// * `run_id` - A run suspended at an interrupt point
    /// * `patch` - Partial state merged with the schema's reducers
    /// * `as_node` - The suspended node or one of its direct predecessors
    ///
    /// # Returns
    ///
    /// Snapshot of the checkpoint written for the patch. Nothing is written
    /// when the call is rejected.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let snapshot = compiled
    ///     .update_state("podcast", json!({"topic": "solar wind"}), "ask_topic")
    ///     .await?;
    /// assert_eq!(snapshot.next, vec!["get_keywords".to_string()]);
    /// let outcome = compiled.invoke_with_config(None, RunConfig::for_run("podcast")).await?;
    /// ```
    #[tracing::instrument(skip(self, patch), fields(graph = %self.name))]
    pub async fn update_state(&self, run_id: &str, patch: Value, as_node: &str) -> Result<StateSnapshot> {
        let latest = self.latest(run_id).await?.ok_or_else(|| {
            GraphError::ResumeProtocol(format!("run '{}' has no checkpoint to resume", run_id))
        })?;
        let tuple = self
            .resumed_tuple(latest, &ResumeCommand::new(patch, as_node))
            .await?;
        Ok(StateSnapshot::from(tuple))
    }

    async fn resumed_tuple(&self, latest: CheckpointTuple, resume: &ResumeCommand) -> Result<CheckpointTuple> {
        let run_id = latest
            .config
            .thread_id
            .clone()
            .ok_or_else(|| GraphError::Configuration("checkpoint without run id".to_string()))?;
        let cursor = latest.checkpoint.cursor;

        let suspended = match (&cursor.interrupted_before, cursor.is_interrupted()) {
            (Some(node), true) => node.clone(),
            _ => {
                return Err(GraphError::ResumeProtocol(format!(
                    "run '{}' is not suspended at an interrupt point",
                    run_id
                )))
            }
        };
        let as_node = resume.as_node.as_str();
        if !self.graph.contains(as_node) {
            return Err(GraphError::ResumeProtocol(format!(
                "cannot resume as unknown node '{}'",
                as_node
            )));
        }

        self.schema
            .check_fields(&resume.patch)
            .map_err(|e| GraphError::from_state(e, Some(as_node)))?;
        let mut values = latest.checkpoint.values;
        self.schema
            .apply(&mut values, &resume.patch)
            .map_err(|e| GraphError::from_state(e, Some(as_node)))?;

        let cursor = if as_node == suspended {
            // The patch stands in for the suspended node's output
            let remaining = cursor
                .next
                .iter()
                .filter(|t| t.node != suspended)
                .cloned()
                .collect();
            let mut joins = cursor.joins.clone();
            let mut next = NextTasks::new(remaining);
            self.schedule(&[as_node], &values, &mut joins, &mut next)?;
            let mut cursor = Cursor::new(next.into_tasks());
            cursor.joins = joins;
            cursor
        } else if self.graph.is_predecessor(as_node, &suspended) {
            let mut cursor = cursor;
            cursor.resumed = true;
            cursor
        } else {
            return Err(GraphError::ResumeProtocol(format!(
                "run is suspended before '{}'; a patch can only be attributed to that node or one of its predecessors, not '{}'",
                suspended, as_node
            )));
        };

        let step = latest.metadata.step + 1;
        let metadata = CheckpointMetadata::new(CheckpointSource::Update, step).with_updated_by(as_node);
        self.save_checkpoint(&run_id, values, cursor, metadata).await?;
        info!(run_id = %run_id, node = %suspended, as_node = %as_node, "Applied resume patch");

        self.latest(&run_id)
            .await?
            .ok_or_else(|| GraphError::RunNotFound(run_id.clone()))
    }

    /// Validate the call against the run's last checkpoint and load its state.
    pub(crate) async fn prepare(
        &self,
        run_id: &str,
        input: Option<Value>,
        resume: Option<&ResumeCommand>,
    ) -> Result<Prepared> {
        let latest = self.latest(run_id).await?;

        let (values, cursor, step) = match (latest, input, resume) {
            (_, Some(_), Some(_)) => {
                return Err(GraphError::ResumeProtocol(
                    "new input and a resume patch cannot be combined".to_string(),
                ))
            }
            (None, _, Some(_)) => {
                return Err(GraphError::ResumeProtocol(format!(
                    "run '{}' has no checkpoint to resume",
                    run_id
                )))
            }
            (None, None, None) => return Err(GraphError::RunNotFound(run_id.to_string())),
            (None, Some(input), None) => {
                let values = self
                    .schema
                    .initial_state(&input)
                    .map_err(|e| GraphError::from_state(e, None))?;
                let mut cursor = Cursor::new(self.entry_tasks());
                self.mark_suspension(&mut cursor);
                self.save_checkpoint(
                    run_id,
                    values.clone(),
                    cursor.clone(),
                    CheckpointMetadata::new(CheckpointSource::Input, -1),
                )
                .await?;
                info!(graph = %self.name, run_id = %run_id, "Starting new run");
                (values, cursor, -1)
            }
            (Some(latest), Some(input), None) => {
                let cursor = &latest.checkpoint.cursor;
                if let (Some(node), true) = (&cursor.interrupted_before, cursor.is_interrupted()) {
                    return Err(GraphError::ResumeProtocol(format!(
                        "run '{}' is suspended before '{}'; resume it with a patch instead of new input",
                        run_id, node
                    )));
                }
                if !cursor.is_terminal() {
                    return Err(GraphError::ResumeProtocol(format!(
                        "run '{}' has pending tasks; continue it without input",
                        run_id
                    )));
                }

                // Another turn on a finished run
                let mut values = latest.checkpoint.values;
                self.schema
                    .apply(&mut values, &input)
                    .map_err(|e| GraphError::from_state(e, None))?;
                let step = latest.metadata.step + 1;
                let mut cursor = Cursor::new(self.entry_tasks());
                self.mark_suspension(&mut cursor);
                self.save_checkpoint(
                    run_id,
                    values.clone(),
                    cursor.clone(),
                    CheckpointMetadata::new(CheckpointSource::Input, step),
                )
                .await?;
                info!(graph = %self.name, run_id = %run_id, step, "Continuing finished run with new input");
                (values, cursor, step)
            }
            (Some(latest), None, Some(resume)) => {
                let tuple = self.resumed_tuple(latest, resume).await?;
                (tuple.checkpoint.values, tuple.checkpoint.cursor, tuple.metadata.step)
            }
            (Some(latest), None, None) => {
                let mut cursor = latest.checkpoint.cursor;
                if cursor.is_interrupted() {
                    cursor.resumed = true;
                }
                debug!(graph = %self.name, run_id = %run_id, next = ?cursor.next_nodes(), "Resuming from checkpoint");
                (latest.checkpoint.values, cursor, latest.metadata.step)
            }
        };

        self.store.insert(run_id, values).await;
        Ok(Prepared { cursor, step })
    }
}

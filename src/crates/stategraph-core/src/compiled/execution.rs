//! The super-step loop

use super::graph::CompiledGraph;
use super::types::RunStatus;
use crate::error::{BranchFailure, GraphError, Result};
use crate::graph::{Edge, NodeKind, END};
use crate::retry::with_retry;
use crate::send::ConditionalEdgeResult;
use crate::state::overlay;
use crate::stream::{EventSink, NestedEvents, StreamEvent};
use serde_json::{json, Value};
use stategraph_checkpoint::{
    Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointSource, Cursor, PendingTask,
};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

/// How the loop stopped
#[derive(Debug)]
pub(crate) struct LoopExit {
    pub(crate) state: Value,
    /// Fold of every update merged by this call
    pub(crate) writes: Value,
    pub(crate) status: RunStatus,
    pub(crate) steps: usize,
}

/// Output of one task
#[derive(Debug)]
struct TaskOutput {
    update: Value,
    /// No-op nodes produce no user-visible event
    silent: bool,
}

/// Builds the task list of the next super-step
#[derive(Default)]
pub(crate) struct NextTasks {
    tasks: Vec<PendingTask>,
    plain: HashSet<String>,
    send_branches: HashMap<String, usize>,
}

impl NextTasks {
    pub(crate) fn new(existing: Vec<PendingTask>) -> Self {
        let mut next = Self::default();
        for task in existing {
            match task.branch {
                Some(branch) => {
                    let counter = next.send_branches.entry(task.node.clone()).or_insert(0);
                    *counter = (*counter).max(branch + 1);
                    next.tasks.push(task);
                }
                None => next.push_node(&task.node),
            }
        }
        next
    }

    /// Schedule `node` once per step
    fn push_node(&mut self, node: &str) {
        if node != END && self.plain.insert(node.to_string()) {
            self.tasks.push(PendingTask::node(node));
        }
    }

    /// Schedule one fan-out branch; branches are never merged
    fn push_send(&mut self, node: &str, arg: Value) {
        let counter = self.send_branches.entry(node.to_string()).or_insert(0);
        let branch = *counter;
        *counter += 1;
        self.tasks.push(PendingTask::send(node, arg, branch));
    }

    pub(crate) fn into_tasks(self) -> Vec<PendingTask> {
        self.tasks
    }
}

async fn with_timeout<T, F>(timeout: Option<Duration>, node: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout {
        Some(duration) => tokio::time::timeout(duration, fut).await.map_err(|_| GraphError::Timeout {
            operation: node.to_string(),
            duration_ms: duration.as_millis() as u64,
        })?,
        None => fut.await,
    }
}

/// Turn a node's return value into a partial state
fn normalize_update(node: &str, value: Value) -> Result<Value> {
    match value {
        Value::Null => Ok(json!({})),
        Value::Object(_) => Ok(value),
        other => Err(GraphError::node_execution(
            node,
            format!("node must return an object of state fields, got {}", other),
        )),
    }
}

fn namespace_segment(task: &PendingTask) -> String {
    match task.branch {
        Some(branch) => format!("{}:{}", task.node, branch),
        None => task.node.clone(),
    }
}

impl CompiledGraph {
    pub(crate) fn entry_tasks(&self) -> Vec<PendingTask> {
        self.graph.entries.iter().map(PendingTask::node).collect()
    }

    /// Execute one task.
    ///
    /// Function nodes run under the node timeout and retry policy. A
    /// sub-graph runs once: its own nodes apply those limits per call, and
    /// its internal events go out on `events` as they happen.
    async fn execute_task(self, task: PendingTask, input: Value, events: NestedEvents) -> Result<TaskOutput> {
        let node = self
            .graph
            .node(&task.node)
            .ok_or_else(|| GraphError::Validation(format!("scheduled unknown node '{}'", task.node)))?
            .clone();
        let timeout = self.config.node_timeout;
        let policy = self.config.retry_policy.as_ref();

        debug!(node = %task.node, branch = ?task.branch, "Executing task");

        match node.kind {
            NodeKind::Noop => Ok(TaskOutput {
                update: json!({}),
                silent: true,
            }),
            NodeKind::Function(f) => {
                let value = with_retry(policy, &task.node, || with_timeout(timeout, &task.node, f(input.clone()))).await?;
                Ok(TaskOutput {
                    update: normalize_update(&task.node, value)?,
                    silent: false,
                })
            }
            NodeKind::Subgraph { graph, outputs } => {
                let output = graph.run_nested(input, events).await?;

                let update = match &outputs {
                    Some(fields) => {
                        let writes = output.writes.as_object().cloned().unwrap_or_default();
                        Value::Object(
                            writes
                                .into_iter()
                                .filter(|(k, _)| fields.contains(k))
                                .collect(),
                        )
                    }
                    None => self.schema.project(&output.writes),
                };

                Ok(TaskOutput { update, silent: false })
            }
        }
    }

    /// Resolve a router label to a node, `None` meaning END
    fn resolve_label(&self, from: &str, label: &str, branches: &HashMap<String, String>) -> Result<Option<String>> {
        if label == END {
            return Ok(None);
        }
        let target = if branches.is_empty() {
            label
        } else {
            branches.get(label).map(String::as_str).ok_or_else(|| GraphError::InvalidRoute {
                node: from.to_string(),
                label: label.to_string(),
            })?
        };
        if target == END {
            return Ok(None);
        }
        if !self.graph.contains(target) {
            return Err(GraphError::InvalidRoute {
                node: from.to_string(),
                label: label.to_string(),
            });
        }
        Ok(Some(target.to_string()))
    }

    /// Fire the outgoing edges of `completed` (in order) against `state`
    pub(crate) fn schedule(
        &self,
        completed: &[&str],
        state: &Value,
        joins: &mut BTreeMap<String, BTreeSet<String>>,
        next: &mut NextTasks,
    ) -> Result<()> {
        for &node in completed {
            for edge in self.graph.edges_from(node) {
                match edge {
                    Edge::Direct(to) => next.push_node(to),
                    Edge::Conditional { router, branches } => match router(state) {
                        ConditionalEdgeResult::Node(label) => {
                            if let Some(to) = self.resolve_label(node, &label, branches)? {
                                next.push_node(&to);
                            }
                        }
                        ConditionalEdgeResult::Nodes(labels) => {
                            for label in labels {
                                if let Some(to) = self.resolve_label(node, &label, branches)? {
                                    next.push_node(&to);
                                }
                            }
                        }
                        ConditionalEdgeResult::Sends(sends) => {
                            for send in sends {
                                if !self.graph.contains(&send.node) {
                                    return Err(GraphError::InvalidRoute {
                                        node: node.to_string(),
                                        label: send.node,
                                    });
                                }
                                next.push_send(&send.node, send.arg);
                            }
                        }
                    },
                }
            }

            for join in self.graph.joins.iter().filter(|j| j.sources.contains(node)) {
                joins
                    .entry(join.target.clone())
                    .or_default()
                    .insert(node.to_string());
            }
        }

        for join in &self.graph.joins {
            let ready = joins
                .get(&join.target)
                .map(|done| join.sources.is_subset(done))
                .unwrap_or(false);
            if ready {
                joins.remove(&join.target);
                next.push_node(&join.target);
            }
        }
        Ok(())
    }

    /// Interrupt point the run stops at before executing `cursor`
    fn suspension_point(&self, cursor: &Cursor) -> Option<String> {
        if cursor.resumed {
            return None;
        }
        cursor
            .next
            .iter()
            .find(|t| self.interrupts.should_interrupt_before(&t.node))
            .map(|t| t.node.clone())
    }

    /// Record the suspension in the cursor about to be saved
    pub(crate) fn mark_suspension(&self, cursor: &mut Cursor) {
        if let Some(node) = self.suspension_point(cursor) {
            cursor.interrupted_before = Some(node);
        }
    }

    pub(crate) async fn save_checkpoint(
        &self,
        run_id: &str,
        values: Value,
        cursor: Cursor,
        metadata: CheckpointMetadata,
    ) -> Result<CheckpointConfig> {
        let config = CheckpointConfig::for_thread(run_id);
        let saved = self
            .checkpointer
            .put(&config, Checkpoint::new(values, cursor), metadata)
            .await?;
        Ok(saved)
    }

    /// Run super-steps until the cursor is empty or hits an interrupt point.
    ///
    /// The run's state must already be in the store. `step` is the number
    /// of the last committed step. Only outermost runs persist checkpoints
    /// and honor interrupts.
    pub(crate) async fn run_loop(
        &self,
        run_id: &str,
        mut cursor: Cursor,
        mut step: i64,
        sink: &mut EventSink,
        outermost: bool,
    ) -> Result<LoopExit> {
        let mut writes = json!({});
        let mut steps = 0usize;

        loop {
            if cursor.is_terminal() {
                let state = self.store.get(run_id).await?;
                debug!(graph = %self.name, run_id = %run_id, steps, "Run reached a terminal state");
                return Ok(LoopExit {
                    state,
                    writes,
                    status: RunStatus::Completed,
                    steps,
                });
            }

            if outermost {
                if let Some(node) = self.suspension_point(&cursor) {
                    let state = self.store.get(run_id).await?;
                    // Step and input checkpoints already carry the suspension
                    if cursor.interrupted_before.as_deref() != Some(node.as_str()) {
                        cursor.interrupted_before = Some(node.clone());
                        self.save_checkpoint(
                            run_id,
                            state.clone(),
                            cursor,
                            CheckpointMetadata::new(CheckpointSource::Interrupt, step),
                        )
                        .await?;
                    }
                    info!(graph = %self.name, run_id = %run_id, node = %node, "Run interrupted");
                    sink.emit(StreamEvent::Interrupted { node: node.clone() }).await;
                    return Ok(LoopExit {
                        state,
                        writes,
                        status: RunStatus::Interrupted { node },
                        steps,
                    });
                }
            }

            if steps >= self.config.recursion_limit {
                return Err(GraphError::RecursionLimit {
                    limit: self.config.recursion_limit,
                });
            }

            let current = step + 1;
            let snapshot = self.store.get(run_id).await?;
            let tasks = cursor.next.clone();
            debug!(
                graph = %self.name,
                run_id = %run_id,
                step = current,
                tasks = ?cursor.next_nodes(),
                "Starting super-step"
            );

            // Every task reads the same pre-step snapshot. Nested events come
            // back on one channel per task and are released in task order.
            let mut running = Vec::with_capacity(tasks.len());
            for task in &tasks {
                let input = match &task.arg {
                    Some(arg) => overlay(&snapshot, arg),
                    None => snapshot.clone(),
                };
                let (tx, rx) = mpsc::unbounded_channel();
                let handle = tokio::spawn(self.clone().execute_task(task.clone(), input, tx));
                running.push((handle, rx));
            }
            let aborts: Vec<AbortHandle> = running.iter().map(|(handle, _)| handle.abort_handle()).collect();

            let mut failures = Vec::new();
            let mut outputs = Vec::with_capacity(tasks.len());
            for (task, (handle, mut rx)) in tasks.iter().zip(running) {
                let segment = namespace_segment(task);
                while let Some(event) = rx.recv().await {
                    sink.emit(event.nested_under(&segment)).await;
                }

                let result = handle
                    .await
                    .unwrap_or_else(|e| Err(GraphError::node_execution(&task.node, format!("task panicked: {}", e))))
                    .and_then(|output| {
                        self.schema
                            .check_fields(&output.update)
                            .map_err(|e| GraphError::from_state(e, Some(&task.node)))?;
                        Ok(output)
                    });

                match result {
                    Ok(output) => {
                        if !output.silent {
                            sink.emit(StreamEvent::update(task.node.clone(), output.update.clone())).await;
                        }
                        outputs.push((task, output.update));
                    }
                    Err(e) if e.is_structural() => {
                        aborts.iter().for_each(AbortHandle::abort);
                        return Err(e);
                    }
                    Err(e) => {
                        warn!(
                            graph = %self.name,
                            run_id = %run_id,
                            node = %task.node,
                            branch = ?task.branch,
                            error = %e,
                            "Task failed"
                        );
                        sink.emit(StreamEvent::TaskFailed {
                            node: task.node.clone(),
                            branch: task.branch,
                            error: e.to_string(),
                        })
                        .await;
                        failures.push(BranchFailure {
                            node: task.node.clone(),
                            branch: task.branch,
                            error: e.to_string(),
                        });
                    }
                }
            }

            if !failures.is_empty() {
                return Err(GraphError::BranchFailures {
                    step: current,
                    failures,
                });
            }

            // Merge in task enumeration order
            let mut state = snapshot;
            for (task, update) in &outputs {
                state = self.store.merge(run_id, update, &task.node).await?;
                self.schema
                    .apply(&mut writes, update)
                    .map_err(|e| GraphError::from_state(e, Some(&task.node)))?;
            }

            let completed: Vec<&str> = tasks.iter().map(|t| t.node.as_str()).collect();
            let mut joins = std::mem::take(&mut cursor.joins);
            let mut next = NextTasks::default();
            self.schedule(&completed, &state, &mut joins, &mut next)?;

            cursor = Cursor::new(next.into_tasks());
            cursor.joins = joins;
            step = current;
            steps += 1;

            if outermost {
                self.mark_suspension(&mut cursor);
                self.save_checkpoint(
                    run_id,
                    state,
                    cursor.clone(),
                    CheckpointMetadata::new(CheckpointSource::Loop, step),
                )
                .await?;
            }
        }
    }
}

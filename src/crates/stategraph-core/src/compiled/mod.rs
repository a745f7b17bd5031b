//! Execution runtime for compiled graphs
//!
//! A [`CompiledGraph`] runs a validated graph definition in super-steps:
//!
//! 1. every task scheduled for the step runs on its own tokio task, reading a
//!    snapshot of the state taken before the step;
//! 2. once all tasks finished (the barrier), their partial states are merged
//!    in task enumeration order, never in completion order;
//! 3. edges, routers, fan-outs and joins schedule the next step;
//! 4. the state and cursor are checkpointed.
//!
//! Runs suspend before interrupt points and are resumed with a patch
//! attributed to a node. Failures of individual tasks are collected and
//! reported together once their siblings finished.

mod execution;
mod graph;
mod state;
mod streaming;
mod types;

pub use graph::CompiledGraph;
pub use types::{ExecutorConfig, RunConfig, RunOutcome, RunStatus, StateSnapshot};

//! The research analyst workflow
//!
//! ```text
//! START -> agent -> [user_input] -> create_analysts ==Send per analyst==> conduct_interview
//!   conduct_interview -> write_report | write_introduction | write_conclusion
//!   join(write_report, write_introduction, write_conclusion) -> finalize_report -> END
//! ```
//!
//! The run suspends before `user_input`. The user's reply is recorded as
//! `agent` output, after which `user_input` extracts the topic and team
//! size. `create_analysts` and every `conduct_interview` branch are compiled
//! sub-graphs.

use crate::analyst::UserInput;
use crate::config::ResearchConfig;
use crate::error::Result;
use crate::interview::build_interview_graph;
use crate::model::OpenAiChatModel;
use crate::planning::build_planning_graph;
use crate::prompts::{self, render};
use crate::report::{self, ReportPart};
use crate::search::search_registry;
use crate::state::{self, research_schema};
use serde_json::{json, Value};
use stategraph_core::{
    messages_from_state, structured_output, ChatModel, ChatRequest, CheckpointSaver, CompiledGraph, EventStream,
    GraphError, InMemoryCheckpointSaver, Message, NodeFilter, Send, SqliteCheckpointSaver, StateGraph, ToolRegistry, END,
    START,
};
use std::sync::Arc;
use tracing::info;

/// Node the user's replies are attributed to when resuming
pub const UPDATE_AS_NODE: &str = "agent";

/// Nodes whose updates are shown to the user
pub const NODES_TO_DISPLAY: [&str; 3] = ["agent", "create_analysts", "finalize_report"];

/// Research analyst session: configuration, model, tools and checkpoint store
pub struct ResearchAgent {
    config: ResearchConfig,
    model: Arc<dyn ChatModel>,
    tools: Arc<ToolRegistry>,
    checkpointer: Arc<dyn CheckpointSaver>,
}

impl ResearchAgent {
    pub const NAME: &'static str = "Research Analyst";

    /// Session with an in-memory checkpoint store
    pub fn new(config: ResearchConfig, model: Arc<dyn ChatModel>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            config,
            model,
            tools,
            checkpointer: Arc::new(InMemoryCheckpointSaver::new()),
        }
    }

    /// Session talking to the configured endpoint and search backends,
    /// persisting checkpoints in the configured SQLite database
    pub async fn from_config(config: ResearchConfig) -> Result<Self> {
        let model = Arc::new(OpenAiChatModel::new(&config.model)?);
        let tools = Arc::new(search_registry(&config.search)?);
        let database = config.checkpoint.resolved_database();
        info!(database = %database.display(), "Using SQLite checkpoint store");
        let saver = SqliteCheckpointSaver::open(&database)
            .await
            .map_err(GraphError::from)?;
        Ok(Self::new(config, model, tools).with_checkpointer(Arc::new(saver)))
    }

    pub fn with_checkpointer(mut self, checkpointer: Arc<dyn CheckpointSaver>) -> Self {
        self.checkpointer = checkpointer;
        self
    }

    pub fn config(&self) -> &ResearchConfig {
        &self.config
    }

    /// Compile the outer research graph with its sub-graphs
    pub fn build_graph(&self) -> Result<CompiledGraph> {
        let executor = self.config.execution.executor_config();
        let research = &self.config.research;

        let planning = build_planning_graph(self.model.clone(), research.max_analysts, executor.clone())?;
        let interview = build_interview_graph(
            self.model.clone(),
            self.tools.clone(),
            research.max_num_turns,
            executor.clone(),
        )?;

        let mut graph = StateGraph::new(research_schema());
        graph.set_name("research");

        let model = self.model.clone();
        graph.add_node("agent", move |state| {
            let model = model.clone();
            async move {
                let mut messages = vec![Message::system(prompts::AGENT_SYSTEM)];
                messages.extend(messages_from_state(&state, "messages")?);
                let reply = state::generate(model.as_ref(), messages).await?;
                Ok(json!({ "messages": [reply] }))
            }
        });

        let model = self.model.clone();
        let default_analysts = research.max_analysts;
        graph.add_node("user_input", move |state| {
            let model = model.clone();
            async move { extract_user_input(model.as_ref(), &state, default_analysts).await }
        });

        graph.add_subgraph("create_analysts", planning);

        let max_num_turns = research.max_num_turns;
        graph.add_fanout("create_analysts", move |state: &Value| {
            initiate_all_interviews(state, max_num_turns)
        });
        graph.add_subgraph_with_outputs("conduct_interview", interview, ["sections"]);

        for part in [ReportPart::Body, ReportPart::Introduction, ReportPart::Conclusion] {
            let node = match part {
                ReportPart::Body => "write_report",
                ReportPart::Introduction => "write_introduction",
                ReportPart::Conclusion => "write_conclusion",
            };
            let model = self.model.clone();
            graph.add_node(node, move |state| {
                let model = model.clone();
                async move {
                    let sections = state::text_list(&state, "sections");
                    let text = report::write_part(model.as_ref(), part, state::text(&state, "topic"), &sections).await?;
                    let mut update = serde_json::Map::new();
                    update.insert(part.field().to_string(), Value::String(text));
                    Ok(Value::Object(update))
                }
            });
            graph.add_edge("conduct_interview", node);
        }
        graph.add_join_edge(["write_conclusion", "write_report", "write_introduction"], "finalize_report");

        graph.add_node("finalize_report", |state| async move {
            let final_report = report::compose_report(
                state::text(&state, "introduction"),
                state::text(&state, "content"),
                state::text(&state, "conclusion"),
            );
            Ok(json!({
                "messages": [Message::ai(final_report.clone())],
                "final_report": final_report,
            }))
        });

        graph.add_edge(START, "agent");
        graph.add_edge("agent", "user_input");
        graph.add_edge("user_input", "create_analysts");
        graph.add_edge("finalize_report", END);
        graph.interrupt_before(research.interrupt_before.iter().cloned());

        Ok(graph
            .compile()?
            .with_config(executor)
            .with_checkpointer(self.checkpointer.clone()))
    }

    /// Start a run, or continue a suspended one with the user's reply.
    ///
    /// The reply is recorded as output of [`UPDATE_AS_NODE`]. Only the
    /// display nodes are streamed.
    pub fn start_or_resume(&self, graph: &CompiledGraph, run_id: &str, reply: Option<&str>) -> EventStream {
        let filter = NodeFilter::only(NODES_TO_DISPLAY);
        match reply {
            Some(text) => graph.start_or_resume(
                run_id,
                None,
                Some(reply_patch(text)),
                Some(UPDATE_AS_NODE.to_string()),
                filter,
            ),
            None => graph.start_or_resume(run_id, Some(json!({ "messages": [] })), None, None, filter),
        }
    }
}

/// Patch recording `text` as the user's reply
pub fn reply_patch(text: &str) -> Value {
    json!({ "messages": [Message::human(text)] })
}

/// Topic and team size, extracted from the last message unless already set
async fn extract_user_input(model: &dyn ChatModel, state: &Value, default_analysts: usize) -> stategraph_core::Result<Value> {
    if !state::text(state, "topic").is_empty() && state::count(state, "max_analysts").is_some() {
        return Ok(json!({}));
    }

    let messages = messages_from_state(state, "messages")?;
    let last_message = messages.last().map(|m| m.content.as_str()).unwrap_or_default();
    let prompt = render(prompts::USER_INPUT, &[("last_message", last_message)]);
    let input: UserInput = structured_output(model, ChatRequest::new(vec![Message::human(prompt)])).await?;

    let max_analysts = if input.max_analysts == 0 { default_analysts } else { input.max_analysts };
    info!(topic = %input.topic, max_analysts, "Research request received");
    Ok(json!({ "topic": input.topic, "max_analysts": max_analysts }))
}

/// One interview branch per analyst, each seeded with the opening line
pub fn initiate_all_interviews(state: &Value, max_num_turns: usize) -> Vec<Send> {
    let topic = state::text(state, "topic");
    let analysts = state::analysts(state).unwrap_or_default();
    analysts
        .into_iter()
        .map(|analyst| {
            Send::new(
                "conduct_interview",
                json!({
                    "analyst": analyst,
                    "messages": [Message::human(prompts::interview_opener(topic))],
                    "max_num_turns": max_num_turns,
                }),
            )
        })
        .collect()
}

//! Analyst planning sub-graph
//!
//! `generate_themes` asks the model for one analyst per theme of the topic and
//! keeps at most `max_analysts` of them; `create_analysts` presents the team
//! to the user as a chat message.

use crate::analyst::{Analyst, Perspectives};
use crate::prompts::{self, render};
use crate::state::{self, planning_schema};
use serde_json::json;
use stategraph_core::{
    structured_output, ChatModel, ChatRequest, CompiledGraph, ExecutorConfig, GraphError, Message, Result, StateGraph,
    END, START,
};
use std::sync::Arc;
use tracing::info;

/// Build the planning graph.
///
/// `default_max_analysts` applies when the state does not carry a team size.
pub fn build_planning_graph(
    model: Arc<dyn ChatModel>,
    default_max_analysts: usize,
    config: ExecutorConfig,
) -> Result<CompiledGraph> {
    let mut graph = StateGraph::new(planning_schema());
    graph.set_name("planning");

    let themes_model = model.clone();
    graph.add_node("generate_themes", move |state| {
        let model = themes_model.clone();
        async move {
            let topic = state::text(&state, "topic").to_string();
            let max_analysts = state::count(&state, "max_analysts").unwrap_or(default_max_analysts).max(1);
            let analysts = generate_analysts(model.as_ref(), &topic, max_analysts).await?;
            info!(%topic, analysts = analysts.len(), "Analyst team generated");
            Ok(json!({ "analysts": analysts }))
        }
    });

    graph.add_node("create_analysts", move |state| {
        let model = model.clone();
        async move {
            let analysts = state::analysts(&state)?;
            let details = analysts.iter().map(Analyst::persona).collect::<Vec<_>>().join(",");
            let prompt = render(prompts::PRESENT_ANALYSTS, &[("analysts", &details)]);
            let reply = state::generate(model.as_ref(), vec![Message::human(prompt)]).await?;
            Ok(json!({ "messages": [reply] }))
        }
    });

    graph.add_edge(START, "generate_themes");
    graph.add_edge("generate_themes", "create_analysts");
    graph.add_edge("create_analysts", END);

    Ok(graph.compile()?.with_config(config))
}

async fn generate_analysts(model: &dyn ChatModel, topic: &str, max_analysts: usize) -> Result<Vec<Analyst>> {
    let limit = max_analysts.to_string();
    let system = render(prompts::ANALYST_INSTRUCTIONS, &[("topic", topic), ("max_analysts", &limit)]);
    let request = ChatRequest::new(vec![Message::system(system), Message::human(prompts::GENERATE_ANALYSTS)]);

    let mut perspectives: Perspectives = structured_output(model, request).await?;
    if perspectives.analysts.is_empty() {
        return Err(GraphError::Model(format!("no analysts proposed for topic '{}'", topic)));
    }
    perspectives.analysts.truncate(max_analysts);
    Ok(perspectives.analysts)
}

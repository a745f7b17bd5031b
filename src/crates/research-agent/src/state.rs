//! State schemas of the research graphs and typed accessors over them

use crate::analyst::Analyst;
use serde_json::Value;
use stategraph_core::{ChatModel, ChatRequest, GraphError, Message, Result, StateSchema};

/// Outer research graph
pub fn research_schema() -> StateSchema {
    StateSchema::new()
        .append("messages")
        .overwrite("topic")
        .overwrite("max_analysts")
        .overwrite("analysts")
        .append("sections")
        .overwrite("introduction")
        .overwrite("content")
        .overwrite("conclusion")
        .overwrite("final_report")
}

/// Analyst planning sub-graph
pub fn planning_schema() -> StateSchema {
    StateSchema::new()
        .append("messages")
        .overwrite("topic")
        .overwrite("max_analysts")
        .overwrite("analysts")
}

/// One analyst/expert interview
pub fn interview_schema() -> StateSchema {
    StateSchema::new()
        .append("messages")
        .overwrite("max_num_turns")
        .append("context")
        .overwrite("analyst")
        .overwrite("interview")
        .append("sections")
}

/// String field, empty when unset
pub(crate) fn text<'a>(state: &'a Value, field: &str) -> &'a str {
    state.get(field).and_then(Value::as_str).unwrap_or_default()
}

/// List of strings, skipping anything that is not a string
pub(crate) fn text_list(state: &Value, field: &str) -> Vec<String> {
    state
        .get(field)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

pub(crate) fn count(state: &Value, field: &str) -> Option<usize> {
    state.get(field).and_then(Value::as_u64).map(|n| n as usize)
}

pub(crate) fn analyst(state: &Value, node: &str) -> Result<Analyst> {
    match state.get("analyst") {
        Some(value) if !value.is_null() => Ok(serde_json::from_value(value.clone())?),
        _ => Err(GraphError::node_execution(node, "state has no analyst")),
    }
}

pub(crate) fn analysts(state: &Value) -> Result<Vec<Analyst>> {
    match state.get("analysts") {
        Some(value) if !value.is_null() => Ok(serde_json::from_value(value.clone())?),
        _ => Ok(Vec::new()),
    }
}

/// One model turn, returned as the AI message
pub(crate) async fn generate(model: &dyn ChatModel, messages: Vec<Message>) -> Result<Message> {
    Ok(model.chat(ChatRequest::new(messages)).await?.message)
}

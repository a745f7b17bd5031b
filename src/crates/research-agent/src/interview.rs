//! Analyst/expert interview sub-graph
//!
//! ```text
//! START -> ask_question -> search_web ------> answer_question -> (route)
//!                       \-> search_wikipedia -/                    |
//!          ^---------------------- ask_question <------------------+
//!                                  save_interview -> write_section -> END
//! ```
//!
//! Both searches run in the same super-step; `answer_question` runs once
//! after both land. The route closes the interview after `max_num_turns`
//! expert answers or when the analyst says the closing phrase.

use crate::analyst::SearchQuery;
use crate::prompts::{self, render};
use crate::search::{self, WEB_SEARCH_TOOL, WIKIPEDIA_TOOL};
use crate::state::{self, interview_schema};
use serde_json::{json, Value};
use stategraph_core::{
    buffer_string, messages_from_state, structured_output, ChatModel, ChatRequest, CompiledGraph, ExecutorConfig,
    Message, Result, Role, StateGraph, ToolRegistry, END, START,
};
use std::sync::Arc;
use tracing::{debug, info};

/// Speaker name attached to expert answers
pub const EXPERT: &str = "expert";

pub const ASK_QUESTION: &str = "ask_question";
pub const SAVE_INTERVIEW: &str = "save_interview";

/// Next node after an expert answer.
///
/// Ends the interview once `expert` answered `max_num_turns` times, or when
/// the message before the last one (the analyst's question) contains the
/// closing phrase. A conversation too short to have that message continues.
pub fn route_messages(messages: &[Message], max_num_turns: usize) -> &'static str {
    let responses = messages
        .iter()
        .filter(|m| m.role == Role::Ai && m.name.as_deref() == Some(EXPERT))
        .count();
    if responses >= max_num_turns {
        return SAVE_INTERVIEW;
    }

    let last_question = messages.len().checked_sub(2).and_then(|idx| messages.get(idx));
    match last_question {
        Some(question) if question.content.contains(prompts::END_OF_INTERVIEW) => SAVE_INTERVIEW,
        _ => ASK_QUESTION,
    }
}

/// Build the interview graph.
///
/// The web search branch is only wired in when `tools` has a web search tool.
pub fn build_interview_graph(
    model: Arc<dyn ChatModel>,
    tools: Arc<ToolRegistry>,
    default_max_turns: usize,
    config: ExecutorConfig,
) -> Result<CompiledGraph> {
    let mut graph = StateGraph::new(interview_schema());
    graph.set_name("interview");

    let ask_model = model.clone();
    graph.add_node(ASK_QUESTION, move |state| {
        let model = ask_model.clone();
        async move {
            let analyst = state::analyst(&state, ASK_QUESTION)?;
            let mut messages = vec![Message::system(render(
                prompts::QUESTION_INSTRUCTIONS,
                &[("goals", &analyst.persona())],
            ))];
            messages.extend(messages_from_state(&state, "messages")?);
            let question = state::generate(model.as_ref(), messages).await?;
            debug!(analyst = %analyst.name, "Question asked");
            Ok(json!({ "messages": [question] }))
        }
    });

    let mut searches = vec![WIKIPEDIA_TOOL];
    if tools.has_tool(WEB_SEARCH_TOOL) {
        searches.insert(0, WEB_SEARCH_TOOL);
    } else {
        info!("Interview runs without web search");
    }
    for tool in searches {
        let node = match tool {
            WEB_SEARCH_TOOL => "search_web",
            _ => "search_wikipedia",
        };
        let model = model.clone();
        let tools = tools.clone();
        graph.add_node(node, move |state| {
            let model = model.clone();
            let tools = tools.clone();
            async move { retrieve(model.as_ref(), &tools, tool, &state).await }
        });
        graph.add_edge(ASK_QUESTION, node);
        graph.add_edge(node, "answer_question");
    }

    let answer_model = model.clone();
    graph.add_node("answer_question", move |state| {
        let model = answer_model.clone();
        async move {
            let analyst = state::analyst(&state, "answer_question")?;
            let context = state::text_list(&state, "context").join("\n\n");
            let system = render(
                prompts::ANSWER_INSTRUCTIONS,
                &[("goals", &analyst.persona()), ("context", &context)],
            );
            let mut messages = vec![Message::system(system)];
            messages.extend(messages_from_state(&state, "messages")?);
            let answer = state::generate(model.as_ref(), messages).await?.with_name(EXPERT);
            Ok(json!({ "messages": [answer] }))
        }
    });

    graph.add_node(SAVE_INTERVIEW, |state| async move {
        let messages = messages_from_state(&state, "messages")?;
        Ok(json!({ "interview": buffer_string(&messages) }))
    });

    graph.add_node("write_section", move |state| {
        let model = model.clone();
        async move {
            let analyst = state::analyst(&state, "write_section")?;
            let context = state::text_list(&state, "context").join("\n\n");
            let messages = vec![
                Message::system(render(
                    prompts::SECTION_WRITER_INSTRUCTIONS,
                    &[("focus", &analyst.description)],
                )),
                Message::human(format!("Use this source to write your section: {}", context)),
            ];
            let section = state::generate(model.as_ref(), messages).await?;
            info!(analyst = %analyst.name, "Section written");
            Ok(json!({ "sections": [section.content] }))
        }
    });

    graph.add_edge(START, ASK_QUESTION);
    graph.add_conditional_edge(
        "answer_question",
        move |state: &Value| {
            let messages = messages_from_state(state, "messages").unwrap_or_default();
            let max_turns = state::count(state, "max_num_turns").unwrap_or(default_max_turns);
            route_messages(&messages, max_turns)
        },
        [(ASK_QUESTION, ASK_QUESTION), (SAVE_INTERVIEW, SAVE_INTERVIEW)],
    );
    graph.add_edge(SAVE_INTERVIEW, "write_section");
    graph.add_edge("write_section", END);

    Ok(graph.compile()?.with_config(config))
}

/// Turn the conversation into a query, run `tool` and store the documents as context
async fn retrieve(model: &dyn ChatModel, tools: &ToolRegistry, tool: &str, state: &Value) -> Result<Value> {
    let conversation = messages_from_state(state, "messages")?;
    let fallback = conversation.last().map(|m| m.content.clone()).unwrap_or_default();

    let mut messages = vec![Message::system(prompts::SEARCH_INSTRUCTIONS)];
    messages.extend(conversation);
    let query: SearchQuery = structured_output(model, ChatRequest::new(messages)).await?;
    let query = query.search_query.filter(|q| !q.trim().is_empty()).unwrap_or(fallback);

    let result = search::run_search(tools, tool, &query).await?;
    let formatted = match tool {
        WEB_SEARCH_TOOL => search::format_web_documents(&result)?,
        _ => search::format_wiki_documents(&result)?,
    };
    debug!(%tool, %query, "Retrieved context");
    Ok(json!({ "context": [formatted] }))
}

//! End-to-end research runs against a scripted model and canned search tools

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use research_agent::search::{WEB_SEARCH_TOOL, WIKIPEDIA_TOOL};
use research_agent::{reply_patch, ResearchAgent, ResearchConfig, NODES_TO_DISPLAY};
use stategraph_core::{
    ChatModel, ChatRequest, ChatResponse, GraphError, Message, ResumeCommand, RunConfig, RunStatus, StreamEvent, Tool,
    ToolError, ToolRegistry,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Model answering each prompt kind with canned text.
///
/// Questions and answers are numbered from the conversation so parallel
/// interviews stay independent. The analyst named `closer` ends the
/// interview on its second question.
struct ScriptedModel {
    closer: Option<&'static str>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            closer: None,
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn with_closer(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            closer: Some(name),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn prompts_containing(&self, needle: &str) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.contains(needle))
            .cloned()
            .collect()
    }

    fn reply(&self, request: &ChatRequest) -> String {
        let system = request.system_prompt();
        let last = request.messages.last().map(|m| m.content.clone()).unwrap_or_default();
        let experts = request
            .messages
            .iter()
            .filter(|m| m.name.as_deref() == Some("expert"))
            .count();

        if system.contains("You are a research analyst AI agent") {
            "Hello! Which topic should I research, and with how many analysts?".to_string()
        } else if last.contains("Fetch the topic and number of analysts") {
            json!({"topic": "renewable energy", "max_analysts": 2}).to_string()
        } else if system.contains("creating a set of AI analyst personas") {
            json!({"analysts": [
                {"affiliation": "Grid Institute", "name": "Ada", "role": "Storage analyst", "description": "grid storage"},
                {"affiliation": "Wind Council", "name": "Bo", "role": "Offshore analyst", "description": "offshore wind"},
                {"affiliation": "Sun Lab", "name": "Cy", "role": "Solar analyst", "description": "solar cells"}
            ]})
            .to_string()
        } else if last.contains("Below are the details of the analysts") {
            "These are the analysts participating in the research.".to_string()
        } else if system.contains("You are an analyst tasked with interviewing an expert") {
            let name = persona_name(&system);
            if self.closer == Some(name.as_str()) && experts >= 1 {
                format!("{}: Thank you so much for your help!", name)
            } else {
                format!("{}: question {}?", name, experts + 1)
            }
        } else if system.contains("generate a well-structured query") {
            json!({"search_query": last}).to_string()
        } else if system.contains("You are an expert being interviewed") {
            format!("Answer {} [1]", experts + 1)
        } else if system.contains("You are an expert technical writer") {
            let focus = system
                .split("focus area of the analyst:\n")
                .nth(1)
                .and_then(|rest| rest.lines().next())
                .unwrap_or_default()
                .to_string();
            format!("## Section on {}\n### Summary\nFindings.\n### Sources\n[1] https://wiki.example", focus)
        } else if system.contains("creating a report on this overall topic") {
            "## Insights\nCombined findings [1].\n## Sources\n[1] https://wiki.example".to_string()
        } else if last == "Write the report introduction" {
            "# Renewable Futures\n\n## Introduction\nPreview.".to_string()
        } else if last == "Write the report conclusion" {
            "## Conclusion\nRecap.".to_string()
        } else {
            format!("unexpected prompt: {}", last)
        }
    }
}

fn persona_name(system: &str) -> String {
    system
        .split("Name: ")
        .nth(1)
        .and_then(|rest| rest.lines().next())
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn chat(&self, request: ChatRequest) -> stategraph_core::Result<ChatResponse> {
        let transcript = request
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        self.prompts.lock().unwrap().push(transcript);
        Ok(ChatResponse::new(Message::ai(self.reply(&request))))
    }
}

fn canned_tools(web: bool) -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new().with_tool(Tool::new(
        WIKIPEDIA_TOOL,
        "canned encyclopedia",
        json!({"type": "object"}),
        |args: Value| async move {
            Ok(json!([{"source": "https://wiki.example", "page": "", "content": format!("About {}", args["query"].as_str().unwrap_or_default())}]))
        },
    ));
    if web {
        registry.register(Tool::new(
            WEB_SEARCH_TOOL,
            "canned web search",
            json!({"type": "object"}),
            |_args: Value| async move { Ok(json!([{"url": "https://web.example", "content": "Web facts"}])) },
        ));
    }
    Arc::new(registry)
}

fn config(max_num_turns: usize) -> ResearchConfig {
    let mut config = ResearchConfig::default();
    config.research.max_num_turns = max_num_turns;
    config
}

/// Updates grouped by the interview branch that produced them
fn interview_updates(events: &[StreamEvent], node: &str) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for event in events {
        if let StreamEvent::Update { node: n, namespace, .. } = event {
            if n == node && namespace.first().map(|s| s.starts_with("conduct_interview:")).unwrap_or(false) {
                *counts.entry(namespace[0].clone()).or_insert(0) += 1;
            }
        }
    }
    counts
}

async fn run_to_interrupt(agent: &ResearchAgent, run_id: &str) -> stategraph_core::CompiledGraph {
    let graph = agent.build_graph().unwrap();
    let first = graph
        .invoke_with_config(Some(json!({"messages": []})), RunConfig::for_run(run_id))
        .await
        .unwrap();
    assert_eq!(
        first.status,
        RunStatus::Interrupted {
            node: "user_input".into()
        }
    );
    graph
}

async fn resume_all(graph: &stategraph_core::CompiledGraph, run_id: &str, reply: &str) -> Vec<StreamEvent> {
    graph
        .stream_with_config(
            None,
            RunConfig::for_run(run_id).with_resume(ResumeCommand::new(reply_patch(reply), "agent")),
        )
        .map(|e| e.unwrap())
        .collect()
        .await
}

fn final_state(events: &[StreamEvent]) -> Value {
    match events.last() {
        Some(StreamEvent::Completed { state }) => state.clone(),
        other => panic!("run did not complete: {:?}", other),
    }
}

#[tokio::test]
async fn test_renewable_energy_two_analysts() {
    let model = ScriptedModel::new();
    let agent = ResearchAgent::new(config(2), model.clone(), canned_tools(true));
    let graph = run_to_interrupt(&agent, "renewable").await;

    let events = resume_all(&graph, "renewable", "Research renewable energy with 2 analysts").await;
    let state = final_state(&events);

    assert_eq!(state["topic"], "renewable energy");
    assert_eq!(state["analysts"].as_array().map(Vec::len), Some(2));

    // Two interview branches, each with exactly two question/answer cycles
    let answers = interview_updates(&events, "answer_question");
    assert_eq!(answers.len(), 2);
    assert_eq!(answers.get("conduct_interview:0"), Some(&2));
    assert_eq!(answers.get("conduct_interview:1"), Some(&2));
    let questions = interview_updates(&events, "ask_question");
    assert_eq!(questions.values().copied().collect::<Vec<_>>(), vec![2, 2]);

    // Sections merge in branch order and both exist before synthesis
    let sections = state["sections"].as_array().unwrap();
    assert_eq!(sections.len(), 2);
    assert!(sections[0].as_str().unwrap().starts_with("## Section on grid storage"));
    assert!(sections[1].as_str().unwrap().starts_with("## Section on offshore wind"));
    for writer in ["Write the report introduction", "Write the report conclusion", "Write a report based upon"] {
        let prompts = model.prompts_containing(writer);
        assert_eq!(prompts.len(), 1, "{} ran once", writer);
        assert_eq!(prompts[0].matches("## Section on").count(), 2);
    }

    assert_eq!(
        state["final_report"],
        "# Renewable Futures\n\n## Introduction\nPreview.\n\n---\n\nCombined findings [1].\n\n---\n\n## Conclusion\nRecap.\n\n## Sources\n[1] https://wiki.example"
    );
    let last_message = state["messages"].as_array().and_then(|m| m.last()).unwrap();
    assert_eq!(last_message["content"], state["final_report"]);
}

#[tokio::test]
async fn test_interview_stops_early_on_closing_phrase() {
    let model = ScriptedModel::with_closer("Bo");
    let agent = ResearchAgent::new(config(3), model, canned_tools(true));
    let graph = run_to_interrupt(&agent, "closer").await;

    let events = resume_all(&graph, "closer", "renewable energy, two analysts").await;
    let answers = interview_updates(&events, "answer_question");
    assert_eq!(answers.get("conduct_interview:0"), Some(&3));
    assert_eq!(answers.get("conduct_interview:1"), Some(&2));
    assert_eq!(final_state(&events)["sections"].as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn test_display_filter_and_search_fan_in() {
    let model = ScriptedModel::new();
    let agent = ResearchAgent::new(config(1), model.clone(), canned_tools(false));
    let graph = agent.build_graph().unwrap();

    let greeting: Vec<StreamEvent> = agent
        .start_or_resume(&graph, "display", None)
        .map(|e| e.unwrap())
        .collect()
        .await;
    assert_eq!(greeting.len(), 2);
    assert_eq!(greeting[0].node(), Some("agent"));
    assert!(matches!(greeting[1], StreamEvent::Interrupted { .. }));

    let events: Vec<StreamEvent> = agent
        .start_or_resume(&graph, "display", Some("renewable energy please"))
        .map(|e| e.unwrap())
        .collect()
        .await;
    assert!(events
        .iter()
        .filter_map(StreamEvent::node)
        .all(|n| NODES_TO_DISPLAY.contains(&n)));
    assert!(events.iter().any(|e| e.node() == Some("finalize_report")));

    // Without a web search tool the expert only sees encyclopedia documents
    assert!(model.prompts_containing("<Document href=").is_empty());
    assert_eq!(model.prompts_containing("You are an expert being interviewed").len(), 2);
    assert!(model.prompts_containing("<Document source=\"https://wiki.example\"").len() >= 2);

    let state = graph.get_state("display").await.unwrap();
    assert!(state.next.is_empty());
    assert_eq!(state.values["sections"].as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn test_failing_search_surfaces_branch_failures() {
    let tools = Arc::new(ToolRegistry::new().with_tool(Tool::new(
        WIKIPEDIA_TOOL,
        "always down",
        json!({"type": "object"}),
        |_args: Value| async move {
            Err(ToolError::ExecutionFailed {
                tool: WIKIPEDIA_TOOL.to_string(),
                error: "service unavailable".to_string(),
            })
        },
    )));
    let agent = ResearchAgent::new(config(2), ScriptedModel::new(), tools);
    let graph = run_to_interrupt(&agent, "down").await;

    let err = graph
        .invoke_with_config(
            None,
            RunConfig::for_run("down").with_resume(ResumeCommand::new(reply_patch("renewable energy"), "agent")),
        )
        .await
        .unwrap_err();
    match err {
        GraphError::BranchFailures { failures, .. } => {
            assert_eq!(failures.len(), 2);
            assert!(failures.iter().all(|f| f.node == "conduct_interview"));
            assert!(failures[0].error.contains("service unavailable"));
        }
        other => panic!("expected branch failures, got {other}"),
    }

    // The failed fan-out step was not committed
    let snapshot = graph.get_state("down").await.unwrap();
    assert_eq!(snapshot.next, vec!["conduct_interview".to_string(), "conduct_interview".to_string()]);
    assert!(snapshot.values.get("sections").is_none());
}

#[tokio::test]
async fn test_topic_given_up_front_skips_extraction() {
    let model = ScriptedModel::new();
    let agent = ResearchAgent::new(config(1), model.clone(), canned_tools(true));
    let graph = run_to_interrupt(&agent, "preset").await;

    let patch = json!({
        "topic": "geothermal",
        "max_analysts": 1,
        "messages": [Message::human("geothermal, one analyst")],
    });
    let outcome = graph
        .invoke_with_config(None, RunConfig::for_run("preset").with_resume(ResumeCommand::new(patch, "agent")))
        .await
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.state["topic"], "geothermal");
    assert_eq!(outcome.state["analysts"].as_array().map(Vec::len), Some(1));
    assert!(model.prompts_containing("Fetch the topic and number of analysts").is_empty());
}

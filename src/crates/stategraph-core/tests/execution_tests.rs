//! Super-step execution: fan-out barrier, merge order, failures and sub-graphs

use futures::StreamExt;
use serde_json::{json, Value};
use stategraph_core::{
    CompiledGraph, ExecutorConfig, GraphError, RetryPolicy, RunConfig, Send, StateGraph, StateSchema, StreamEvent, END,
    START,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// `plan` fans out one `worker` per subtopic; workers finish in the order given by `delays_ms`
fn staggered_fanout(delays_ms: Vec<u64>) -> CompiledGraph {
    let schema = StateSchema::new()
        .overwrite("subtopics")
        .append("sections")
        .overwrite("observed")
        .overwrite("delay")
        .overwrite("index");

    let mut graph = StateGraph::new(schema);
    graph.add_node("plan", move |_state| {
        let subtopics: Vec<Value> = delays_ms
            .iter()
            .enumerate()
            .map(|(i, d)| json!({"index": i, "delay": d}))
            .collect();
        async move { Ok(json!({"subtopics": subtopics})) }
    });
    graph.add_fanout("plan", |state: &Value| {
        state["subtopics"]
            .as_array()
            .map(|items| items.iter().map(|s| Send::new("worker", s.clone())).collect())
            .unwrap_or_default()
    });
    graph.add_node("worker", |state| async move {
        let delay = state["delay"].as_u64().unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(delay)).await;
        Ok(json!({"sections": [format!("section-{}", state["index"])]}))
    });
    graph.add_node("join", |state| async move {
        let observed = state["sections"].as_array().map(Vec::len).unwrap_or(0);
        Ok(json!({"observed": observed}))
    });
    graph.add_edge(START, "plan");
    graph.add_edge("worker", "join");
    graph.add_edge("join", END);
    graph.compile().unwrap()
}

async fn collect_events(graph: &CompiledGraph, input: Value, config: RunConfig) -> Vec<StreamEvent> {
    graph
        .stream_with_config(Some(input), config)
        .map(|item| item.unwrap())
        .collect()
        .await
}

#[tokio::test]
async fn test_join_waits_for_all_staggered_branches() {
    let graph = staggered_fanout(vec![60, 10, 30]);
    let state = graph.invoke(json!({})).await.unwrap();

    assert_eq!(state["observed"], 3);
    // Merge order follows fan-out enumeration, not completion order
    assert_eq!(
        state["sections"],
        json!(["section-0", "section-1", "section-2"])
    );
}

#[tokio::test]
async fn test_join_runs_once_after_fanout() {
    let graph = staggered_fanout(vec![5, 5, 5]);
    let events = collect_events(&graph, json!({}), RunConfig::new()).await;

    let nodes: Vec<&str> = events.iter().filter_map(|e| e.as_update()).map(|(n, _)| n).collect();
    assert_eq!(nodes, vec!["plan", "worker", "worker", "worker", "join"]);
    assert!(matches!(events.last(), Some(StreamEvent::Completed { .. })));
}

#[tokio::test]
async fn test_runs_are_deterministic() {
    let first_graph = staggered_fanout(vec![25, 1, 12]);
    let second_graph = staggered_fanout(vec![25, 1, 12]);

    let first = collect_events(&first_graph, json!({}), RunConfig::new()).await;
    let second = collect_events(&second_graph, json!({}), RunConfig::new()).await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_branches_do_not_see_sibling_writes() {
    let mut graph = StateGraph::new(StateSchema::new().append("log").overwrite("seen"));
    graph.add_node("a", |state| async move {
        Ok(json!({"log": [format!("a saw {}", state["log"].as_array().map(Vec::len).unwrap_or(0))]}))
    });
    graph.add_node("b", |state| async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok(json!({"log": [format!("b saw {}", state["log"].as_array().map(Vec::len).unwrap_or(0))]}))
    });
    graph.add_edge(START, "a");
    graph.add_edge(START, "b");
    let state = graph.compile().unwrap().invoke(json!({})).await.unwrap();
    assert_eq!(state["log"], json!(["a saw 0", "b saw 0"]));
}

#[tokio::test]
async fn test_conditional_edge_with_multiple_destinations() {
    let schema = StateSchema::new().append("parts").overwrite("final_report");
    let mut graph = StateGraph::new(schema);
    graph.add_noop_node("collect");
    for name in ["write_introduction", "write_report", "write_conclusion"] {
        graph.add_node(name, move |_| async move { Ok(json!({"parts": [name]})) });
    }
    graph.add_node("finalize_report", |state| async move {
        let parts: Vec<String> = state["parts"]
            .as_array()
            .map(|p| p.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();
        Ok(json!({"final_report": parts.join("|")}))
    });
    graph.add_edge(START, "collect");
    graph.add_conditional_edge(
        "collect",
        |_state: &Value| vec!["intro", "body", "outro"],
        [
            ("intro", "write_introduction"),
            ("body", "write_report"),
            ("outro", "write_conclusion"),
        ],
    );
    graph.add_join_edge(
        ["write_introduction", "write_report", "write_conclusion"],
        "finalize_report",
    );
    graph.add_edge("finalize_report", END);

    let state = graph.compile().unwrap().invoke(json!({})).await.unwrap();
    assert_eq!(
        state["final_report"],
        "write_introduction|write_report|write_conclusion"
    );
}

#[tokio::test]
async fn test_unknown_route_label_is_structural_error() {
    let mut graph = StateGraph::new(StateSchema::new().overwrite("x"));
    graph.add_noop_node("a");
    graph.add_noop_node("b");
    graph.add_edge(START, "a");
    graph.add_conditional_edge("a", |_: &Value| "nowhere", [("go", "b")]);

    let err = graph.compile().unwrap().invoke(json!({})).await.unwrap_err();
    assert!(matches!(err, GraphError::InvalidRoute { ref label, .. } if label == "nowhere"));
}

#[tokio::test]
async fn test_unknown_field_aborts_run() {
    let mut graph = StateGraph::new(StateSchema::new().overwrite("topic"));
    graph.add_node("writer", |_| async move { Ok(json!({"topic": "wind", "typo": 1})) });
    graph.add_edge(START, "writer");

    let compiled = graph.compile().unwrap();
    let config = RunConfig::for_run("unknown-field");
    let err = compiled.invoke_with_config(Some(json!({})), config).await.unwrap_err();
    match err {
        GraphError::UnknownField { field, node } => {
            assert_eq!(field, "typo");
            assert_eq!(node.as_deref(), Some("writer"));
        }
        other => panic!("unexpected error: {other}"),
    }

    // Nothing from the failing step was committed
    let snapshot = compiled.get_state("unknown-field").await.unwrap();
    assert_eq!(snapshot.values, json!({}));
    assert_eq!(snapshot.next, vec!["writer".to_string()]);
}

#[tokio::test]
async fn test_unknown_input_field_rejected() {
    let mut graph = StateGraph::new(StateSchema::new().overwrite("topic"));
    graph.add_noop_node("a");
    graph.add_edge(START, "a");
    let err = graph.compile().unwrap().invoke(json!({"topc": "typo"})).await.unwrap_err();
    assert!(matches!(err, GraphError::UnknownField { node: None, .. }));
}

fn failing_fanout(stuck_branch: usize) -> CompiledGraph {
    let schema = StateSchema::new().append("sections").overwrite("index");
    let mut graph = StateGraph::new(schema);
    graph.add_noop_node("plan");
    graph.add_fanout("plan", |_: &Value| {
        (0..3).map(|i| Send::new("interview", json!({"index": i}))).collect()
    });
    graph.add_node("interview", move |state| async move {
        let index = state["index"].as_u64().unwrap_or(0) as usize;
        if index == stuck_branch {
            // An external call that never answers
            futures::future::pending::<()>().await;
        }
        Ok(json!({"sections": [index]}))
    });
    graph.add_node("report", |_| async move { Ok(json!({})) });
    graph.add_edge(START, "plan");
    graph.add_edge("interview", "report");
    graph
        .compile()
        .unwrap()
        .with_config(ExecutorConfig::new().with_node_timeout(Duration::from_millis(50)))
}

#[tokio::test]
async fn test_stuck_branch_times_out_as_branch_failure() {
    let graph = failing_fanout(1);
    let events: Vec<_> = graph
        .stream_with_config(Some(json!({})), RunConfig::for_run("stuck"))
        .collect()
        .await;

    let failed: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            Ok(StreamEvent::TaskFailed { node, branch, error }) => Some((node.clone(), *branch, error.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].0, "interview");
    assert_eq!(failed[0].1, Some(1));
    assert!(failed[0].2.contains("timed out"));

    match events.last() {
        Some(Err(GraphError::BranchFailures { failures, .. })) => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].branch, Some(1));
        }
        other => panic!("expected branch failures, got {:?}", other),
    }

    // The failed step was not committed; the report never ran
    let snapshot = graph.get_state("stuck").await.unwrap();
    assert!(snapshot.values.get("sections").is_none());
    assert_eq!(snapshot.next, vec!["interview"; 3]);
}

#[tokio::test]
async fn test_retry_policy_recovers_flaky_node() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();

    let mut graph = StateGraph::new(StateSchema::new().overwrite("answer"));
    graph.add_node("flaky", move |_| {
        let counter = counter.clone();
        async move {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(GraphError::Model("connection reset".into()))
            } else {
                Ok(json!({"answer": 42}))
            }
        }
    });
    graph.add_edge(START, "flaky");

    let policy = RetryPolicy::new(3).with_initial_interval(0.001).with_jitter(false);
    let compiled = graph
        .compile()
        .unwrap()
        .with_config(ExecutorConfig::new().with_retry_policy(policy));
    let state = compiled.invoke(json!({})).await.unwrap();
    assert_eq!(state["answer"], 42);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_recursion_limit() {
    let mut graph = StateGraph::new(StateSchema::new().overwrite("count"));
    graph.add_node("tick", |state| async move {
        Ok(json!({"count": state["count"].as_u64().unwrap_or(0) + 1}))
    });
    graph.add_edge(START, "tick");
    graph.add_edge("tick", "tick");

    let compiled = graph
        .compile()
        .unwrap()
        .with_config(ExecutorConfig::new().with_recursion_limit(5));
    let err = compiled.invoke(json!({})).await.unwrap_err();
    assert!(matches!(err, GraphError::RecursionLimit { limit: 5 }));
}

#[tokio::test]
async fn test_string_concat_reducer_across_turns() {
    let mut graph = StateGraph::new(StateSchema::new().concat("topic").overwrite("echo"));
    graph.add_node("echo", |state| async move { Ok(json!({"echo": state["topic"].clone()})) });
    graph.add_edge(START, "echo");
    let compiled = graph.compile().unwrap();

    let first = compiled
        .invoke_with_config(Some(json!({"topic": "solar"})), RunConfig::for_run("concat"))
        .await
        .unwrap();
    assert_eq!(first.state["echo"], "solar");

    // Another turn on the finished run reduces the new input into the old state
    let second = compiled
        .invoke_with_config(Some(json!({"topic": " and wind"})), RunConfig::for_run("concat"))
        .await
        .unwrap();
    assert_eq!(second.state["echo"], "solar and wind");
}

fn interview_subgraph() -> CompiledGraph {
    let schema = StateSchema::new()
        .overwrite("analyst")
        .append("messages")
        .append("sections");
    let mut graph = StateGraph::new(schema);
    graph.set_name("interview");
    graph.add_node("ask_question", |state| async move {
        Ok(json!({"messages": [format!("question from {}", state["analyst"].as_str().unwrap_or("?"))]}))
    });
    graph.add_node("write_section", |state| async move {
        let turns = state["messages"].as_array().map(Vec::len).unwrap_or(0);
        Ok(json!({"sections": [format!("{}: {} turns", state["analyst"].as_str().unwrap_or("?"), turns)]}))
    });
    graph.add_edge(START, "ask_question");
    graph.add_edge("ask_question", "write_section");
    graph.add_edge("write_section", END);
    graph.compile().unwrap()
}

#[tokio::test]
async fn test_subgraph_as_fanout_branch() {
    let schema = StateSchema::new()
        .overwrite("analysts")
        .append("messages")
        .append("sections");
    let mut graph = StateGraph::new(schema);
    graph.add_node("create_analysts", |_| async move { Ok(json!({"analysts": ["economist", "engineer"]})) });
    graph.add_fanout("create_analysts", |state: &Value| {
        state["analysts"]
            .as_array()
            .map(|a| {
                a.iter()
                    .map(|name| Send::new("conduct_interview", json!({"analyst": name, "messages": ["opening"]})))
                    .collect()
            })
            .unwrap_or_default()
    });
    graph.add_subgraph_with_outputs("conduct_interview", interview_subgraph(), ["sections"]);
    graph.add_edge(START, "create_analysts");
    graph.add_edge("conduct_interview", END);
    let compiled = graph.compile().unwrap();

    let events = collect_events(&compiled, json!({"messages": ["outer conversation"]}), RunConfig::new()).await;
    let last_state = match events.last() {
        Some(StreamEvent::Completed { state }) => state.clone(),
        other => panic!("expected completion, got {:?}", other),
    };

    assert_eq!(
        last_state["sections"],
        json!(["economist: 2 turns", "engineer: 2 turns"])
    );
    // Only the declared outputs flow back to the parent
    assert_eq!(last_state["messages"], json!(["outer conversation"]));

    let nested: Vec<(Vec<String>, String)> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Update { node, namespace, .. } if !namespace.is_empty() => {
                Some((namespace.clone(), node.clone()))
            }
            _ => None,
        })
        .collect();
    assert_eq!(
        nested,
        vec![
            (vec!["conduct_interview:0".to_string()], "ask_question".to_string()),
            (vec!["conduct_interview:0".to_string()], "write_section".to_string()),
            (vec!["conduct_interview:1".to_string()], "ask_question".to_string()),
            (vec!["conduct_interview:1".to_string()], "write_section".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_stream_node_filter() {
    let graph = staggered_fanout(vec![1, 1, 1]);
    let events = collect_events(&graph, json!({}), RunConfig::new().with_stream_nodes(["join"])).await;

    assert_eq!(events.len(), 2);
    assert_eq!(events[0].node(), Some("join"));
    assert!(matches!(events[1], StreamEvent::Completed { .. }));
}

/// Three-node interview whose every node takes `step_ms`
fn slow_interview(step_ms: u64) -> CompiledGraph {
    let mut graph = StateGraph::new(StateSchema::new().append("sections"));
    graph.set_name("interview");
    for name in ["ask_question", "answer_question", "write_section"] {
        graph.add_node(name, move |_| async move {
            tokio::time::sleep(Duration::from_millis(step_ms)).await;
            Ok(json!({"sections": [name]}))
        });
    }
    graph.add_edge(START, "ask_question");
    graph.add_edge("ask_question", "answer_question");
    graph.add_edge("answer_question", "write_section");
    graph.add_edge("write_section", END);
    graph
        .compile()
        .unwrap()
        .with_config(ExecutorConfig::new().with_node_timeout(Duration::from_millis(500)))
}

fn with_interview(child: CompiledGraph) -> CompiledGraph {
    let mut graph = StateGraph::new(StateSchema::new().append("sections"));
    graph.add_subgraph("interview", child);
    graph.add_edge(START, "interview");
    graph.add_edge("interview", END);
    graph
        .compile()
        .unwrap()
        .with_config(ExecutorConfig::new().with_node_timeout(Duration::from_millis(500)))
}

#[tokio::test(start_paused = true)]
async fn test_node_timeout_applies_per_child_call() {
    // 900ms in total, but no single call exceeds the 500ms budget
    let state = with_interview(slow_interview(300)).invoke(json!({})).await.unwrap();
    assert_eq!(
        state["sections"],
        json!(["ask_question", "answer_question", "write_section"])
    );

    let err = with_interview(slow_interview(700)).invoke(json!({})).await.unwrap_err();
    match err {
        GraphError::BranchFailures { failures, .. } => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].node, "interview");
            assert!(failures[0].error.contains("ask_question"));
            assert!(failures[0].error.contains("timed out"));
        }
        other => panic!("expected the child's timeout, got {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_nested_events_stream_before_slow_branch_finishes() {
    let mut child = StateGraph::new(StateSchema::new().append("sections"));
    child.set_name("child");
    child.add_node("fast", |_| async move { Ok(json!({"sections": ["fast"]})) });
    child.add_node("slow", |_| async move {
        tokio::time::sleep(Duration::from_millis(800)).await;
        Ok(json!({"sections": ["slow"]}))
    });
    child.add_edge(START, "fast");
    child.add_edge("fast", "slow");
    child.add_edge("slow", END);

    let mut graph = StateGraph::new(StateSchema::new().append("sections"));
    graph.add_noop_node("plan");
    graph.add_fanout("plan", |_: &Value| (0..2).map(|_| Send::new("child", json!({}))).collect());
    graph.add_subgraph("child", child.compile().unwrap());
    graph.add_edge(START, "plan");
    graph.add_edge("child", END);
    let graph = graph.compile().unwrap();

    let start = tokio::time::Instant::now();
    let mut stream = graph.stream(json!({}));
    let mut seen = Vec::new();
    while let Some(event) = stream.next().await {
        seen.push((start.elapsed(), event.unwrap()));
    }

    let nested: Vec<(Duration, String, String)> = seen
        .iter()
        .filter_map(|(at, e)| match e {
            StreamEvent::Update { node, namespace, .. } if !namespace.is_empty() => {
                Some((*at, namespace.join("/"), node.clone()))
            }
            _ => None,
        })
        .collect();
    let order: Vec<(&str, &str)> = nested.iter().map(|(_, ns, n)| (ns.as_str(), n.as_str())).collect();
    assert_eq!(
        order,
        vec![("child:0", "fast"), ("child:0", "slow"), ("child:1", "fast"), ("child:1", "slow")]
    );

    // The first branch streams live; the rest waits for it
    assert!(nested[0].0 < Duration::from_millis(800));
    assert!(nested[1].0 >= Duration::from_millis(800));
    assert!(nested[2].0 >= Duration::from_millis(800));
    assert!(matches!(seen.last(), Some((_, StreamEvent::Completed { .. }))));
}

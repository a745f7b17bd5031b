//! Research CLI
//!
//! Drives the research analyst workflow turn by turn. Runs are checkpointed to
//! disk, so a run suspended waiting for the user's reply can be resumed by a
//! later invocation.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use research_agent::{ConfigLoader, ResearchAgent, NODES_TO_DISPLAY, UPDATE_AS_NODE};
use serde_json::{json, Value};
use stategraph_core::{CompiledGraph, EventStream, Message, NodeFilter, StreamEvent};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "research")]
#[command(about = "Research analyst - plan analysts, run expert interviews, write a report", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file layered over the user-level one
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a research run
    Run {
        /// Research topic; without it the assistant asks for one
        #[arg(short, long)]
        topic: Option<String>,

        /// Number of analysts
        #[arg(short, long, requires = "topic")]
        max_analysts: Option<usize>,

        /// Run id (generated when omitted)
        #[arg(long)]
        run_id: Option<String>,
    },

    /// Reply to a run waiting for input
    Resume {
        #[arg(long)]
        run_id: String,

        /// The reply, e.g. "renewable energy with 3 analysts"
        #[arg(short, long)]
        message: String,
    },

    /// Show the latest checkpoint of a run
    State {
        #[arg(long)]
        run_id: String,

        /// List every checkpoint, newest first
        #[arg(long)]
        history: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut loader = ConfigLoader::new();
    if let Some(path) = &cli.config {
        if !path.exists() {
            bail!("config file not found: {}", path.display());
        }
        loader = loader.with_project_file(path);
    }
    let config = loader.load().await.context("loading configuration")?;
    let default_analysts = config.research.max_analysts;

    let agent = ResearchAgent::from_config(config).await?;
    let graph = agent.build_graph()?;
    info!(agent = ResearchAgent::NAME, "Research graph ready");

    match cli.command {
        Commands::Run {
            topic,
            max_analysts,
            run_id,
        } => {
            let run_id = run_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            println!("Run id: {}\n", run_id);

            let interrupted = print_events(agent.start_or_resume(&graph, &run_id, None), &run_id).await?;
            if let (Some(topic), true) = (topic, interrupted) {
                let analysts = max_analysts.unwrap_or(default_analysts);
                let request = Message::human(format!("Research {} with {} analysts", topic, analysts));
                let patch = json!({
                    "topic": topic,
                    "max_analysts": analysts,
                    "messages": [request],
                });
                let events = graph.start_or_resume(
                    &run_id,
                    None,
                    Some(patch),
                    Some(UPDATE_AS_NODE.to_string()),
                    NodeFilter::only(NODES_TO_DISPLAY),
                );
                print_events(events, &run_id).await?;
            }
        }
        Commands::Resume { run_id, message } => {
            print_events(agent.start_or_resume(&graph, &run_id, Some(&message)), &run_id).await?;
        }
        Commands::State { run_id, history } => show_state(&graph, &run_id, history).await?,
    }

    Ok(())
}

/// Print the displayed updates; returns whether the run is waiting for input
async fn print_events(mut events: EventStream, run_id: &str) -> Result<bool> {
    while let Some(event) = events.next().await {
        match event? {
            StreamEvent::Update { node, update, .. } => {
                if let Some(text) = last_message(&update) {
                    println!("[{}]\n{}\n", node, text);
                }
            }
            StreamEvent::TaskFailed { node, branch, error } => {
                eprintln!("task {} (branch {:?}) failed: {}", node, branch, error);
            }
            StreamEvent::Interrupted { .. } => {
                println!(
                    "Waiting for your reply. Continue with:\n  research resume --run-id {} --message \"<reply>\"",
                    run_id
                );
                return Ok(true);
            }
            StreamEvent::Completed { .. } => {
                println!("Run {} complete.", run_id);
                return Ok(false);
            }
        }
    }
    Ok(false)
}

fn last_message(update: &Value) -> Option<&str> {
    update
        .get("messages")
        .and_then(Value::as_array)
        .and_then(|messages| messages.last())
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
}

async fn show_state(graph: &CompiledGraph, run_id: &str, history: bool) -> Result<()> {
    let snapshots = if history {
        graph.state_history(run_id).await?
    } else {
        vec![graph.get_state(run_id).await?]
    };
    for snapshot in snapshots {
        println!(
            "step {:>3}  {}  next: [{}]{}",
            snapshot.step,
            snapshot.checkpoint_id,
            snapshot.next.join(", "),
            snapshot
                .interrupted_before
                .map(|node| format!("  (interrupted before {})", node))
                .unwrap_or_default()
        );
        if !history {
            println!("{}", serde_json::to_string_pretty(&snapshot.values)?);
        }
    }
    Ok(())
}

//! # research-agent
//!
//! A research analyst workflow built on `stategraph-core`.
//!
//! Given a topic, a planning sub-graph creates a team of AI analysts, one per
//! theme. Every analyst interviews an expert in parallel (a fan-out of the
//! interview sub-graph) grounded on web and encyclopedia search. The
//! resulting memos are synthesized into a report body, an introduction and a
//! conclusion, then assembled into the final report.
//!
//! ```rust,ignore
//! use research_agent::{ConfigLoader, ResearchAgent};
//! use futures::StreamExt;
//!
//! let config = ConfigLoader::new().load().await?;
//! let agent = ResearchAgent::from_config(config).await?;
//! let graph = agent.build_graph()?;
//!
//! // Greets and suspends before `user_input`
//! let mut events = agent.start_or_resume(&graph, "run-1", None);
//! while let Some(event) = events.next().await { /* show */ }
//!
//! // Resumes with the user's answer and runs to the final report
//! let mut events = agent.start_or_resume(&graph, "run-1", Some("Renewable energy, 2 analysts"));
//! ```

pub mod agent;
pub mod analyst;
pub mod config;
pub mod error;
pub mod interview;
pub mod model;
pub mod planning;
pub mod prompts;
pub mod report;
pub mod search;
pub mod state;

pub use agent::{initiate_all_interviews, reply_patch, ResearchAgent, NODES_TO_DISPLAY, UPDATE_AS_NODE};
pub use analyst::{Analyst, Perspectives, SearchQuery, UserInput};
pub use config::{ConfigLoader, ResearchConfig};
pub use error::{ResearchError, Result};
pub use interview::{build_interview_graph, route_messages};
pub use model::OpenAiChatModel;
pub use planning::build_planning_graph;
pub use report::compose_report;

//! Research session configuration
//!
//! Settings come from TOML files layered by [`ConfigLoader`] and are passed
//! explicitly into [`crate::ResearchAgent`]; nothing is read from global state
//! once a session is built.

mod loader;
mod schema;

pub use loader::ConfigLoader;
pub use schema::{
    CheckpointSettings, ExecutionSettings, ModelSettings, ResearchConfig, ResearchSettings, SearchSettings,
};

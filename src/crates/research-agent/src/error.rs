//! Error types for the research workflow

use stategraph_core::GraphError;
use thiserror::Error;

/// Result type alias for research operations
pub type Result<T> = std::result::Result<T, ResearchError>;

/// Errors raised while configuring or running a research session
#[derive(Error, Debug)]
pub enum ResearchError {
    /// Configuration could not be read or is invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// The workflow graph failed to build or run
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// A search backend answered with an error
    #[error("Search error: {0}")]
    Search(String),

    /// HTTP transport failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<ResearchError> for GraphError {
    fn from(error: ResearchError) -> Self {
        match error {
            ResearchError::Graph(inner) => inner,
            ResearchError::Config(msg) => GraphError::Configuration(msg),
            other => GraphError::Model(other.to_string()),
        }
    }
}

//! Typed values exchanged with the model and stored in research state

use serde::{Deserialize, Serialize};
use std::fmt;

/// An AI analyst persona focused on one sub-topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Analyst {
    /// Primary affiliation of the analyst
    pub affiliation: String,

    pub name: String,

    /// Role of the analyst in the context of the topic
    pub role: String,

    /// Focus, concerns and motives
    pub description: String,
}

impl Analyst {
    /// Multi-line persona used in interview prompts
    pub fn persona(&self) -> String {
        format!(
            "Name: {}\nRole: {}\nAffiliation: {}\nDescription: {}\n",
            self.name, self.role, self.affiliation, self.description
        )
    }
}

impl fmt::Display for Analyst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.name, self.role, self.affiliation)
    }
}

/// Model reply listing the analyst team
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Perspectives {
    pub analysts: Vec<Analyst>,
}

/// Model reply turning a conversation into a retrieval query
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub search_query: Option<String>,
}

/// Topic and team size extracted from the user's message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInput {
    pub topic: String,
    pub max_analysts: usize,
}

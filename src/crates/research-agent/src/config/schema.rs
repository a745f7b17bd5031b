//! Configuration schema for research sessions

use serde::{Deserialize, Serialize};
use stategraph_core::{ExecutorConfig, RetryPolicy};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable overriding the model API key
pub const ENV_API_KEY: &str = "RESEARCH_API_KEY";
/// Environment variable overriding the model endpoint
pub const ENV_BASE_URL: &str = "RESEARCH_BASE_URL";
/// Environment variable overriding the model name
pub const ENV_MODEL: &str = "RESEARCH_MODEL";
/// Environment variable holding the web search key
pub const ENV_TAVILY_API_KEY: &str = "TAVILY_API_KEY";

/// Complete configuration of a research session
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ResearchConfig {
    /// Chat model endpoint
    #[serde(default)]
    pub model: ModelSettings,

    /// Search backends used by the interviews
    #[serde(default)]
    pub search: SearchSettings,

    /// Research workflow knobs
    #[serde(default)]
    pub research: ResearchSettings,

    /// Executor limits
    #[serde(default)]
    pub execution: ExecutionSettings,

    /// Durable checkpoint location
    #[serde(default)]
    pub checkpoint: CheckpointSettings,
}

/// OpenAI-compatible chat endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelSettings {
    /// API base URL, up to and including the version segment
    pub base_url: String,

    /// Model name
    pub model: String,

    /// API key (supports `${VAR}` interpolation)
    pub api_key: Option<String>,

    /// Sampling temperature
    pub temperature: f32,

    /// HTTP request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434/v1".to_string(),
            model: "llama3.1".to_string(),
            api_key: None,
            temperature: 0.0,
            request_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchSettings {
    /// Tavily key for web search; web search is skipped without one
    pub tavily_api_key: Option<String>,

    /// Web results kept per query
    pub web_max_results: usize,

    /// Encyclopedia articles kept per query
    pub wikipedia_max_docs: usize,

    /// Encyclopedia API endpoint
    pub wikipedia_api_url: String,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            tavily_api_key: None,
            web_max_results: 3,
            wikipedia_max_docs: 2,
            wikipedia_api_url: "https://en.wikipedia.org/w/api.php".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResearchSettings {
    /// Analysts created when the user does not say how many
    pub max_analysts: usize,

    /// Question/answer cycles per interview
    pub max_num_turns: usize,

    /// Nodes the outer graph suspends before
    pub interrupt_before: Vec<String>,
}

impl Default for ResearchSettings {
    fn default() -> Self {
        Self {
            max_analysts: 3,
            max_num_turns: 2,
            interrupt_before: vec!["user_input".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutionSettings {
    /// Per-node time budget; a whole interview counts as one node
    pub node_timeout_secs: Option<u64>,

    /// Super-steps allowed per call
    pub recursion_limit: usize,

    /// Attempts per node, 1 disables retries
    pub retry_attempts: usize,

    /// Delay before the first retry in seconds
    pub retry_initial_interval_secs: f64,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            node_timeout_secs: Some(600),
            recursion_limit: 25,
            retry_attempts: 1,
            retry_initial_interval_secs: 1.0,
        }
    }
}

impl ExecutionSettings {
    /// Executor configuration for the research graphs
    pub fn executor_config(&self) -> ExecutorConfig {
        let mut config = ExecutorConfig::new().with_recursion_limit(self.recursion_limit);
        if let Some(secs) = self.node_timeout_secs {
            config = config.with_node_timeout(Duration::from_secs(secs));
        }
        if self.retry_attempts > 1 {
            config = config.with_retry_policy(
                RetryPolicy::new(self.retry_attempts).with_initial_interval(self.retry_initial_interval_secs),
            );
        }
        config
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct CheckpointSettings {
    /// SQLite database of the checkpoint saver, `~/.research/checkpoints.db` when unset
    pub database: Option<PathBuf>,
}

impl CheckpointSettings {
    pub fn resolved_database(&self) -> PathBuf {
        match &self.database {
            Some(path) => path.clone(),
            None => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".research")
                .join("checkpoints.db"),
        }
    }
}

impl ResearchConfig {
    /// Apply environment overrides and expand `${VAR}` values.
    ///
    /// `lookup` resolves a variable name; the loader passes the process
    /// environment.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = self.model.api_key.take() {
            self.model.api_key = Some(expand_env_var(&key, &lookup));
        }
        if let Some(key) = self.search.tavily_api_key.take() {
            self.search.tavily_api_key = Some(expand_env_var(&key, &lookup));
        }
        self.model.base_url = expand_env_var(&self.model.base_url, &lookup);

        if let Some(key) = lookup(ENV_API_KEY) {
            self.model.api_key = Some(key);
        }
        if let Some(url) = lookup(ENV_BASE_URL) {
            self.model.base_url = url;
        }
        if let Some(model) = lookup(ENV_MODEL) {
            self.model.model = model;
        }
        if self.search.tavily_api_key.is_none() {
            self.search.tavily_api_key = lookup(ENV_TAVILY_API_KEY);
        }
    }
}

/// Expand a whole-value `${VAR_NAME}` reference, leaving anything else as is
fn expand_env_var<F>(value: &str, lookup: &F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    match value.strip_prefix("${").and_then(|rest| rest.strip_suffix('}')) {
        Some(name) => lookup(name).unwrap_or_else(|| value.to_string()),
        None => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ResearchConfig::default();
        assert_eq!(config.model.base_url, "http://localhost:11434/v1");
        assert_eq!(config.research.max_num_turns, 2);
        assert_eq!(config.research.interrupt_before, vec!["user_input"]);
        assert_eq!(config.execution.recursion_limit, 25);
    }

    #[test]
    fn test_env_overrides_model_settings() {
        let mut config = ResearchConfig::default();
        config.apply_env(env(&[
            (ENV_API_KEY, "sk-test"),
            (ENV_MODEL, "gpt-4o-mini"),
            (ENV_BASE_URL, "https://api.openai.com/v1"),
        ]));
        assert_eq!(config.model.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.model.model, "gpt-4o-mini");
        assert_eq!(config.model.base_url, "https://api.openai.com/v1");
    }

    #[test]
    fn test_placeholder_expansion() {
        let mut config = ResearchConfig::default();
        config.search.tavily_api_key = Some("${MY_TAVILY}".to_string());
        config.model.api_key = Some("${MISSING}".to_string());
        config.apply_env(env(&[("MY_TAVILY", "tvly-123")]));
        assert_eq!(config.search.tavily_api_key.as_deref(), Some("tvly-123"));
        assert_eq!(config.model.api_key.as_deref(), Some("${MISSING}"));
    }

    #[test]
    fn test_executor_config_from_settings() {
        let settings = ExecutionSettings {
            node_timeout_secs: Some(30),
            recursion_limit: 40,
            retry_attempts: 3,
            retry_initial_interval_secs: 0.1,
        };
        let config = settings.executor_config();
        assert_eq!(config.node_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.recursion_limit, 40);
        assert_eq!(config.retry_policy.map(|p| p.max_attempts), Some(3));

        let config = ExecutionSettings::default().executor_config();
        assert!(config.retry_policy.is_none());
    }
}

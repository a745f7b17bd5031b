//! Configuration loader with layered sources
//!
//! Loads configuration from:
//! 1. Default values
//! 2. User-level config: ~/.research/research.toml
//! 3. Project-level config: ./.research/research.toml (or an explicit file)
//! 4. Environment variables (`RESEARCH_API_KEY`, `RESEARCH_BASE_URL`,
//!    `RESEARCH_MODEL`, `TAVILY_API_KEY`)
//!
//! Later sources override earlier ones key by key, so a project file that only
//! sets `[model] model` keeps the user's endpoint and key.

use super::schema::ResearchConfig;
use crate::error::{ResearchError, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

const CONFIG_DIR: &str = ".research";
const CONFIG_FILE: &str = "research.toml";

/// Loader that layers user and project config files over the defaults
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    user_config_path: Option<PathBuf>,
    project_config_path: Option<PathBuf>,
    use_env: bool,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            user_config_path: dirs::home_dir().map(|home| home.join(CONFIG_DIR).join(CONFIG_FILE)),
            project_config_path: std::env::current_dir()
                .ok()
                .map(|cwd| cwd.join(CONFIG_DIR).join(CONFIG_FILE)),
            use_env: true,
        }
    }

    /// Loader reading exactly the given files, in order
    pub fn with_paths(user: Option<PathBuf>, project: Option<PathBuf>) -> Self {
        Self {
            user_config_path: user,
            project_config_path: project,
            use_env: true,
        }
    }

    /// Replace the project-level file with an explicit one
    pub fn with_project_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.project_config_path = Some(path.into());
        self
    }

    /// Skip the environment layer
    pub fn without_env(mut self) -> Self {
        self.use_env = false;
        self
    }

    pub fn user_config_path(&self) -> Option<&Path> {
        self.user_config_path.as_deref()
    }

    pub fn project_config_path(&self) -> Option<&Path> {
        self.project_config_path.as_deref()
    }

    /// Load configuration with all layers applied
    pub async fn load(&self) -> Result<ResearchConfig> {
        let mut merged = toml::Value::try_from(ResearchConfig::default())
            .map_err(|e| ResearchError::Config(format!("Failed to encode defaults: {}", e)))?;
        info!("Loading configuration with defaults");

        for (layer, path) in [("user", &self.user_config_path), ("project", &self.project_config_path)] {
            let Some(path) = path else { continue };
            if !path.exists() {
                debug!(layer, path = %path.display(), "Config file not found, skipping");
                continue;
            }
            let table = Self::read_table(path).await?;
            debug!(layer, path = %path.display(), "Loaded config file");
            merge_values(&mut merged, table);
        }

        let mut config: ResearchConfig = merged
            .try_into()
            .map_err(|e| ResearchError::Config(format!("Invalid configuration: {}", e)))?;

        if self.use_env {
            config.apply_env(|name| std::env::var(name).ok());
        }

        info!(model = %config.model.model, base_url = %config.model.base_url, "Configuration loaded");
        Ok(config)
    }

    /// Parse a single file on its own, without defaults or environment
    pub async fn load_file(path: &Path) -> Result<ResearchConfig> {
        let content = Self::read_to_string(path).await?;
        toml::from_str(&content)
            .map_err(|e| ResearchError::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }

    async fn read_table(path: &Path) -> Result<toml::Value> {
        let content = Self::read_to_string(path).await?;
        content
            .parse::<toml::Table>()
            .map(toml::Value::Table)
            .map_err(|e| ResearchError::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }

    async fn read_to_string(path: &Path) -> Result<String> {
        fs::read_to_string(path)
            .await
            .map_err(|e| ResearchError::Config(format!("Failed to read {}: {}", path.display(), e)))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Recursively overlay `overlay` onto `base`; tables merge, other values replace
fn merge_values(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

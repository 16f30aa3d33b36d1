//! Configuration for the workflow engine.
//!
//! Loaded from a TOML file with every field defaulted, so an empty
//! file (or no file at all) yields a working local setup. The OpenAI
//! API key can also come from the environment, which takes precedence
//! over the file.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{WorkflowError, WorkflowResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub workflow: WorkflowConfig,
    pub openai: OpenAiConfig,
    pub checkpoint: CheckpointConfig,
    pub validation: ValidationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workflow: WorkflowConfig::default(),
            openai: OpenAiConfig::default(),
            checkpoint: CheckpointConfig::default(),
            validation: ValidationConfig::default(),
        }
    }
}

/// Workflow loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Bound on research retries and on code auto-fix attempts.
    pub max_retries: u32,
    /// Hard cap on node transitions in a single drive of the loop.
    pub max_steps: u32,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_steps: 64,
        }
    }
}

/// OpenAI-compatible generation backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    /// Model used for research and review-adjacent calls.
    pub research_model: String,
    /// Model used for epic/story/spec/code generation.
    pub generation_model: String,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            research_model: "gpt-4o-mini".to_string(),
            generation_model: "gpt-4o".to_string(),
            temperature: 0.2,
            timeout_secs: 120,
        }
    }
}

/// Checkpoint store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// SQLite database path. Special value ":memory:" keeps snapshots
    /// in process memory only.
    pub database_path: String,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            database_path: "codeloom.db".to_string(),
        }
    }
}

/// Code validation sandbox settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Interpreter used for syntax checks and test runs.
    pub python_bin: String,
    /// Per-command timeout for sandboxed tool invocations.
    pub tool_timeout_secs: u64,
    /// Whether to run the lint pass (requires ruff on PATH).
    pub lint_enabled: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            python_bin: "python3".to_string(),
            tool_timeout_secs: 60,
            lint_enabled: true,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, then apply environment
    /// overrides.
    pub fn load(path: impl AsRef<Path>) -> WorkflowResult<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            WorkflowError::ConfigError(format!(
                "failed to read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let mut config: Config = toml::from_str(&content)
            .map_err(|e| WorkflowError::ConfigError(format!("invalid config: {}", e)))?;
        config.apply_env();
        Ok(config)
    }

    /// Defaults plus environment overrides, for when no file exists.
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if !key.is_empty() {
                self.openai.api_key = key;
            }
        }
        if let Ok(url) = std::env::var("OPENAI_BASE_URL") {
            if !url.is_empty() {
                self.openai.base_url = url;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.workflow.max_retries, 3);
        assert_eq!(config.openai.base_url, "https://api.openai.com/v1");
        assert_eq!(config.validation.python_bin, "python3");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [workflow]
            max_retries = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.workflow.max_retries, 5);
        assert_eq!(config.workflow.max_steps, 64);
        assert_eq!(config.checkpoint.database_path, "codeloom.db");
    }

    #[test]
    fn test_empty_toml_is_valid() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.workflow.max_retries, 3);
    }
}

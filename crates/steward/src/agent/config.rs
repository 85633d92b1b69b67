//! Configuration for the [`Orchestrator`](super::orchestrator::Orchestrator).
//!
//! Every field has a default, and every sub-section can be given in TOML:
//!
//! ```toml
//! model = "anthropic/claude-sonnet-4"
//! max_iterations = 30
//!
//! [context]
//! max_context_tokens = 64000
//!
//! [rate]
//! requests_per_minute = 20
//!
//! [storage]
//! state_dir = ".steward"
//! ```
//!
//! Or from code with the builder methods:
//!
//! ```ignore
//! let config = OrchestratorConfig::new("anthropic/claude-sonnet-4", "You are a coding assistant.")
//!     .with_max_iterations(20)
//!     .with_context_window(64_000, 0.7)
//!     .with_state_dir(".steward");
//! ```

use crate::api::rate::RateLimits;
use crate::api::retry::RetryConfig;
use crate::context::budget::ContextConfig;
use crate::context::summarizer::SummarizerConfig;
use crate::error::StewardError;
use crate::tools::core::DEFAULT_MAX_RESULT_BYTES;
use crate::tools::sandbox::SandboxConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ── Storage config ────────────────────────────────────────────────

/// Where session state outlives the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for the undo log and persisted summaries. Relative paths
    /// resolve against the workspace root. `None` keeps everything in memory.
    pub state_dir: Option<PathBuf>,
    /// Key for the summary record. Defaults to the workspace directory name.
    pub project_key: Option<String>,
    /// Load summaries written by earlier sessions.
    pub carry_summaries: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_dir: None,
            project_key: None,
            carry_summaries: true,
        }
    }
}

// ── Main config ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Model identifier (e.g. `"anthropic/claude-sonnet-4"`).
    pub model: String,
    pub system_prompt: String,
    /// Model calls allowed in one turn before it is aborted.
    pub max_iterations: u32,
    /// Maximum tokens per model response.
    pub max_tokens: u32,
    pub temperature: f32,
    pub context: ContextConfig,
    pub summarizer: SummarizerConfig,
    pub rate: RateLimits,
    pub sandbox: SandboxConfig,
    /// Retries for transient model-call failures.
    pub retry: RetryConfig,
    pub command_timeout_secs: u64,
    /// Longest operation result fed back to the model, in bytes.
    pub max_result_bytes: usize,
    pub storage: StorageConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            model: crate::DEFAULT_MODEL.to_string(),
            system_prompt: String::new(),
            max_iterations: 25,
            max_tokens: 4096,
            temperature: 0.2,
            context: ContextConfig::default(),
            summarizer: SummarizerConfig::default(),
            rate: RateLimits::default(),
            sandbox: SandboxConfig::default(),
            retry: RetryConfig::default(),
            command_timeout_secs: 120,
            max_result_bytes: DEFAULT_MAX_RESULT_BYTES,
            storage: StorageConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Create a config with a model and system prompt, everything else default.
    pub fn new(model: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system_prompt: system_prompt.into(),
            ..Default::default()
        }
    }

    /// Parse a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, StewardError> {
        toml::from_str(text).map_err(|e| StewardError::config(e.to_string()))
    }

    /// Load a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StewardError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| StewardError::config(format!("{}: {e}", path.display())))?;
        toml::from_str(&text).map_err(|e| StewardError::config(format!("{}: {e}", path.display())))
    }

    // ── Builder methods ───────────────────────────────────────────

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the context window size and the fraction at which summarization
    /// starts.
    pub fn with_context_window(mut self, max_context_tokens: usize, threshold: f64) -> Self {
        self.context.max_context_tokens = max_context_tokens;
        self.context.summarization_threshold = threshold;
        self
    }

    pub fn with_rate_limits(mut self, rate: RateLimits) -> Self {
        self.rate = rate;
        self
    }

    /// Enable automatic retries for transient API failures (429, 5xx,
    /// network errors). Pass `0` to disable.
    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.retry.max_retries = max_retries;
        self
    }

    /// Persist the undo log and summaries under `dir`.
    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage.state_dir = Some(dir.into());
        self
    }

    pub fn with_project_key(mut self, key: impl Into<String>) -> Self {
        self.storage.project_key = Some(key.into());
        self
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = OrchestratorConfig::new("m", "sys");
        assert_eq!(config.max_iterations, 25);
        assert_eq!(config.max_tokens, 4096);
        assert_eq!(config.context.max_context_tokens, 128_000);
        assert_eq!(config.rate.requests_per_minute, 40);
        assert!(config.storage.state_dir.is_none());
        assert!(config.storage.carry_summaries);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = OrchestratorConfig::from_toml_str(
            r#"
            model = "openai/gpt-4o"
            max_iterations = 8

            [context]
            max_context_tokens = 8000
            summarization_threshold = 0.5

            [rate]
            tokens_per_minute = 1000

            [sandbox]
            allowed_commands = ["cargo"]

            [storage]
            state_dir = ".steward"
            "#,
        )
        .unwrap();
        assert_eq!(config.model, "openai/gpt-4o");
        assert_eq!(config.max_iterations, 8);
        assert_eq!(config.context.max_context_tokens, 8000);
        assert_eq!(config.context.keep_recent, 10);
        assert_eq!(config.rate.tokens_per_minute, 1000);
        assert_eq!(config.rate.requests_per_minute, 40);
        assert_eq!(config.sandbox.allowed_commands, vec!["cargo".to_string()]);
        assert_eq!(config.storage.state_dir, Some(PathBuf::from(".steward")));
        assert_eq!(config.max_result_bytes, DEFAULT_MAX_RESULT_BYTES);
    }

    #[test]
    fn bad_toml_is_a_config_error() {
        let err = OrchestratorConfig::from_toml_str("max_iterations = \"many\"").unwrap_err();
        assert!(matches!(err, StewardError::Config(_)));
    }

    #[test]
    fn load_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("steward.toml");
        std::fs::write(&path, "max_tokens = 512\n").unwrap();
        assert_eq!(OrchestratorConfig::load(&path).unwrap().max_tokens, 512);

        let err = OrchestratorConfig::load(dir.path().join("missing.toml")).unwrap_err();
        assert!(err.to_string().contains("missing.toml"));
    }

    #[test]
    fn builders() {
        let config = OrchestratorConfig::new("m", "sys")
            .with_max_iterations(3)
            .with_context_window(8000, 0.7)
            .with_retries(0)
            .with_rate_limits(RateLimits::unlimited())
            .with_state_dir("/tmp/state")
            .with_project_key("demo");
        assert_eq!(config.max_iterations, 3);
        assert_eq!(config.context.trigger_tokens(), 5600);
        assert_eq!(config.retry.max_retries, 0);
        assert_eq!(config.rate.requests_per_minute, 0);
        assert_eq!(config.storage.project_key.as_deref(), Some("demo"));
    }
}

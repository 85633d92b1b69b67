//! Coding-agent configuration.
//!
//! [`CodeConfig`] holds what the command line can set and turns it into a
//! [`OrchestratorConfig`] via [`build_orchestrator_config`](CodeConfig::build_orchestrator_config).
//! Settings are layered: built-in defaults, then a TOML file (`--config`, or
//! `steward.toml` in the working directory if present), then command-line
//! flags.

use std::path::{Path, PathBuf};

use steward::agent::config::OrchestratorConfig;
use steward::error::StewardError;

use crate::prompt::coding_system_prompt;

/// Config file picked up from the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "steward.toml";

/// State directory used when neither the file nor the flags name one.
pub const DEFAULT_STATE_DIR: &str = ".steward";

/// Settings for one coding-agent run. `None` means "keep the layered value".
#[derive(Debug, Clone)]
pub struct CodeConfig {
    pub workdir: PathBuf,
    pub config_file: Option<PathBuf>,
    pub model: Option<String>,
    pub max_iterations: Option<u32>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub state_dir: Option<PathBuf>,
}

impl Default for CodeConfig {
    fn default() -> Self {
        Self {
            workdir: PathBuf::from("."),
            config_file: None,
            model: None,
            max_iterations: None,
            max_tokens: None,
            temperature: None,
            state_dir: None,
        }
    }
}

impl CodeConfig {
    /// Resolve the layered [`OrchestratorConfig`].
    pub fn build_orchestrator_config(&self) -> Result<OrchestratorConfig, StewardError> {
        let mut config = match self.config_path() {
            Some(path) => OrchestratorConfig::load(&path)?,
            None => OrchestratorConfig::default(),
        };

        if config.system_prompt.trim().is_empty() {
            config.system_prompt = coding_system_prompt();
        }
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        if let Some(n) = self.max_iterations {
            config.max_iterations = n;
        }
        if let Some(n) = self.max_tokens {
            config.max_tokens = n;
        }
        if let Some(t) = self.temperature {
            config.temperature = t;
        }
        match &self.state_dir {
            Some(dir) => config.storage.state_dir = Some(dir.clone()),
            None if config.storage.state_dir.is_none() => {
                config.storage.state_dir = Some(PathBuf::from(DEFAULT_STATE_DIR));
            }
            None => {}
        }
        Ok(config)
    }

    /// The explicit config file, or `steward.toml` in the workdir if it exists.
    fn config_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_file {
            return Some(path.clone());
        }
        let candidate = Path::new(&self.workdir).join(DEFAULT_CONFIG_FILE);
        candidate.is_file().then_some(candidate)
    }
}

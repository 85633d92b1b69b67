//! Terminal coding agent built on the steward core.
//!
//! `steward-code` wires an [`Orchestrator`](steward::agent::Orchestrator)
//! to the terminal: layered configuration, a coding system prompt, progress
//! output, and the interactive command set.
//!
//! # Library usage
//!
//! ```ignore
//! use steward_code::CodeConfig;
//! use steward::prelude::*;
//!
//! let config = CodeConfig { workdir: "./project".into(), ..Default::default() }
//!     .build_orchestrator_config()?;
//! let mut orchestrator = Orchestrator::new(&client, "./project", config)?;
//! ```
//!
//! # Binary
//!
//! ```sh
//! # One-shot mode
//! steward-code --prompt "Add error handling to src/main.rs"
//!
//! # Interactive mode (default)
//! steward-code --workdir /path/to/project
//! ```

pub mod command;
pub mod config;
pub mod console;
pub mod prompt;

pub use command::Command;
pub use config::CodeConfig;
pub use console::ConsoleHandler;
pub use prompt::coding_system_prompt;

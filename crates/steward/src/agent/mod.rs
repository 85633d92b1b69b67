//! Agent runtime: the [`Orchestrator`] turn loop and its supporting modules.
//!
//! - [`orchestrator::Orchestrator`]: drives one user turn through budget
//!   enforcement, prompt assembly, rate gating, the model call and operation
//!   execution. Start here.
//! - [`config::OrchestratorConfig`]: model, iteration cap, and every
//!   sub-system's settings; loadable from TOML.
//! - [`events`]: [`EventHandler`] trait, [`TurnEvent`] enum and the
//!   per-operation [`OperationTrace`].
//! - [`session`]: per-session state: conversation, retry guard, rate window.

pub mod config;
pub mod events;
mod execution;
pub mod orchestrator;
pub mod session;

pub use config::{OrchestratorConfig, StorageConfig};
pub use events::{
    CompositeEventHandler, EventHandler, LoggingHandler, NoopHandler, OperationOutcome,
    OperationTrace, TurnEvent, TurnResult,
};
pub use orchestrator::Orchestrator;
pub use session::Session;

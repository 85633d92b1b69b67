//! Model interaction layer: the client seam, request throttling, and retry.
//!
//! These modules sit between the [`Orchestrator`](crate::agent::orchestrator::Orchestrator)
//! loop and the OpenRouter API:
//!
//! - [`model`]: the [`ModelClient`] trait every model call goes through, and
//!   request-size estimation for rate accounting.
//! - [`rate`]: [`RateGovernor`] with requests/min and tokens/min ceilings over a
//!   trailing 60-second window, with cancellable waiting.
//! - [`retry`]: transient error detection (429, 5xx, network timeouts) with
//!   configurable exponential backoff and jitter. Never retries 400/401 errors.

pub mod model;
pub mod rate;
pub mod retry;

// Re-export commonly used items at the module level.
pub use model::{ModelClient, ModelFuture, estimate_request_tokens};
pub use rate::{GovernedModel, RateGovernor, RateLimits, RateUsage};
pub use retry::{RetryConfig, retry_api_call};

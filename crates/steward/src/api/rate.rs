//! Sliding-window rate governor for outbound model requests.
//!
//! Two ceilings are enforced over a trailing 60-second window: requests
//! issued and estimated tokens consumed. [`RateGovernor::acquire`] admits a
//! request only if both totals stay at or under their ceilings after adding
//! it; otherwise the caller sleeps until enough of the oldest samples age out.
//!
//! Time is measured with [`tokio::time::Instant`] so paused-clock tests can
//! drive the window deterministically.

use crate::api::model::{ModelClient, ModelFuture};
use crate::error::RateLimitError;
use crate::ChatRequest;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Length of the trailing accounting window.
pub const WINDOW: Duration = Duration::from_secs(60);

/// Per-minute ceilings. A zero ceiling disables that dimension.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimits {
    pub requests_per_minute: u32,
    pub tokens_per_minute: u64,
    /// Longest a single `acquire` may wait before giving up.
    pub max_wait_secs: u64,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            requests_per_minute: 40,
            tokens_per_minute: 80_000,
            max_wait_secs: 120,
        }
    }
}

impl RateLimits {
    /// No ceilings at all.
    pub fn unlimited() -> Self {
        Self {
            requests_per_minute: 0,
            tokens_per_minute: 0,
            max_wait_secs: 0,
        }
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }
}

#[derive(Debug, Clone, Copy)]
struct RateSample {
    at: Instant,
    tokens: u64,
}

/// Admitted requests inside the trailing window.
#[derive(Debug, Default)]
struct RateWindow {
    samples: VecDeque<RateSample>,
}

impl RateWindow {
    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.samples.front() {
            if now.duration_since(front.at) >= WINDOW {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn totals(&self) -> (u32, u64) {
        let tokens = self.samples.iter().map(|s| s.tokens).sum();
        (self.samples.len() as u32, tokens)
    }

    /// How long until a request of `tokens` fits, or `None` if it fits now.
    fn wait_for(&self, limits: &RateLimits, tokens: u64, now: Instant) -> Option<Duration> {
        let (mut requests, mut used) = self.totals();
        let fits = |requests: u32, used: u64| {
            (limits.requests_per_minute == 0 || requests < limits.requests_per_minute)
                && (limits.tokens_per_minute == 0 || used + tokens <= limits.tokens_per_minute)
        };
        if fits(requests, used) {
            return None;
        }
        for sample in &self.samples {
            requests -= 1;
            used -= sample.tokens;
            if fits(requests, used) {
                return Some((sample.at + WINDOW).saturating_duration_since(now));
            }
        }
        // Unreachable when the request alone fits under the token ceiling.
        Some(WINDOW)
    }
}

/// Snapshot of the current window for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateUsage {
    pub requests: u32,
    pub tokens: u64,
}

/// Gate for outbound model requests.
///
/// The mutex is never held across an await: each loop iteration locks,
/// decides, and releases before sleeping.
#[derive(Debug)]
pub struct RateGovernor {
    limits: RateLimits,
    window: Mutex<RateWindow>,
}

impl RateGovernor {
    pub fn new(limits: RateLimits) -> Self {
        Self {
            limits,
            window: Mutex::new(RateWindow::default()),
        }
    }

    pub fn limits(&self) -> &RateLimits {
        &self.limits
    }

    /// Wait until a request estimated at `estimated_tokens` can be issued,
    /// then record it.
    pub async fn acquire(
        &self,
        estimated_tokens: u64,
        cancel: &CancellationToken,
    ) -> Result<(), RateLimitError> {
        let ceiling = self.limits.tokens_per_minute;
        if ceiling > 0 && estimated_tokens > ceiling {
            return Err(RateLimitError::RequestTooLarge {
                estimated: estimated_tokens,
                ceiling,
            });
        }

        let started = Instant::now();
        let max_wait = self.limits.max_wait();
        loop {
            let wait = {
                let now = Instant::now();
                let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());
                window.prune(now);
                match window.wait_for(&self.limits, estimated_tokens, now) {
                    None => {
                        window.samples.push_back(RateSample {
                            at: now,
                            tokens: estimated_tokens,
                        });
                        let (requests, tokens) = window.totals();
                        debug!(
                            "Rate admit: ~{estimated_tokens} tokens (window: {requests} requests, {tokens} tokens)"
                        );
                        return Ok(());
                    }
                    Some(wait) => wait,
                }
            };

            let waited = started.elapsed();
            if waited + wait > max_wait {
                return Err(RateLimitError::WaitExceeded {
                    wait: waited + wait,
                    max_wait,
                });
            }

            info!("Rate limit reached, waiting {wait:?}");
            tokio::select! {
                _ = cancel.cancelled() => return Err(RateLimitError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Current usage inside the trailing window.
    pub fn usage(&self) -> RateUsage {
        let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());
        window.prune(Instant::now());
        let (requests, tokens) = window.totals();
        RateUsage { requests, tokens }
    }

    /// Forget every recorded sample.
    pub fn reset(&self) {
        let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());
        window.samples.clear();
    }
}

// ── Governed client ────────────────────────────────────────────────

/// A [`ModelClient`] that acquires from a [`RateGovernor`] before every call.
pub struct GovernedModel<'a> {
    inner: &'a dyn ModelClient,
    governor: &'a RateGovernor,
    cancel: &'a CancellationToken,
    chars_per_token: f64,
}

impl<'a> GovernedModel<'a> {
    pub fn new(
        inner: &'a dyn ModelClient,
        governor: &'a RateGovernor,
        cancel: &'a CancellationToken,
        chars_per_token: f64,
    ) -> Self {
        Self {
            inner,
            governor,
            cancel,
            chars_per_token,
        }
    }
}

impl ModelClient for GovernedModel<'_> {
    fn chat<'b>(&'b self, request: &'b ChatRequest) -> ModelFuture<'b> {
        Box::pin(async move {
            let estimate =
                crate::api::model::estimate_request_tokens(request, self.chars_per_token);
            self.governor
                .acquire(estimate, self.cancel)
                .await
                .map_err(|e| e.to_string())?;
            self.inner.chat(request).await
        })
    }
}

//! Keeps the assembled prompt under the context budget.
//!
//! When the prompt crosses `max_context_tokens × summarization_threshold`:
//!
//! 1. The `keep_recent` newest messages stay verbatim.
//! 2. Up to `max_candidate` of the aged messages just before them become the
//!    summarization candidate. Anything older is dropped.
//! 3. The candidate is condensed into one [`ConversationSummary`]. If that
//!    fails, the oldest half of the candidate is dropped instead and the rest
//!    goes back into the live conversation.
//! 4. While still over the threshold, the oldest live messages are pruned,
//!    always leaving the newest one.
//! 5. If the prompt still exceeds the whole window, the conversation is
//!    cleared and [`TurnError::BudgetExhausted`] is returned.

use crate::api::model::ModelClient;
use crate::context::budget::{BudgetStatus, ContextConfig};
use crate::context::conversation::Conversation;
use crate::context::layout::{self, ContextBreakdown};
use crate::context::store::SummaryStore;
use crate::context::summarizer::{ConversationSummary, Summarizer};
use crate::error::TurnError;
use tracing::{debug, info, warn};

/// What one enforcement pass did.
#[derive(Debug, Clone, Default)]
pub struct EnforcementReport {
    pub tokens_before: usize,
    pub tokens_after: usize,
    /// The summary created, if summarization succeeded.
    pub summary: Option<ConversationSummary>,
    /// Messages older than the candidate block, dropped outright.
    pub dropped: usize,
    /// Candidate messages dropped by the truncation fallback.
    pub truncated: usize,
    /// Messages removed by the final pruning loop.
    pub pruned: usize,
}

impl EnforcementReport {
    /// Whether any summarization or pruning happened.
    pub fn acted(&self) -> bool {
        self.summary.is_some() || self.dropped + self.truncated + self.pruned > 0
    }

    pub fn removed(&self) -> usize {
        self.dropped + self.truncated + self.pruned
    }
}

#[derive(Debug)]
pub struct ContextManager {
    config: ContextConfig,
    summarizer: Summarizer,
}

impl ContextManager {
    pub fn new(config: ContextConfig, summarizer: Summarizer) -> Self {
        let summarizer = summarizer.with_chars_per_token(config.chars_per_token);
        Self { config, summarizer }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn summarizer(&self) -> &Summarizer {
        &self.summarizer
    }

    /// Token estimate of the prompt that would be sent now.
    pub fn breakdown(
        &self,
        system_prompt: &str,
        conversation: &Conversation,
        store: &SummaryStore,
    ) -> ContextBreakdown {
        layout::breakdown(
            system_prompt,
            &store.summaries_for_prompt(self.config.max_summaries_in_prompt),
            conversation,
            self.config.chars_per_token,
        )
    }

    fn prompt_tokens(
        &self,
        system_prompt: &str,
        conversation: &Conversation,
        store: &SummaryStore,
    ) -> usize {
        self.breakdown(system_prompt, conversation, store).total()
    }

    pub fn status(
        &self,
        system_prompt: &str,
        conversation: &Conversation,
        store: &SummaryStore,
    ) -> BudgetStatus {
        BudgetStatus {
            current_tokens: self.prompt_tokens(system_prompt, conversation, store),
            max_tokens: self.config.max_context_tokens,
            summary_count: store.len(),
        }
    }

    /// Bring the prompt under the summarization threshold. Does nothing when
    /// it already is.
    pub async fn enforce(
        &self,
        session_id: &str,
        system_prompt: &str,
        conversation: &mut Conversation,
        store: &mut SummaryStore,
        model: &dyn ModelClient,
    ) -> Result<EnforcementReport, TurnError> {
        let mut report = EnforcementReport {
            tokens_before: self.prompt_tokens(system_prompt, conversation, store),
            ..Default::default()
        };
        if !self.config.should_summarize(report.tokens_before) {
            report.tokens_after = report.tokens_before;
            return Ok(report);
        }
        info!(
            "Context over threshold: ~{} of {} tokens, {} live messages",
            report.tokens_before,
            self.config.trigger_tokens(),
            conversation.len()
        );

        let aged = conversation.len().saturating_sub(self.config.keep_recent);
        if aged > 0 {
            let candidate_len = aged.min(self.config.max_candidate);
            let older = conversation.drain_oldest(aged - candidate_len);
            report.dropped = older.len();
            let candidate = conversation.drain_oldest(candidate_len);

            let summary = self
                .summarizer
                .summarize(session_id, &candidate, model)
                .await;
            let condensed = summary.tokens_after < summary.tokens_before;
            let stored = if condensed {
                store.append(summary.clone()).map_err(|e| {
                    warn!("Failed to store summary: {e}");
                })
            } else {
                warn!(
                    "Summary of messages {}-{} did not shrink them ({} -> {} tokens)",
                    summary.first_ordinal,
                    summary.last_ordinal,
                    summary.tokens_before,
                    summary.tokens_after
                );
                Err(())
            };

            match stored {
                Ok(()) => {
                    debug!(
                        "Stored summary of messages {}-{}",
                        summary.first_ordinal, summary.last_ordinal
                    );
                    report.summary = Some(summary);
                }
                Err(()) => {
                    let drop = candidate.len().div_ceil(2);
                    report.truncated = drop;
                    conversation.restore_front(candidate.into_iter().skip(drop).collect());
                    warn!("Summarization fell back to truncation: dropped {drop} oldest messages");
                }
            }
        }

        while self
            .config
            .should_summarize(self.prompt_tokens(system_prompt, conversation, store))
            && conversation.len() > 1
        {
            conversation.drain_oldest(1);
            report.pruned += 1;
        }
        if report.pruned > 0 {
            debug!("Pruned {} oldest messages", report.pruned);
        }

        report.tokens_after = self.prompt_tokens(system_prompt, conversation, store);
        if report.tokens_after > self.config.max_context_tokens {
            warn!(
                "Context budget exhausted at ~{} tokens; resetting conversation",
                report.tokens_after
            );
            conversation.clear();
            return Err(TurnError::BudgetExhausted {
                current_tokens: report.tokens_after,
                max_tokens: self.config.max_context_tokens,
            });
        }
        info!(
            "Context reduced: ~{} -> ~{} tokens",
            report.tokens_before, report.tokens_after
        );
        Ok(report)
    }
}

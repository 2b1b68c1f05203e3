//! Per-chunk summaries used as retrieval metadata.
//!
//! The pipeline runs in one of two [`SummaryStrategy`] modes. Sequential mode threads every
//! prior summary into the next request, trimmed to an estimated-token budget. Bounded-parallel
//! mode launches all requests at once behind a counting admission gate and threads the last
//! `context_window` summaries that had completed when each request was admitted.
//!
//! A failed provider call never aborts the batch: it degrades to an excerpt of the chunk.

mod prompt;
mod strategy;

pub use prompt::{build_excerpt, build_summary_prompt, estimate_tokens, truncate_context};

use std::sync::Arc;

use crate::completion::CompletionClient;

/// Execution mode of the summarization pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryStrategy {
    /// One request at a time, in chunk order.
    Sequential,
    /// All requests launched together; at most `concurrency` in flight.
    BoundedParallel {
        /// Size of the admission gate.
        concurrency: usize,
    },
}

/// Tunables for [`SummarizationPipeline`].
#[derive(Debug, Clone)]
pub struct SummarySettings {
    /// Execution mode.
    pub strategy: SummaryStrategy,
    /// Number of previous summaries threaded into bounded-parallel prompts.
    pub context_window: usize,
    /// Estimated-token budget for sequential-mode context.
    pub context_token_budget: usize,
    /// Characters of chunk text passed to the provider.
    pub max_input_chars: usize,
    /// Words kept in the excerpt fallback.
    pub excerpt_words: usize,
    /// Sampling temperature.
    pub temperature: f32,
    /// Cap on generated tokens.
    pub max_tokens: u32,
}

impl SummarySettings {
    /// Default admission gate size.
    pub const DEFAULT_CONCURRENCY: usize = 10;
    /// Default number of previous summaries used as context.
    pub const DEFAULT_CONTEXT_WINDOW: usize = 5;
    /// Default sequential-mode context budget in estimated tokens.
    pub const DEFAULT_CONTEXT_TOKEN_BUDGET: usize = 1000;
}

impl Default for SummarySettings {
    fn default() -> Self {
        Self {
            strategy: SummaryStrategy::BoundedParallel {
                concurrency: Self::DEFAULT_CONCURRENCY,
            },
            context_window: Self::DEFAULT_CONTEXT_WINDOW,
            context_token_budget: Self::DEFAULT_CONTEXT_TOKEN_BUDGET,
            max_input_chars: 2000,
            excerpt_words: 30,
            temperature: 0.3,
            max_tokens: 60,
        }
    }
}

/// Result of summarizing one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryOutcome {
    /// Summary returned by the provider.
    Generated(String),
    /// Provider call failed; an excerpt of the chunk stands in.
    Fallback {
        /// First words of the chunk followed by an ellipsis.
        excerpt: String,
        /// Provider failure.
        reason: String,
    },
}

impl SummaryOutcome {
    /// Text to store as the chunk summary.
    pub fn text(&self) -> &str {
        match self {
            Self::Generated(summary) => summary,
            Self::Fallback { excerpt, .. } => excerpt,
        }
    }

    /// Provider summary, when the call succeeded.
    pub fn generated(&self) -> Option<&str> {
        match self {
            Self::Generated(summary) => Some(summary),
            Self::Fallback { .. } => None,
        }
    }

    /// Whether the excerpt fallback was used.
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }
}

/// Produces one [`SummaryOutcome`] per input text.
#[derive(Clone)]
pub struct SummarizationPipeline {
    client: Arc<dyn CompletionClient>,
    settings: SummarySettings,
}

impl SummarizationPipeline {
    /// Build a pipeline over a completion provider.
    pub fn new(client: Arc<dyn CompletionClient>, settings: SummarySettings) -> Self {
        Self { client, settings }
    }

    /// Settings in effect.
    pub fn settings(&self) -> &SummarySettings {
        &self.settings
    }

    /// Summarize the chunks of one document, threading previous summaries as context.
    ///
    /// Always returns exactly `chunks.len()` outcomes, in chunk order.
    pub async fn summarize_document(&self, chunks: &[String]) -> Vec<SummaryOutcome> {
        let outcomes = match self.settings.strategy {
            SummaryStrategy::Sequential => strategy::run_sequential(self, chunks).await,
            SummaryStrategy::BoundedParallel { concurrency } => {
                strategy::run_bounded_parallel(self, chunks, concurrency, true).await
            }
        };
        log_batch("document", &outcomes);
        outcomes
    }

    /// Summarize unrelated texts with no shared context, behind the admission gate.
    pub async fn summarize_isolated(&self, texts: &[String]) -> Vec<SummaryOutcome> {
        let concurrency = match self.settings.strategy {
            SummaryStrategy::BoundedParallel { concurrency } => concurrency,
            SummaryStrategy::Sequential => SummarySettings::DEFAULT_CONCURRENCY,
        };
        let outcomes = strategy::run_bounded_parallel(self, texts, concurrency, false).await;
        log_batch("isolated", &outcomes);
        outcomes
    }

    /// One provider call; failures degrade to the excerpt fallback.
    pub(crate) async fn summarize_one(&self, text: &str, context: Option<&str>) -> SummaryOutcome {
        let request = build_summary_prompt(text, context, &self.settings);
        match self.client.complete(request).await {
            Ok(summary) => SummaryOutcome::Generated(summary),
            Err(error) => {
                tracing::warn!(error = %error, "Summary generation failed; using excerpt fallback");
                SummaryOutcome::Fallback {
                    excerpt: build_excerpt(text, self.settings.excerpt_words),
                    reason: error.to_string(),
                }
            }
        }
    }
}

fn log_batch(mode: &str, outcomes: &[SummaryOutcome]) {
    let fallbacks = outcomes.iter().filter(|outcome| outcome.is_fallback()).count();
    tracing::debug!(
        mode,
        total = outcomes.len(),
        fallbacks,
        "Summary batch finished"
    );
}

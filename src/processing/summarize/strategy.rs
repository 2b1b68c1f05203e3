//! Sequential and bounded-parallel execution of summary requests.

use futures_util::future::join_all;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Semaphore;

use super::prompt::{render_context, truncate_context};
use super::{SummarizationPipeline, SummaryOutcome};

/// Summaries strictly in order; each request sees every earlier summary that fits the budget.
pub(super) async fn run_sequential(
    pipeline: &SummarizationPipeline,
    chunks: &[String],
) -> Vec<SummaryOutcome> {
    let budget = pipeline.settings().context_token_budget;
    let mut previous: Vec<String> = Vec::new();
    let mut outcomes = Vec::with_capacity(chunks.len());

    for (position, chunk) in chunks.iter().enumerate() {
        let context = render_context(&truncate_context(&previous, budget));
        let outcome = pipeline.summarize_one(chunk, context.as_deref()).await;
        if let Some(summary) = outcome.generated() {
            previous.push(summary.to_string());
        }
        tracing::trace!(chunk_index = position + 1, fallback = outcome.is_fallback(), "Chunk summarized");
        outcomes.push(outcome);
    }

    outcomes
}

/// All requests launched together, at most `concurrency` in flight.
///
/// With `threaded_context`, a request admitted through the gate sees the last
/// `context_window` summaries among earlier chunks that had completed by then.
pub(super) async fn run_bounded_parallel(
    pipeline: &SummarizationPipeline,
    chunks: &[String],
    concurrency: usize,
    threaded_context: bool,
) -> Vec<SummaryOutcome> {
    let gate = Arc::new(Semaphore::new(concurrency.max(1)));
    let completed: Mutex<Vec<Option<String>>> = Mutex::new(vec![None; chunks.len()]);
    let window = pipeline.settings().context_window;

    let tasks = chunks.iter().enumerate().map(|(position, chunk)| {
        let gate = Arc::clone(&gate);
        let completed = &completed;
        async move {
            let _permit = match gate.acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(error) => {
                    tracing::warn!(error = %error, "Admission gate closed; running unthrottled");
                    None
                }
            };

            let context = if threaded_context && window > 0 {
                let snapshot = completed.lock().unwrap_or_else(PoisonError::into_inner);
                let earlier: Vec<&str> = snapshot[..position]
                    .iter()
                    .filter_map(|summary| summary.as_deref())
                    .collect();
                let start = earlier.len().saturating_sub(window);
                render_context(&earlier[start..])
            } else {
                None
            };

            let outcome = pipeline.summarize_one(chunk, context.as_deref()).await;
            if let Some(summary) = outcome.generated() {
                completed.lock().unwrap_or_else(PoisonError::into_inner)[position] =
                    Some(summary.to_string());
            }
            outcome
        }
    });

    join_all(tasks).await
}

//! Batch regeneration of chunk summaries for records already in the store.

use std::sync::Arc;

use crate::metrics::IngestionMetrics;
use crate::store::{ChunkMetadata, StoredRecord, VectorStore};

use super::chunking::contains_math;
use super::summarize::SummarizationPipeline;
use super::types::{RewriteError, RewriteReport};

/// Default number of records summarized per batch.
pub const DEFAULT_REWRITE_BATCH_SIZE: usize = 20;

/// Predicate over `(id, metadata)` selecting records to rewrite.
pub type RecordPredicate<'a> = &'a (dyn Fn(&str, &ChunkMetadata) -> bool + Send + Sync);

/// Regenerates `summary` and `has_math` on stored records in fixed-size batches.
pub struct MetadataBatchRewriter {
    store: Arc<dyn VectorStore>,
    summarizer: Arc<SummarizationPipeline>,
    metrics: Arc<IngestionMetrics>,
    batch_size: usize,
}

impl MetadataBatchRewriter {
    /// Build a rewriter; a zero batch size falls back to the default.
    pub fn new(
        store: Arc<dyn VectorStore>,
        summarizer: Arc<SummarizationPipeline>,
        metrics: Arc<IngestionMetrics>,
        batch_size: usize,
    ) -> Self {
        let batch_size = if batch_size == 0 {
            DEFAULT_REWRITE_BATCH_SIZE
        } else {
            batch_size
        };
        Self {
            store,
            summarizer,
            metrics,
            batch_size,
        }
    }

    /// Rewrite the records in `[start_index, start_index + limit)` of the filtered listing.
    ///
    /// Records are listed in document order, so the slice is stable across store backends.
    /// Per-item failures are logged and counted; they never stop the remaining items.
    pub async fn rewrite(
        &self,
        limit: Option<usize>,
        start_index: usize,
        filter: Option<RecordPredicate<'_>>,
    ) -> Result<RewriteReport, RewriteError> {
        let records = self.store.get_all(None).await?;
        let total = records.len();
        let selection = select_records(records, limit, start_index, filter);
        let mut report = RewriteReport {
            selected: selection.len(),
            ..RewriteReport::default()
        };
        tracing::info!(
            total,
            selected = report.selected,
            start_index,
            batch_size = self.batch_size,
            "Starting metadata rewrite"
        );

        for (batch_number, batch) in selection.chunks(self.batch_size).enumerate() {
            let (updated, failed) = self.rewrite_batch(batch).await;
            report.updated += updated;
            report.failed += failed;
            tracing::debug!(batch = batch_number + 1, updated, failed, "Rewrite batch finished");
        }

        self.metrics.record_rewrites(report.updated as u64);
        tracing::info!(
            selected = report.selected,
            updated = report.updated,
            failed = report.failed,
            "Metadata rewrite finished"
        );
        Ok(report)
    }

    async fn rewrite_batch(&self, batch: &[StoredRecord]) -> (usize, usize) {
        let texts: Vec<String> = batch.iter().map(|record| record.text.clone()).collect();
        let outcomes = self.summarizer.summarize_isolated(&texts).await;

        let mut updated = 0;
        let mut failed = 0;
        for (record, outcome) in batch.iter().zip(outcomes) {
            let Some(summary) = outcome.generated() else {
                tracing::warn!(id = %record.id, "Skipping record after failed summary");
                failed += 1;
                continue;
            };

            let mut metadata = record.metadata.clone();
            metadata.summary = Some(summary.to_string());
            metadata.has_math = contains_math(&record.text);

            match self.store.update_metadata(&record.id, &metadata).await {
                Ok(()) => updated += 1,
                Err(error) => {
                    tracing::warn!(
                        id = %record.id,
                        error = %error,
                        "Failed to persist rewritten metadata"
                    );
                    failed += 1;
                }
            }
        }
        (updated, failed)
    }
}

fn select_records(
    records: Vec<StoredRecord>,
    limit: Option<usize>,
    start_index: usize,
    filter: Option<RecordPredicate<'_>>,
) -> Vec<StoredRecord> {
    let filtered = records
        .into_iter()
        .filter(|record| filter.is_none_or(|predicate| predicate(&record.id, &record.metadata)))
        .skip(start_index);
    match limit {
        Some(limit) => filtered.take(limit).collect(),
        None => filtered.collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::{CompletionClient, CompletionError, CompletionRequest};
    use crate::processing::summarize::SummarySettings;
    use crate::store::{BaseMetadata, InMemoryStore, RecordInsert};
    use async_trait::async_trait;

    struct FailOn(&'static str);

    #[async_trait]
    impl CompletionClient for FailOn {
        async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionError> {
            if request.user_prompt.contains(self.0) {
                Err(CompletionError::GenerationFailed("scripted".into()))
            } else {
                Ok("fresh summary".into())
            }
        }
    }

    fn record(index: usize, text: &str) -> RecordInsert {
        RecordInsert {
            id: format!("doc_chunk_{index}"),
            text: text.into(),
            metadata: ChunkMetadata {
                chunk_index: index,
                total_chunks: 4,
                doc_id_prefix: "doc".into(),
                has_math: false,
                chunk_length: text.chars().count(),
                summary: Some("stale".into()),
                extra: BaseMetadata::new(),
            },
            embedding: vec![1.0, 0.0],
        }
    }

    async fn rewriter(
        fail_on: &'static str,
        batch_size: usize,
    ) -> (MetadataBatchRewriter, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new(2));
        store
            .upsert(vec![
                record(1, "plain words"),
                record(2, "energy $E=mc^2$ here"),
                record(3, "marker BROKEN text"),
                record(4, "closing words"),
            ])
            .await
            .expect("seed");
        let summarizer =
            SummarizationPipeline::new(Arc::new(FailOn(fail_on)), SummarySettings::default());
        let rewriter = MetadataBatchRewriter::new(
            store.clone(),
            Arc::new(summarizer),
            Arc::new(IngestionMetrics::new()),
            batch_size,
        );
        (rewriter, store)
    }

    #[tokio::test]
    async fn rewrite_updates_summary_and_math_flag() {
        let (rewriter, store) = rewriter("never-matches", 3).await;
        let report = rewriter.rewrite(None, 0, None).await.expect("rewrite");
        assert_eq!(report, RewriteReport { selected: 4, updated: 4, failed: 0 });

        let records = store.get_all(None).await.expect("records");
        assert!(
            records
                .iter()
                .all(|record| record.metadata.summary.as_deref() == Some("fresh summary"))
        );
        assert!(records[1].metadata.has_math);
        assert!(!records[0].metadata.has_math);
    }

    #[tokio::test]
    async fn failed_item_is_skipped_and_keeps_old_summary() {
        let (rewriter, store) = rewriter("BROKEN", 2).await;
        let report = rewriter.rewrite(None, 0, None).await.expect("rewrite");
        assert_eq!(report.updated, 3);
        assert_eq!(report.failed, 1);

        let records = store.get_all(None).await.expect("records");
        assert_eq!(records[2].metadata.summary.as_deref(), Some("stale"));
        assert_eq!(records[3].metadata.summary.as_deref(), Some("fresh summary"));
    }

    #[tokio::test]
    async fn predicate_and_slice_select_records() {
        let (rewriter, store) = rewriter("never-matches", 20).await;
        let predicate = |id: &str, _: &ChunkMetadata| id != "doc_chunk_1";
        let report = rewriter
            .rewrite(Some(1), 1, Some(&predicate))
            .await
            .expect("rewrite");
        assert_eq!(report.selected, 1);

        let records = store.get_all(None).await.expect("records");
        let rewritten: Vec<&str> = records
            .iter()
            .filter(|record| record.metadata.summary.as_deref() == Some("fresh summary"))
            .map(|record| record.id.as_str())
            .collect();
        assert_eq!(rewritten, vec!["doc_chunk_3"]);
    }

    #[test]
    fn start_beyond_end_selects_nothing() {
        let records = vec![StoredRecord {
            id: "a".into(),
            text: "t".into(),
            metadata: record(1, "t").metadata,
        }];
        assert!(select_records(records, Some(5), 3, None).is_empty());
    }
}

//! Document ingestion: chunk, summarize, embed, and write one batch to the store.

use std::sync::Arc;

use crate::embedding::EmbeddingClient;
use crate::extraction::{DocumentReader, DocumentTranscript};
use crate::layout::Page;
use crate::metrics::IngestionMetrics;
use crate::store::{
    BaseMetadata, ChunkMetadata, RecordInsert, StoreError, StoreFilter, VectorStore,
};

use super::chunking::{Chunk, MathAwareChunker};
use super::summarize::{SummarizationPipeline, SummaryOutcome};
use super::types::{IngestionOutcome, ProcessingError};

/// Identifier of the `index`-th (one-based) chunk of a document.
pub fn chunk_id(doc_id_prefix: &str, index: usize) -> String {
    format!("{doc_id_prefix}_chunk_{index}")
}

/// Coordinates chunking, summarization, embedding, and the store write for one document.
///
/// Holds shared handles only; construct once and reuse across documents.
pub struct IngestionOrchestrator {
    chunker: Arc<MathAwareChunker>,
    summarizer: Arc<SummarizationPipeline>,
    embedder: Arc<dyn EmbeddingClient>,
    store: Arc<dyn VectorStore>,
    metrics: Arc<IngestionMetrics>,
}

impl IngestionOrchestrator {
    /// Assemble an orchestrator from its collaborators.
    pub fn new(
        chunker: Arc<MathAwareChunker>,
        summarizer: Arc<SummarizationPipeline>,
        embedder: Arc<dyn EmbeddingClient>,
        store: Arc<dyn VectorStore>,
        metrics: Arc<IngestionMetrics>,
    ) -> Self {
        Self {
            chunker,
            summarizer,
            embedder,
            store,
            metrics,
        }
    }

    /// Chunk, optionally summarize, embed, and store a transcript.
    ///
    /// Fails only on structural errors (empty transcript, chunking, embedding, store); a
    /// failed summary degrades to an excerpt and the chunk is still written.
    pub async fn ingest(
        &self,
        doc_id_prefix: &str,
        transcript: &DocumentTranscript,
        base_metadata: &BaseMetadata,
        generate_summaries: bool,
    ) -> Result<IngestionOutcome, ProcessingError> {
        let doc_id_prefix = doc_id_prefix.trim();
        if doc_id_prefix.is_empty() {
            return Err(ProcessingError::InvalidDocumentId);
        }
        if transcript.is_blank() {
            return Err(ProcessingError::EmptyTranscript {
                doc_id_prefix: doc_id_prefix.to_string(),
            });
        }

        tracing::info!(doc_id_prefix, generate_summaries, "Ingesting document");
        let chunks = self.chunker.chunk(transcript.as_str());
        if chunks.is_empty() {
            return Err(ProcessingError::EmptyTranscript {
                doc_id_prefix: doc_id_prefix.to_string(),
            });
        }
        let total_chunks = chunks.len();
        tracing::debug!(doc_id_prefix, total_chunks, "Document chunked");

        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let summaries = if generate_summaries {
            self.summarizer.summarize_document(&texts).await
        } else {
            Vec::new()
        };
        let summary_fallbacks = summaries
            .iter()
            .filter(|outcome| outcome.is_fallback())
            .count();

        let embeddings = self.embedder.generate_embeddings(texts).await?;
        if embeddings.len() != total_chunks {
            return Err(ProcessingError::EmbeddingCountMismatch {
                expected: total_chunks,
                actual: embeddings.len(),
            });
        }

        let records: Vec<RecordInsert> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| {
                let summary = summaries.get(chunk.index - 1);
                build_record(doc_id_prefix, total_chunks, chunk, summary, base_metadata, embedding)
            })
            .collect();
        let math_chunks = records
            .iter()
            .filter(|record| record.metadata.has_math)
            .count();

        let written = self.store.upsert(records).await.inspect_err(|error| {
            tracing::error!(doc_id_prefix, error = %error, "Failed to write chunks");
        })?;
        self.remove_stale_chunks(doc_id_prefix, total_chunks).await?;

        self.metrics
            .record_document(written as u64, summary_fallbacks as u64);
        tracing::info!(
            doc_id_prefix,
            chunks = written,
            math_chunks,
            summary_fallbacks,
            "Document ingested"
        );

        Ok(IngestionOutcome {
            chunks_written: written,
            summary_fallbacks,
            math_chunks,
        })
    }

    /// Transcribe rasterised pages and ingest the resulting transcript.
    pub async fn ingest_pages(
        &self,
        reader: &DocumentReader,
        doc_id_prefix: &str,
        pages: &[Page],
        base_metadata: &BaseMetadata,
        generate_summaries: bool,
    ) -> Result<IngestionOutcome, ProcessingError> {
        let transcript = reader.transcribe(pages).await?;
        self.ingest(doc_id_prefix, &transcript, base_metadata, generate_summaries)
            .await
    }

    /// Delete chunks left over from an earlier, longer ingestion of the same document.
    async fn remove_stale_chunks(
        &self,
        doc_id_prefix: &str,
        total_chunks: usize,
    ) -> Result<(), StoreError> {
        let existing = self
            .store
            .get_all(Some(&StoreFilter::for_document(doc_id_prefix)))
            .await?;
        for record in existing
            .iter()
            .filter(|record| record.metadata.chunk_index > total_chunks)
        {
            tracing::debug!(doc_id_prefix, id = %record.id, "Removing stale chunk");
            self.store.delete(&record.id).await?;
        }
        Ok(())
    }
}

fn build_record(
    doc_id_prefix: &str,
    total_chunks: usize,
    chunk: Chunk,
    summary: Option<&SummaryOutcome>,
    base_metadata: &BaseMetadata,
    embedding: Vec<f32>,
) -> RecordInsert {
    let metadata = ChunkMetadata {
        chunk_index: chunk.index,
        total_chunks,
        doc_id_prefix: doc_id_prefix.to_string(),
        has_math: chunk.has_math,
        chunk_length: chunk.text.chars().count(),
        summary: summary.map(|outcome| outcome.text().to_string()),
        extra: BaseMetadata::new(),
    }
    .with_base(base_metadata);

    RecordInsert {
        id: chunk_id(doc_id_prefix, chunk.index),
        text: chunk.text,
        metadata,
        embedding,
    }
}

//! Error definitions and outcome types for the processing pipeline.

use crate::{
    completion::CompletionError, embedding::EmbeddingClientError, extraction::PageError,
    store::StoreError,
};
use anyhow::Error as TokenizerError;
use serde::Serialize;
use thiserror::Error;

/// Errors produced while turning a transcript into chunks.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// Chunker configured with an impossible size.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
    /// Tokenizer resources were unavailable for the configured model.
    #[error("failed to initialize tokenizer for model '{model}': {source}")]
    Tokenizer {
        /// Model we attempted to load a tokenizer for.
        model: String,
        /// Underlying error raised by the tokenizer library.
        #[source]
        source: TokenizerError,
    },
}

/// Errors that abort a whole ingestion.
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// Document identity was empty.
    #[error("document id prefix must not be empty")]
    InvalidDocumentId,
    /// Transcript contained no text to chunk.
    #[error("transcript for '{doc_id_prefix}' is empty")]
    EmptyTranscript {
        /// Document the transcript belongs to.
        doc_id_prefix: String,
    },
    /// Transcription of a page failed.
    #[error("Failed to transcribe document: {0}")]
    Page(#[from] PageError),
    /// Chunking step failed to segment the document.
    #[error("Failed to chunk document: {0}")]
    Chunking(#[from] ChunkingError),
    /// Embedding provider failed to produce vectors for the chunks.
    #[error("Failed to generate embeddings: {0}")]
    Embedding(#[from] EmbeddingClientError),
    /// Provider returned a different number of vectors than chunks sent.
    #[error("Embedding count mismatch: expected {expected}, got {actual}")]
    EmbeddingCountMismatch {
        /// Number of chunks sent.
        expected: usize,
        /// Number of vectors received.
        actual: usize,
    },
    /// Store rejected the batch.
    #[error("Store request failed: {0}")]
    Store(#[from] StoreError),
}

/// Errors propagated to callers of retrieval QA.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Question was blank.
    #[error("question must not be empty")]
    EmptyQuestion,
    /// Embedding provider failed to return a vector for the question.
    #[error("Failed to generate embeddings: {0}")]
    Embedding(#[from] EmbeddingClientError),
    /// Embedding provider returned no vectors.
    #[error("Embedding provider returned no vectors for the question")]
    EmptyEmbedding,
    /// Store query failed.
    #[error("Store request failed: {0}")]
    Store(#[from] StoreError),
    /// Completion provider failed while synthesising the answer.
    #[error("Failed to generate answer: {0}")]
    Completion(#[from] CompletionError),
}

/// Errors that stop a metadata rewrite before any batch runs.
#[derive(Debug, Error)]
pub enum RewriteError {
    /// Listing the stored records failed.
    #[error("Store request failed: {0}")]
    Store(#[from] StoreError),
}

/// Summary of a completed ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestionOutcome {
    /// Number of chunks written to the store.
    pub chunks_written: usize,
    /// Chunks whose summary fell back to an excerpt.
    pub summary_fallbacks: usize,
    /// Chunks that carry mathematical notation.
    pub math_chunks: usize,
}

/// Partial-success report of a metadata rewrite.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RewriteReport {
    /// Records selected by the filter and slice.
    pub selected: usize,
    /// Records whose summary was regenerated and persisted.
    pub updated: usize,
    /// Records skipped after a summary or persistence failure.
    pub failed: usize,
}

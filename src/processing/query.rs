//! Retrieval QA: top-k similarity search followed by a single grounded completion.

use serde::Serialize;
use std::sync::Arc;

use crate::completion::{CompletionClient, CompletionRequest};
use crate::embedding::EmbeddingClient;
use crate::store::{StoreFilter, StoreMatch, VectorStore};

use super::types::QueryError;

/// Answer returned when retrieval finds nothing; no completion call is made.
pub const NO_INFORMATION_ANSWER: &str =
    "No relevant information was found in the indexed documents.";

const QA_SYSTEM_PROMPT: &str = "You are a helpful assistant. Answer the question based on the \
provided context. Preserve mathematical notation exactly as written in the context, including \
LaTeX between $ delimiters.";
const QA_TEMPERATURE: f32 = 0.2;
const QA_MAX_TOKENS: u32 = 512;

/// Chunk that informed an answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SupportingChunk {
    /// Chunk identifier.
    pub id: String,
    /// Chunk text.
    pub text: String,
    /// Similarity score reported by the store.
    pub score: f32,
}

/// Synthesised answer plus its supporting evidence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QaAnswer {
    /// Raw completion text, or the canned no-information answer.
    pub answer: String,
    /// Chunks passed as context, best match first.
    pub supporting_chunks: Vec<SupportingChunk>,
}

/// Answers questions from stored chunks.
pub struct RetrievalQa {
    embedder: Arc<dyn EmbeddingClient>,
    store: Arc<dyn VectorStore>,
    completion: Arc<dyn CompletionClient>,
    annotate_scores: bool,
}

impl RetrievalQa {
    /// Build a QA service over shared provider and store handles.
    pub fn new(
        embedder: Arc<dyn EmbeddingClient>,
        store: Arc<dyn VectorStore>,
        completion: Arc<dyn CompletionClient>,
    ) -> Self {
        Self {
            embedder,
            store,
            completion,
            annotate_scores: false,
        }
    }

    /// Include each chunk's similarity score in the context block.
    #[must_use]
    pub fn with_score_annotations(mut self, enabled: bool) -> Self {
        self.annotate_scores = enabled;
        self
    }

    /// Answer `question` from the top-`k` chunks across all documents.
    pub async fn answer(&self, question: &str, k: usize) -> Result<QaAnswer, QueryError> {
        self.answer_filtered(question, k, None).await
    }

    /// Answer `question` from the top-`k` chunks matching `filter`.
    pub async fn answer_filtered(
        &self,
        question: &str,
        k: usize,
        filter: Option<&StoreFilter>,
    ) -> Result<QaAnswer, QueryError> {
        let matches = self.search(question, k, filter).await?;
        if matches.is_empty() {
            tracing::info!(k, "No chunks matched; returning canned answer");
            return Ok(QaAnswer {
                answer: NO_INFORMATION_ANSWER.to_string(),
                supporting_chunks: Vec::new(),
            });
        }

        let request = CompletionRequest {
            system_prompt: QA_SYSTEM_PROMPT.to_string(),
            user_prompt: build_qa_prompt(question.trim(), &matches, self.annotate_scores),
            temperature: QA_TEMPERATURE,
            max_tokens: QA_MAX_TOKENS,
        };
        let answer = self.completion.complete(request).await?;
        tracing::info!(k, supporting = matches.len(), "Question answered");

        Ok(QaAnswer {
            answer,
            supporting_chunks: matches
                .into_iter()
                .map(|hit| SupportingChunk {
                    id: hit.record.id,
                    text: hit.record.text,
                    score: hit.score,
                })
                .collect(),
        })
    }

    /// Similarity search without answer synthesis.
    pub async fn search(
        &self,
        question: &str,
        k: usize,
        filter: Option<&StoreFilter>,
    ) -> Result<Vec<StoreMatch>, QueryError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(QueryError::EmptyQuestion);
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut vectors = self
            .embedder
            .generate_embeddings(vec![question.to_string()])
            .await?;
        let vector = vectors.pop().ok_or(QueryError::EmptyEmbedding)?;
        let matches = self.store.query(vector, k, filter).await.inspect_err(|error| {
            tracing::error!(error = %error, "Similarity query failed");
        })?;
        tracing::debug!(k, hits = matches.len(), "Similarity query finished");
        Ok(matches)
    }
}

fn build_qa_prompt(question: &str, matches: &[StoreMatch], annotate_scores: bool) -> String {
    let context = matches
        .iter()
        .enumerate()
        .map(|(position, hit)| {
            if annotate_scores {
                format!(
                    "Document {} (score {:.3}):\n{}",
                    position + 1,
                    hit.score,
                    hit.record.text
                )
            } else {
                format!("Document {}:\n{}", position + 1, hit.record.text)
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n");
    format!("Context:\n{context}\n\nQuestion: {question}\n\nAnswer:")
}

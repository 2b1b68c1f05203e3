//! Stored chunk records and their metadata.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata keys derived by ingestion; caller-supplied values under these names are dropped.
pub const RESERVED_KEYS: [&str; 8] = [
    "chunk_index",
    "total_chunks",
    "doc_id_prefix",
    "has_math",
    "chunk_length",
    "summary",
    "text",
    "chunk_id",
];

/// Scalar value accepted in caller-supplied metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    /// Boolean flag.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// Free text.
    Text(String),
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

/// Caller-supplied metadata merged into every chunk of a document (for example `source`).
pub type BaseMetadata = BTreeMap<String, MetadataValue>;

/// Metadata attached to one stored chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// One-based position of the chunk within its document.
    pub chunk_index: usize,
    /// Number of chunks written for the document.
    pub total_chunks: usize,
    /// Document identity shared by all of its chunks.
    pub doc_id_prefix: String,
    /// Whether the chunk text carries mathematical notation.
    pub has_math: bool,
    /// Chunk length in characters.
    pub chunk_length: usize,
    /// Short retrieval summary; absent when generation was skipped or failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Caller-supplied fields.
    #[serde(flatten)]
    pub extra: BaseMetadata,
}

impl ChunkMetadata {
    /// Merge caller-supplied fields, dropping any that collide with derived keys.
    pub fn with_base(mut self, base: &BaseMetadata) -> Self {
        for (key, value) in base {
            if RESERVED_KEYS.contains(&key.as_str()) {
                tracing::warn!(
                    key = key.as_str(),
                    doc_id_prefix = %self.doc_id_prefix,
                    "Ignoring caller metadata that collides with a derived key"
                );
                continue;
            }
            self.extra.insert(key.clone(), value.clone());
        }
        self
    }
}

/// A chunk as held by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    /// Chunk identifier, `{doc_id_prefix}_chunk_{chunk_index}`.
    pub id: String,
    /// Chunk text.
    pub text: String,
    /// Chunk metadata.
    pub metadata: ChunkMetadata,
}

/// A chunk handed to the store for insertion.
#[derive(Debug, Clone)]
pub struct RecordInsert {
    /// Chunk identifier.
    pub id: String,
    /// Chunk text.
    pub text: String,
    /// Chunk metadata.
    pub metadata: ChunkMetadata,
    /// Embedding of `text`.
    pub embedding: Vec<f32>,
}

/// One similarity-query hit.
#[derive(Debug, Clone)]
pub struct StoreMatch {
    /// Matched record.
    pub record: StoredRecord,
    /// Similarity score reported by the store; higher is closer.
    pub score: f32,
}

/// Exact-match constraints applied to queries and listings.
#[derive(Debug, Clone, Default)]
pub struct StoreFilter {
    /// Restrict to one document.
    pub doc_id_prefix: Option<String>,
    /// Restrict by math flag.
    pub has_math: Option<bool>,
    /// Restrict by caller-supplied fields.
    pub extra: BaseMetadata,
}

impl StoreFilter {
    /// Filter selecting every chunk of one document.
    pub fn for_document(doc_id_prefix: impl Into<String>) -> Self {
        Self {
            doc_id_prefix: Some(doc_id_prefix.into()),
            ..Self::default()
        }
    }

    /// Whether a record's metadata satisfies every constraint.
    pub fn matches(&self, metadata: &ChunkMetadata) -> bool {
        if let Some(prefix) = &self.doc_id_prefix
            && &metadata.doc_id_prefix != prefix
        {
            return false;
        }
        if let Some(has_math) = self.has_math
            && metadata.has_math != has_math
        {
            return false;
        }
        self.extra
            .iter()
            .all(|(key, value)| metadata.extra.get(key) == Some(value))
    }
}

/// Sort records into document order: prefix, then chunk index, then id.
pub fn sort_records(records: &mut [StoredRecord]) {
    records.sort_by(|left, right| {
        left.metadata
            .doc_id_prefix
            .cmp(&right.metadata.doc_id_prefix)
            .then(left.metadata.chunk_index.cmp(&right.metadata.chunk_index))
            .then_with(|| left.id.cmp(&right.id))
    });
}

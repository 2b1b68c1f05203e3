//! Key/vector store abstraction used by ingestion, retrieval and metadata rewrites.
//!
//! The core never ranks vectors itself; it hands records to a [`VectorStore`] and consumes
//! rank order and scores. Two backends exist: [`InMemoryStore`] and
//! [`crate::qdrant::QdrantStore`].

mod memory;
mod record;

pub use memory::InMemoryStore;
pub use record::{
    BaseMetadata, ChunkMetadata, MetadataValue, RESERVED_KEYS, RecordInsert, StoreFilter,
    StoreMatch, StoredRecord, sort_records,
};

use async_trait::async_trait;
use thiserror::Error;

use crate::qdrant::QdrantError;

/// Errors raised by store backends. Fatal to the calling operation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Qdrant request failed.
    #[error("Qdrant request failed: {0}")]
    Qdrant(#[from] QdrantError),
    /// The addressed record does not exist.
    #[error("record '{0}' not found")]
    NotFound(String),
    /// A stored record could not be decoded.
    #[error("malformed record '{id}': {reason}")]
    MalformedRecord {
        /// Identifier of the offending record.
        id: String,
        /// Decoding failure.
        reason: String,
    },
    /// A vector did not match the store's dimension.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Configured dimension.
        expected: usize,
        /// Received dimension.
        actual: usize,
    },
}

/// Persistent key/vector store for chunk records.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace records keyed by id; returns the number written.
    async fn upsert(&self, records: Vec<RecordInsert>) -> Result<usize, StoreError>;

    /// Top-`k` records by similarity to `embedding`, best first.
    async fn query(
        &self,
        embedding: Vec<f32>,
        k: usize,
        filter: Option<&StoreFilter>,
    ) -> Result<Vec<StoreMatch>, StoreError>;

    /// Every record matching `filter`, in document order (see [`sort_records`]).
    async fn get_all(&self, filter: Option<&StoreFilter>) -> Result<Vec<StoredRecord>, StoreError>;

    /// Replace the metadata of one record.
    async fn update_metadata(&self, id: &str, metadata: &ChunkMetadata) -> Result<(), StoreError>;

    /// Remove one record. Removing a missing record is not an error.
    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    /// Drop every record and start from an empty collection.
    async fn recreate(&self) -> Result<(), StoreError>;
}

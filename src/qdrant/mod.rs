//! Qdrant vector store integration.

pub mod client;
pub mod filters;
pub mod payload;
/// Streaming helpers for Qdrant scroll pagination.
pub mod scroller;
pub mod types;

pub use client::QdrantStore;
pub use filters::build_store_filter;
pub use payload::{compute_chunk_hash, point_id};
pub use types::QdrantError;

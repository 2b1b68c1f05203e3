#![deny(missing_docs)]

//! Layout-aware, formula-safe ingestion and retrieval QA over scanned technical documents.

/// Text-completion client abstraction and adapters.
pub mod completion;
/// Environment-driven configuration management.
pub mod config;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Region text extraction and transcript assembly.
pub mod extraction;
/// Shared wiring of providers, store, and pipeline components.
pub mod knowledge_base;
/// Page layout analysis and the formula pre-filter.
pub mod layout;
/// Structured logging and tracing setup.
pub mod logging;
/// Ingestion metrics helpers.
pub mod metrics;
/// Chunking, summarization, ingestion, retrieval, and rewrite pipeline.
pub mod processing;
/// Qdrant vector store integration.
pub mod qdrant;
/// Vector store abstraction and in-memory backend.
pub mod store;

//! Document processing pipeline: chunking, summarization, ingestion, retrieval, and rewrites.

pub mod chunking;
pub mod ingest;
pub mod query;
pub mod rewrite;
pub mod summarize;
pub mod types;

pub use chunking::{Chunk, ChunkUnit, ChunkingSettings, MathAwareChunker, contains_math};
pub use ingest::{IngestionOrchestrator, chunk_id};
pub use query::{NO_INFORMATION_ANSWER, QaAnswer, RetrievalQa, SupportingChunk};
pub use rewrite::{DEFAULT_REWRITE_BATCH_SIZE, MetadataBatchRewriter, RecordPredicate};
pub use summarize::{SummarizationPipeline, SummaryOutcome, SummarySettings, SummaryStrategy};
pub use types::{
    ChunkingError, IngestionOutcome, ProcessingError, QueryError, RewriteError, RewriteReport,
};

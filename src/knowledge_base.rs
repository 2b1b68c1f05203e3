//! Process-wide wiring of providers, the store, and the pipeline components.
//!
//! Everything is built once from [`Config`] and shared through `Arc` handles; there is no
//! module-level mutable state.

use std::sync::Arc;

use thiserror::Error;

use crate::completion::{CompletionClient, CompletionError, build_completion_client};
use crate::config::{Config, StoreBackend};
use crate::embedding::{EmbeddingClient, EmbeddingClientError, build_embedding_client};
use crate::extraction::{
    DocumentReader, FormulaProviderError, FormulaRecognizer, HttpFormulaRecognizer,
    RegionExtractor, UnconfiguredFormulaRecognizer,
};
use crate::layout::{FormulaHeuristic, LayoutDetector, OcrEngine, RegionClassifier};
use crate::metrics::{IngestionMetrics, MetricsSnapshot};
use crate::processing::{
    ChunkingError, IngestionOrchestrator, MathAwareChunker, MetadataBatchRewriter, RetrievalQa,
    SummarizationPipeline,
};
use crate::qdrant::{QdrantError, QdrantStore};
use crate::store::{InMemoryStore, StoreError, VectorStore};

/// Failures while assembling the knowledge base.
#[derive(Debug, Error)]
pub enum KnowledgeBaseError {
    /// Embedding client could not be built.
    #[error(transparent)]
    Embedding(#[from] EmbeddingClientError),
    /// Completion client could not be built.
    #[error(transparent)]
    Completion(#[from] CompletionError),
    /// Chunker settings were rejected.
    #[error(transparent)]
    Chunking(#[from] ChunkingError),
    /// Qdrant bootstrap failed.
    #[error(transparent)]
    Qdrant(#[from] QdrantError),
    /// Store maintenance failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Formula OCR client could not be built.
    #[error(transparent)]
    Formula(#[from] FormulaProviderError),
    /// Qdrant backend selected without a URL.
    #[error("QDRANT_URL is required for the qdrant store backend")]
    MissingQdrantUrl,
}

/// Shared handles to every pipeline component.
pub struct KnowledgeBase {
    config: Config,
    store: Arc<dyn VectorStore>,
    metrics: Arc<IngestionMetrics>,
    orchestrator: IngestionOrchestrator,
    qa: RetrievalQa,
    rewriter: MetadataBatchRewriter,
}

impl KnowledgeBase {
    /// Build providers and the store from configuration, bootstrapping Qdrant if selected.
    pub async fn from_config(config: Config) -> Result<Self, KnowledgeBaseError> {
        let embedder: Arc<dyn EmbeddingClient> = Arc::from(build_embedding_client(&config)?);
        let completion: Arc<dyn CompletionClient> =
            Arc::from(build_completion_client(&config)?);
        let store = build_store(&config).await?;
        Self::assemble(config, embedder, completion, store)
    }

    /// Assemble from already-built providers and store.
    pub fn assemble(
        config: Config,
        embedder: Arc<dyn EmbeddingClient>,
        completion: Arc<dyn CompletionClient>,
        store: Arc<dyn VectorStore>,
    ) -> Result<Self, KnowledgeBaseError> {
        let metrics = Arc::new(IngestionMetrics::new());
        let chunker = Arc::new(MathAwareChunker::new(&config.chunking_settings())?);
        let summarizer = Arc::new(SummarizationPipeline::new(
            Arc::clone(&completion),
            config.summary_settings(),
        ));

        let orchestrator = IngestionOrchestrator::new(
            chunker,
            Arc::clone(&summarizer),
            Arc::clone(&embedder),
            Arc::clone(&store),
            Arc::clone(&metrics),
        );
        let qa = RetrievalQa::new(embedder, Arc::clone(&store), completion);
        let rewriter = MetadataBatchRewriter::new(
            Arc::clone(&store),
            summarizer,
            Arc::clone(&metrics),
            config.rewrite_batch_size,
        );
        tracing::info!(
            store = ?config.store_backend,
            strategy = ?config.summary_strategy,
            "Knowledge base ready"
        );

        Ok(Self {
            config,
            store,
            metrics,
            orchestrator,
            qa,
            rewriter,
        })
    }

    /// Build a page reader over caller-supplied layout and OCR providers.
    ///
    /// The formula recognizer comes from `FORMULA_OCR_URL`; without it every formula region
    /// falls back to plain OCR.
    pub fn document_reader(
        &self,
        detector: Arc<dyn LayoutDetector>,
        ocr: Arc<dyn OcrEngine>,
    ) -> Result<DocumentReader, KnowledgeBaseError> {
        let formula: Arc<dyn FormulaRecognizer> = match self.config.formula_ocr_url.as_deref() {
            Some(endpoint) => Arc::new(HttpFormulaRecognizer::new(endpoint)?),
            None => {
                tracing::warn!("FORMULA_OCR_URL not set; formulas will use plain OCR");
                Arc::new(UnconfiguredFormulaRecognizer)
            }
        };
        let classifier = RegionClassifier::new(detector, self.config.layout_confidence_threshold);
        let extractor = RegionExtractor::new(
            Arc::clone(&ocr),
            formula,
            FormulaHeuristic::new(ocr),
        );
        Ok(DocumentReader::new(classifier, extractor))
    }

    /// Configuration the knowledge base was built from.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Ingestion entry point.
    pub fn orchestrator(&self) -> &IngestionOrchestrator {
        &self.orchestrator
    }

    /// Question answering and search.
    pub fn qa(&self) -> &RetrievalQa {
        &self.qa
    }

    /// Summary rewrites over stored records.
    pub fn rewriter(&self) -> &MetadataBatchRewriter {
        &self.rewriter
    }

    /// Underlying store handle.
    pub fn store(&self) -> Arc<dyn VectorStore> {
        Arc::clone(&self.store)
    }

    /// Current counters.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Remove one chunk by id.
    pub async fn delete_chunk(&self, id: &str) -> Result<(), KnowledgeBaseError> {
        self.store.delete(id).await?;
        tracing::info!(id, "Chunk deleted");
        Ok(())
    }

    /// Drop every stored chunk.
    pub async fn clear(&self) -> Result<(), KnowledgeBaseError> {
        self.store.recreate().await?;
        tracing::info!("Store cleared");
        Ok(())
    }
}

async fn build_store(config: &Config) -> Result<Arc<dyn VectorStore>, KnowledgeBaseError> {
    match config.store_backend {
        StoreBackend::Memory => Ok(Arc::new(InMemoryStore::new(config.embedding_dimension))),
        StoreBackend::Qdrant => {
            let url = config
                .qdrant_url
                .as_deref()
                .ok_or(KnowledgeBaseError::MissingQdrantUrl)?;
            let store = QdrantStore::new(
                url,
                config.qdrant_api_key.clone(),
                &config.qdrant_collection_name,
                config.embedding_dimension,
            )?;
            store.ensure_collection().await?;
            Ok(Arc::new(store))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::CompletionRequest;
    use crate::config::{CompletionProvider, EmbeddingProvider, SummaryStrategyKind};
    use crate::embedding::HashingEmbeddingClient;
    use crate::layout::{BoundingBox, DetectionError, OcrError, Page, RawDetection};
    use crate::processing::{ChunkUnit, ProcessingError};
    use crate::store::BaseMetadata;
    use async_trait::async_trait;
    use image::DynamicImage;

    struct OneTextBlock {
        names: Vec<String>,
        detections: usize,
    }

    #[async_trait]
    impl LayoutDetector for OneTextBlock {
        async fn detect(&self, _image: &DynamicImage) -> Result<Vec<RawDetection>, DetectionError> {
            Ok((0..self.detections)
                .map(|_| RawDetection {
                    bbox: BoundingBox::new(0.0, 0.0, 10.0, 10.0),
                    score: 0.9,
                    class_id: 0,
                })
                .collect())
        }

        fn class_names(&self) -> &[String] {
            &self.names
        }
    }

    struct FixedOcr;

    impl OcrEngine for FixedOcr {
        fn recognize(&self, _crop: &DynamicImage) -> Result<String, OcrError> {
            Ok("Hilbert spaces are complete inner product spaces.".into())
        }
    }

    struct Silent;

    #[async_trait]
    impl CompletionClient for Silent {
        async fn complete(&self, _request: CompletionRequest) -> Result<String, CompletionError> {
            Ok("summary".into())
        }
    }

    fn config() -> Config {
        Config {
            store_backend: StoreBackend::Memory,
            qdrant_url: None,
            qdrant_collection_name: "documents".into(),
            qdrant_api_key: None,
            embedding_provider: EmbeddingProvider::Hashing,
            embedding_model: "hashing".into(),
            embedding_dimension: 8,
            completion_provider: CompletionProvider::Ollama,
            completion_model: "llama3.1".into(),
            ollama_url: "http://127.0.0.1:11434".into(),
            openai_base_url: "https://api.openai.com".into(),
            openai_api_key: None,
            formula_ocr_url: None,
            layout_confidence_threshold: 0.5,
            text_splitter_chunk_size: 200,
            text_splitter_chunk_overlap: 0,
            text_splitter_unit: ChunkUnit::Chars,
            summary_strategy: SummaryStrategyKind::Parallel,
            summary_concurrency: 2,
            summary_context_window: 5,
            summary_context_token_budget: 1000,
            rewrite_batch_size: 20,
        }
    }

    fn knowledge_base() -> KnowledgeBase {
        KnowledgeBase::assemble(
            config(),
            Arc::new(HashingEmbeddingClient::new(8)),
            Arc::new(Silent),
            Arc::new(InMemoryStore::new(8)),
        )
        .expect("knowledge base")
    }

    fn reader(kb: &KnowledgeBase, detections: usize) -> DocumentReader {
        let detector = OneTextBlock {
            names: vec!["text".into()],
            detections,
        };
        kb.document_reader(Arc::new(detector), Arc::new(FixedOcr))
            .expect("reader")
    }

    #[tokio::test]
    async fn pages_are_transcribed_and_ingested() {
        let kb = knowledge_base();
        let pages = vec![Page::new(0, DynamicImage::new_rgb8(20, 20))];

        let outcome = kb
            .orchestrator()
            .ingest_pages(&reader(&kb, 1), "hilbert", &pages, &BaseMetadata::new(), true)
            .await
            .expect("ingest");

        assert_eq!(outcome.chunks_written, 1);
        let records = kb.store().get_all(None).await.expect("records");
        assert_eq!(records[0].id, "hilbert_chunk_1");
        assert!(records[0].text.contains("Hilbert spaces"));
    }

    #[tokio::test]
    async fn blank_pages_fail_ingestion() {
        let kb = knowledge_base();
        let pages = vec![Page::new(0, DynamicImage::new_rgb8(20, 20))];

        let error = kb
            .orchestrator()
            .ingest_pages(&reader(&kb, 0), "blank", &pages, &BaseMetadata::new(), true)
            .await
            .expect_err("blank");

        assert!(matches!(error, ProcessingError::EmptyTranscript { .. }));
    }

    #[tokio::test]
    async fn qdrant_backend_requires_url() {
        let mut config = config();
        config.store_backend = StoreBackend::Qdrant;
        let error = build_store(&config).await.err().expect("missing url");
        assert!(matches!(error, KnowledgeBaseError::MissingQdrantUrl));
    }
}

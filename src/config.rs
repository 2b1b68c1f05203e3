use serde::Deserialize;
use std::env;
use thiserror::Error;

use crate::processing::{ChunkUnit, ChunkingSettings, SummarySettings, SummaryStrategy};

const DEFAULT_COLLECTION: &str = "documents";
const DEFAULT_COMPLETION_MODEL: &str = "llama3.1";
const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";
const DEFAULT_OPENAI_URL: &str = "https://api.openai.com";

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the ingestion and query pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Backend used to persist chunk records.
    pub store_backend: StoreBackend,
    /// Base URL of the Qdrant instance; required for the Qdrant backend.
    pub qdrant_url: Option<String>,
    /// Name of the collection used for chunk storage.
    pub qdrant_collection_name: String,
    /// Optional API key required to access Qdrant.
    pub qdrant_api_key: Option<String>,
    /// Embedding provider used to generate vector representations.
    pub embedding_provider: EmbeddingProvider,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// Text-completion provider used for summaries and answers.
    pub completion_provider: CompletionProvider,
    /// Completion model identifier passed to the provider.
    pub completion_model: String,
    /// Base URL of the local Ollama runtime.
    pub ollama_url: String,
    /// Base URL of an OpenAI-compatible API.
    pub openai_base_url: String,
    /// Bearer token for the OpenAI-compatible API.
    pub openai_api_key: Option<String>,
    /// Endpoint of the remote formula-to-markup OCR service.
    pub formula_ocr_url: Option<String>,
    /// Minimum detection score kept by the region classifier.
    pub layout_confidence_threshold: f32,
    /// Target chunk size in `text_splitter_unit` units.
    pub text_splitter_chunk_size: usize,
    /// Overlap carried between adjacent chunks.
    pub text_splitter_chunk_overlap: usize,
    /// Unit in which chunk size and overlap are measured.
    pub text_splitter_unit: ChunkUnit,
    /// Execution mode of the summarization pipeline.
    pub summary_strategy: SummaryStrategyKind,
    /// Maximum number of in-flight summary requests in parallel mode.
    pub summary_concurrency: usize,
    /// Number of previous summaries threaded into parallel-mode prompts.
    pub summary_context_window: usize,
    /// Estimated-token budget for sequential-mode context.
    pub summary_context_token_budget: usize,
    /// Number of records processed per metadata rewrite batch.
    pub rewrite_batch_size: usize,
}

/// Supported vector store backends.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Remote Qdrant instance.
    Qdrant,
    /// Process-local store, lost on exit.
    Memory,
}

/// Supported embedding backends.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Local Ollama runtime.
    Ollama,
    /// Hosted OpenAI-compatible embeddings API.
    OpenAI,
    /// Deterministic byte-hashing embeddings, for offline use.
    Hashing,
}

/// Supported text-completion backends.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CompletionProvider {
    /// Local Ollama runtime.
    Ollama,
    /// Hosted OpenAI-compatible chat completions API.
    OpenAI,
}

/// Summarization execution modes selectable from the environment.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SummaryStrategyKind {
    /// Strictly ordered, one request at a time.
    Sequential,
    /// Concurrent requests behind an admission gate.
    Parallel,
}

impl Config {
    /// Load `.env` (when present) and then read configuration from the environment.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config = Self::from_env()?;
        tracing::debug!(
            store = ?config.store_backend,
            collection = %config.qdrant_collection_name,
            embedding_provider = ?config.embedding_provider,
            completion_provider = ?config.completion_provider,
            summary_strategy = ?config.summary_strategy,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let store_backend = parse_optional("STORE_BACKEND")?.unwrap_or(StoreBackend::Qdrant);
        let qdrant_url = load_env_optional("QDRANT_URL");
        if store_backend == StoreBackend::Qdrant && qdrant_url.is_none() {
            return Err(ConfigError::MissingVariable("QDRANT_URL".into()));
        }

        let layout_confidence_threshold =
            parse_optional::<f32>("LAYOUT_CONFIDENCE_THRESHOLD")?.unwrap_or(0.5);
        if !(0.0..=1.0).contains(&layout_confidence_threshold) {
            return Err(ConfigError::InvalidValue(
                "LAYOUT_CONFIDENCE_THRESHOLD".into(),
            ));
        }

        let config = Self {
            store_backend,
            qdrant_url,
            qdrant_collection_name: load_env_optional("QDRANT_COLLECTION_NAME")
                .unwrap_or_else(|| DEFAULT_COLLECTION.to_string()),
            qdrant_api_key: load_env_optional("QDRANT_API_KEY"),
            embedding_provider: parse_required("EMBEDDING_PROVIDER")?,
            embedding_model: load_env("EMBEDDING_MODEL")?,
            embedding_dimension: parse_required("EMBEDDING_DIMENSION")?,
            completion_provider: parse_optional("COMPLETION_PROVIDER")?
                .unwrap_or(CompletionProvider::Ollama),
            completion_model: load_env_optional("COMPLETION_MODEL")
                .unwrap_or_else(|| DEFAULT_COMPLETION_MODEL.to_string()),
            ollama_url: load_env_optional("OLLAMA_URL")
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            openai_base_url: load_env_optional("OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string()),
            openai_api_key: load_env_optional("OPENAI_API_KEY"),
            formula_ocr_url: load_env_optional("FORMULA_OCR_URL"),
            layout_confidence_threshold,
            text_splitter_chunk_size: parse_optional("TEXT_SPLITTER_CHUNK_SIZE")?
                .unwrap_or(ChunkingSettings::DEFAULT_CHUNK_SIZE),
            text_splitter_chunk_overlap: parse_optional("TEXT_SPLITTER_CHUNK_OVERLAP")?
                .unwrap_or(ChunkingSettings::DEFAULT_OVERLAP),
            text_splitter_unit: parse_optional("TEXT_SPLITTER_UNIT")?.unwrap_or(ChunkUnit::Chars),
            summary_strategy: parse_optional("SUMMARY_STRATEGY")?
                .unwrap_or(SummaryStrategyKind::Parallel),
            summary_concurrency: parse_optional("SUMMARY_CONCURRENCY")?
                .unwrap_or(SummarySettings::DEFAULT_CONCURRENCY),
            summary_context_window: parse_optional("SUMMARY_CONTEXT_WINDOW")?
                .unwrap_or(SummarySettings::DEFAULT_CONTEXT_WINDOW),
            summary_context_token_budget: parse_optional("SUMMARY_CONTEXT_TOKEN_BUDGET")?
                .unwrap_or(SummarySettings::DEFAULT_CONTEXT_TOKEN_BUDGET),
            rewrite_batch_size: parse_optional("REWRITE_BATCH_SIZE")?.unwrap_or(20),
        };

        if config.text_splitter_chunk_size == 0 {
            return Err(ConfigError::InvalidValue("TEXT_SPLITTER_CHUNK_SIZE".into()));
        }
        if config.requires_openai_key() && config.openai_api_key.is_none() {
            return Err(ConfigError::MissingVariable("OPENAI_API_KEY".into()));
        }

        Ok(config)
    }

    /// Chunker settings derived from the splitter variables.
    pub fn chunking_settings(&self) -> ChunkingSettings {
        ChunkingSettings {
            chunk_size: self.text_splitter_chunk_size,
            overlap: self.text_splitter_chunk_overlap,
            unit: self.text_splitter_unit,
            tokenizer_model: self.embedding_model.clone(),
        }
    }

    /// Summarization settings derived from the summary variables.
    pub fn summary_settings(&self) -> SummarySettings {
        let strategy = match self.summary_strategy {
            SummaryStrategyKind::Sequential => SummaryStrategy::Sequential,
            SummaryStrategyKind::Parallel => SummaryStrategy::BoundedParallel {
                concurrency: self.summary_concurrency.max(1),
            },
        };
        SummarySettings {
            strategy,
            context_window: self.summary_context_window,
            context_token_budget: self.summary_context_token_budget,
            ..SummarySettings::default()
        }
    }

    fn requires_openai_key(&self) -> bool {
        self.embedding_provider == EmbeddingProvider::OpenAI
            || self.completion_provider == CompletionProvider::OpenAI
    }
}

fn load_env(key: &str) -> Result<String, ConfigError> {
    load_env_optional(key).ok_or_else(|| ConfigError::MissingVariable(key.to_string()))
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_required<T: std::str::FromStr>(key: &str) -> Result<T, ConfigError> {
    load_env(key)?
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(key.to_string()))
}

fn parse_optional<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    load_env_optional(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
}

impl std::str::FromStr for StoreBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "qdrant" => Ok(Self::Qdrant),
            "memory" => Ok(Self::Memory),
            _ => Err(()),
        }
    }
}

impl std::str::FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            "hashing" => Ok(Self::Hashing),
            _ => Err(()),
        }
    }
}

impl std::str::FromStr for CompletionProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            _ => Err(()),
        }
    }
}

impl std::str::FromStr for SummaryStrategyKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "parallel" | "bounded-parallel" => Ok(Self::Parallel),
            _ => Err(()),
        }
    }
}

use std::{fs, path::PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use mathdoc_rag::{
    config::Config,
    extraction::DocumentTranscript,
    knowledge_base::KnowledgeBase,
    logging,
    store::{BaseMetadata, ChunkMetadata, StoreFilter},
};

#[derive(Parser)]
#[command(
    name = "mathdoc-rag",
    about = "Ingest transcribed technical documents and ask questions about them"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Chunk, summarize, embed, and store a transcript file.
    Ingest {
        #[arg(long)]
        transcript: PathBuf,
        /// Document identity; defaults to the file stem.
        #[arg(long)]
        prefix: Option<String>,
        #[arg(long)]
        no_summaries: bool,
    },
    /// Answer a question from stored chunks.
    Ask {
        question: String,
        #[arg(short, long, default_value_t = 4)]
        k: usize,
        #[arg(long)]
        document: Option<String>,
    },
    /// List the chunks closest to a query.
    Search {
        query: String,
        #[arg(short, long, default_value_t = 5)]
        k: usize,
    },
    /// Regenerate summaries on stored chunks.
    Rewrite {
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long, default_value_t = 0)]
        start: usize,
        #[arg(long)]
        document: Option<String>,
        /// Only chunks that have no summary yet.
        #[arg(long)]
        missing_only: bool,
    },
    /// Delete one chunk by id.
    Delete { id: String },
    /// Remove every stored chunk.
    Clear,
}

#[tokio::main]
async fn main() {
    logging::init_tracing();
    if let Err(err) = run().await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load().context("failed to load configuration")?;
    let kb = KnowledgeBase::from_config(config)
        .await
        .context("failed to initialise providers")?;

    match cli.command {
        Command::Ingest {
            transcript,
            prefix,
            no_summaries,
        } => {
            let text = fs::read_to_string(&transcript)
                .with_context(|| format!("failed to read {}", transcript.display()))?;
            let prefix = match prefix {
                Some(prefix) => prefix,
                None => transcript
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .context("transcript path has no file name")?,
            };
            let mut base = BaseMetadata::new();
            if let Some(name) = transcript.file_name() {
                base.insert("source".into(), name.to_string_lossy().into_owned().into());
            }
            let outcome = kb
                .orchestrator()
                .ingest(&prefix, &DocumentTranscript::from_text(text), &base, !no_summaries)
                .await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::Ask {
            question,
            k,
            document,
        } => {
            let filter = document.map(StoreFilter::for_document);
            let answer = kb.qa().answer_filtered(&question, k, filter.as_ref()).await?;
            println!("{}", serde_json::to_string_pretty(&answer)?);
        }
        Command::Search { query, k } => {
            for hit in kb.qa().search(&query, k, None).await? {
                println!("{:.3}\t{}\t{}", hit.score, hit.record.id, hit.record.text);
            }
        }
        Command::Rewrite {
            limit,
            start,
            document,
            missing_only,
        } => {
            let predicate = move |_: &str, metadata: &ChunkMetadata| {
                document
                    .as_deref()
                    .is_none_or(|prefix| metadata.doc_id_prefix == prefix)
                    && (!missing_only || metadata.summary.is_none())
            };
            let report = kb.rewriter().rewrite(limit, start, Some(&predicate)).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Delete { id } => {
            if id.trim().is_empty() {
                bail!("chunk id must not be empty");
            }
            kb.delete_chunk(&id).await?;
        }
        Command::Clear => kb.clear().await?,
    }

    Ok(())
}

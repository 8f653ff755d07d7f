use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use screenshot_search_core::{
    preview, AnthropicDescriber, CharacterNgramEmbedder, ConfidenceThresholds, Embedder,
    HttpOcrExtractor, IngestOutcome, IngestPipeline, IngestionOptions, LocalStore,
    OcrEndpointConfig, OpenSearchStore, RecordBuilder, RetryPolicy, SearchEngine, SearchQuery,
    Store, TesseractExtractor, TextExtractor, VisionConfig, VisualDescriber,
    DEFAULT_VISION_MODEL,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const PREVIEW_CHARS: usize = 300;

#[derive(Parser)]
#[command(name = "screenshot-search", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// OpenSearch base URL. Without it records are kept in the local store.
    #[arg(long, env = "OPENSEARCH_URL")]
    opensearch_url: Option<String>,

    /// OpenSearch index name
    #[arg(long, env = "OPENSEARCH_INDEX", default_value = "screenshots")]
    opensearch_index: String,

    /// Directory of the local store
    #[arg(long, env = "SCREENSHOT_DATA_DIR", default_value = ".screenshot-search")]
    data_dir: PathBuf,

    /// Anthropic API key. Without it visual descriptions are skipped.
    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    anthropic_api_key: Option<String>,

    /// Vision model used for screenshot descriptions
    #[arg(long, env = "VISION_MODEL", default_value = DEFAULT_VISION_MODEL)]
    vision_model: String,

    /// HTTP OCR endpoint used instead of the local tesseract binary
    #[arg(long, env = "OCR_ENDPOINT")]
    ocr_endpoint: Option<String>,

    /// Bearer token for the OCR endpoint
    #[arg(long, env = "OCR_API_KEY", hide_env_values = true)]
    ocr_api_key: Option<String>,

    /// tesseract binary
    #[arg(long, env = "TESSERACT_BIN", default_value = "tesseract")]
    tesseract_bin: String,

    /// Embedding backend
    #[arg(long, value_enum, default_value_t = EmbedderKind::Ngram)]
    embedder: EmbedderKind,

    /// Embedding model name (fastembed backend only)
    #[arg(long, default_value = "all-MiniLM-L6-v2")]
    embedding_model: String,

    /// Timeout for every remote call, in seconds
    #[arg(long, default_value = "30")]
    request_timeout_secs: u64,

    /// Embedding attempts before a record is stored without a vector
    #[arg(long, default_value = "3")]
    embed_retries: u32,
}

#[derive(Clone, Copy, ValueEnum)]
enum EmbedderKind {
    /// Hashed character trigrams, no model needed.
    Ngram,
    /// Local sentence-embedding model (needs the `fastembed` feature).
    Fastembed,
}

#[derive(Subcommand)]
enum Command {
    /// Process every image under a folder and store it.
    Ingest {
        /// Folder that contains screenshots recursively.
        #[arg(long)]
        folder: PathBuf,
        /// Images processed at the same time.
        #[arg(long, default_value = "4")]
        concurrency: usize,
        /// Custom instructions for the vision model.
        #[arg(long)]
        instructions: Option<String>,
    },
    /// Rank stored screenshots against a free-text query.
    Search {
        /// Search query
        #[arg(long)]
        query: String,
        /// Number of results to return.
        #[arg(long, default_value = "5")]
        top_k: usize,
        /// Lowest score labelled high confidence. Defaults to the embedder's cut-off.
        #[arg(long)]
        high: Option<f64>,
        /// Lowest score labelled medium confidence. Defaults to the embedder's cut-off.
        #[arg(long)]
        medium: Option<f64>,
    },
    /// Show which backend is active and how many screenshots it holds.
    Stats,
    /// Remove one screenshot record.
    Delete {
        #[arg(long)]
        id: String,
    },
    /// Remove every screenshot record.
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "screenshot-search boot"
    );

    let timeout = Duration::from_secs(cli.request_timeout_secs.max(1));
    let retry = RetryPolicy {
        attempts: cli.embed_retries.max(1),
        timeout,
        ..RetryPolicy::default()
    };

    let embedder = build_embedder(&cli)?;
    let store = open_store(&cli, embedder.dimensions(), timeout).await?;

    match cli.command {
        Command::Ingest {
            ref folder,
            concurrency,
            ref instructions,
        } => {
            let mut builder = RecordBuilder::new(
                build_extractor(&cli, timeout)?,
                build_describer(&cli, timeout)?,
                timeout,
            );
            if let Some(instructions) = instructions {
                builder = builder.with_instructions(instructions.clone());
            }

            let options = IngestionOptions {
                concurrency,
                embedding: retry,
            };
            let pipeline = IngestPipeline::new(builder, Arc::clone(&embedder), store, options);
            ingest(&pipeline, folder).await?;
        }
        Command::Search {
            ref query,
            top_k,
            high,
            medium,
        } => {
            let defaults = embedder.default_thresholds();
            let thresholds = ConfidenceThresholds::new(
                high.unwrap_or(defaults.high),
                medium.unwrap_or(defaults.medium),
            )?;
            let engine = SearchEngine::new(embedder, store).with_retry(retry);
            let search_query = SearchQuery::new(query.clone(), top_k).with_thresholds(thresholds);

            let results = engine.search(&search_query).await;
            if results.is_empty() {
                println!("no results for '{query}'");
                return Ok(());
            }

            println!("{} results for '{}'", results.len(), query);
            for (position, hit) in results.iter().enumerate() {
                println!(
                    "{}. {} score={:.4} ({:.1}%) confidence={} id={}",
                    position + 1,
                    hit.record.source_name,
                    hit.score,
                    hit.display_score() * 100.0,
                    hit.confidence,
                    hit.record.id
                );
                if let Some(text) = hit.record.extracted_text.as_deref() {
                    if !text.is_empty() {
                        println!("  ocr_text: {}", preview(text, PREVIEW_CHARS));
                    }
                }
                if let Some(description) = hit.record.visual_description.as_deref() {
                    if !description.is_empty() {
                        println!("  visual_description: {}", preview(description, PREVIEW_CHARS));
                    }
                }
            }
        }
        Command::Stats => {
            let count = store.count().await?;
            println!("backend={} ({})", store.backend_name(), store.kind());
            println!("{count} screenshots stored");
        }
        Command::Delete { ref id } => {
            if store.delete(id).await? {
                println!("deleted {id}");
            } else {
                println!("no record with id {id}");
            }
        }
        Command::Clear => {
            store.clear().await?;
            println!("store cleared at {}", Utc::now().to_rfc3339());
        }
    }

    Ok(())
}

async fn ingest(pipeline: &IngestPipeline, folder: &Path) -> anyhow::Result<()> {
    let report = pipeline.ingest_folder(folder).await?;

    for image in &report.images {
        match &image.outcome {
            IngestOutcome::Succeeded => {}
            IngestOutcome::PartiallySucceeded { missing } => {
                warn!(source = %image.source_name, missing = ?missing, "partially ingested");
            }
            IngestOutcome::Failed { reason } => {
                warn!(source = %image.source_name, reason = %reason, "ingestion failed");
            }
        }
    }

    println!(
        "{} succeeded, {} partially succeeded, {} failed ({} images, {})",
        report.succeeded(),
        report.partially_succeeded(),
        report.failed(),
        report.images.len(),
        Utc::now().to_rfc3339()
    );
    Ok(())
}

fn build_embedder(cli: &Cli) -> anyhow::Result<Arc<dyn Embedder>> {
    match cli.embedder {
        EmbedderKind::Ngram => {
            let embedder: Arc<dyn Embedder> = Arc::new(CharacterNgramEmbedder::default());
            Ok(embedder)
        }
        EmbedderKind::Fastembed => fastembed_embedder(cli),
    }
}

#[cfg(feature = "fastembed")]
fn fastembed_embedder(cli: &Cli) -> anyhow::Result<Arc<dyn Embedder>> {
    let embedder = screenshot_search_core::FastEmbedder::new(
        &cli.embedding_model,
        cli.data_dir.join("models"),
    )?;
    let embedder: Arc<dyn Embedder> = Arc::new(embedder);
    Ok(embedder)
}

#[cfg(not(feature = "fastembed"))]
fn fastembed_embedder(cli: &Cli) -> anyhow::Result<Arc<dyn Embedder>> {
    anyhow::bail!(
        "embedding model {} needs a build with the `fastembed` feature",
        cli.embedding_model
    )
}

async fn open_store(cli: &Cli, dimensions: usize, timeout: Duration) -> anyhow::Result<Store> {
    let remote = match cli.opensearch_url.as_deref() {
        Some(url) => match OpenSearchStore::new(url, &cli.opensearch_index, dimensions, timeout) {
            Ok(remote) => Some(remote),
            Err(error) => {
                warn!(error = %error, "remote store misconfigured");
                None
            }
        },
        None => None,
    };

    let store = Store::select(
        remote,
        || LocalStore::open(&cli.data_dir, dimensions),
        dimensions,
    )
    .await?;
    Ok(store)
}

fn build_extractor(cli: &Cli, timeout: Duration) -> anyhow::Result<Arc<dyn TextExtractor>> {
    let extractor: Arc<dyn TextExtractor> = match &cli.ocr_endpoint {
        Some(endpoint) => Arc::new(HttpOcrExtractor::new(OcrEndpointConfig {
            endpoint: endpoint.clone(),
            api_key: cli.ocr_api_key.clone(),
            timeout,
        })?),
        None => Arc::new(TesseractExtractor::new(&cli.tesseract_bin)),
    };
    Ok(extractor)
}

fn build_describer(
    cli: &Cli,
    timeout: Duration,
) -> anyhow::Result<Option<Arc<dyn VisualDescriber>>> {
    let Some(api_key) = cli.anthropic_api_key.as_deref().filter(|key| !key.trim().is_empty())
    else {
        warn!("ANTHROPIC_API_KEY not set, visual descriptions disabled");
        return Ok(None);
    };

    let config = VisionConfig {
        model: cli.vision_model.clone(),
        timeout,
        ..VisionConfig::new(api_key)
    };
    let describer: Arc<dyn VisualDescriber> = Arc::new(AnthropicDescriber::new(config)?);
    Ok(Some(describer))
}

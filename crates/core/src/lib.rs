pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod models;
pub mod record;
pub mod search;
pub mod store;
pub mod stores;
pub mod text;
pub mod traits;
pub mod vision;

pub use config::{ConfidenceThresholds, IngestionOptions, RetryPolicy};
#[cfg(feature = "fastembed")]
pub use embeddings::FastEmbedder;
pub use embeddings::{
    embed_with_retry, is_zero_vector, CharacterNgramEmbedder, Embedder,
    DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{EmbeddingError, ExtractionError, IngestError, SearchError, StoreError};
pub use extractor::{HttpOcrExtractor, OcrEndpointConfig, TesseractExtractor};
pub use ingest::{
    digest_bytes, discover_images, ImageReport, IngestOutcome, IngestPipeline, IngestionReport,
};
pub use models::{
    Confidence, ImageInput, MissingPart, QueryResult, ScreenshotRecord, SearchQuery,
};
pub use record::RecordBuilder;
pub use search::{cosine_similarity, rank, SearchEngine};
pub use store::Store;
pub use stores::{LocalStore, OpenSearchStore};
pub use text::{clean_ocr_text, combine_texts, normalize_whitespace, preview};
pub use traits::{BackendKind, RecordStore, RemoteBackend, TextExtractor, VisualDescriber};
pub use vision::{AnthropicDescriber, VisionConfig, DEFAULT_VISION_MODEL};

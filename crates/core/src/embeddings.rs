use crate::config::{ConfidenceThresholds, RetryPolicy};
use crate::error::EmbeddingError;
use crate::text::normalize_whitespace;
use async_trait::async_trait;
use tracing::warn;

const DEFAULT: usize = 384;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

/// Maps text to a fixed-length vector. Identical input gives an identical
/// vector, and empty input gives the zero vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Confidence cut-offs that fit this embedder's score range. Used when a
    /// query does not carry its own.
    fn default_thresholds(&self) -> ConfidenceThresholds {
        ConfidenceThresholds::default()
    }
}

pub fn is_zero_vector(vector: &[f32]) -> bool {
    vector.iter().all(|value| *value == 0.0)
}

/// Hashed bag of word unigrams plus boundary-padded character trigrams per
/// word (`^ok$` gives `^ok` and `ok$`), so every non-empty input lands on at
/// least one bucket.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    /// Lexical overlap scores well below sentence-embedding similarity;
    /// unrelated screens sit under 0.1 and a single shared keyword near 0.25.
    pub const THRESHOLDS: ConfidenceThresholds = ConfidenceThresholds {
        high: 0.5,
        medium: 0.2,
    };

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = normalize_whitespace(text).to_lowercase();
        if lowered.is_empty() {
            return vector;
        }

        let mut words: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|word| !word.is_empty())
            .collect();
        if words.is_empty() {
            words.push(lowered.as_str());
        }

        let len = vector.len();
        for word in words {
            vector[bucket(&format!("#{word}"), len)] += 1.0;

            let padded: Vec<char> = format!("^{word}$").chars().collect();
            for window in padded.windows(3) {
                let token = window.iter().collect::<String>();
                vector[bucket(&token, len)] += 1.0;
            }
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

fn bucket(token: &str, buckets: usize) -> usize {
    let mut hash = 1469598103934665603u64;
    for byte in token.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(1099511628211);
    }
    (hash % buckets as u64) as usize
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.embed_sync(text))
    }

    fn default_thresholds(&self) -> ConfidenceThresholds {
        Self::THRESHOLDS
    }
}

/// Embeds with a per-attempt timeout, retrying retryable failures with
/// linear backoff. The returned vector is checked against `dimensions()`.
pub async fn embed_with_retry(
    embedder: &dyn Embedder,
    text: &str,
    policy: &RetryPolicy,
) -> Result<Vec<f32>, EmbeddingError> {
    let attempts = policy.attempts.max(1);
    let mut last_error = EmbeddingError::Unavailable("no attempt made".to_string());

    for attempt in 1..=attempts {
        let outcome = match tokio::time::timeout(policy.timeout, embedder.embed(text)).await {
            Ok(result) => result,
            Err(_) => Err(EmbeddingError::Timeout(policy.timeout)),
        };

        match outcome {
            Ok(vector) if vector.len() != embedder.dimensions() => {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: embedder.dimensions(),
                    got: vector.len(),
                });
            }
            Ok(vector) => return Ok(vector),
            Err(error) if error.is_retryable() && attempt < attempts => {
                warn!(attempt, attempts, error = %error, "embedding attempt failed, retrying");
                tokio::time::sleep(policy.delay_for(attempt)).await;
                last_error = error;
            }
            Err(error) => return Err(error),
        }
    }

    Err(last_error)
}

#[cfg(feature = "fastembed")]
pub use self::fast::FastEmbedder;

#[cfg(feature = "fastembed")]
mod fast {
    use super::{Embedder, EmbeddingError};
    use crate::text::normalize_whitespace;
    use async_trait::async_trait;
    use fastembed::{InitOptions, TextEmbedding};
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    /// Local sentence-embedding model. fastembed's `embed` needs `&mut self`,
    /// hence the mutex; inference runs on the blocking pool.
    pub struct FastEmbedder {
        model: Arc<Mutex<TextEmbedding>>,
        model_name: String,
        dimensions: usize,
    }

    impl FastEmbedder {
        pub fn new(model_name: &str, cache_dir: PathBuf) -> Result<Self, EmbeddingError> {
            let model_enum = parse_model_name(model_name)?;
            let options = InitOptions::new(model_enum)
                .with_cache_dir(cache_dir)
                .with_show_download_progress(false);

            let mut model = TextEmbedding::try_new(options)
                .map_err(|error| EmbeddingError::Unavailable(error.to_string()))?;

            let probe = model
                .embed(vec!["probe"], None)
                .map_err(|error| EmbeddingError::Unavailable(error.to_string()))?;
            let dimensions = probe
                .first()
                .map(Vec::len)
                .ok_or_else(|| EmbeddingError::Unavailable("model returned no embedding".into()))?;

            Ok(Self {
                model: Arc::new(Mutex::new(model)),
                model_name: model_name.to_string(),
                dimensions,
            })
        }

        pub fn name(&self) -> &str {
            &self.model_name
        }
    }

    #[async_trait]
    impl Embedder for FastEmbedder {
        fn dimensions(&self) -> usize {
            self.dimensions
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            let normalized = normalize_whitespace(text);
            if normalized.is_empty() {
                return Ok(vec![0.0; self.dimensions]);
            }

            let model = Arc::clone(&self.model);
            let embeddings = tokio::task::spawn_blocking(move || {
                let mut model = model.lock().map_err(|error| {
                    EmbeddingError::Unavailable(format!("model lock poisoned: {error}"))
                })?;
                model
                    .embed(vec![normalized], None)
                    .map_err(|error| EmbeddingError::Unavailable(error.to_string()))
            })
            .await
            .map_err(|error| EmbeddingError::Unavailable(error.to_string()))??;

            embeddings
                .into_iter()
                .next()
                .ok_or_else(|| EmbeddingError::Unavailable("no embedding returned".to_string()))
        }
    }

    fn parse_model_name(name: &str) -> Result<fastembed::EmbeddingModel, EmbeddingError> {
        match name.to_lowercase().as_str() {
            "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
            "all-minilm-l6-v2-q" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2Q),
            "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
            "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
            _ => Err(EmbeddingError::InvalidModel(format!(
                "{name} (supported: all-MiniLM-L6-v2, all-MiniLM-L6-v2-q, bge-small-en-v1.5, bge-base-en-v1.5)"
            ))),
        }
    }

}

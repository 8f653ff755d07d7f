use crate::config::IngestionOptions;
use crate::embeddings::{embed_with_retry, Embedder};
use crate::record::RecordBuilder;
use crate::store::Store;
use crate::{ImageInput, IngestError, MissingPart};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};
use walkdir::WalkDir;

pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp"];

pub fn discover_images(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_image = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                IMAGE_EXTENSIONS
                    .iter()
                    .any(|known| ext.eq_ignore_ascii_case(known))
            });

        if is_image {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub async fn load_images(paths: &[PathBuf]) -> Vec<Result<ImageInput, (String, std::io::Error)>> {
    let mut loaded = Vec::with_capacity(paths.len());
    for path in paths {
        let source_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());

        loaded.push(
            tokio::fs::read(path)
                .await
                .map(|bytes| ImageInput::new(source_name.clone(), bytes))
                .map_err(|error| (source_name, error)),
        );
    }
    loaded
}

#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Succeeded,
    /// Stored, but some attempted part is missing.
    PartiallySucceeded { missing: Vec<MissingPart> },
    /// Not stored.
    Failed { reason: String },
}

#[derive(Debug, Clone)]
pub struct ImageReport {
    pub source_name: String,
    pub id: Option<String>,
    pub outcome: IngestOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct IngestionReport {
    pub images: Vec<ImageReport>,
}

impl IngestionReport {
    pub fn succeeded(&self) -> usize {
        self.count(|outcome| matches!(outcome, IngestOutcome::Succeeded))
    }

    pub fn partially_succeeded(&self) -> usize {
        self.count(|outcome| matches!(outcome, IngestOutcome::PartiallySucceeded { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|outcome| matches!(outcome, IngestOutcome::Failed { .. }))
    }

    fn count(&self, predicate: impl Fn(&IngestOutcome) -> bool) -> usize {
        self.images
            .iter()
            .filter(|image| predicate(&image.outcome))
            .count()
    }
}

/// image -> record -> embedding -> store, one image at a time or as a
/// bounded-concurrency batch in which every image is isolated from the others.
#[derive(Clone)]
pub struct IngestPipeline {
    builder: RecordBuilder,
    embedder: Arc<dyn Embedder>,
    store: Store,
    options: IngestionOptions,
}

impl IngestPipeline {
    pub fn new(
        builder: RecordBuilder,
        embedder: Arc<dyn Embedder>,
        store: Store,
        options: IngestionOptions,
    ) -> Self {
        Self {
            builder,
            embedder,
            store,
            options,
        }
    }

    pub async fn ingest_one(&self, image: ImageInput) -> ImageReport {
        let record = self
            .builder
            .build(&image.bytes, &image.source_name)
            .await;
        let id = record.id.clone();

        let record = match embed_with_retry(
            self.embedder.as_ref(),
            &record.combined_text,
            &self.options.embedding,
        )
        .await
        {
            Ok(vector) => record.with_embedding(vector),
            Err(error) => {
                warn!(
                    source = %image.source_name,
                    error = %error,
                    "embedding unavailable, storing without embedding"
                );
                record
            }
        };

        let mut missing = record.missing_parts();
        if !self.builder.describes_visuals() {
            missing.retain(|part| *part != MissingPart::VisualDescription);
        }

        let outcome = match self.store.put(record).await {
            Ok(()) if missing.is_empty() => IngestOutcome::Succeeded,
            Ok(()) => IngestOutcome::PartiallySucceeded { missing },
            Err(error) => IngestOutcome::Failed {
                reason: error.to_string(),
            },
        };

        info!(source = %image.source_name, id = %id, outcome = ?outcome, "image ingested");

        ImageReport {
            source_name: image.source_name,
            id: Some(id),
            outcome,
        }
    }

    /// Reports come back in input order.
    pub async fn ingest_batch(&self, images: Vec<ImageInput>) -> IngestionReport {
        let permits = Arc::new(Semaphore::new(self.options.concurrency.max(1)));
        let mut tasks = JoinSet::new();
        let mut names = Vec::with_capacity(images.len());

        for (index, image) in images.into_iter().enumerate() {
            names.push(image.source_name.clone());
            let pipeline = self.clone();
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                (index, pipeline.ingest_one(image).await)
            });
        }

        let mut slots: Vec<Option<ImageReport>> = vec![None; names.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, report)) => slots[index] = Some(report),
                Err(error) => warn!(error = %error, "ingestion task aborted"),
            }
        }

        let images = slots
            .into_iter()
            .zip(names)
            .map(|(slot, source_name)| {
                slot.unwrap_or_else(|| ImageReport {
                    source_name,
                    id: None,
                    outcome: IngestOutcome::Failed {
                        reason: "ingestion task aborted".to_string(),
                    },
                })
            })
            .collect();

        IngestionReport { images }
    }

    /// Discovers, loads and ingests every image under `folder`. Unreadable
    /// files are reported as failed without stopping the batch.
    pub async fn ingest_folder(&self, folder: &Path) -> Result<IngestionReport, IngestError> {
        if !folder.is_dir() {
            return Err(IngestError::InvalidArgument(format!(
                "{} is not a directory",
                folder.display()
            )));
        }

        let paths = discover_images(folder);
        if paths.is_empty() {
            return Err(IngestError::NoImages(folder.display().to_string()));
        }

        Ok(self.ingest_paths(&paths).await)
    }

    /// Loads and ingests `paths`. The report follows the order of `paths`;
    /// unreadable files show up as failed in their own position.
    pub async fn ingest_paths(&self, paths: &[PathBuf]) -> IngestionReport {
        let mut slots = Vec::with_capacity(paths.len());
        let mut images = Vec::new();
        for loaded in load_images(paths).await {
            match loaded {
                Ok(image) => {
                    images.push(image);
                    slots.push(None);
                }
                Err((source_name, error)) => slots.push(Some(ImageReport {
                    source_name,
                    id: None,
                    outcome: IngestOutcome::Failed {
                        reason: error.to_string(),
                    },
                })),
            }
        }

        let mut ingested = self.ingest_batch(images).await.images.into_iter();
        let images = slots
            .into_iter()
            .filter_map(|slot| slot.or_else(|| ingested.next()))
            .collect();

        IngestionReport { images }
    }
}

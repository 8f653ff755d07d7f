use crate::{ExtractionError, ScreenshotRecord, StoreError};
use async_trait::async_trait;

#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// OCR text of the image. May be empty.
    async fn extract_text(&self, image: &[u8]) -> Result<String, ExtractionError>;
}

#[async_trait]
pub trait VisualDescriber: Send + Sync {
    /// Natural-language description of the UI and visual elements.
    /// `instructions` replaces the default analysis prompt.
    async fn describe(
        &self,
        image: &[u8],
        instructions: Option<&str>,
    ) -> Result<String, ExtractionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Remote,
    Local,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Remote => f.write_str("remote"),
            BackendKind::Local => f.write_str("local"),
        }
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn name(&self) -> &str;

    /// Inserts or fully replaces the record with the same id.
    async fn put(&self, record: ScreenshotRecord) -> Result<(), StoreError>;

    async fn get_all(&self) -> Result<Vec<ScreenshotRecord>, StoreError>;

    /// Returns whether a record was removed.
    async fn delete(&self, id: &str) -> Result<bool, StoreError>;

    async fn clear(&self) -> Result<(), StoreError>;

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.get_all().await?.len())
    }
}

#[async_trait]
pub trait RemoteBackend: RecordStore {
    /// Startup probe. An error here makes the store fall back to local storage.
    async fn connect(&self) -> Result<(), StoreError>;
}

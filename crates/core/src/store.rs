use crate::stores::LocalStore;
use crate::traits::{BackendKind, RecordStore, RemoteBackend};
use crate::{ScreenshotRecord, StoreError};
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

/// The store used for the whole process lifetime. The backend is chosen
/// once in [`Store::select`] and every call goes to that backend only.
#[derive(Clone)]
pub struct Store {
    backend: Arc<dyn RecordStore>,
    dimensions: usize,
}

impl Store {
    pub fn new(backend: Arc<dyn RecordStore>, dimensions: usize) -> Self {
        Self {
            backend,
            dimensions,
        }
    }

    /// Uses `remote` when it answers the startup probe. Otherwise the local
    /// store is opened through `open_local`, which is never called when the
    /// remote is used.
    pub async fn select<R, F, Fut>(
        remote: Option<R>,
        open_local: F,
        dimensions: usize,
    ) -> Result<Self, StoreError>
    where
        R: RemoteBackend + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<LocalStore, StoreError>>,
    {
        if let Some(remote) = remote {
            match remote.connect().await {
                Ok(()) => {
                    info!(backend = remote.name(), "using remote store");
                    return Ok(Self::new(Arc::new(remote), dimensions));
                }
                Err(error) => {
                    warn!(error = %error, "remote store unavailable, falling back to local store");
                }
            }
        }

        let local = open_local().await?;
        info!(
            backend = local.name(),
            path = ?local.path(),
            "using local store"
        );
        Ok(Self::new(Arc::new(local), dimensions))
    }

    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Validates, then inserts or fully replaces the record with the same id.
    pub async fn put(&self, record: ScreenshotRecord) -> Result<(), StoreError> {
        record.validate(self.dimensions)?;
        self.backend.put(record).await
    }

    pub async fn get_all(&self) -> Result<Vec<ScreenshotRecord>, StoreError> {
        self.backend.get_all().await
    }

    pub async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        self.backend.delete(id).await
    }

    pub async fn clear(&self) -> Result<(), StoreError> {
        self.backend.clear().await
    }

    pub async fn count(&self) -> Result<usize, StoreError> {
        self.backend.count().await
    }
}

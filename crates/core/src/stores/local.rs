use crate::traits::{BackendKind, RecordStore};
use crate::{ScreenshotRecord, StoreError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

pub const RECORDS_FILE_NAME: &str = "records.json";

/// Single-process store. Records live in memory behind one mutex; when a
/// data directory is given, every mutation rewrites `records.json` while
/// the lock is still held, so concurrent writers cannot interleave.
pub struct LocalStore {
    records: Mutex<BTreeMap<String, ScreenshotRecord>>,
    path: Option<PathBuf>,
}

impl LocalStore {
    pub fn in_memory() -> Self {
        Self {
            records: Mutex::new(BTreeMap::new()),
            path: None,
        }
    }

    /// Loads `records.json` from `data_dir`. Stored embeddings must have
    /// `dimensions` entries; records from another embedder are refused.
    pub async fn open(data_dir: &Path, dimensions: usize) -> Result<Self, StoreError> {
        tokio::fs::create_dir_all(data_dir).await?;
        let path = data_dir.join(RECORDS_FILE_NAME);

        let records = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let stored: Vec<ScreenshotRecord> = serde_json::from_slice(&bytes)?;
                let foreign = stored
                    .iter()
                    .filter_map(|record| record.embedding.as_ref())
                    .map(Vec::len)
                    .find(|len| *len != dimensions);
                if let Some(found) = foreign {
                    return Err(StoreError::DimensionMismatch {
                        backend: format!("local store {}", path.display()),
                        expected: dimensions,
                        found,
                    });
                }
                stored
                    .into_iter()
                    .map(|record| (record.id.clone(), record))
                    .collect()
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(error) => return Err(StoreError::Io(error)),
        };

        Ok(Self {
            records: Mutex::new(records),
            path: Some(path),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn persist(&self, records: &BTreeMap<String, ScreenshotRecord>) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let snapshot: Vec<&ScreenshotRecord> = records.values().collect();
        let bytes = serde_json::to_vec_pretty(&snapshot)?;

        let temp_path = path.with_extension("json.tmp");
        if let Err(error) = write_then_rename(&temp_path, path, &bytes).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(StoreError::Write {
                backend: "local".to_string(),
                details: format!("{}: {error}", path.display()),
            });
        }

        Ok(())
    }
}

async fn write_then_rename(temp_path: &Path, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(temp_path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(temp_path, path).await
}

#[async_trait]
impl RecordStore for LocalStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn name(&self) -> &str {
        "local"
    }

    async fn put(&self, record: ScreenshotRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let id = record.id.clone();
        let previous = records.insert(id.clone(), record);

        if let Err(error) = self.persist(&records).await {
            match previous {
                Some(previous) => records.insert(id, previous),
                None => records.remove(&id),
            };
            return Err(error);
        }

        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<ScreenshotRecord>, StoreError> {
        Ok(self.records.lock().await.values().cloned().collect())
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let mut records = self.records.lock().await;
        let Some(removed) = records.remove(id) else {
            return Ok(false);
        };

        if let Err(error) = self.persist(&records).await {
            records.insert(removed.id.clone(), removed);
            return Err(error);
        }

        Ok(true)
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let previous = std::mem::take(&mut *records);

        if let Err(error) = self.persist(&records).await {
            *records = previous;
            return Err(error);
        }

        Ok(())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.records.lock().await.len())
    }
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::sync::{watch, Mutex, OnceCell};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, warn};

use super::SnapshotStore;
use crate::errors::{StoreError, StoreResult};
use crate::models::CatalogSnapshot;

/// On-disk shape of the record
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreRecord {
    #[serde(default)]
    offline_areas: CatalogSnapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    saved_at: Option<DateTime<Utc>>,
}

/// Snapshot store backed by a single JSON file.
///
/// Writes go to a temporary file in the same directory which is then renamed
/// over the target, so a reader never sees a half-written record.
pub struct JsonFileStore {
    path: PathBuf,
    tx: watch::Sender<CatalogSnapshot>,
    loaded: OnceCell<()>,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        let (tx, _) = watch::channel(CatalogSnapshot::default());
        Self {
            path: path.into(),
            tx,
            loaded: OnceCell::new(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn ensure_loaded(&self) -> StoreResult<()> {
        self.loaded
            .get_or_try_init(|| async {
                let snapshot = load_record(&self.path).await?;
                debug!(
                    path = %self.path.display(),
                    entries = snapshot.len(),
                    "Loaded area snapshot"
                );
                self.tx.send_replace(snapshot);
                Ok::<(), StoreError>(())
            })
            .await
            .map(|_| ())
    }
}

async fn load_record(path: &Path) -> StoreResult<CatalogSnapshot> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(CatalogSnapshot::default());
        }
        Err(e) => return Err(e.into()),
    };

    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(CatalogSnapshot::default());
    }

    let record: StoreRecord = serde_json::from_slice(&bytes)?;
    Ok(record.offline_areas)
}

fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl SnapshotStore for JsonFileStore {
    async fn read(&self) -> StoreResult<BoxStream<'static, CatalogSnapshot>> {
        self.ensure_loaded().await?;
        Ok(WatchStream::new(self.tx.subscribe()).boxed())
    }

    async fn write(&self, snapshot: CatalogSnapshot) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        // A later lazy load must not clobber this write.
        if let Err(e) = self.ensure_loaded().await {
            warn!(path = %self.path.display(), error = %e, "Replacing unreadable area snapshot");
            let _ = self.loaded.set(());
        }

        let record = StoreRecord {
            offline_areas: snapshot,
            saved_at: Some(Utc::now()),
        };
        let bytes = serde_json::to_vec_pretty(&record)?;

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomically(&path, &bytes))
            .await
            .map_err(|e| StoreError::Writer {
                message: e.to_string(),
            })??;

        info!(
            path = %self.path.display(),
            entries = record.offline_areas.len(),
            "Saved area snapshot"
        );
        self.tx.send_replace(record.offline_areas);
        Ok(())
    }
}

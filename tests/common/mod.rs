//! Scripted collaborators for driving the manager in integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::{broadcast, mpsc, oneshot, Notify};
use tokio_stream::wrappers::UnboundedReceiverStream;

use offline_map_areas::catalog::{DownloadJob, DownloadParameters, RemoteCatalog};
use offline_map_areas::config::ManagerConfig;
use offline_map_areas::connectivity::StaticConnectivity;
use offline_map_areas::errors::{CatalogError, CatalogResult};
use offline_map_areas::manager::{Collaborators, OfflineAreaManager};
use offline_map_areas::models::{
    AreaEntry, AreaEvent, CatalogSnapshot, CatalogSummary, RemoteHandle, RemoteItem,
    SnapshotEntry,
};
use offline_map_areas::persistence::{JsonFileStore, SnapshotStore};
use offline_map_areas::storage::{AreaFilesystem, AreaLayout, LocalFilesystem};
use url::Url;

pub fn remote_item(id: &str) -> RemoteItem {
    RemoteItem {
        id: id.to_string(),
        title: format!("Area {id}"),
        description: format!("Preplanned area {id}"),
        thumbnail_ref: Some(format!("thumbs/{id}.png")),
        handle: RemoteHandle::new(format!("packages/{id}.mmpk")),
    }
}

pub fn snapshot_entry<P: Into<PathBuf>>(id: &str, path: P) -> SnapshotEntry {
    SnapshotEntry {
        id: id.to_string(),
        title: format!("Area {id}"),
        description: format!("Preplanned area {id}"),
        download_path: Some(path.into()),
        thumbnail_ref: None,
    }
}

/// How a scripted job behaves once started
#[derive(Clone)]
pub struct JobScript {
    pub progress: Vec<u8>,
    pub failure: Option<String>,
    /// Held until notified, after the scripted progress was emitted
    pub gate: Option<Arc<Notify>>,
    /// Emitted once the gate opens
    pub progress_after_gate: Vec<u8>,
    /// Write a partial artifact before any progress, and remove the whole
    /// destination again on failure
    pub writes_partial: bool,
}

impl JobScript {
    pub fn succeeding(progress: &[u8]) -> Self {
        Self {
            progress: progress.to_vec(),
            failure: None,
            gate: None,
            progress_after_gate: Vec::new(),
            writes_partial: false,
        }
    }

    pub fn failing(progress: &[u8], message: &str) -> Self {
        Self {
            progress: progress.to_vec(),
            failure: Some(message.to_string()),
            gate: None,
            progress_after_gate: Vec::new(),
            writes_partial: false,
        }
    }

    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn then_progress(mut self, progress: &[u8]) -> Self {
        self.progress_after_gate = progress.to_vec();
        self
    }

    pub fn writing_partial(mut self) -> Self {
        self.writes_partial = true;
        self
    }
}

/// Catalog returning a fixed listing and running scripted jobs
pub struct ScriptedCatalog {
    items: Mutex<Vec<RemoteItem>>,
    listing_fails: bool,
    summary: Option<CatalogSummary>,
    scripts: Mutex<HashMap<String, JobScript>>,
    underivable: HashSet<String>,
    /// Whether the destination already existed when each job started
    destination_existed: Arc<Mutex<Vec<bool>>>,
}

impl ScriptedCatalog {
    pub fn new(items: Vec<RemoteItem>) -> Self {
        Self {
            items: Mutex::new(items),
            listing_fails: false,
            summary: None,
            scripts: Mutex::new(HashMap::new()),
            underivable: HashSet::new(),
            destination_existed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn unreachable() -> Self {
        let mut catalog = Self::new(Vec::new());
        catalog.listing_fails = true;
        catalog
    }

    pub fn with_summary(mut self, title: &str) -> Self {
        self.summary = Some(CatalogSummary {
            title: title.to_string(),
            description: String::new(),
            thumbnail_ref: None,
        });
        self
    }

    pub fn with_job(self, id: &str, script: JobScript) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(id.to_string(), script);
        self
    }

    pub fn with_underivable(mut self, id: &str) -> Self {
        self.underivable.insert(id.to_string());
        self
    }

    /// Change what the next listing returns
    pub fn set_items(&self, items: Vec<RemoteItem>) {
        *self.items.lock().unwrap() = items;
    }

    pub fn destination_existed(&self) -> Vec<bool> {
        self.destination_existed.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteCatalog for ScriptedCatalog {
    async fn list_areas(&self) -> CatalogResult<Vec<RemoteItem>> {
        if self.listing_fails {
            return Err(CatalogError::Status {
                status: 503,
                url: "http://catalog.test/areas.json".to_string(),
            });
        }
        Ok(self.items.lock().unwrap().clone())
    }

    async fn summary(&self) -> CatalogResult<Option<CatalogSummary>> {
        Ok(self.summary.clone())
    }

    async fn download_parameters(
        &self,
        handle: &RemoteHandle,
    ) -> CatalogResult<DownloadParameters> {
        let item = self
            .items
            .lock()
            .unwrap()
            .iter()
            .find(|item| &item.handle == handle)
            .cloned()
            .ok_or_else(|| CatalogError::invalid_locator(handle.locator(), "unknown handle"))?;
        if self.underivable.contains(&item.id) {
            return Err(CatalogError::invalid_locator(
                handle.locator(),
                "package is not available for download",
            ));
        }

        let source = Url::parse("http://catalog.test/")
            .and_then(|base| base.join(handle.locator()))
            .map_err(|e| CatalogError::invalid_locator(handle.locator(), e.to_string()))?;
        Ok(DownloadParameters {
            source,
            file_name: format!("{}.mmpk", item.id),
        })
    }

    fn create_job(
        &self,
        parameters: DownloadParameters,
        destination: PathBuf,
    ) -> Box<dyn DownloadJob> {
        let id = parameters.file_name.trim_end_matches(".mmpk").to_string();
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .unwrap_or_else(|| JobScript::succeeding(&[]));
        Box::new(ScriptedJob::new(
            script,
            parameters,
            destination,
            self.destination_existed.clone(),
        ))
    }
}

/// Emits its scripted progress, writes the artifact on success, then resolves
pub struct ScriptedJob {
    script: JobScript,
    parameters: DownloadParameters,
    destination: PathBuf,
    destination_existed: Arc<Mutex<Vec<bool>>>,
    progress_tx: Option<mpsc::UnboundedSender<u8>>,
    progress_rx: Option<mpsc::UnboundedReceiver<u8>>,
    outcome: Option<oneshot::Receiver<CatalogResult<()>>>,
}

impl ScriptedJob {
    fn new(
        script: JobScript,
        parameters: DownloadParameters,
        destination: PathBuf,
        destination_existed: Arc<Mutex<Vec<bool>>>,
    ) -> Self {
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        Self {
            script,
            parameters,
            destination,
            destination_existed,
            progress_tx: Some(progress_tx),
            progress_rx: Some(progress_rx),
            outcome: None,
        }
    }
}

impl DownloadJob for ScriptedJob {
    fn progress(&mut self) -> BoxStream<'static, u8> {
        match self.progress_rx.take() {
            Some(rx) => UnboundedReceiverStream::new(rx).boxed(),
            None => futures::stream::empty().boxed(),
        }
    }

    fn start(&mut self) {
        let Some(progress) = self.progress_tx.take() else {
            return;
        };
        let (outcome_tx, outcome_rx) = oneshot::channel();
        self.outcome = Some(outcome_rx);

        let script = self.script.clone();
        let artifact = self.destination.join(&self.parameters.file_name);
        let destination = self.destination.clone();
        let destination_existed = self.destination_existed.clone();
        tokio::spawn(async move {
            destination_existed
                .lock()
                .unwrap()
                .push(destination.exists());

            if script.writes_partial {
                let partial = artifact.with_extension("part");
                let _ = write_artifact(&partial).await;
            }
            for value in script.progress {
                let _ = progress.send(value);
            }
            if let Some(gate) = script.gate {
                gate.notified().await;
            }
            for value in script.progress_after_gate {
                let _ = progress.send(value);
            }

            let outcome = match script.failure {
                Some(message) => {
                    if script.writes_partial {
                        let _ = tokio::fs::remove_dir_all(&destination).await;
                    }
                    Err(CatalogError::aborted(message))
                }
                None => write_artifact(&artifact).await,
            };
            drop(progress);
            let _ = outcome_tx.send(outcome);
        });
    }

    fn result(self: Box<Self>) -> BoxFuture<'static, CatalogResult<()>> {
        let outcome = self.outcome;
        Box::pin(async move {
            match outcome {
                Some(rx) => rx
                    .await
                    .unwrap_or_else(|_| Err(CatalogError::aborted("job dropped"))),
                None => Err(CatalogError::aborted("job was never started")),
            }
        })
    }
}

async fn write_artifact(artifact: &Path) -> CatalogResult<()> {
    if let Some(parent) = artifact.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(artifact, b"fresh package").await?;
    Ok(())
}

/// Local filesystem whose deletes can be made to fail
#[derive(Default)]
pub struct FlakyFilesystem {
    inner: LocalFilesystem,
    fail_deletes: AtomicBool,
}

impl FlakyFilesystem {
    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl AreaFilesystem for FlakyFilesystem {
    async fn exists(&self, path: &Path) -> bool {
        self.inner.exists(path).await
    }

    async fn delete_recursive(&self, path: &Path) -> bool {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return false;
        }
        self.inner.delete_recursive(path).await
    }

    async fn is_valid_artifact(&self, path: &Path) -> bool {
        self.inner.is_valid_artifact(path).await
    }
}

pub struct Harness {
    pub manager: OfflineAreaManager,
    pub catalog: Arc<ScriptedCatalog>,
    pub store: Arc<JsonFileStore>,
    pub filesystem: Arc<FlakyFilesystem>,
    pub layout: AreaLayout,
    pub temp_dir: TempDir,
}

impl Harness {
    pub async fn start(online: bool, catalog: ScriptedCatalog) -> Self {
        Self::start_with_snapshot(online, catalog, Vec::new()).await
    }

    /// Start a manager whose store already holds `seeded`
    pub async fn start_with_snapshot(
        online: bool,
        catalog: ScriptedCatalog,
        seeded: Vec<SnapshotEntry>,
    ) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(JsonFileStore::new(temp_dir.path().join("area_store.json")));
        if !seeded.is_empty() {
            store.write(CatalogSnapshot::new(seeded)).await.unwrap();
        }

        let catalog = Arc::new(catalog);
        let filesystem = Arc::new(FlakyFilesystem::default());
        let layout = AreaLayout::new(temp_dir.path().join("areas"));

        let manager = OfflineAreaManager::spawn(
            Collaborators {
                probe: Arc::new(StaticConnectivity(online)),
                catalog: catalog.clone(),
                store: store.clone(),
                filesystem: filesystem.clone(),
                layout: layout.clone(),
            },
            &ManagerConfig::default(),
        );

        Self {
            manager,
            catalog,
            store,
            filesystem,
            layout,
            temp_dir,
        }
    }

    /// Ids currently persisted, after pending writes settle
    pub async fn persisted_ids(&self) -> Vec<String> {
        self.manager.flush_persistence().await;
        self.store
            .current()
            .await
            .unwrap()
            .into_entries()
            .into_iter()
            .map(|e| e.id)
            .collect()
    }

    /// Put a non-empty artifact where `id` would be downloaded
    pub async fn place_artifact(&self, id: &str) -> PathBuf {
        let path = self.layout.path_for(id);
        tokio::fs::create_dir_all(&path).await.unwrap();
        tokio::fs::write(path.join("stale.mmpk"), b"old package")
            .await
            .unwrap();
        path
    }
}

/// Everything already delivered to `events`
pub fn drain(events: &mut broadcast::Receiver<AreaEvent>) -> Vec<AreaEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

pub fn entry(manager: &OfflineAreaManager, id: &str) -> AreaEntry {
    manager
        .entry(id)
        .unwrap_or_else(|| panic!("area {id} not listed"))
}

//! Offline area lifecycle manager.
//!
//! A single orchestration task owns the area list. [`OfflineAreaManager`] is a
//! cheap handle that sends it commands; slow work (catalog fetches, disk
//! probes, download jobs, deletes) runs in worker tasks that report back over
//! the same channel. No lock guards the list because only the orchestration
//! task ever touches it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{info, warn, Instrument};

use crate::catalog::RemoteCatalog;
use crate::config::ManagerConfig;
use crate::connectivity::ConnectivityProbe;
use crate::errors::{AreaError, AreaResult, StoreResult};
use crate::models::{
    AreaEntry, AreaEvent, CatalogSnapshot, CatalogSummary, DetailTarget, ListOrigin,
};
use crate::persistence::{PersistenceQueue, SnapshotStore};
use crate::storage::{AreaFilesystem, AreaLayout};

mod actor;
pub mod state;
mod workers;

pub use state::{AreaList, AreaListSnapshot};

/// External systems the manager depends on
pub struct Collaborators {
    pub probe: Arc<dyn ConnectivityProbe>,
    pub catalog: Arc<dyn RemoteCatalog>,
    pub store: Arc<dyn SnapshotStore>,
    pub filesystem: Arc<dyn AreaFilesystem>,
    pub layout: AreaLayout,
}

/// Result of a successful remote reconciliation
pub(crate) struct RemoteListing {
    pub entries: Vec<AreaEntry>,
    pub summary: Option<CatalogSummary>,
}

pub(crate) enum Message {
    // Commands from handles
    Initialize {
        reply: oneshot::Sender<ListOrigin>,
    },
    Download {
        id: String,
        reply: oneshot::Sender<AreaResult<PathBuf>>,
    },
    Delete {
        path: PathBuf,
        reply: oneshot::Sender<AreaResult<()>>,
    },
    Summary {
        reply: oneshot::Sender<Option<CatalogSummary>>,
    },
    Shutdown,

    // Reports from workers
    RemoteListed {
        result: AreaResult<RemoteListing>,
        reply: oneshot::Sender<ListOrigin>,
    },
    SnapshotLoaded {
        origin: ListOrigin,
        result: StoreResult<CatalogSnapshot>,
        reply: oneshot::Sender<ListOrigin>,
    },
    StaleArtifactRemoved {
        id: String,
    },
    Progress {
        id: String,
        progress: u8,
    },
    DownloadFinished {
        id: String,
        outcome: AreaResult<PathBuf>,
        reply: oneshot::Sender<AreaResult<PathBuf>>,
    },
    DeleteFinished {
        path: PathBuf,
        deleted: bool,
        reply: oneshot::Sender<AreaResult<()>>,
    },
}

/// Handle to the orchestration task. Clones share the same task.
#[derive(Clone)]
pub struct OfflineAreaManager {
    commands: mpsc::UnboundedSender<Message>,
    entries: watch::Receiver<AreaListSnapshot>,
    events: broadcast::Sender<AreaEvent>,
    persistence: PersistenceQueue,
}

impl OfflineAreaManager {
    /// Start the orchestration and persistence tasks on the current runtime.
    pub fn spawn(collaborators: Collaborators, config: &ManagerConfig) -> Self {
        let (commands, inbox) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let (list, entries) = AreaList::new();
        let persistence = PersistenceQueue::spawn(collaborators.store.clone());

        let actor = actor::AreaActor::new(
            list,
            Arc::new(collaborators),
            commands.downgrade(),
            events.clone(),
            persistence.clone(),
        );
        tokio::spawn(actor.run(inbox).in_current_span());
        info!("Offline area manager started");

        Self {
            commands,
            entries,
            events,
            persistence,
        }
    }

    /// Reconcile the list against the catalog, or the local snapshot when
    /// offline or when the catalog cannot be reached.
    pub async fn initialize(&self) -> AreaResult<ListOrigin> {
        self.request(|reply| Message::Initialize { reply }).await
    }

    /// Download an area and resolve with its local path
    pub async fn download(&self, id: &str) -> AreaResult<PathBuf> {
        let id = id.to_string();
        self.request(|reply| Message::Download { id, reply }).await?
    }

    /// Remove a downloaded artifact and mark its entry as not downloaded
    pub async fn delete<P: AsRef<Path>>(&self, path: P) -> AreaResult<()> {
        let path = path.as_ref().to_path_buf();
        self.request(|reply| Message::Delete { path, reply }).await?
    }

    /// Title card of the catalog, known after an online initialization
    pub async fn summary(&self) -> AreaResult<Option<CatalogSummary>> {
        self.request(|reply| Message::Summary { reply }).await
    }

    /// Local artifact for a downloaded area, otherwise the online version
    pub fn resolve_detail(&self, id: &str) -> DetailTarget {
        self.entries
            .borrow()
            .iter()
            .find(|e| e.id == id)
            .and_then(|e| e.download_path())
            .map(|path| DetailTarget::Local(path.to_path_buf()))
            .unwrap_or(DetailTarget::Online)
    }

    pub fn entries(&self) -> Vec<AreaEntry> {
        self.entries.borrow().to_vec()
    }

    pub fn entry(&self, id: &str) -> Option<AreaEntry> {
        self.entries.borrow().iter().find(|e| e.id == id).cloned()
    }

    /// Replay-latest view of the whole list
    pub fn watch_entries(&self) -> watch::Receiver<AreaListSnapshot> {
        self.entries.clone()
    }

    /// Every accepted transition, in order
    pub fn subscribe(&self) -> broadcast::Receiver<AreaEvent> {
        self.events.subscribe()
    }

    /// Wait until queued snapshot updates have been written
    pub async fn flush_persistence(&self) {
        self.persistence.flush().await;
    }

    /// Stop the orchestration task. Running downloads are abandoned.
    pub fn shutdown(&self) {
        if self.commands.send(Message::Shutdown).is_err() {
            warn!("Offline area manager already stopped");
        }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Message,
    ) -> AreaResult<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| AreaError::ManagerStopped)?;
        response.await.map_err(|_| AreaError::ManagerStopped)
    }
}

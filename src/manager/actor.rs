use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, trace, warn, Instrument};

use super::state::AreaList;
use super::{workers, Collaborators, Message, RemoteListing};
use crate::errors::{AreaError, AreaResult, StoreResult};
use crate::models::{
    AreaEntry, AreaEvent, AreaState, CatalogSnapshot, CatalogSummary, ListOrigin,
};
use crate::persistence::PersistenceQueue;

/// Orchestration task state. Only this task mutates the list.
pub(super) struct AreaActor {
    list: AreaList,
    summary: Option<CatalogSummary>,
    in_flight: HashSet<String>,
    mailbox: mpsc::WeakUnboundedSender<Message>,
    collaborators: Arc<Collaborators>,
    events: broadcast::Sender<AreaEvent>,
    persistence: PersistenceQueue,
}

impl AreaActor {
    pub(super) fn new(
        list: AreaList,
        collaborators: Arc<Collaborators>,
        mailbox: mpsc::WeakUnboundedSender<Message>,
        events: broadcast::Sender<AreaEvent>,
        persistence: PersistenceQueue,
    ) -> Self {
        Self {
            list,
            summary: None,
            in_flight: HashSet::new(),
            mailbox,
            collaborators,
            events,
            persistence,
        }
    }

    /// Process messages until shutdown, or until every handle and worker
    /// sender is gone.
    pub(super) async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<Message>) {
        while let Some(message) = inbox.recv().await {
            if !self.handle(message) {
                break;
            }
        }
        info!(
            areas = self.list.len(),
            abandoned_downloads = self.in_flight.len(),
            "Offline area manager stopped"
        );
    }

    fn handle(&mut self, message: Message) -> bool {
        match message {
            Message::Initialize { reply } => self.on_initialize(reply),
            Message::Download { id, reply } => self.on_download(id, reply),
            Message::Delete { path, reply } => self.on_delete(path, reply),
            Message::Summary { reply } => {
                let _ = reply.send(self.summary.clone());
            }
            Message::Shutdown => return false,
            Message::RemoteListed { result, reply } => self.on_remote_listed(result, reply),
            Message::SnapshotLoaded {
                origin,
                result,
                reply,
            } => self.on_snapshot_loaded(origin, result, reply),
            Message::StaleArtifactRemoved { id } => self.on_stale_artifact_removed(id),
            Message::Progress { id, progress } => self.on_progress(id, progress),
            Message::DownloadFinished { id, outcome, reply } => {
                self.on_download_finished(id, outcome, reply)
            }
            Message::DeleteFinished {
                path,
                deleted,
                reply,
            } => self.on_delete_finished(path, deleted, reply),
        }
        true
    }

    fn on_initialize(&mut self, reply: oneshot::Sender<ListOrigin>) {
        let collaborators = self.collaborators.clone();
        self.spawn_worker(move |mailbox| workers::initialize(collaborators, mailbox, reply));
    }

    fn on_remote_listed(
        &mut self,
        result: AreaResult<RemoteListing>,
        reply: oneshot::Sender<ListOrigin>,
    ) {
        match result {
            Ok(listing) => {
                self.summary = listing.summary;
                let entries = self.keep_in_flight_states(listing.entries);
                self.list.replace_all(entries);
                self.persistence.replace_downloaded(self.list.downloaded());
                info!(areas = self.list.len(), "Area list reconciled with remote catalog");
                self.emit(AreaEvent::ListReplaced {
                    origin: ListOrigin::Remote,
                    count: self.list.len(),
                });
                let _ = reply.send(ListOrigin::Remote);
            }
            Err(e) => {
                warn!(error = %e, "Falling back to downloaded areas");
                self.emit(AreaEvent::Notice {
                    message: format!(
                        "Could not reach the area catalog, showing downloaded areas only ({e})"
                    ),
                });
                let origin = ListOrigin::SnapshotFallback {
                    reason: e.to_string(),
                };
                let collaborators = self.collaborators.clone();
                self.spawn_worker(move |mailbox| {
                    workers::load_snapshot(collaborators, mailbox, origin, reply)
                });
            }
        }
    }

    /// A running job's destination holds a partial artifact, so the disk
    /// check cannot be trusted for it. Such entries keep their current
    /// progress, or start over as not downloaded.
    fn keep_in_flight_states(&self, entries: Vec<AreaEntry>) -> Vec<AreaEntry> {
        entries
            .into_iter()
            .map(|entry| {
                if !self.in_flight.contains(&entry.id) {
                    return entry;
                }
                let state = match self.list.get(&entry.id).and_then(AreaEntry::progress) {
                    Some(progress) => AreaState::Downloading { progress },
                    None => AreaState::NotDownloaded,
                };
                debug!(area_id = %entry.id, %state, "Keeping state of in-flight download");
                entry.with_state(state)
            })
            .collect()
    }

    fn on_snapshot_loaded(
        &mut self,
        origin: ListOrigin,
        result: StoreResult<CatalogSnapshot>,
        reply: oneshot::Sender<ListOrigin>,
    ) {
        let entries: Vec<AreaEntry> = match result {
            Ok(snapshot) => snapshot
                .into_entries()
                .into_iter()
                .filter_map(AreaEntry::from_snapshot)
                .collect(),
            Err(e) => {
                warn!(
                    error = %AreaError::from(e),
                    "Failed to load area snapshot, starting with an empty list"
                );
                Vec::new()
            }
        };

        self.list.replace_all(entries);
        info!(areas = self.list.len(), ?origin, "Area list restored from local snapshot");
        self.emit(AreaEvent::ListReplaced {
            origin: origin.clone(),
            count: self.list.len(),
        });
        let _ = reply.send(origin);
    }

    fn on_download(&mut self, id: String, reply: oneshot::Sender<AreaResult<PathBuf>>) {
        let handle = match self.list.get(&id) {
            None => {
                let _ = reply.send(Err(AreaError::not_found(id)));
                return;
            }
            Some(entry) => entry.remote.handle().cloned(),
        };
        let Some(handle) = handle else {
            let _ = reply.send(Err(AreaError::no_remote_handle(id)));
            return;
        };
        if self.in_flight.contains(&id) {
            let _ = reply.send(Err(AreaError::already_downloading(id)));
            return;
        }

        let destination = self.collaborators.layout.path_for(&id);
        debug!(area_id = %id, destination = %destination.display(), "Starting area download");

        self.in_flight.insert(id.clone());
        let collaborators = self.collaborators.clone();
        let worker_id = id.clone();
        let spawned = self.spawn_worker(move |mailbox| {
            workers::drive_download(collaborators, mailbox, worker_id, handle, destination, reply)
        });
        if !spawned {
            self.in_flight.remove(&id);
        }
    }

    fn on_stale_artifact_removed(&mut self, id: String) {
        info!(area_id = %id, "Removed stale artifact before download");
        self.set_state(&id, AreaState::NotDownloaded);
        self.persistence.remove(id);
    }

    fn on_progress(&mut self, id: String, progress: u8) {
        if !self.in_flight.contains(&id) {
            trace!(area_id = %id, progress, "Ignoring progress for a finished download");
            return;
        }
        let progress = progress.min(100);
        let Some(entry) = self.list.get(&id) else {
            trace!(area_id = %id, progress, "Ignoring progress for an area no longer listed");
            return;
        };
        if entry.progress().is_some_and(|current| progress < current) {
            return;
        }

        trace!(area_id = %id, progress, "Download progress");
        self.set_state(&id, AreaState::Downloading { progress });
    }

    fn on_download_finished(
        &mut self,
        id: String,
        outcome: AreaResult<PathBuf>,
        reply: oneshot::Sender<AreaResult<PathBuf>>,
    ) {
        self.in_flight.remove(&id);

        match &outcome {
            Ok(path) => {
                info!(area_id = %id, path = %path.display(), "Area downloaded");
                self.set_state(&id, AreaState::Downloaded { path: path.clone() });
                match self.list.get(&id).and_then(AreaEntry::to_snapshot_entry) {
                    Some(record) => self.persistence.append(record),
                    None => {
                        debug!(area_id = %id, "Downloaded area no longer listed, not persisted")
                    }
                }
            }
            Err(e @ AreaError::JobFailed { .. }) => {
                warn!(area_id = %id, error = %e, "Area download failed");
                self.set_state(&id, AreaState::NotDownloaded);
            }
            Err(e) => {
                warn!(area_id = %id, error = %e, "Area download did not start");
            }
        }

        let _ = reply.send(outcome);
    }

    fn on_delete(&mut self, path: PathBuf, reply: oneshot::Sender<AreaResult<()>>) {
        if let Some(id) = self.in_flight_owner(&path) {
            warn!(area_id = %id, path = %path.display(), "Refusing to delete a running download");
            let _ = reply.send(Err(AreaError::already_downloading(id)));
            return;
        }

        let collaborators = self.collaborators.clone();
        self.spawn_worker(move |mailbox| workers::delete(collaborators, mailbox, path, reply));
    }

    /// The in-flight download whose destination overlaps `path`, if any
    fn in_flight_owner(&self, path: &Path) -> Option<String> {
        let layout = &self.collaborators.layout;
        self.in_flight
            .iter()
            .find(|id| {
                let destination = layout.path_for(id);
                path.starts_with(&destination) || destination.starts_with(path)
            })
            .cloned()
    }

    fn on_delete_finished(
        &mut self,
        path: PathBuf,
        deleted: bool,
        reply: oneshot::Sender<AreaResult<()>>,
    ) {
        if !deleted {
            warn!(path = %path.display(), "Area artifact was not deleted");
            let _ = reply.send(Err(AreaError::delete_failed(path)));
            return;
        }

        match self.list.find_by_path(&path).map(|entry| entry.id.clone()) {
            Some(id) => {
                info!(area_id = %id, path = %path.display(), "Area deleted");
                self.set_state(&id, AreaState::NotDownloaded);
                self.persistence.remove(id);
            }
            None => debug!(path = %path.display(), "Deleted path matches no listed area"),
        }
        let _ = reply.send(Ok(()));
    }

    /// Apply a state to one entry and announce it. Unchanged states are not
    /// republished.
    fn set_state(&mut self, id: &str, state: AreaState) {
        let Some(entry) = self.list.get(id) else {
            return;
        };
        if entry.state == state {
            return;
        }

        let updated = entry.clone().with_state(state.clone());
        self.list.upsert_one(updated);
        self.emit(AreaEvent::StateChanged {
            id: id.to_string(),
            state,
        });
    }

    fn emit(&self, event: AreaEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Run a worker with its own sender into this task's inbox. Returns false
    /// when every handle is gone and nothing could report back.
    fn spawn_worker<F, Fut>(&self, worker: F) -> bool
    where
        F: FnOnce(mpsc::UnboundedSender<Message>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        match self.mailbox.upgrade() {
            Some(mailbox) => {
                tokio::spawn(worker(mailbox).in_current_span());
                true
            }
            None => {
                debug!("No handles left, worker not started");
                false
            }
        }
    }
}

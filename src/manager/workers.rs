//! Slow work spawned by the orchestration task. Every worker reports its
//! outcome as a [`Message`] and never touches the list itself.

use futures::future::join_all;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn, Instrument};

use super::{Collaborators, Message, RemoteListing};
use crate::errors::{AreaError, AreaResult};
use crate::models::{AreaEntry, AreaState, ListOrigin, RemoteHandle};

type Mailbox = mpsc::UnboundedSender<Message>;

pub(super) async fn initialize(
    collaborators: Arc<Collaborators>,
    mailbox: Mailbox,
    reply: oneshot::Sender<ListOrigin>,
) {
    let probe = collaborators.probe.clone();
    let online = match tokio::task::spawn_blocking(move || probe.is_available()).await {
        Ok(online) => online,
        Err(e) => {
            warn!(error = %e, "Connectivity probe panicked, assuming offline");
            false
        }
    };

    if online {
        let result = fetch_remote(&collaborators).await;
        let _ = mailbox.send(Message::RemoteListed { result, reply });
    } else {
        info!(reason = %AreaError::NetworkUnavailable, "Skipping remote catalog");
        load_snapshot(collaborators, mailbox, ListOrigin::SnapshotOffline, reply).await;
    }
}

pub(super) async fn load_snapshot(
    collaborators: Arc<Collaborators>,
    mailbox: Mailbox,
    origin: ListOrigin,
    reply: oneshot::Sender<ListOrigin>,
) {
    let result = collaborators.store.current().await;
    let _ = mailbox.send(Message::SnapshotLoaded {
        origin,
        result,
        reply,
    });
}

/// List the catalog and pair every item with what is already on disk
async fn fetch_remote(collaborators: &Collaborators) -> AreaResult<RemoteListing> {
    let items = collaborators
        .catalog
        .list_areas()
        .await
        .map_err(|e| AreaError::remote_fetch_failed(e.to_string()))?;

    let entries = join_all(items.into_iter().map(|item| async move {
        let path = collaborators.layout.path_for(&item.id);
        let state = if collaborators.filesystem.is_valid_artifact(&path).await {
            debug!(area_id = %item.id, path = %path.display(), "Found downloaded artifact");
            AreaState::Downloaded { path }
        } else {
            AreaState::NotDownloaded
        };
        AreaEntry::from_remote(item, state)
    }))
    .await;

    let summary = match collaborators.catalog.summary().await {
        Ok(summary) => summary,
        Err(e) => {
            warn!(error = %e, "Failed to fetch catalog summary");
            None
        }
    };

    Ok(RemoteListing { entries, summary })
}

pub(super) async fn drive_download(
    collaborators: Arc<Collaborators>,
    mailbox: Mailbox,
    id: String,
    handle: RemoteHandle,
    destination: PathBuf,
    reply: oneshot::Sender<AreaResult<PathBuf>>,
) {
    let outcome = download(&collaborators, &mailbox, &id, &handle, &destination).await;
    let _ = mailbox.send(Message::DownloadFinished { id, outcome, reply });
}

async fn download(
    collaborators: &Collaborators,
    mailbox: &Mailbox,
    id: &str,
    handle: &RemoteHandle,
    destination: &Path,
) -> AreaResult<PathBuf> {
    let parameters = collaborators
        .catalog
        .download_parameters(handle)
        .await
        .map_err(|e| AreaError::parameter_derivation_failed(id, e.to_string()))?;

    if collaborators.filesystem.exists(destination).await {
        if !collaborators.filesystem.delete_recursive(destination).await {
            return Err(AreaError::delete_failed(destination));
        }
        let _ = mailbox.send(Message::StaleArtifactRemoved { id: id.to_string() });
    }

    let mut job = collaborators
        .catalog
        .create_job(parameters, destination.to_path_buf());
    let mut progress = job.progress();

    let forward_to = mailbox.clone();
    let forward_id = id.to_string();
    let forwarder = tokio::spawn(
        async move {
            while let Some(progress) = progress.next().await {
                let message = Message::Progress {
                    id: forward_id.clone(),
                    progress,
                };
                if forward_to.send(message).is_err() {
                    break;
                }
            }
        }
        .in_current_span(),
    );

    job.start();
    let result = job.result().await;

    // Progress must reach the inbox before the completion does
    if let Err(e) = forwarder.await {
        warn!(area_id = %id, error = %e, "Progress forwarder ended abnormally");
    }

    result
        .map(|()| destination.to_path_buf())
        .map_err(|e| AreaError::job_failed(id, e.to_string()))
}

pub(super) async fn delete(
    collaborators: Arc<Collaborators>,
    mailbox: Mailbox,
    path: PathBuf,
    reply: oneshot::Sender<AreaResult<()>>,
) {
    let deleted = collaborators.filesystem.delete_recursive(&path).await;
    let _ = mailbox.send(Message::DeleteFinished {
        path,
        deleted,
        reply,
    });
}

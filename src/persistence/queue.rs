use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn, Instrument};

use super::SnapshotStore;
use crate::errors::{AreaError, StoreResult};
use crate::models::{CatalogSnapshot, SnapshotEntry};

/// A pending change to the persisted snapshot
#[derive(Debug)]
pub enum PersistOp {
    /// Replace the record with the downloaded subset of a fresh list
    ReplaceDownloaded(Vec<SnapshotEntry>),
    /// Add an entry, replacing any entry with the same id
    Append(SnapshotEntry),
    /// Drop the entry with this id
    Remove(String),
    /// Resolves once every earlier operation has been applied
    Flush(oneshot::Sender<()>),
}

impl PersistOp {
    fn name(&self) -> &'static str {
        match self {
            PersistOp::ReplaceDownloaded(_) => "replace_downloaded",
            PersistOp::Append(_) => "append",
            PersistOp::Remove(_) => "remove",
            PersistOp::Flush(_) => "flush",
        }
    }
}

/// Single writer in front of a [`SnapshotStore`].
///
/// Operations are drained one at a time, so each read-modify-write sees the
/// result of the previous one. Failures are logged and dropped.
#[derive(Clone)]
pub struct PersistenceQueue {
    tx: mpsc::UnboundedSender<PersistOp>,
}

impl PersistenceQueue {
    /// Start the writer task. It stops once every handle is dropped.
    pub fn spawn(store: Arc<dyn SnapshotStore>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(store, rx).in_current_span());
        Self { tx }
    }

    pub fn replace_downloaded(&self, entries: Vec<SnapshotEntry>) {
        self.submit(PersistOp::ReplaceDownloaded(entries));
    }

    pub fn append(&self, entry: SnapshotEntry) {
        self.submit(PersistOp::Append(entry));
    }

    pub fn remove<I: Into<String>>(&self, id: I) {
        self.submit(PersistOp::Remove(id.into()));
    }

    /// Wait until everything queued so far has been written (or has failed)
    pub async fn flush(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.submit(PersistOp::Flush(reply_tx));
        let _ = reply_rx.await;
    }

    fn submit(&self, op: PersistOp) {
        if let Err(e) = self.tx.send(op) {
            warn!(op = e.0.name(), "Persistence writer stopped, dropping operation");
        }
    }
}

async fn run_writer(store: Arc<dyn SnapshotStore>, mut rx: mpsc::UnboundedReceiver<PersistOp>) {
    while let Some(op) = rx.recv().await {
        let name = op.name();
        if let Err(e) = apply(store.as_ref(), op).await {
            let error = AreaError::from(e);
            warn!(op = name, error = %error, "Failed to update area snapshot");
        }
    }
    debug!("Persistence writer finished");
}

async fn apply(store: &dyn SnapshotStore, op: PersistOp) -> StoreResult<()> {
    match op {
        PersistOp::ReplaceDownloaded(entries) => {
            store.write(CatalogSnapshot::new(entries)).await
        }
        PersistOp::Append(entry) => {
            let mut snapshot = store.current().await?;
            snapshot.upsert(entry);
            store.write(snapshot).await
        }
        PersistOp::Remove(id) => {
            let mut snapshot = store.current().await?;
            if snapshot.remove(&id) {
                store.write(snapshot).await
            } else {
                debug!(area_id = %id, "Area not in snapshot, nothing to remove");
                Ok(())
            }
        }
        PersistOp::Flush(reply) => {
            let _ = reply.send(());
            Ok(())
        }
    }
}

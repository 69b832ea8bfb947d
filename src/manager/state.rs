//! Authoritative list of areas, owned by the orchestration task.
//!
//! Every mutation publishes a complete copy to a watch channel, so readers
//! only ever observe whole lists.

use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;

use crate::models::{AreaEntry, SnapshotEntry};

/// Published form of the list
pub type AreaListSnapshot = Arc<[AreaEntry]>;

pub struct AreaList {
    entries: Vec<AreaEntry>,
    publisher: watch::Sender<AreaListSnapshot>,
}

impl AreaList {
    pub fn new() -> (Self, watch::Receiver<AreaListSnapshot>) {
        let (publisher, receiver) = watch::channel(AreaListSnapshot::from(Vec::new()));
        (
            Self {
                entries: Vec::new(),
                publisher,
            },
            receiver,
        )
    }

    /// Full reconciliation: the previous list is discarded.
    pub fn replace_all(&mut self, entries: Vec<AreaEntry>) {
        self.entries = entries;
        self.publish();
    }

    /// Replace the entry with the same id in place, or append it.
    /// Returns true if an existing entry was replaced.
    pub fn upsert_one(&mut self, entry: AreaEntry) -> bool {
        let replaced = match self.entries.iter_mut().find(|e| e.id == entry.id) {
            Some(existing) => {
                *existing = entry;
                true
            }
            None => {
                self.entries.push(entry);
                false
            }
        };
        self.publish();
        replaced
    }

    pub fn get(&self, id: &str) -> Option<&AreaEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn find_by_path(&self, path: &Path) -> Option<&AreaEntry> {
        self.entries
            .iter()
            .find(|e| e.download_path() == Some(path))
    }

    pub fn entries(&self) -> &[AreaEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Persistable records for every downloaded entry, in list order
    pub fn downloaded(&self) -> Vec<SnapshotEntry> {
        self.entries
            .iter()
            .filter_map(AreaEntry::to_snapshot_entry)
            .collect()
    }

    fn publish(&self) {
        self.publisher
            .send_replace(AreaListSnapshot::from(self.entries.as_slice()));
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Opaque reference back to a remote catalog item.
///
/// Only the catalog that produced it knows how to interpret the locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteHandle {
    locator: String,
}

impl RemoteHandle {
    pub fn new<L: Into<String>>(locator: L) -> Self {
        Self {
            locator: locator.into(),
        }
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }
}

/// Whether an entry can be downloaded.
///
/// Entries restored from the local snapshot are `DiskOnly` until the next
/// successful remote fetch replaces them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteLink {
    RemoteBacked(RemoteHandle),
    DiskOnly,
}

impl RemoteLink {
    pub fn handle(&self) -> Option<&RemoteHandle> {
        match self {
            RemoteLink::RemoteBacked(handle) => Some(handle),
            RemoteLink::DiskOnly => None,
        }
    }
}

/// Download state of an area. A completed download always carries its path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AreaState {
    NotDownloaded,
    Downloading { progress: u8 },
    Downloaded { path: PathBuf },
}

impl fmt::Display for AreaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AreaState::NotDownloaded => write!(f, "not downloaded"),
            AreaState::Downloading { progress } => write!(f, "downloading {progress}%"),
            AreaState::Downloaded { path } => write!(f, "downloaded ({})", path.display()),
        }
    }
}

/// One catalog area paired with its local download status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AreaEntry {
    pub id: String,
    pub title: String,
    pub description: String,
    pub thumbnail_ref: Option<String>,
    pub state: AreaState,
    pub remote: RemoteLink,
}

impl AreaEntry {
    pub fn from_remote(item: RemoteItem, state: AreaState) -> Self {
        Self {
            id: item.id,
            title: item.title,
            description: item.description,
            thumbnail_ref: item.thumbnail_ref,
            state,
            remote: RemoteLink::RemoteBacked(item.handle),
        }
    }

    /// Restore an entry from the persisted snapshot. Records without a path
    /// cannot describe a completed download and are skipped.
    pub fn from_snapshot(entry: SnapshotEntry) -> Option<Self> {
        let path = entry.download_path?;
        Some(Self {
            id: entry.id,
            title: entry.title,
            description: entry.description,
            thumbnail_ref: entry.thumbnail_ref,
            state: AreaState::Downloaded { path },
            remote: RemoteLink::DiskOnly,
        })
    }

    pub fn download_path(&self) -> Option<&Path> {
        match &self.state {
            AreaState::Downloaded { path } => Some(path),
            _ => None,
        }
    }

    pub fn is_downloaded(&self) -> bool {
        matches!(self.state, AreaState::Downloaded { .. })
    }

    pub fn progress(&self) -> Option<u8> {
        match self.state {
            AreaState::Downloading { progress } => Some(progress),
            _ => None,
        }
    }

    /// Persistable form; `None` unless the entry is downloaded.
    pub fn to_snapshot_entry(&self) -> Option<SnapshotEntry> {
        self.download_path().map(|path| SnapshotEntry {
            id: self.id.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            download_path: Some(path.to_path_buf()),
            thumbnail_ref: self.thumbnail_ref.clone(),
        })
    }

    pub fn with_state(mut self, state: AreaState) -> Self {
        self.state = state;
        self
    }
}

/// Persisted metadata of one downloaded area
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub id: String,
    pub title: String,
    pub description: String,
    pub download_path: Option<PathBuf>,
    pub thumbnail_ref: Option<String>,
}

/// Ordered list of areas believed fully downloaded at the last write
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CatalogSnapshot {
    entries: Vec<SnapshotEntry>,
}

impl CatalogSnapshot {
    pub fn new(entries: Vec<SnapshotEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[SnapshotEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<SnapshotEntry> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    /// Replace the entry with the same id in place, or append it.
    pub fn upsert(&mut self, entry: SnapshotEntry) {
        match self.entries.iter_mut().find(|e| e.id == entry.id) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    /// Returns true if an entry was removed.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        self.entries.len() != before
    }
}

/// A listing item returned by the remote catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteItem {
    pub id: String,
    pub title: String,
    pub description: String,
    pub thumbnail_ref: Option<String>,
    pub handle: RemoteHandle,
}

/// Description of the catalog itself, shown as the online map
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSummary {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub thumbnail_ref: Option<String>,
}

/// What a detail view should open for an area
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetailTarget {
    /// A downloaded artifact on disk
    Local(PathBuf),
    /// No offline copy; use the online representation
    Online,
}

/// Where the current list came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListOrigin {
    Remote,
    /// Connectivity probe reported offline
    SnapshotOffline,
    /// Remote fetch failed
    SnapshotFallback { reason: String },
}

impl ListOrigin {
    pub fn is_remote(&self) -> bool {
        matches!(self, ListOrigin::Remote)
    }
}

/// Accepted state transitions, in the order they were applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AreaEvent {
    ListReplaced { origin: ListOrigin, count: usize },
    StateChanged { id: String, state: AreaState },
    Notice { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot_entry(id: &str, path: Option<&str>) -> SnapshotEntry {
        SnapshotEntry {
            id: id.to_string(),
            title: format!("Area {id}"),
            description: String::new(),
            download_path: path.map(PathBuf::from),
            thumbnail_ref: None,
        }
    }

    #[test]
    fn test_snapshot_restore_is_disk_only_and_downloaded() {
        let entry = AreaEntry::from_snapshot(snapshot_entry("B", Some("/x/B"))).unwrap();

        assert_eq!(entry.remote, RemoteLink::DiskOnly);
        assert_eq!(entry.download_path(), Some(Path::new("/x/B")));
        assert!(entry.is_downloaded());
        assert!(AreaEntry::from_snapshot(snapshot_entry("C", None)).is_none());
    }

    #[test]
    fn test_only_downloaded_entries_persist() {
        let item = RemoteItem {
            id: "A".to_string(),
            title: "Area A".to_string(),
            description: "d".to_string(),
            thumbnail_ref: Some("thumb://a".to_string()),
            handle: RemoteHandle::new("areas/a.mmpk"),
        };
        let entry = AreaEntry::from_remote(item, AreaState::NotDownloaded);
        assert!(entry.to_snapshot_entry().is_none());

        let entry = entry.with_state(AreaState::Downloading { progress: 50 });
        assert!(entry.to_snapshot_entry().is_none());
        assert_eq!(entry.progress(), Some(50));

        let entry = entry.with_state(AreaState::Downloaded {
            path: PathBuf::from("/root/offline_area_A"),
        });
        let persisted = entry.to_snapshot_entry().unwrap();
        assert_eq!(persisted.download_path, Some(PathBuf::from("/root/offline_area_A")));
        assert_eq!(persisted.thumbnail_ref.as_deref(), Some("thumb://a"));
    }

    #[test]
    fn test_snapshot_upsert_and_remove_by_id() {
        let mut snapshot = CatalogSnapshot::new(vec![
            snapshot_entry("A", Some("/x/A")),
            snapshot_entry("B", Some("/x/B")),
        ]);

        snapshot.upsert(snapshot_entry("A", Some("/y/A")));
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.entries()[0].download_path, Some(PathBuf::from("/y/A")));

        snapshot.upsert(snapshot_entry("C", Some("/x/C")));
        assert_eq!(snapshot.entries()[2].id, "C");

        assert!(snapshot.remove("B"));
        assert!(!snapshot.remove("B"));
        assert!(!snapshot.contains("B"));
        assert!(snapshot.contains("A"));
    }
}

//! On-disk layout and filesystem access for downloaded areas.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

const AREA_DIR_PREFIX: &str = "offline_area_";

/// Deterministic mapping from area id to its download directory.
///
/// The id is percent-encoded so distinct ids never share a directory and an
/// id can never escape the root.
#[derive(Debug, Clone)]
pub struct AreaLayout {
    root: PathBuf,
}

impl AreaLayout {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, id: &str) -> PathBuf {
        self.root
            .join(format!("{AREA_DIR_PREFIX}{}", urlencoding::encode(id)))
    }
}

/// Filesystem operations the lifecycle manager needs
#[async_trait]
pub trait AreaFilesystem: Send + Sync {
    async fn exists(&self, path: &Path) -> bool;

    /// Remove a file or directory tree. Returns false if nothing was removed.
    async fn delete_recursive(&self, path: &Path) -> bool;

    /// Whether the path holds a usable downloaded artifact
    async fn is_valid_artifact(&self, path: &Path) -> bool {
        self.exists(path).await
    }
}

/// `tokio::fs` backed implementation
#[derive(Debug, Clone, Default)]
pub struct LocalFilesystem;

impl LocalFilesystem {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AreaFilesystem for LocalFilesystem {
    async fn exists(&self, path: &Path) -> bool {
        fs::try_exists(path).await.unwrap_or(false)
    }

    async fn delete_recursive(&self, path: &Path) -> bool {
        let metadata = match fs::symlink_metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Nothing to delete");
                return false;
            }
        };

        let result = if metadata.is_dir() {
            fs::remove_dir_all(path).await
        } else {
            fs::remove_file(path).await
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to delete area artifact");
                false
            }
        }
    }

    /// An extracted area is a non-empty directory; a single-file package is
    /// a non-empty file.
    async fn is_valid_artifact(&self, path: &Path) -> bool {
        let Ok(metadata) = fs::metadata(path).await else {
            return false;
        };

        if metadata.is_dir() {
            match fs::read_dir(path).await {
                Ok(mut entries) => matches!(entries.next_entry().await, Ok(Some(_))),
                Err(_) => false,
            }
        } else {
            metadata.len() > 0
        }
    }
}

//! Durable storage for the snapshot of downloaded areas.
//!
//! The store holds one record: the ordered list of areas believed downloaded
//! at the last write. It is a best-effort cache; the files on disk remain the
//! source of truth.

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};

use crate::errors::StoreResult;
use crate::models::CatalogSnapshot;

pub mod json_file;
pub mod queue;

pub use json_file::JsonFileStore;
pub use queue::{PersistOp, PersistenceQueue};

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Subscribe to the snapshot. The stream yields the current value first
    /// and again after every write; it never ends on its own.
    async fn read(&self) -> StoreResult<BoxStream<'static, CatalogSnapshot>>;

    /// Replace the whole record. Writes are applied one at a time.
    async fn write(&self, snapshot: CatalogSnapshot) -> StoreResult<()>;

    /// The latest value, i.e. the first item of a fresh subscription
    async fn current(&self) -> StoreResult<CatalogSnapshot> {
        let mut stream = self.read().await?;
        Ok(stream.next().await.unwrap_or_default())
    }
}

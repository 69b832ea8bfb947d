//! Remote catalog and download job abstractions.
//!
//! The lifecycle manager only talks to these traits. `http` provides the
//! implementation used by the binary.

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use std::path::PathBuf;
use url::Url;

use crate::errors::CatalogResult;
use crate::models::{CatalogSummary, RemoteHandle, RemoteItem};

pub mod http;

pub use http::{HttpCatalog, HttpDownloadJob};

/// Everything a job needs to fetch one area
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadParameters {
    pub source: Url,
    /// File name of the artifact inside the area directory
    pub file_name: String,
}

#[async_trait]
pub trait RemoteCatalog: Send + Sync {
    /// List the areas currently offered, in catalog order
    async fn list_areas(&self) -> CatalogResult<Vec<RemoteItem>>;

    /// Title card of the catalog itself, if the catalog has one. Called right
    /// after `list_areas`; implementations may answer from that listing.
    async fn summary(&self) -> CatalogResult<Option<CatalogSummary>> {
        Ok(None)
    }

    async fn download_parameters(&self, handle: &RemoteHandle) -> CatalogResult<DownloadParameters>;

    /// Create an unstarted job that writes the area into `destination`
    fn create_job(&self, parameters: DownloadParameters, destination: PathBuf)
        -> Box<dyn DownloadJob>;
}

/// A single download.
///
/// The progress stream yields non-decreasing percentages in `0..=100` and
/// ends once the job has resolved. `result` consumes the job, so it can only
/// be awaited once.
pub trait DownloadJob: Send {
    fn progress(&mut self) -> BoxStream<'static, u8>;

    fn start(&mut self);

    fn result(self: Box<Self>) -> BoxFuture<'static, CatalogResult<()>>;
}

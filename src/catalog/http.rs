use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, warn, Instrument};
use url::Url;

use super::{DownloadJob, DownloadParameters, RemoteCatalog};
use crate::config::CatalogConfig;
use crate::errors::{CatalogError, CatalogResult};
use crate::models::{CatalogSummary, RemoteHandle, RemoteItem};

const DEFAULT_ARTIFACT_NAME: &str = "area.mmpk";

#[derive(Debug, Deserialize)]
struct CatalogIndex {
    #[serde(default)]
    summary: Option<CatalogSummary>,
    areas: Vec<IndexArea>,
}

#[derive(Debug, Deserialize)]
struct IndexArea {
    id: String,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    thumbnail_ref: Option<String>,
    /// Absolute URL, or a path relative to the catalog base URL
    archive: String,
}

impl From<IndexArea> for RemoteItem {
    fn from(area: IndexArea) -> Self {
        RemoteItem {
            id: area.id,
            title: area.title,
            description: area.description,
            thumbnail_ref: area.thumbnail_ref,
            handle: RemoteHandle::new(area.archive),
        }
    }
}

/// Catalog served as a JSON index over HTTP
#[derive(Clone)]
pub struct HttpCatalog {
    client: reqwest::Client,
    base_url: Url,
    index_url: Url,
    request_timeout: Duration,
    /// Summary of the index last fetched by `list_areas`; `None` until then
    listed_summary: Arc<RwLock<Option<Option<CatalogSummary>>>>,
}

impl HttpCatalog {
    pub fn new(config: &CatalogConfig) -> CatalogResult<Self> {
        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .map_err(|e| CatalogError::invalid_locator(&config.base_url, e.to_string()))?;
        let index_url = base_url
            .join(&config.index_path)
            .map_err(|e| CatalogError::invalid_locator(&config.index_path, e.to_string()))?;

        // The request timeout only bounds the index fetch; archive bodies can
        // take much longer than that.
        let client = reqwest::Client::builder()
            .connect_timeout(config.request_timeout)
            .user_agent(concat!("offline-map-areas/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url,
            index_url,
            request_timeout: config.request_timeout,
            listed_summary: Arc::new(RwLock::new(None)),
        })
    }

    pub fn index_url(&self) -> &Url {
        &self.index_url
    }

    async fn fetch_index(&self) -> CatalogResult<CatalogIndex> {
        debug!(url = %self.index_url, "Fetching area catalog index");
        let response = self
            .client
            .get(self.index_url.clone())
            .timeout(self.request_timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(CatalogError::Status {
                status: response.status().as_u16(),
                url: self.index_url.to_string(),
            });
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body)
            .map_err(|e| CatalogError::parse(format!("{}: {e}", self.index_url)))
    }
}

#[async_trait]
impl RemoteCatalog for HttpCatalog {
    async fn list_areas(&self) -> CatalogResult<Vec<RemoteItem>> {
        let index = self.fetch_index().await?;
        info!(url = %self.index_url, areas = index.areas.len(), "Fetched area catalog");
        *self.listed_summary.write().await = Some(index.summary);
        Ok(index.areas.into_iter().map(RemoteItem::from).collect())
    }

    /// Served from the last listed index, so it matches the listing
    async fn summary(&self) -> CatalogResult<Option<CatalogSummary>> {
        if let Some(summary) = self.listed_summary.read().await.clone() {
            return Ok(summary);
        }
        Ok(self.fetch_index().await?.summary)
    }

    async fn download_parameters(
        &self,
        handle: &RemoteHandle,
    ) -> CatalogResult<DownloadParameters> {
        let locator = handle.locator();
        let source = self
            .base_url
            .join(locator)
            .map_err(|e| CatalogError::invalid_locator(locator, e.to_string()))?;

        if !matches!(source.scheme(), "http" | "https") {
            return Err(CatalogError::invalid_locator(
                locator,
                format!("unsupported scheme '{}'", source.scheme()),
            ));
        }

        let file_name = source
            .path_segments()
            .and_then(|segments| segments.last())
            .filter(|segment| !segment.is_empty())
            .map(|segment| {
                urlencoding::decode(segment)
                    .map(|s| s.into_owned())
                    .unwrap_or_else(|_| segment.to_string())
            })
            .filter(|name| !name.contains('/') && name != "." && name != "..")
            .unwrap_or_else(|| DEFAULT_ARTIFACT_NAME.to_string());

        Ok(DownloadParameters { source, file_name })
    }

    fn create_job(
        &self,
        parameters: DownloadParameters,
        destination: PathBuf,
    ) -> Box<dyn DownloadJob> {
        Box::new(HttpDownloadJob::new(
            self.client.clone(),
            parameters,
            destination,
        ))
    }
}

/// Streams one archive to disk, reporting byte-based progress
pub struct HttpDownloadJob {
    client: reqwest::Client,
    parameters: DownloadParameters,
    destination: PathBuf,
    progress_tx: Option<watch::Sender<u8>>,
    progress_rx: watch::Receiver<u8>,
    handle: Option<JoinHandle<CatalogResult<()>>>,
}

impl HttpDownloadJob {
    pub fn new(client: reqwest::Client, parameters: DownloadParameters, destination: PathBuf) -> Self {
        let (progress_tx, progress_rx) = watch::channel(0);
        Self {
            client,
            parameters,
            destination,
            progress_tx: Some(progress_tx),
            progress_rx,
            handle: None,
        }
    }
}

impl DownloadJob for HttpDownloadJob {
    fn progress(&mut self) -> BoxStream<'static, u8> {
        WatchStream::new(self.progress_rx.clone()).boxed()
    }

    fn start(&mut self) {
        let Some(progress) = self.progress_tx.take() else {
            return;
        };

        let client = self.client.clone();
        let parameters = self.parameters.clone();
        let destination = self.destination.clone();
        self.handle = Some(tokio::spawn(
            async move { run_download(client, parameters, destination, progress).await }
                .in_current_span(),
        ));
    }

    fn result(self: Box<Self>) -> BoxFuture<'static, CatalogResult<()>> {
        let HttpDownloadJob {
            handle, progress_tx, ..
        } = *self;
        // An unstarted job never reports progress; close the stream.
        drop(progress_tx);

        Box::pin(async move {
            match handle {
                Some(handle) => handle
                    .await
                    .map_err(|e| CatalogError::aborted(e.to_string()))?,
                None => Err(CatalogError::aborted("job was never started")),
            }
        })
    }
}

async fn run_download(
    client: reqwest::Client,
    parameters: DownloadParameters,
    destination: PathBuf,
    progress: watch::Sender<u8>,
) -> CatalogResult<()> {
    let result = fetch_to(&client, &parameters, &destination, &progress).await;
    match &result {
        Ok(()) => {
            progress.send_replace(100);
            info!(source = %parameters.source, destination = %destination.display(), "Area download finished");
        }
        Err(e) => {
            warn!(source = %parameters.source, error = %e, "Area download failed, removing partial artifact");
            if let Err(cleanup) = tokio::fs::remove_dir_all(&destination).await {
                debug!(destination = %destination.display(), error = %cleanup, "Partial artifact cleanup skipped");
            }
        }
    }
    result
}

async fn fetch_to(
    client: &reqwest::Client,
    parameters: &DownloadParameters,
    destination: &Path,
    progress: &watch::Sender<u8>,
) -> CatalogResult<()> {
    let response = client.get(parameters.source.clone()).send().await?;
    if !response.status().is_success() {
        return Err(CatalogError::Status {
            status: response.status().as_u16(),
            url: parameters.source.to_string(),
        });
    }

    let total = response.content_length().filter(|len| *len > 0);
    tokio::fs::create_dir_all(destination).await?;
    let mut file = tokio::fs::File::create(destination.join(&parameters.file_name)).await?;

    let mut body = response.bytes_stream();
    let mut downloaded: u64 = 0;
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;

        if let Some(total) = total {
            // 100 is reserved for the fully flushed artifact
            let percent = (downloaded.saturating_mul(100) / total).min(99) as u8;
            progress.send_if_modified(|current| {
                if percent > *current {
                    *current = percent;
                    true
                } else {
                    false
                }
            });
        }
    }

    file.flush().await?;
    file.sync_all().await?;
    Ok(())
}

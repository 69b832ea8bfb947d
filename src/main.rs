use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::{
    self,
    error::{RecvError, TryRecvError},
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use offline_map_areas::{
    catalog::HttpCatalog,
    config::Config,
    connectivity,
    manager::{Collaborators, OfflineAreaManager},
    models::{AreaEvent, AreaState, DetailTarget, ListOrigin},
    persistence::JsonFileStore,
    storage::{AreaLayout, LocalFilesystem},
};

#[derive(Parser)]
#[command(name = "offline-map-areas")]
#[command(version)]
#[command(about = "Browse, download and remove preplanned offline map areas")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,

    /// Skip the connectivity probe and use downloaded areas only
    #[arg(long)]
    offline: bool,

    /// Directory areas are downloaded into (overrides config file)
    #[arg(long, value_name = "DIR")]
    download_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List areas and their download state
    List,
    /// Download an area by id
    Download { id: String },
    /// Delete a downloaded area by its local path
    Delete { path: PathBuf },
    /// Show what a detail view would open for an area
    Detail { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_filter = format!("offline_map_areas={}", cli.log_level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting offline map areas v{}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::load_from_file(&cli.config)?;
    info!("Configuration loaded from: {}", cli.config);

    if let Some(download_root) = cli.download_root {
        config.storage.download_root = download_root;
    }
    if cli.offline {
        config.connectivity.force_offline = true;
    }

    tokio::fs::create_dir_all(&config.storage.download_root)
        .await
        .with_context(|| {
            format!(
                "creating download root {}",
                config.storage.download_root.display()
            )
        })?;
    if let Some(parent) = config.storage.store_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let collaborators = Collaborators {
        probe: Arc::from(connectivity::from_config(&config.connectivity)),
        catalog: Arc::new(HttpCatalog::new(&config.catalog)?),
        store: Arc::new(JsonFileStore::new(config.storage.store_path.clone())),
        filesystem: Arc::new(LocalFilesystem::new()),
        layout: AreaLayout::new(config.storage.download_root.clone()),
    };
    let manager = OfflineAreaManager::spawn(collaborators, &config.manager);
    let mut events = manager.subscribe();

    let origin = manager.initialize().await?;
    match &origin {
        ListOrigin::Remote => info!("Area list loaded from {}", config.catalog.base_url),
        ListOrigin::SnapshotOffline => info!("Offline, showing downloaded areas"),
        ListOrigin::SnapshotFallback { reason } => {
            warn!(%reason, "Catalog unreachable, showing downloaded areas")
        }
    }

    match cli.command {
        Command::List => {
            if let Some(summary) = manager.summary().await? {
                println!("{}", summary.title);
                if !summary.description.is_empty() {
                    println!("  {}", summary.description);
                }
                println!();
            }
            for entry in manager.entries() {
                println!("{:<24} {:<40} {}", entry.id, entry.title, entry.state);
            }
        }
        Command::Download { id } => {
            let result = follow_download(manager.download(&id), &id, &mut events, |line| {
                println!("{line}")
            })
            .await;
            let path = result?;
            println!("{id}: downloaded to {}", path.display());
        }
        Command::Delete { path } => {
            manager.delete(&path).await?;
            println!("Deleted {}", path.display());
        }
        Command::Detail { id } => match manager.resolve_detail(&id) {
            DetailTarget::Local(path) => println!("{id}: local package at {}", path.display()),
            DetailTarget::Online => println!("{id}: online map"),
        },
    }

    manager.flush_persistence().await;
    manager.shutdown();
    Ok(())
}

/// Drive a download while printing its progress. Lines still queued when the
/// download finishes are printed before returning.
async fn follow_download<F, T>(
    download: F,
    id: &str,
    events: &mut broadcast::Receiver<AreaEvent>,
    mut out: impl FnMut(String),
) -> T
where
    F: Future<Output = T>,
{
    tokio::pin!(download);
    let mut open = true;
    let result = loop {
        tokio::select! {
            result = &mut download => break result,
            event = events.recv(), if open => match event {
                Ok(event) => {
                    if let Some(line) = progress_line(id, event) {
                        out(line);
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Progress display fell behind"),
                Err(RecvError::Closed) => open = false,
            },
        }
    };

    loop {
        match events.try_recv() {
            Ok(event) => {
                if let Some(line) = progress_line(id, event) {
                    out(line);
                }
            }
            Err(TryRecvError::Lagged(skipped)) => warn!(skipped, "Progress display fell behind"),
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }
    result
}

fn progress_line(watched: &str, event: AreaEvent) -> Option<String> {
    match event {
        AreaEvent::StateChanged {
            id,
            state: AreaState::Downloading { progress },
        } if id == watched => Some(format!("{id}: {progress}%")),
        AreaEvent::Notice { message } => Some(message),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn downloading(id: &str, progress: u8) -> AreaEvent {
        AreaEvent::StateChanged {
            id: id.to_string(),
            state: AreaState::Downloading { progress },
        }
    }

    #[tokio::test]
    async fn test_follow_download_prints_lines_queued_at_completion() {
        let (sender, mut events) = broadcast::channel(16);
        let download = async {
            sender.send(downloading("A", 10)).unwrap();
            sender.send(downloading("B", 50)).unwrap();
            sender.send(downloading("A", 40)).unwrap();
            sender
                .send(AreaEvent::Notice {
                    message: "Catalog is slow".to_string(),
                })
                .unwrap();
            "done"
        };

        let mut lines = Vec::new();
        let result = follow_download(download, "A", &mut events, |line| lines.push(line)).await;

        assert_eq!(result, "done");
        assert_eq!(lines, vec!["A: 10%", "A: 40%", "Catalog is slow"]);
    }

    #[tokio::test]
    async fn test_follow_download_survives_closed_events() {
        let (sender, mut events) = broadcast::channel::<AreaEvent>(4);
        drop(sender);

        let mut lines = Vec::new();
        let result = follow_download(
            async {
                tokio::task::yield_now().await;
                7
            },
            "A",
            &mut events,
            |line| lines.push(line),
        )
        .await;

        assert_eq!(result, 7);
        assert!(lines.is_empty());
    }
}

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::errors::{AppError, AppResult};

pub mod defaults;
pub mod duration_serde;

use defaults::*;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub connectivity: ConnectivityConfig,
    #[serde(default)]
    pub manager: ManagerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Base URL of the area catalog host
    pub base_url: String,
    /// Index document path, relative to `base_url`
    #[serde(default = "default_index_path")]
    pub index_path: String,
    /// Timeout applied to catalog and download requests
    #[serde(
        default = "default_request_timeout",
        with = "duration_serde::duration"
    )]
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Installation root under which every area gets its own directory
    #[serde(default = "default_download_root")]
    pub download_root: PathBuf,
    /// Location of the persisted snapshot record
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectivityConfig {
    /// `host:port` the probe tries to reach
    #[serde(default = "default_probe_address")]
    pub probe_address: String,
    #[serde(default = "default_probe_timeout", with = "duration_serde::duration")]
    pub probe_timeout: Duration,
    /// Skip the probe and always load the local snapshot
    #[serde(default = "default_force_offline")]
    pub force_offline: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Buffer size of the area event broadcast channel
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_index_path() -> String {
    DEFAULT_CATALOG_INDEX_PATH.to_string()
}

fn default_request_timeout() -> Duration {
    humantime::parse_duration(DEFAULT_REQUEST_TIMEOUT).unwrap_or(Duration::from_secs(30))
}

fn default_download_root() -> PathBuf {
    PathBuf::from(DEFAULT_DOWNLOAD_ROOT)
}

fn default_store_path() -> PathBuf {
    PathBuf::from(DEFAULT_STORE_PATH)
}

fn default_probe_address() -> String {
    DEFAULT_PROBE_ADDRESS.to_string()
}

fn default_probe_timeout() -> Duration {
    humantime::parse_duration(DEFAULT_PROBE_TIMEOUT).unwrap_or(Duration::from_secs(3))
}

fn default_force_offline() -> bool {
    DEFAULT_FORCE_OFFLINE
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            download_root: default_download_root(),
            store_path: default_store_path(),
        }
    }
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            probe_address: default_probe_address(),
            probe_timeout: default_probe_timeout(),
            force_offline: default_force_offline(),
        }
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            event_capacity: default_event_capacity(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            catalog: CatalogConfig {
                base_url: DEFAULT_CATALOG_BASE_URL.to_string(),
                index_path: default_index_path(),
                request_timeout: default_request_timeout(),
            },
            storage: StorageConfig::default(),
            connectivity: ConnectivityConfig::default(),
            manager: ManagerConfig::default(),
        }
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(config_file: P) -> AppResult<Self> {
        let config_file = config_file.as_ref();
        let config = if config_file.exists() {
            let contents = std::fs::read_to_string(config_file)?;
            toml::from_str(&contents).map_err(|e| {
                AppError::configuration(format!("{}: {e}", config_file.display()))
            })?
        } else {
            let default_config = Self::default();
            let contents = toml::to_string_pretty(&default_config)
                .map_err(|e| AppError::configuration(e.to_string()))?;
            std::fs::write(config_file, contents)?;
            info!("Created default config file: {}", config_file.display());
            default_config
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values the manager cannot start with
    pub fn validate(&self) -> AppResult<()> {
        url::Url::parse(&self.catalog.base_url).map_err(|e| {
            AppError::configuration(format!(
                "catalog.base_url '{}' is not a valid URL: {e}",
                self.catalog.base_url
            ))
        })?;

        if self.connectivity.probe_address.trim().is_empty() {
            return Err(AppError::configuration(
                "connectivity.probe_address must not be empty",
            ));
        }

        if self.manager.event_capacity == 0 {
            return Err(AppError::configuration(
                "manager.event_capacity must be greater than zero",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_minimal_config_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [catalog]
            base_url = "https://maps.example.com/areas/"
            request_timeout = "10s"
            "#,
        )
        .unwrap();

        assert_eq!(config.catalog.index_path, DEFAULT_CATALOG_INDEX_PATH);
        assert_eq!(config.catalog.request_timeout, Duration::from_secs(10));
        assert_eq!(config.storage.download_root, PathBuf::from(DEFAULT_DOWNLOAD_ROOT));
        assert_eq!(config.connectivity.probe_timeout, Duration::from_secs(3));
        assert!(!config.connectivity.force_offline);
        assert_eq!(config.manager.event_capacity, DEFAULT_EVENT_CAPACITY);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_numeric_durations_are_seconds() {
        let config: Config = toml::from_str(
            r#"
            [catalog]
            base_url = "https://maps.example.com/"
            request_timeout = 45

            [connectivity]
            probe_timeout = 1
            "#,
        )
        .unwrap();

        assert_eq!(config.catalog.request_timeout, Duration::from_secs(45));
        assert_eq!(config.connectivity.probe_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.catalog.base_url = "not a url".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.manager.event_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.connectivity.probe_address = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_writes_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");

        let config = Config::load_from_file(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.catalog.base_url, DEFAULT_CATALOG_BASE_URL);

        let reloaded = Config::load_from_file(&path).unwrap();
        assert_eq!(reloaded.storage.store_path, config.storage.store_path);
        assert_eq!(reloaded.catalog.request_timeout, config.catalog.request_timeout);
    }
}

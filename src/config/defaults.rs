/// Configuration default values
///
/// This module contains all the default values for configuration options,
/// making them easily changeable in one central location.
// Catalog defaults
pub const DEFAULT_CATALOG_BASE_URL: &str = "http://localhost:8080/offline-areas/";
pub const DEFAULT_CATALOG_INDEX_PATH: &str = "areas.json";
pub const DEFAULT_REQUEST_TIMEOUT: &str = "30s";

// Storage defaults
pub const DEFAULT_DOWNLOAD_ROOT: &str = "./data/areas";
pub const DEFAULT_STORE_PATH: &str = "./data/area_store.json";

// Connectivity defaults
pub const DEFAULT_PROBE_ADDRESS: &str = "1.1.1.1:443";
pub const DEFAULT_PROBE_TIMEOUT: &str = "3s";
pub const DEFAULT_FORCE_OFFLINE: bool = false;

// Manager defaults
pub const DEFAULT_EVENT_CAPACITY: usize = 1000;

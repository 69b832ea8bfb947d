//! Error type definitions for the offline map areas subsystem
//!
//! This module defines the error hierarchy used by the lifecycle manager and
//! its collaborators. It uses `thiserror` for trait implementations and
//! error chaining.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Lifecycle manager operation errors
    #[error("Area error: {0}")]
    Area(#[from] AreaError),

    /// Remote catalog errors
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Durable store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Configuration file I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome errors of lifecycle manager operations
///
/// `NetworkUnavailable`, `RemoteFetchFailed` and `PersistenceFailed` never
/// reach the caller of an operation; they are logged and handled by falling
/// back or carrying on.
#[derive(Error, Debug)]
pub enum AreaError {
    /// Connectivity probe reported no outbound network
    #[error("Network unavailable")]
    NetworkUnavailable,

    /// Remote catalog listing failed
    #[error("Remote catalog fetch failed: {message}")]
    RemoteFetchFailed { message: String },

    /// Download parameters could not be derived from the remote handle
    #[error("Failed to derive download parameters for {id}: {message}")]
    ParameterDerivationFailed { id: String, message: String },

    /// The download job resolved with a failure
    #[error("Download job failed for {id}: {message}")]
    JobFailed { id: String, message: String },

    /// The artifact could not be removed from disk
    #[error("Failed to delete artifact at {}", path.display())]
    DeleteFailed { path: PathBuf },

    /// The durable snapshot could not be updated
    #[error("Persistence failed: {0}")]
    PersistenceFailed(#[from] StoreError),

    /// Entry was loaded from the local snapshot and has no remote handle
    #[error("Area {id} has no remote handle and cannot be downloaded")]
    NoRemoteHandle { id: String },

    /// No entry with this id in the current list
    #[error("Area not found: {id}")]
    NotFound { id: String },

    /// A download job for this entry is already running
    #[error("Download already in progress for {id}")]
    AlreadyDownloading { id: String },

    /// The orchestration loop is no longer running
    #[error("Area manager is not running")]
    ManagerStopped,
}

/// Remote catalog and download transport errors
#[derive(Error, Debug)]
pub enum CatalogError {
    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status from the catalog host
    #[error("HTTP status {status} for {url}")]
    Status { status: u16, url: String },

    /// The catalog index could not be parsed
    #[error("Parse error: {message}")]
    Parse { message: String },

    /// The remote handle does not resolve to a downloadable location
    #[error("Invalid locator '{locator}': {message}")]
    InvalidLocator { locator: String, message: String },

    /// Writing the downloaded artifact failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The job ended without reporting a result
    #[error("Download job aborted: {message}")]
    Aborted { message: String },
}

/// Durable store errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// Reading or writing the record failed
    #[error("Store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The record could not be (de)serialized
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The blocking writer task did not complete
    #[error("Store writer failed: {message}")]
    Writer { message: String },
}

/// Convenience methods for creating common error types
impl AppError {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

impl AreaError {
    /// Create a remote fetch failed error
    pub fn remote_fetch_failed<M: Into<String>>(message: M) -> Self {
        Self::RemoteFetchFailed {
            message: message.into(),
        }
    }

    /// Create a parameter derivation failed error
    pub fn parameter_derivation_failed<I: Into<String>, M: Into<String>>(id: I, message: M) -> Self {
        Self::ParameterDerivationFailed {
            id: id.into(),
            message: message.into(),
        }
    }

    /// Create a job failed error
    pub fn job_failed<I: Into<String>, M: Into<String>>(id: I, message: M) -> Self {
        Self::JobFailed {
            id: id.into(),
            message: message.into(),
        }
    }

    /// Create a delete failed error
    pub fn delete_failed<P: Into<PathBuf>>(path: P) -> Self {
        Self::DeleteFailed { path: path.into() }
    }

    /// Create a no remote handle error
    pub fn no_remote_handle<I: Into<String>>(id: I) -> Self {
        Self::NoRemoteHandle { id: id.into() }
    }

    /// Create a not found error
    pub fn not_found<I: Into<String>>(id: I) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Create an already downloading error
    pub fn already_downloading<I: Into<String>>(id: I) -> Self {
        Self::AlreadyDownloading { id: id.into() }
    }
}

impl CatalogError {
    /// Create a parse error
    pub fn parse<M: Into<String>>(message: M) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    /// Create an invalid locator error
    pub fn invalid_locator<L: Into<String>, M: Into<String>>(locator: L, message: M) -> Self {
        Self::InvalidLocator {
            locator: locator.into(),
            message: message.into(),
        }
    }

    /// Create an aborted job error
    pub fn aborted<M: Into<String>>(message: M) -> Self {
        Self::Aborted {
            message: message.into(),
        }
    }
}

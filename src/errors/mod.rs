//! Centralized error handling for the offline map areas subsystem
//!
//! Every failure in this crate is scoped to the single operation that
//! triggered it. Nothing here is fatal to the process.
//!
//! # Error Categories
//!
//! - **Area Errors**: outcomes of list, download, delete operations
//! - **Catalog Errors**: remote catalog and download transport failures
//! - **Store Errors**: durable snapshot serialization and I/O
//! - **Configuration Errors**: invalid or unreadable configuration
//!
//! # Usage
//!
//! ```rust
//! use offline_map_areas::errors::{AreaError, AreaResult};
//!
//! fn lookup(id: &str) -> AreaResult<()> {
//!     Err(AreaError::not_found(id))
//! }
//! ```

pub mod types;

pub use types::*;

/// Convenience type alias for Results using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Convenience type alias for manager operation Results
pub type AreaResult<T> = Result<T, AreaError>;

/// Convenience type alias for remote catalog Results
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Convenience type alias for durable store Results
pub type StoreResult<T> = Result<T, StoreError>;

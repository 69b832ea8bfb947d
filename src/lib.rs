pub mod catalog;
pub mod config;
pub mod connectivity;
pub mod errors;
pub mod manager;
pub mod models;
pub mod persistence;
pub mod storage;

pub use manager::{Collaborators, OfflineAreaManager};

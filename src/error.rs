//! Error types for the dynamic cache engine

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the cache engine
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Entry serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error (reported at cache start, fatal to that instance only)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Disk tier fault (tier degrades to memory-only)
    #[error("Disk cache error: {0}")]
    DiskIo(String),

    /// Replication transport fault
    #[error("Replication error: {0}")]
    Replication(String),

    /// External cache propagation fault
    #[error("External cache error: {0}")]
    ExternalCache(String),

    /// Operation attempted on a stopped cache
    #[error("Cache '{0}' is stopped")]
    Stopped(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

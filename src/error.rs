//! Error types for chunkline
//!
//! Provides a unified error type for split, read and backend operations.

use arrow::error::ArrowError;
use thiserror::Error;

/// Result type alias using ChunkError
pub type Result<T> = std::result::Result<T, ChunkError>;

/// Unified error type for chunkline operations
#[derive(Debug, Error)]
pub enum ChunkError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Backend Errors
    // -------------------------------------------------------------------------
    /// Backend unreachable or handshake refused. Never retried.
    #[error("Connection to {endpoint} failed: {reason}")]
    Connection { endpoint: String, reason: String },

    /// Error reply returned by the store
    #[error("Backend error: {0}")]
    Backend(String),

    /// Reply did not have the expected shape
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Multi-key call whose keys hash to different cluster slots
    #[error("Cross-slot request: {0}")]
    CrossSlot(String),

    // -------------------------------------------------------------------------
    // Pipeline Errors
    // -------------------------------------------------------------------------
    /// A chunk write exhausted its retry budget
    #[error("Write of {key} failed after {attempts} attempts: {source}")]
    Write {
        key: String,
        attempts: u32,
        #[source]
        source: Box<ChunkError>,
    },

    /// A fetch group exhausted its retry budget
    #[error("Fetch of {keys} keys starting at {first_key} failed after {attempts} attempts: {source}")]
    Fetch {
        first_key: String,
        keys: usize,
        attempts: u32,
        #[source]
        source: Box<ChunkError>,
    },

    /// Partition or batch id cannot be turned into a key
    #[error("Addressing error: {0}")]
    Addressing(String),

    #[error("Decode of {key} failed: {source}")]
    Decode {
        key: String,
        #[source]
        source: ArrowError,
    },

    #[error("Task error: {0}")]
    Task(String),

    // -------------------------------------------------------------------------
    // Columnar Errors
    // -------------------------------------------------------------------------
    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),

    #[error("Schema error: {0}")]
    Schema(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ChunkError {
    /// Whether the retry wrapper may try the operation again.
    ///
    /// Only connection failures short-circuit; every other error class is
    /// indistinguishable from a transient one at this layer.
    pub fn is_retriable(&self) -> bool {
        !matches!(self, ChunkError::Connection { .. })
    }

    /// Build a connection error for an endpoint
    pub fn connection(endpoint: impl Into<String>, reason: impl ToString) -> Self {
        ChunkError::Connection {
            endpoint: endpoint.into(),
            reason: reason.to_string(),
        }
    }
}

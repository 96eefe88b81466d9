//! Error types for DuoKV
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using DuoError
pub type Result<T> = std::result::Result<T, DuoError>;

/// Unified error type for DuoKV operations
#[derive(Debug, Error)]
pub enum DuoError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Lookup Errors
    // -------------------------------------------------------------------------
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    // -------------------------------------------------------------------------
    // Index Errors
    // -------------------------------------------------------------------------
    #[error("{index} index is full (capacity {capacity})")]
    CapacityExhausted { index: &'static str, capacity: usize },

    // -------------------------------------------------------------------------
    // Input Errors
    // -------------------------------------------------------------------------
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    // -------------------------------------------------------------------------
    // On-Disk Format Errors
    // -------------------------------------------------------------------------
    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<bincode::Error> for DuoError {
    fn from(err: bincode::Error) -> Self {
        DuoError::Serialization(err.to_string())
    }
}

impl DuoError {
    /// True for the "normal negative result" class of errors
    pub fn is_not_found(&self) -> bool {
        matches!(self, DuoError::KeyNotFound(_))
    }

    /// True when on-disk bytes failed validation
    pub fn is_corruption(&self) -> bool {
        matches!(self, DuoError::Corruption(_))
    }
}

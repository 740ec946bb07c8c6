//! Error types for accord-store

use accord_types::QueryError;
use thiserror::Error;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Store-specific errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Entity not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Entity is leased by another worker
    #[error("Lease conflict: {id} is leased by {holder}")]
    LeaseConflict { id: String, holder: String },

    /// Malformed filter, sort or operand
    #[error("Invalid query: {0}")]
    InvalidQuery(#[from] QueryError),
}

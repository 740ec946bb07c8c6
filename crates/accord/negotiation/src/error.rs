//! Error types for accord-negotiation

use accord_store::StoreError;
use accord_types::{NegotiationType, TransitionError};
use thiserror::Error;

/// Result type for negotiation operations
pub type NegotiationResult<T> = Result<T, NegotiationError>;

/// Negotiation-level errors
#[derive(Debug, Error)]
pub enum NegotiationError {
    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Rejected state change
    #[error("Transition error: {0}")]
    Transition(#[from] TransitionError),

    /// No negotiation for the given identifier
    #[error("Negotiation not found: {0}")]
    NotFound(String),

    /// Message addressed to the other role
    #[error("Negotiation {id} is a {actual} negotiation, expected {expected}")]
    UnexpectedRole {
        id: String,
        expected: NegotiationType,
        actual: NegotiationType,
    },

    /// Malformed or misrouted protocol message
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to load or deserialize configuration sources
    #[error(transparent)]
    Load(#[from] config::ConfigError),

    /// A value is out of range
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

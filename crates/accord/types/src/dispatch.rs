//! Outcome classification for outbound dispatch.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result of sending a message to a counterparty.
pub type DispatchResult<T> = Result<T, DispatchFailure>;

/// Whether a failed send may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Network or temporary remote error. Retried in the same state.
    Retryable,
    /// Malformed request or permanent rejection. Never retried.
    Fatal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Retryable => f.write_str("retryable"),
            FailureKind::Fatal => f.write_str("fatal"),
        }
    }
}

/// A failed dispatch with its cause.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind} failure: {message}")]
pub struct DispatchFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl DispatchFailure {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Retryable,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Fatal,
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.kind == FailureKind::Fatal
    }

    /// Human readable failure detail, suitable for `error_detail`.
    pub fn failure_detail(&self) -> &str {
        &self.message
    }
}

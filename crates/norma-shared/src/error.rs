//! Error types for Norma.
//!
//! Infrastructure failures are values, never panics. Every collaborator
//! call site classifies its failure here so routing can branch on
//! `retryable()` instead of inspecting strings.

use thiserror::Error;

/// Failure of an external collaborator (cache, store, LLM provider, ...).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InfraError {
    #[error("timed out after {0}ms")]
    Timeout(u64),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("backend returned {status}: {message}")]
    Backend { status: u16, message: String },

    #[error("corrupt payload: {0}")]
    Corrupt(String),

    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl InfraError {
    /// Whether a retry could plausibly succeed.
    ///
    /// Timeouts, connection drops and 5xx/429 answers are transient.
    /// Auth and validation failures (4xx) and corrupt payloads are not.
    pub fn retryable(&self) -> bool {
        match self {
            InfraError::Timeout(_) | InfraError::Connection(_) | InfraError::Unavailable(_) => {
                true
            }
            InfraError::Backend { status, .. } => *status == 429 || *status >= 500,
            InfraError::Corrupt(_) => false,
        }
    }

    /// Status code for backend failures, if one was observed.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            InfraError::Backend { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Shorthand for a backend failure.
    pub fn backend(status: u16, message: impl Into<String>) -> Self {
        InfraError::Backend {
            status,
            message: message.into(),
        }
    }
}

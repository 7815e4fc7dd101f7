//! Error types for dnsync
//!
//! This module defines all error types used throughout the crate.
//!
//! Provider failures come in exactly two kinds. Callers branch on
//! [`Error::is_transient`] and never on provider-specific details.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for dnsync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for dnsync
#[derive(Error, Debug)]
pub enum Error {
    /// Provider call failed in a way that may succeed on the next cycle
    /// (network failure, timeout, rate limit, 5xx)
    #[error("Transient provider error ({provider}): {message}")]
    TransientProvider {
        /// Provider name
        provider: String,
        /// Error message
        message: String,
    },

    /// Provider rejected the request (validation, auth, malformed record)
    #[error("Permanent provider error ({provider}): {message}")]
    PermanentProvider {
        /// Provider name
        provider: String,
        /// Error message
        message: String,
    },

    /// Schema or record validation failed
    #[error("Validation error: {0}")]
    Validation(String),

    /// A live lock file is held by someone else
    #[error("File lock error on {path}: {message}")]
    FileLock {
        /// The locked file
        path: PathBuf,
        /// Error message
        message: String,
    },

    /// Transaction misuse (commit/rollback twice, or both)
    #[error("Transaction state error: {0}")]
    TransactionState(String),

    /// Rollback could not find an expected backup artifact
    #[error("Transaction integrity error on {path}: {message}")]
    TransactionIntegrity {
        /// The file whose backup is missing
        path: PathBuf,
        /// Error message
        message: String,
    },

    /// Mode switch failed; the previous mode was restored
    #[error("Mode switch failed: {0}")]
    ModeSwitch(String),

    /// Unrecoverable condition that must be surfaced to the operator
    #[error("Fatal: {0}")]
    Fatal(String),

    /// Discovery source errors (container runtime, proxy API)
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a transient provider error
    pub fn transient(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TransientProvider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a permanent provider error
    pub fn permanent(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PermanentProvider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a file lock error
    pub fn file_lock(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::FileLock {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a transaction state error
    pub fn transaction_state(msg: impl Into<String>) -> Self {
        Self::TransactionState(msg.into())
    }

    /// Create a transaction integrity error
    pub fn transaction_integrity(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::TransactionIntegrity {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a discovery error
    pub fn discovery(msg: impl Into<String>) -> Self {
        Self::Discovery(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Whether a retry on the next cycle may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientProvider { .. } | Self::FileLock { .. })
    }

    /// Whether this error came from a provider call
    pub fn is_provider(&self) -> bool {
        matches!(
            self,
            Self::TransientProvider { .. } | Self::PermanentProvider { .. }
        )
    }
}

//! Error types for the tourist identity reconciler.
//!
//! All errors are strongly typed and propagated without panicking.
//! Private key material is never included in error messages.

use serde::{Deserialize, Serialize};

use crate::ledger::RejectCode;

/// Reconciler error types covering all operations.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Ledger call `{operation}` timed out after {timeout_ms} ms")]
    LedgerTimeout { operation: String, timeout_ms: u64 },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Ledger rejected transaction ({code}): {reason}")]
    LedgerRejected { code: RejectCode, reason: String },

    #[error("Identity not found: {0}")]
    NotFound(String),

    #[error("Operation not supported by this ledger: {0}")]
    Unsupported(String),

    #[error("Submission lane closed")]
    LaneClosed,

    #[error("Background task failed: {0}")]
    TaskFailed(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Signature verification failed")]
    SignatureInvalid,

    #[error("Key derivation failed: {0}")]
    DerivationFailed(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Invalid passphrase")]
    InvalidPassphrase,

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid file format: {0}")]
    InvalidFileFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReconcileError {
    /// Shorthand for a rejection with a free-form reason.
    pub fn rejected(code: RejectCode, reason: impl Into<String>) -> Self {
        Self::LedgerRejected {
            code,
            reason: reason.into(),
        }
    }

    /// The reportable kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::LedgerTimeout { .. } => ErrorKind::LedgerTimeout,
            Self::Network(_) => ErrorKind::NetworkError,
            Self::LedgerRejected { .. } => ErrorKind::LedgerRejected,
            Self::Configuration(_) => ErrorKind::Configuration,
            _ => ErrorKind::Internal,
        }
    }

    /// Transient failures are retried by the next scheduled cycle.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::LedgerTimeout { .. } | Self::Network(_))
    }
}

/// Error classification as it appears in a run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    LedgerTimeout,
    NetworkError,
    LedgerRejected,
    Configuration,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LedgerTimeout => "ledger_timeout",
            Self::NetworkError => "network_error",
            Self::LedgerRejected => "ledger_rejected",
            Self::Configuration => "configuration",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, ReconcileError>;

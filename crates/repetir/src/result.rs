//! Result and error types for Repetir.

use thiserror::Error;

/// Result type for Repetir operations
pub type RepetirResult<T> = Result<T, RepetirError>;

/// Errors that can occur in Repetir.
///
/// Configuration and invalid-state errors are the only classes rejected
/// through this enum before any side effect. Element-resolution and
/// action-dispatch failures are reported as values in their result types,
/// never as errors, so a run can continue past a failed step.
#[derive(Debug, Error)]
pub enum RepetirError {
    /// Invalid test configuration (missing project id, empty url, no steps)
    #[error("Invalid configuration: {message}")]
    ConfigError {
        /// Error message
        message: String,
    },

    /// Operation called in the wrong state (e.g. `record_step` while idle)
    #[error("Invalid state: {message}")]
    InvalidState {
        /// Error message
        message: String,
    },

    /// Another run or session is already active on this instance
    #[error("Already active: {message}")]
    AlreadyActive {
        /// Error message
        message: String,
    },

    /// Operation timed out
    #[error("Operation timed out after {ms}ms")]
    Timeout {
        /// Timeout in milliseconds
        ms: u64,
    },

    /// Recording session reached its configured step limit
    #[error("Session limit reached: {max} steps")]
    SessionLimit {
        /// Configured maximum
        max: usize,
    },

    /// Execution context could not be opened or prepared
    #[error("Tab operation failed: {message}")]
    TabError {
        /// Error message
        message: String,
    },

    /// Storage collaborator failed (best-effort paths swallow this)
    #[error("Storage error: {message}")]
    StorageError {
        /// Error message
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

//! Error types for molbridge.

use thiserror::Error;

use crate::worker::TerminationReason;

/// Main error type for the supervisor side of molbridge.
///
/// Worker-side operation failures travel back over IPC as plain messages and
/// surface here as [`BridgeError::Operation`]; their `Display` text is what the
/// caller sees as the failure diagnostic.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("Worker {worker} {reason} while {context}")]
    WorkerDied {
        worker: usize,
        reason: TerminationReason,
        context: String,
    },

    #[error("{0}")]
    Operation(String),
}

/// Result type alias for molbridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

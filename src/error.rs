// Jarvis Engine — Error Types
// Single canonical error enum for the engine, built with `thiserror`.
//
// Design rules:
//   • Variants map one-to-one onto recovery paths: every error with a defined
//     fallback is absorbed at the component boundary that owns the fallback.
//     Only exhausted failover ever reaches the transcript, and then as a
//     fixed non-technical string — raw detail goes to the log.
//   • No variant carries credential material in its message.

use thiserror::Error;

use crate::storage::StorageError;

// ── Primary error enum ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum EngineError {
    /// Filesystem or OS-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Credential/session setup failed. Recoverable by trying the next
    /// credential in the pool.
    #[error("Initialization error: {0}")]
    Initialization(String),

    /// Every credential in the pool failed to establish a session.
    #[error("No available credentials: all {attempts} initialization attempts failed")]
    NoAvailableCredentials { attempts: usize },

    /// Message delivery failed after streaming-then-fallback on the active
    /// session. Recoverable by the failover retry walk.
    #[error("Send error: {0}")]
    Send(String),

    /// Durable storage write failed even after the clear-and-retry pass.
    /// The transcript store logs and swallows this — in-memory state is
    /// authoritative.
    #[error("Persistence error: {0}")]
    Persistence(#[from] StorageError),

    /// Bounding-box request failed. Recovered by yielding an empty result.
    #[error("Annotation error: {0}")]
    Annotation(String),

    /// Bad user input (image type/size, empty message). Surfaced before any
    /// network call is made.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A send is already in flight; overlapping sends are rejected.
    #[error("Engine busy: a send is already in flight")]
    Busy,
}

// ── Convenience alias ──────────────────────────────────────────────────────

/// All engine operations should return this type.
pub type EngineResult<T> = Result<T, EngineError>;

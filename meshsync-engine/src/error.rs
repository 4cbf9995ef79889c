//! Error types for meshsync-engine.

use std::path::PathBuf;

use thiserror::Error;

use meshsync_core::CoreError;

use crate::ledger::LedgerError;

/// All errors that can arise from synchronization operations.
///
/// Per-entry problems (bad timestamps, failed validation) never show up
/// here; they are logged and the entry is discarded.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The batch names a collection this controller does not own. Nothing
    /// from the batch was applied.
    #[error("apply: collection not supported {0}")]
    UnsupportedCollection(String),

    /// `get`/`list` against a type that is not a supported collection type.
    #[error("unknown type {0}")]
    UnknownType(String),

    /// A point CRUD operation on a pure synchronization sink.
    #[error("{operation}: this operation is not supported by the synchronization controller")]
    Unsupported { operation: &'static str },

    /// Error from the version ledger (only surfaced by `resource_at_version`).
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// An error from configuration or batch loading.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error (ledger snapshot).
    #[error("ledger snapshot JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    pub(crate) fn unsupported(operation: &'static str) -> Self {
        EngineError::Unsupported { operation }
    }
}

/// Convenience constructor for [`EngineError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> EngineError {
    EngineError::Io {
        path: path.into(),
        source,
    }
}

//! Engine error taxonomy shared by the transfer engine and the orchestrator.
//!
//! Stream and task failures travel as `anyhow::Error` whose root cause is an
//! `EngineError`; use `EngineError::is_aborted` to tell a cooperative stop
//! apart from a real failure.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Origin unreachable, or no usable content length.
    #[error("probe failed: {0}")]
    ProbeFailed(String),
    /// A part exhausted its retry budget or hit a non-retryable error.
    #[error("part {part} failed: {source}")]
    TransferFailed {
        part: usize,
        #[source]
        source: crate::retry::SegmentError,
    },
    /// Stored manifest does not match the current resource. Recoverable:
    /// the engine discards it and starts over.
    #[error("manifest invalid: {0}")]
    ManifestInvalid(String),
    #[error("merge failed: {0}")]
    MergeFailed(String),
    #[error("mux failed: {0}")]
    MuxFailed(String),
    /// Stopped by pause/cancel. Never reported as a task error.
    #[error("aborted")]
    Aborted,
}

impl EngineError {
    /// True if `err` (or anything in its chain) is `EngineError::Aborted`.
    pub fn is_aborted(err: &anyhow::Error) -> bool {
        err.chain().any(|cause| {
            matches!(
                cause.downcast_ref::<EngineError>(),
                Some(EngineError::Aborted)
            ) || cause.downcast_ref::<crate::control::JobAborted>().is_some()
        })
    }
}

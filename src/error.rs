//! Error types shared across the recorder, interner and heap overlay

use std::collections::TryReserveError;
use thiserror::Error;

/// Errors surfaced by the profiler core.
///
/// `StackUnderflow` and `LabelMismatch` indicate begin/end pairing bugs in
/// the instrumented application; they are expected to be caught during
/// development, not handled at runtime. `OutOfMemory` is real resource
/// exhaustion and must reach the caller.
#[derive(Debug, Error)]
pub enum Error {
    /// `end_scope` was called while the recorder was already at the root.
    #[error("end_scope called with no open scope")]
    StackUnderflow,

    /// A label-checked `end_scope` saw a current scope with a different label.
    #[error("end_scope label does not match the current scope")]
    LabelMismatch,

    /// Tree-node or interner-buffer growth failed, or the heap overlay's
    /// underlying allocator returned null.
    #[error("allocation failed while recording")]
    OutOfMemory,

    /// Report serialization failed.
    #[error("report serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl From<TryReserveError> for Error {
    fn from(_: TryReserveError) -> Self {
        Error::OutOfMemory
    }
}

/// Convenience result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

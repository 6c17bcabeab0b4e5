//! Bridge error types.

use crate::handle::Handle;

/// Errors produced while decoding, dispatching, or executing a request.
///
/// Every error renders to a human-readable message; the message (not a
/// structured code) is what travels back to the host in the response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    /// A handle was read at a different type tag than it was written with
    #[error("Type mismatch. Expected {expected}. Got {got}.")]
    TypeMismatch {
        /// The tag the reader asked for
        expected: &'static str,
        /// The tag the handle actually carries
        got: &'static str,
    },

    /// No live entry for the given handle
    #[error("Failed to look up handle {0}.")]
    HandleLookupFailed(Handle),

    /// Command carried the wrong number of argument handles
    #[error("Expected {expected} arg(s), got {actual}.")]
    ArgCountMismatch {
        /// Arity of the target function (minimum arity for variadics)
        expected: usize,
        /// Number of argument handles in the command
        actual: usize,
    },

    /// Argument or result kind the bridge refuses to marshal
    #[error("Unsupported type: {0}.")]
    UnsupportedType(String),

    /// An allocation (native memory or callback slot) failed
    #[error("Allocation failed: {0}.")]
    AllocationFailed(String),

    /// The message queue cannot accept or produce another message
    #[error("Message queue is closed.")]
    QueueClosed,

    /// Structurally malformed request
    #[error("Malformed request: {0}.")]
    ProtocolError(String),

    /// Command named a function id outside the dispatch table
    #[error("Function id {id} is out of range [-2, {count}).")]
    FunctionIdOutOfRange {
        /// The id the command asked for
        id: i32,
        /// Number of registered (non-reserved) functions
        count: usize,
    },
}

/// Result alias used throughout the bridge.
pub type BridgeResult<T> = Result<T, BridgeError>;

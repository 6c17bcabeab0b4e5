//! Host messaging interface.
//!
//! The embedding owns the transport; the engine only needs a way to post a
//! variant back to the host. The worker holds one sink reference for
//! responses, and each allocated callback slot holds its own clone so that
//! a trampoline invoked from C code can reach the host without any context
//! parameter.

use cbind_core::Variant;

/// Outbound message sink provided by the embedding.
pub trait MessageSink: Send + Sync {
    /// Deliver a message variant to the host.
    fn post_message(&self, message: Variant);
}

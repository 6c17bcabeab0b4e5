//! Queue-backed message sink.
//!
//! Embeddings whose host side drains a mailbox (and every test in this
//! workspace) implement [`MessageSink`] by enqueueing the outbound variant
//! into a second [`MessageQueue`] the host owns.

use cbind_core::{MessageQueue, Variant};
use cbind_engine::MessageSink;

/// Sink that forwards every posted message into a host-owned queue.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    queue: MessageQueue,
}

impl ChannelSink {
    /// Forward into `queue`.
    pub fn new(queue: MessageQueue) -> Self {
        Self { queue }
    }
}

impl MessageSink for ChannelSink {
    fn post_message(&self, message: Variant) {
        if let Err(err) = self.queue.enqueue(message) {
            tracing::error!(error = %err, "dropping outbound message");
        }
    }
}

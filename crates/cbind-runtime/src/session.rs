//! Embedding session.
//!
//! A [`Session`] bundles the pieces an embedding wires together at plugin
//! instance creation: the bounded request queue, the worker thread, and
//! the outbound sink. The host posts requests (as variants or JSON text)
//! and eventually shuts the session down, which drains the worker and
//! returns its engine so teardown code can verify nothing leaked.

use cbind_core::json::from_json_str;
use cbind_core::{BridgeResult, MessageQueue, Variant};
use cbind_engine::{Engine, MessageSink, Registry};
use std::sync::Arc;

use crate::worker::Worker;

/// Request queue depth used when the embedding does not choose one.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// A running bridge instance.
#[derive(Debug)]
pub struct Session {
    queue: MessageQueue,
    worker: Worker,
}

impl Session {
    /// Start a session with the default queue capacity.
    pub fn new(registry: Registry, sink: Arc<dyn MessageSink>) -> Self {
        Self::with_capacity(registry, sink, DEFAULT_QUEUE_CAPACITY)
    }

    /// Start a session whose request queue holds at most `capacity`
    /// messages.
    pub fn with_capacity(
        registry: Registry,
        sink: Arc<dyn MessageSink>,
        capacity: usize,
    ) -> Self {
        let queue = MessageQueue::bounded(capacity);
        let worker = Worker::spawn(registry, queue.clone(), sink);
        Self { queue, worker }
    }

    /// Post a request variant to the worker.
    pub fn post_request(&self, request: Variant) -> BridgeResult<()> {
        self.queue.enqueue(request)
    }

    /// Decode and post a JSON request.
    pub fn post_request_json(&self, text: &str) -> BridgeResult<()> {
        self.post_request(from_json_str(text)?)
    }

    /// The request queue (for handing to host-side producers).
    pub fn queue(&self) -> &MessageQueue {
        &self.queue
    }

    /// Stop the worker and take back its engine.
    pub fn shutdown(self) -> Engine {
        // Ignore a send failure here: a closed queue already means the
        // worker is gone.
        let _ = self.queue.enqueue(Variant::Undefined);
        self.worker.join()
    }
}

//! Test harness for end-to-end request/response exchanges.
//!
//! Mirrors a mailbox-style host: requests go into the session's queue,
//! responses come back through a [`ChannelSink`] into a queue the test
//! drains. Shutdown returns the worker's engine so tests can assert that
//! no handles leaked.

use cbind_core::json::to_json_string;
use cbind_core::MessageQueue;
use cbind_engine::{Engine, MessageSink, Registry};
use cbind_runtime::{ChannelSink, Session};
use std::sync::Arc;

pub struct Host {
    session: Session,
    responses: MessageQueue,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

impl Host {
    /// Spin up a worker over `registry`.
    pub fn start(registry: Registry) -> Self {
        init_tracing();
        let responses = MessageQueue::bounded(256);
        let sink: Arc<dyn MessageSink> = Arc::new(ChannelSink::new(responses.clone()));
        let session = Session::new(registry, sink);
        Self { session, responses }
    }

    /// Post a JSON request (or callback reply) to the worker.
    pub fn send(&self, request_json: &str) {
        self.session
            .post_request_json(request_json)
            .expect("post request");
    }

    /// Block for the next outbound message, rendered as compact JSON.
    pub fn recv(&self) -> String {
        to_json_string(&self.responses.dequeue())
    }

    /// Assert the next outbound message matches `expected` exactly.
    pub fn expect_response(&self, expected: &str) {
        assert_eq!(self.recv(), expected);
    }

    /// Stop the worker and take back its engine.
    pub fn shutdown(self) -> Engine {
        self.session.shutdown()
    }
}

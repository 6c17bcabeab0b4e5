//! Worker thread.
//!
//! One dedicated thread owns the engine and drives the run loop: dequeue
//! the next request, execute it, post the response. Every native call,
//! including a callback trampoline re-entering the queue, happens on this
//! thread. An `Undefined` variant on the request queue is the shutdown
//! sentinel; the worker exits and hands its engine back for inspection.

use cbind_core::{MessageQueue, Variant};
use cbind_engine::{Engine, MessageSink, Registry};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Handle to the spawned worker thread.
#[derive(Debug)]
pub struct Worker {
    handle: JoinHandle<Engine>,
}

impl Worker {
    /// Spawn the worker: requests arrive on `queue`, responses leave
    /// through `sink`.
    pub fn spawn(registry: Registry, queue: MessageQueue, sink: Arc<dyn MessageSink>) -> Self {
        let handle = std::thread::spawn(move || {
            let mut engine = Engine::new();
            loop {
                let request = queue.dequeue();
                if request.is_undefined() {
                    tracing::debug!("worker received shutdown sentinel");
                    break;
                }
                let response = engine.run_request(&registry, &queue, &sink, &request);
                sink.post_message(response);
            }
            engine
        });
        Self { handle }
    }

    /// Wait for the worker to exit and take back its engine.
    pub fn join(self) -> Engine {
        match self.handle.join() {
            Ok(engine) => engine,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ChannelSink;
    use cbind_core::json::{from_json_str, to_json_string};

    #[test]
    fn test_worker_processes_requests_in_order() {
        let requests = MessageQueue::bounded(8);
        let responses = MessageQueue::bounded(8);
        let sink: Arc<dyn MessageSink> = Arc::new(ChannelSink::new(responses.clone()));
        let worker = Worker::spawn(Registry::new(), requests.clone(), sink);

        requests
            .enqueue(from_json_str("{\"id\": 1}").unwrap())
            .unwrap();
        requests
            .enqueue(from_json_str("{\"id\": 2}").unwrap())
            .unwrap();

        assert_eq!(to_json_string(&responses.dequeue()), "{\"id\":1,\"values\":[]}");
        assert_eq!(to_json_string(&responses.dequeue()), "{\"id\":2,\"values\":[]}");

        requests.enqueue(Variant::Undefined).unwrap();
        let engine = worker.join();
        assert_eq!(engine.live_handle_count(), 0);
    }

    #[test]
    fn test_worker_keeps_handles_across_requests() {
        let requests = MessageQueue::bounded(8);
        let responses = MessageQueue::bounded(8);
        let sink: Arc<dyn MessageSink> = Arc::new(ChannelSink::new(responses.clone()));
        let worker = Worker::spawn(Registry::new(), requests.clone(), sink);

        requests
            .enqueue(from_json_str("{\"id\": 1, \"set\": {\"1\": [\"int32\", 5]}}").unwrap())
            .unwrap();
        responses.dequeue();

        requests
            .enqueue(from_json_str("{\"id\": 2, \"get\": [1], \"destroy\": [1]}").unwrap())
            .unwrap();
        assert_eq!(to_json_string(&responses.dequeue()), "{\"id\":2,\"values\":[5]}");

        requests.enqueue(Variant::Undefined).unwrap();
        assert_eq!(worker.join().live_handle_count(), 0);
    }
}

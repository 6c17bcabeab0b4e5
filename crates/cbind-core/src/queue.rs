//! Bounded blocking mailbox of variants.
//!
//! A [`MessageQueue`] is the bridge's only synchronization primitive: the
//! host enqueues request variants from its own threads, the worker dequeues
//! them in order, and callback trampolines re-enter the same queue while
//! waiting for their reply. Capacity is fixed at creation; enqueueing into
//! a full queue blocks.

use crate::variant::Variant;
use crossbeam::channel::{bounded, Receiver, Sender};

use crate::error::{BridgeError, BridgeResult};

/// Multi-producer, single-consumer mailbox with a fixed capacity.
///
/// Clones share the same channel; cloning is how a producer handle is handed
/// to another thread or stashed in a callback slot.
#[derive(Debug, Clone)]
pub struct MessageQueue {
    tx: Sender<Variant>,
    rx: Receiver<Variant>,
}

impl MessageQueue {
    /// Create a queue holding at most `capacity` messages.
    pub fn bounded(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity);
        Self { tx, rx }
    }

    /// Enqueue a message, blocking while the queue is full.
    ///
    /// The queue takes its own reference to the variant. Fails only when
    /// every consumer handle is gone.
    pub fn enqueue(&self, message: Variant) -> BridgeResult<()> {
        self.tx.send(message).map_err(|_| BridgeError::QueueClosed)
    }

    /// Enqueue without blocking. Fails when the queue is full or closed.
    pub fn try_enqueue(&self, message: Variant) -> BridgeResult<()> {
        self.tx
            .try_send(message)
            .map_err(|_| BridgeError::QueueClosed)
    }

    /// Dequeue the next message, blocking while the queue is empty.
    ///
    /// Ownership of the message transfers to the caller. A closed queue
    /// yields `Undefined`, which is also the worker shutdown sentinel, so a
    /// vanished producer side drains into an orderly exit.
    pub fn dequeue(&self) -> Variant {
        self.rx.recv().unwrap_or(Variant::Undefined)
    }

    /// Number of messages currently queued.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// True when no messages are queued.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// The fixed capacity.
    pub fn capacity(&self) -> usize {
        self.tx.capacity().unwrap_or(0)
    }
}

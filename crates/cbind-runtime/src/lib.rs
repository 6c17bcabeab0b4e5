//! cbind runtime
//!
//! Host-side wiring for the cbind bridge: the worker thread that drives
//! the engine, the session type embeddings create per plugin instance,
//! and a queue-backed message sink for mailbox-style hosts.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod session;
pub mod transport;
pub mod worker;

pub use session::{Session, DEFAULT_QUEUE_CAPACITY};
pub use transport::ChannelSink;
pub use worker::Worker;

//! cbind core types
//!
//! This crate provides the data plane of the cbind bridge:
//! - Dynamic refcounted values ([`Variant`]) that cross the host boundary
//! - The handle table mapping host-assigned ids to typed native slots
//! - The bounded blocking message queue connecting host and worker
//! - The JSON wire codec
//! - The shared error type

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod error;
pub mod handle;
pub mod json;
pub mod queue;
pub mod variant;

pub use error::{BridgeError, BridgeResult};
pub use handle::{CFuncPtr, FreeFuncFn, Handle, HandleTable, HandleValue, VarArg};
pub use queue::MessageQueue;
pub use variant::{VarArray, VarBuffer, VarDict, Variant};

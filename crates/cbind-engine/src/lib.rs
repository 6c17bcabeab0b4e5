//! cbind request execution engine
//!
//! This crate turns decoded request variants into native calls:
//! - Request parsing and response assembly
//! - The command dispatcher and its stub registry
//! - Callback trampoline pools for host functions passed as C function
//!   pointers
//! - The builtin command suite (memory, arithmetic, comparisons, Var ops)
//! - The per-request run loop
//!
//! The worker thread that drives the engine, and the transport that feeds
//! it, live in `cbind-runtime`.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod builtins;
pub mod callback;
pub mod dispatch;
pub mod host;
mod layout;
pub mod request;
pub mod response;
pub mod run;

pub use builtins::{register_builtins, BuiltinIds};
pub use dispatch::{
    unsupported_stub, CallContext, Registry, ERROR_IF_ID, GET_FUNC_ID, MAX_DBL_VARARGS,
    MAX_INT_VARARGS,
};
pub use host::MessageSink;
pub use request::Request;
pub use response::Response;
pub use run::{Engine, RetainSet};

// Core types, re-exported for embeddings and for the code
// `callback_signature!` expands into.
pub use cbind_core::{
    BridgeError, BridgeResult, CFuncPtr, FreeFuncFn, Handle, HandleTable, HandleValue,
    MessageQueue, VarArg, VarArray, VarBuffer, VarDict, Variant,
};

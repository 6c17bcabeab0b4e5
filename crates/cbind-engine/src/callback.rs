//! Callback trampolines.
//!
//! When the host passes one of its own functions where C expects a function
//! pointer, the bridge hands C a *trampoline*: a real `extern "C"` function
//! with a fixed address that, when called, posts a callback message to the
//! host and blocks until the matching reply arrives on the request queue.
//!
//! Each distinct C function-pointer signature gets its own pool, generated
//! by [`callback_signature!`]: a fixed array of [`FUNCTION_POINTER_COUNT`]
//! slots, one monomorphized trampoline per slot (so every slot has a
//! distinct code address), a linear-scan allocator keyed on a free slot's
//! `func_id == 0`, and a deallocator that clears the matching slot. The
//! association is index-based throughout: the handle that backs a slot
//! stores only the host function id and the pool's `free` function.
//!
//! The invoke protocol (all on the worker thread):
//! 1. Build a response with `id = func_id` and a fresh per-signature
//!    `cbId`.
//! 2. Marshal the C arguments into `values`.
//! 3. Post it through the slot's message sink.
//! 4. Block on the slot's queue until the reply matching
//!    `(func_id, cbId)` arrives; anything else is logged and dropped.
//! 5. Unmarshal the single returned value as the C result type.
//!
//! A protocol failure never unwinds into C code: the trampoline logs the
//! error and returns the result type's default value.

use crate::host::MessageSink;
use crate::response::Response;
use cbind_core::{BridgeError, BridgeResult, MessageQueue, Variant};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

/// Trampolines per callback signature.
pub const FUNCTION_POINTER_COUNT: usize = 16;

struct SlotState {
    func_id: i32,
    queue: Option<MessageQueue>,
    sink: Option<Arc<dyn MessageSink>>,
}

/// One entry of a signature's slot array. Free iff `func_id == 0`.
pub struct CallbackSlot {
    state: Mutex<SlotState>,
}

impl CallbackSlot {
    /// A free slot.
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                func_id: 0,
                queue: None,
                sink: None,
            }),
        }
    }

    /// Bind the slot to `func_id` if it is free.
    pub fn try_acquire(
        &self,
        func_id: i32,
        queue: &MessageQueue,
        sink: &Arc<dyn MessageSink>,
    ) -> bool {
        let mut state = self.state.lock();
        if state.func_id != 0 {
            return false;
        }
        state.func_id = func_id;
        state.queue = Some(queue.clone());
        state.sink = Some(sink.clone());
        true
    }

    /// Clear the slot if it is bound to `func_id`.
    pub fn release_if(&self, func_id: i32) -> bool {
        let mut state = self.state.lock();
        if func_id == 0 || state.func_id != func_id {
            return false;
        }
        state.func_id = 0;
        state.queue = None;
        state.sink = None;
        true
    }

    /// The bound func id, or 0 when free.
    pub fn func_id(&self) -> i32 {
        self.state.lock().func_id
    }

    fn snapshot(&self) -> BridgeResult<(i32, MessageQueue, Arc<dyn MessageSink>)> {
        let state = self.state.lock();
        match (&state.queue, &state.sink) {
            (Some(queue), Some(sink)) if state.func_id != 0 => {
                Ok((state.func_id, queue.clone(), sink.clone()))
            }
            _ => Err(BridgeError::ProtocolError(
                "callback slot is not bound".into(),
            )),
        }
    }
}

impl Default for CallbackSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// C argument kinds a trampoline can marshal out to the host.
pub trait CallbackArg {
    /// The variant the host sees for this argument.
    fn into_variant(self) -> Variant;
}

impl CallbackArg for i32 {
    fn into_variant(self) -> Variant {
        Variant::Int32(self)
    }
}

impl CallbackArg for i64 {
    fn into_variant(self) -> Variant {
        Variant::Int64(self)
    }
}

/// C result kinds a trampoline can unmarshal from the host's reply.
pub trait CallbackRet: Sized {
    /// Read the reply value as this result type.
    fn from_variant(value: &Variant) -> BridgeResult<Self>;

    /// Value handed to the C caller when the protocol fails.
    fn fallback() -> Self;
}

impl CallbackRet for i32 {
    fn from_variant(value: &Variant) -> BridgeResult<Self> {
        value.as_int32().ok_or(BridgeError::TypeMismatch {
            expected: "int32",
            got: value.type_name(),
        })
    }

    fn fallback() -> Self {
        0
    }
}

impl CallbackRet for i64 {
    fn from_variant(value: &Variant) -> BridgeResult<Self> {
        value.as_int64().ok_or(BridgeError::TypeMismatch {
            expected: "int64",
            got: value.type_name(),
        })
    }

    fn fallback() -> Self {
        0
    }
}

impl CallbackRet for () {
    fn from_variant(_value: &Variant) -> BridgeResult<Self> {
        Ok(())
    }

    fn fallback() -> Self {}
}

/// Run the invoke protocol for one trampoline call.
pub fn invoke<R: CallbackRet>(
    slot: &CallbackSlot,
    next_cb_id: &AtomicI32,
    args: Vec<Variant>,
) -> BridgeResult<R> {
    let (func_id, queue, sink) = slot.snapshot()?;
    let cb_id = next_cb_id.fetch_add(1, Ordering::Relaxed);

    let mut response = Response::new(func_id);
    response.set_cb_id(cb_id);
    for value in args {
        response.push_value(value);
    }
    sink.post_message(response.into_variant());

    loop {
        let message = queue.dequeue();
        if message.is_undefined() {
            return Err(BridgeError::QueueClosed);
        }
        match Response::from_variant(&message) {
            Ok(reply) if reply.id() == func_id && reply.cb_id() == Some(cb_id) => {
                let values = reply.values();
                if values.len() != 1 {
                    return Err(BridgeError::ProtocolError(format!(
                        "expected one value in callback reply, got {}",
                        values.len()
                    )));
                }
                return R::from_variant(&values[0]);
            }
            _ => {
                // Only the awaited reply should arrive while blocked.
                tracing::warn!(
                    func_id,
                    cb_id,
                    "dropping message that is not the awaited callback reply"
                );
            }
        }
    }
}

/// [`invoke`], degraded to the result type's default on failure. This is
/// the trampoline entry point: errors stop here instead of unwinding
/// through C frames.
pub fn invoke_or_default<R: CallbackRet>(
    slot: &CallbackSlot,
    next_cb_id: &AtomicI32,
    args: Vec<Variant>,
) -> R {
    match invoke(slot, next_cb_id, args) {
        Ok(value) => value,
        Err(err) => {
            tracing::error!(error = %err, "callback invocation failed");
            R::fallback()
        }
    }
}

/// Generate the trampoline pool for one C function-pointer signature.
///
/// ```ignore
/// cbind_engine::callback_signature! {
///     /// int (*)(int)
///     pub mod cb_int_int: fn(value: i32) -> i32;
/// }
/// ```
///
/// The module exposes `alloc(func_id, queue, sink)`, `free(func_id)`, the
/// concrete `Signature` type, and `slot_func_ids()` for inspection. Every
/// argument type must implement [`CallbackArg`] and the result type
/// [`CallbackRet`]; signatures outside those kinds are not expressible,
/// which is the generator refusing unsupported callback types.
#[macro_export]
macro_rules! callback_signature {
    (
        $(#[$meta:meta])*
        pub mod $name:ident : fn($($arg:ident : $argty:ty),* $(,)?) -> $ret:ty;
    ) => {
        $(#[$meta])*
        pub mod $name {
            #[allow(unused_imports)]
            use super::*;

            /// Concrete trampoline signature.
            pub type Signature = extern "C" fn($($argty),*) -> $ret;

            const _: () = assert!($crate::callback::FUNCTION_POINTER_COUNT == 16);

            const FREE_SLOT: $crate::callback::CallbackSlot =
                $crate::callback::CallbackSlot::new();
            static SLOTS: [$crate::callback::CallbackSlot;
                $crate::callback::FUNCTION_POINTER_COUNT] =
                [FREE_SLOT; $crate::callback::FUNCTION_POINTER_COUNT];
            static NEXT_CB_ID: ::std::sync::atomic::AtomicI32 =
                ::std::sync::atomic::AtomicI32::new(1);

            extern "C" fn trampoline<const SLOT: usize>($($arg: $argty),*) -> $ret {
                let args = ::std::vec![
                    $($crate::callback::CallbackArg::into_variant($arg)),*
                ];
                $crate::callback::invoke_or_default(&SLOTS[SLOT], &NEXT_CB_ID, args)
            }

            static TRAMPOLINES: [Signature; $crate::callback::FUNCTION_POINTER_COUNT] = [
                trampoline::<0>,
                trampoline::<1>,
                trampoline::<2>,
                trampoline::<3>,
                trampoline::<4>,
                trampoline::<5>,
                trampoline::<6>,
                trampoline::<7>,
                trampoline::<8>,
                trampoline::<9>,
                trampoline::<10>,
                trampoline::<11>,
                trampoline::<12>,
                trampoline::<13>,
                trampoline::<14>,
                trampoline::<15>,
            ];

            /// Bind a free slot to `func_id` and return its trampoline as
            /// an address-only pointer. Returns `None` when the pool is
            /// exhausted.
            pub fn alloc(
                func_id: i32,
                queue: &$crate::MessageQueue,
                sink: &::std::sync::Arc<dyn $crate::host::MessageSink>,
            ) -> ::std::option::Option<$crate::CFuncPtr> {
                for (index, slot) in SLOTS.iter().enumerate() {
                    if slot.try_acquire(func_id, queue, sink) {
                        // Address-only view; callers cast back through
                        // `Signature` to call it.
                        return ::std::option::Option::Some(unsafe {
                            ::std::mem::transmute::<Signature, $crate::CFuncPtr>(
                                TRAMPOLINES[index],
                            )
                        });
                    }
                }
                ::std::option::Option::None
            }

            /// Release the slot bound to `func_id`.
            pub fn free(func_id: i32) {
                for slot in SLOTS.iter() {
                    if slot.release_if(func_id) {
                        return;
                    }
                }
            }

            /// Bound func id of every slot, in pool order (0 = free).
            pub fn slot_func_ids() -> ::std::vec::Vec<i32> {
                SLOTS.iter().map(|slot| slot.func_id()).collect()
            }
        }
    };
}

//! Command dispatch.
//!
//! Every callable function is a *stub*: a uniform closure that checks its
//! argument count, decodes argument handles, invokes the target, and
//! registers the typed result. Stubs live in a [`Registry`] indexed by the
//! non-negative function id the host uses in commands; two ids are
//! reserved and handled by the dispatcher itself:
//!
//! - `-2` (`getFunc`): register the raw address of a registered function
//!   under the `ret` handle, so it can be passed where C expects a
//!   function pointer.
//! - `-1` (`$errorIf`): fail when the int32 argument is nonzero, aborting
//!   the rest of the batch.
//!
//! The [`CallContext`] passed to each stub carries the handle table, the
//! request view, and the queue/sink pair callbacks need, and provides the
//! typed accessors stubs decode arguments and register results through.

use crate::host::MessageSink;
use crate::request::Request;
use crate::run::RetainSet;
use cbind_core::{
    BridgeError, BridgeResult, CFuncPtr, FreeFuncFn, Handle, HandleTable, MessageQueue, VarArg,
    Variant,
};
use std::sync::Arc;

/// Reserved function id for `getFunc`.
pub const GET_FUNC_ID: i32 = -2;

/// Reserved function id for `$errorIf`.
pub const ERROR_IF_ID: i32 = -1;

/// Most integer-class extras a variadic call accepts.
pub const MAX_INT_VARARGS: usize = 4;

/// Most double-class extras a variadic call accepts.
pub const MAX_DBL_VARARGS: usize = 2;

/// Allocator for a callback trampoline of one signature.
pub type CallbackAllocFn = fn(i32, &MessageQueue, &Arc<dyn MessageSink>) -> Option<CFuncPtr>;

/// Uniform stub shape: decode arguments, invoke, register the result.
pub type StubFn = Box<dyn Fn(&mut CallContext<'_>) -> BridgeResult<()> + Send + Sync>;

struct RegistryEntry {
    stub: StubFn,
    addr: Option<CFuncPtr>,
}

/// Closed-world table of callable functions, indexed by function id.
#[derive(Default)]
pub struct Registry {
    entries: Vec<RegistryEntry>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stub. Returns the function id the host uses to call it.
    pub fn register<F>(&mut self, stub: F) -> i32
    where
        F: Fn(&mut CallContext<'_>) -> BridgeResult<()> + Send + Sync + 'static,
    {
        self.entries.push(RegistryEntry {
            stub: Box::new(stub),
            addr: None,
        });
        (self.entries.len() - 1) as i32
    }

    /// Register a stub together with the raw address `getFunc` should hand
    /// out for it.
    pub fn register_with_addr<F>(&mut self, stub: F, addr: CFuncPtr) -> i32
    where
        F: Fn(&mut CallContext<'_>) -> BridgeResult<()> + Send + Sync + 'static,
    {
        let id = self.register(stub);
        self.entries[id as usize].addr = Some(addr);
        id
    }

    /// Number of registered (non-reserved) functions.
    pub fn function_count(&self) -> usize {
        self.entries.len()
    }

    /// Raw address of the function with the given id, if it has one.
    pub fn addr(&self, id: i32) -> Option<CFuncPtr> {
        usize::try_from(id)
            .ok()
            .and_then(|idx| self.entries.get(idx))
            .and_then(|entry| entry.addr)
    }

    /// Run the command `ctx` points at.
    pub fn run_command(&self, ctx: &mut CallContext<'_>) -> BridgeResult<()> {
        let function_id = ctx.function_id()?;
        match function_id {
            GET_FUNC_ID => self.run_get_func(ctx),
            ERROR_IF_ID => run_error_if(ctx),
            id if id >= 0 && (id as usize) < self.entries.len() => {
                (self.entries[id as usize].stub)(ctx)
            }
            id => Err(BridgeError::FunctionIdOutOfRange {
                id,
                count: self.entries.len(),
            }),
        }
    }

    fn run_get_func(&self, ctx: &mut CallContext<'_>) -> BridgeResult<()> {
        ctx.check_arg_count(1)?;
        let id = ctx.arg_int32(0)?;
        let addr = self.addr(id).ok_or(BridgeError::FunctionIdOutOfRange {
            id,
            count: self.entries.len(),
        })?;
        ctx.register_ret_funcp(addr)
    }
}

/// Stub for a function whose signature the bridge cannot marshal
/// (records by value, C arrays, `va_list`). The failure happens at
/// dispatch time, when the host actually calls it.
pub fn unsupported_stub(
    kind: &'static str,
) -> impl Fn(&mut CallContext<'_>) -> BridgeResult<()> + Send + Sync + 'static {
    move |_ctx| Err(BridgeError::UnsupportedType(kind.to_string()))
}

fn run_error_if(ctx: &mut CallContext<'_>) -> BridgeResult<()> {
    ctx.check_arg_count(1)?;
    let flag = ctx.arg_int32(0)?;
    if flag != 0 {
        Err(BridgeError::ProtocolError("error flag was nonzero".into()))
    } else {
        Ok(())
    }
}

/// Per-command view handed to a stub.
pub struct CallContext<'a> {
    table: &'a mut HandleTable,
    retained: &'a mut RetainSet,
    queue: &'a MessageQueue,
    sink: &'a Arc<dyn MessageSink>,
    request: &'a Request,
    command_index: usize,
}

macro_rules! typed_arg {
    ($($(#[$meta:meta])* $fn_name:ident => $get:ident -> $ty:ty),* $(,)?) => {
        $(
            $(#[$meta])*
            pub fn $fn_name(&self, index: usize) -> BridgeResult<$ty> {
                self.table.$get(self.arg_handle(index)?)
            }
        )*
    };
}

macro_rules! typed_ret {
    ($($(#[$meta:meta])* $fn_name:ident => $reg:ident($ty:ty)),* $(,)?) => {
        $(
            $(#[$meta])*
            pub fn $fn_name(&mut self, value: $ty) -> BridgeResult<()> {
                let ret = self.ret_handle()?;
                self.table.$reg(ret, value)
            }
        )*
    };
}

impl<'a> CallContext<'a> {
    /// Build the context for one command of a request.
    pub fn new(
        table: &'a mut HandleTable,
        retained: &'a mut RetainSet,
        queue: &'a MessageQueue,
        sink: &'a Arc<dyn MessageSink>,
        request: &'a Request,
        command_index: usize,
    ) -> Self {
        Self {
            table,
            retained,
            queue,
            sink,
            request,
            command_index,
        }
    }

    /// The handle table.
    pub fn table(&mut self) -> &mut HandleTable {
        self.table
    }

    /// The engine's retain set, backing `varAddRef`/`varRelease`.
    pub fn retained(&mut self) -> &mut RetainSet {
        self.retained
    }

    /// The request queue, for callback allocation.
    pub fn queue(&self) -> &MessageQueue {
        self.queue
    }

    /// The outbound message sink, for callback allocation.
    pub fn sink(&self) -> &Arc<dyn MessageSink> {
        self.sink
    }

    /// Function id of the current command.
    pub fn function_id(&self) -> BridgeResult<i32> {
        self.request.command_function(self.command_index)
    }

    /// Number of argument handles in the current command.
    pub fn arg_count(&self) -> BridgeResult<usize> {
        self.request.command_arg_count(self.command_index)
    }

    /// Fail unless the command has exactly `expected` arguments.
    ///
    /// Stubs call this before reading any handle.
    pub fn check_arg_count(&self, expected: usize) -> BridgeResult<()> {
        let actual = self.arg_count()?;
        if actual != expected {
            return Err(BridgeError::ArgCountMismatch { expected, actual });
        }
        Ok(())
    }

    /// Fail unless the command has at least `expected` arguments
    /// (variadic stubs).
    pub fn check_min_arg_count(&self, expected: usize) -> BridgeResult<()> {
        let actual = self.arg_count()?;
        if actual < expected {
            return Err(BridgeError::ArgCountMismatch { expected, actual });
        }
        Ok(())
    }

    /// Argument handle at `index`.
    pub fn arg_handle(&self, index: usize) -> BridgeResult<Handle> {
        self.request.command_arg(self.command_index, index)
    }

    typed_arg! {
        /// Argument at `index` as int8.
        arg_int8 => get_int8 -> i8,
        /// Argument at `index` as uint8.
        arg_uint8 => get_uint8 -> u8,
        /// Argument at `index` as int16.
        arg_int16 => get_int16 -> i16,
        /// Argument at `index` as uint16.
        arg_uint16 => get_uint16 -> u16,
        /// Argument at `index` as int32.
        arg_int32 => get_int32 -> i32,
        /// Argument at `index` as uint32.
        arg_uint32 => get_uint32 -> u32,
        /// Argument at `index` as int64.
        arg_int64 => get_int64 -> i64,
        /// Argument at `index` as uint64.
        arg_uint64 => get_uint64 -> u64,
        /// Argument at `index` as float32.
        arg_float => get_float -> f32,
        /// Argument at `index` as float64.
        arg_double => get_double -> f64,
        /// Argument at `index` as a raw pointer.
        arg_voidp => get_voidp -> *mut std::os::raw::c_void,
        /// Argument at `index` as a C string pointer.
        arg_charp => get_charp -> *mut std::os::raw::c_char,
        /// Argument at `index` as a dynamic value (new reference).
        arg_var => get_var -> Variant,
        /// Argument at `index` as a host function id.
        arg_func_id => get_func_id -> i32,
    }

    /// Argument at `index` as a callable code pointer.
    ///
    /// A funcptr-tagged handle is returned as-is. A func-id-tagged handle
    /// names a host function: a trampoline of the matching signature is
    /// allocated for it and the handle is augmented so that destroying it
    /// frees the slot again.
    pub fn arg_code_ptr(
        &mut self,
        index: usize,
        alloc: CallbackAllocFn,
        free: FreeFuncFn,
    ) -> BridgeResult<CFuncPtr> {
        let handle = self.arg_handle(index)?;
        match self.table.get_funcp(handle) {
            Ok(ptr) => Ok(ptr),
            Err(BridgeError::TypeMismatch { .. }) => {
                let func_id = self.table.get_func_id(handle)?;
                let ptr = alloc(func_id, self.queue, self.sink).ok_or_else(|| {
                    BridgeError::AllocationFailed(format!(
                        "no free callback slot for function id {}",
                        func_id
                    ))
                })?;
                self.table.set_func_id_free(handle, free)?;
                Ok(ptr)
            }
            Err(err) => Err(err),
        }
    }

    /// Collect trailing arguments for a variadic call, split into the
    /// integer and double classes with C default promotion applied.
    pub fn collect_varargs(&self, fixed: usize) -> BridgeResult<(Vec<i64>, Vec<f64>)> {
        let count = self.arg_count()?;
        let mut iargs = Vec::new();
        let mut dargs = Vec::new();
        for index in fixed..count {
            match self.table.get_default(self.arg_handle(index)?)? {
                VarArg::Int(value) => {
                    if iargs.len() == MAX_INT_VARARGS {
                        return Err(BridgeError::ProtocolError(format!(
                            "more than {} integer-class variadic arguments",
                            MAX_INT_VARARGS
                        )));
                    }
                    iargs.push(value);
                }
                VarArg::Dbl(value) => {
                    if dargs.len() == MAX_DBL_VARARGS {
                        return Err(BridgeError::ProtocolError(format!(
                            "more than {} double-class variadic arguments",
                            MAX_DBL_VARARGS
                        )));
                    }
                    dargs.push(value);
                }
            }
        }
        Ok((iargs, dargs))
    }

    /// True when the current command names a return handle.
    pub fn has_ret(&self) -> bool {
        self.request.command_has_ret(self.command_index)
    }

    /// Return handle of the current command. Failing here is how a stub
    /// for a non-void function rejects a command without a `ret`.
    pub fn ret_handle(&self) -> BridgeResult<Handle> {
        if !self.has_ret() {
            return Err(BridgeError::ProtocolError(
                "return type is non-void, but no return handle given".into(),
            ));
        }
        self.request.command_ret(self.command_index)
    }

    typed_ret! {
        /// Register the result as int8.
        register_ret_int8 => register_int8(i8),
        /// Register the result as uint8.
        register_ret_uint8 => register_uint8(u8),
        /// Register the result as int16.
        register_ret_int16 => register_int16(i16),
        /// Register the result as uint16.
        register_ret_uint16 => register_uint16(u16),
        /// Register the result as int32.
        register_ret_int32 => register_int32(i32),
        /// Register the result as uint32.
        register_ret_uint32 => register_uint32(u32),
        /// Register the result as int64.
        register_ret_int64 => register_int64(i64),
        /// Register the result as uint64.
        register_ret_uint64 => register_uint64(u64),
        /// Register the result as float32.
        register_ret_float => register_float(f32),
        /// Register the result as float64.
        register_ret_double => register_double(f64),
        /// Register the result as a raw pointer.
        register_ret_voidp => register_voidp(*mut std::os::raw::c_void),
        /// Register the result as a C function pointer.
        register_ret_funcp => register_funcp(CFuncPtr),
        /// Register the result as a dynamic value.
        register_ret_var => register_var(Variant),
    }
}

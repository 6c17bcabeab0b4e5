//! Handle table: integer ids mapped to typed native slots.
//!
//! The host never sees native values directly; it names them through
//! non-zero 32-bit handles that it assigns itself. Each live handle carries
//! exactly one tagged value. Reads are tag-checked, with a small widening
//! table (8/16-bit integers read as 32-bit, same-width sign flips, float
//! read as double); everything else is a type mismatch. Pointer tags never
//! interconvert with integer tags.
//!
//! The table is owned and mutated by the worker thread only; raw pointers
//! stored here are dereferenced nowhere else.

use crate::error::{BridgeError, BridgeResult};
use crate::variant::Variant;
use rustc_hash::FxHashMap;
use std::os::raw::{c_char, c_void};

/// Host-assigned identifier for a typed slot. Zero is never valid.
pub type Handle = i32;

/// Address-only view of a C function, as registered by `getFunc`.
pub type CFuncPtr = unsafe extern "C" fn();

/// Deallocator invoked when a func-id handle backed by a callback slot is
/// destroyed. Receives the func id whose slot should be released.
pub type FreeFuncFn = fn(i32);

/// Tagged value stored in the table.
#[derive(Debug, Clone)]
pub enum HandleValue {
    /// 8-bit signed integer
    Int8(i8),
    /// 8-bit unsigned integer
    Uint8(u8),
    /// 16-bit signed integer
    Int16(i16),
    /// 16-bit unsigned integer
    Uint16(u16),
    /// 32-bit signed integer
    Int32(i32),
    /// 32-bit unsigned integer
    Uint32(u32),
    /// 64-bit signed integer
    Int64(i64),
    /// 64-bit unsigned integer
    Uint64(u64),
    /// 32-bit float
    Float(f32),
    /// 64-bit float
    Double(f64),
    /// Raw pointer
    VoidPtr(*mut c_void),
    /// C function pointer
    FuncPtr(CFuncPtr),
    /// Dynamic value; the entry owns one reference
    Var(Variant),
    /// Host-side function identifier
    FuncId(i32),
}

// Raw pointers make this !Send by default. Entries only travel inside the
// engine, and the worker thread is the sole place they are dereferenced.
unsafe impl Send for HandleValue {}

impl HandleValue {
    /// Tag name, as used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            HandleValue::Int8(_) => "int8",
            HandleValue::Uint8(_) => "uint8",
            HandleValue::Int16(_) => "int16",
            HandleValue::Uint16(_) => "uint16",
            HandleValue::Int32(_) => "int32",
            HandleValue::Uint32(_) => "uint32",
            HandleValue::Int64(_) => "int64",
            HandleValue::Uint64(_) => "uint64",
            HandleValue::Float(_) => "float32",
            HandleValue::Double(_) => "float64",
            HandleValue::VoidPtr(_) => "void*",
            HandleValue::FuncPtr(_) => "void(*)(void)",
            HandleValue::Var(_) => "var",
            HandleValue::FuncId(_) => "function",
        }
    }
}

/// Integer/double classification used when a handle feeds a variadic call.
///
/// Follows C default argument promotion: sub-32-bit integers widen, `float`
/// promotes to `double`, and pointers travel in the integer class.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VarArg {
    /// Integer-class argument (integers and pointers)
    Int(i64),
    /// Double-class argument (floats)
    Dbl(f64),
}

#[derive(Debug)]
struct HandleEntry {
    value: HandleValue,
    free_func: Option<FreeFuncFn>,
}

/// Map of live handles.
///
/// Register fails on a duplicate or zero handle; get respects the widening
/// table; destroy drops the entry, releasing a Var reference or running the
/// func-id free callback as appropriate.
#[derive(Debug, Default)]
pub struct HandleTable {
    entries: FxHashMap<Handle, HandleEntry>,
}

macro_rules! typed_register {
    ($($(#[$meta:meta])* $fn_name:ident => $tag:ident($ty:ty)),* $(,)?) => {
        $(
            $(#[$meta])*
            pub fn $fn_name(&mut self, handle: Handle, value: $ty) -> BridgeResult<()> {
                self.register(handle, HandleValue::$tag(value))
            }
        )*
    };
}

impl HandleTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `value` under `handle`. Fails when the handle is zero or
    /// already live.
    pub fn register(&mut self, handle: Handle, value: HandleValue) -> BridgeResult<()> {
        if handle == 0 {
            return Err(BridgeError::ProtocolError("handle 0 is reserved".into()));
        }
        if self.entries.contains_key(&handle) {
            return Err(BridgeError::ProtocolError(format!(
                "handle {} is already registered",
                handle
            )));
        }
        self.entries.insert(
            handle,
            HandleEntry {
                value,
                free_func: None,
            },
        );
        Ok(())
    }

    typed_register! {
        /// Register an int8 slot.
        register_int8 => Int8(i8),
        /// Register a uint8 slot.
        register_uint8 => Uint8(u8),
        /// Register an int16 slot.
        register_int16 => Int16(i16),
        /// Register a uint16 slot.
        register_uint16 => Uint16(u16),
        /// Register an int32 slot.
        register_int32 => Int32(i32),
        /// Register a uint32 slot.
        register_uint32 => Uint32(u32),
        /// Register an int64 slot.
        register_int64 => Int64(i64),
        /// Register a uint64 slot.
        register_uint64 => Uint64(u64),
        /// Register a float32 slot.
        register_float => Float(f32),
        /// Register a float64 slot.
        register_double => Double(f64),
        /// Register a raw pointer slot.
        register_voidp => VoidPtr(*mut c_void),
        /// Register a C function pointer slot.
        register_funcp => FuncPtr(CFuncPtr),
        /// Register a dynamic value slot; the entry takes one reference.
        register_var => Var(Variant),
        /// Register a host function id slot.
        register_func_id => FuncId(i32),
    }

    fn entry(&self, handle: Handle) -> BridgeResult<&HandleEntry> {
        self.entries
            .get(&handle)
            .ok_or(BridgeError::HandleLookupFailed(handle))
    }

    fn mismatch(expected: &'static str, value: &HandleValue) -> BridgeError {
        BridgeError::TypeMismatch {
            expected,
            got: value.type_name(),
        }
    }

    /// Read as int8. Same-width sign flips are bitcast.
    pub fn get_int8(&self, handle: Handle) -> BridgeResult<i8> {
        match self.entry(handle)?.value {
            HandleValue::Int8(v) => Ok(v),
            HandleValue::Uint8(v) => Ok(v as i8),
            ref v => Err(Self::mismatch("int8", v)),
        }
    }

    /// Read as uint8.
    pub fn get_uint8(&self, handle: Handle) -> BridgeResult<u8> {
        match self.entry(handle)?.value {
            HandleValue::Uint8(v) => Ok(v),
            HandleValue::Int8(v) => Ok(v as u8),
            ref v => Err(Self::mismatch("uint8", v)),
        }
    }

    /// Read as int16.
    pub fn get_int16(&self, handle: Handle) -> BridgeResult<i16> {
        match self.entry(handle)?.value {
            HandleValue::Int16(v) => Ok(v),
            HandleValue::Uint16(v) => Ok(v as i16),
            ref v => Err(Self::mismatch("int16", v)),
        }
    }

    /// Read as uint16.
    pub fn get_uint16(&self, handle: Handle) -> BridgeResult<u16> {
        match self.entry(handle)?.value {
            HandleValue::Uint16(v) => Ok(v),
            HandleValue::Int16(v) => Ok(v as u16),
            ref v => Err(Self::mismatch("uint16", v)),
        }
    }

    /// Read as int32. Narrow integers widen (sign- or zero-extended by
    /// their own signedness); uint32 is bitcast.
    pub fn get_int32(&self, handle: Handle) -> BridgeResult<i32> {
        match self.entry(handle)?.value {
            HandleValue::Int32(v) => Ok(v),
            HandleValue::Uint32(v) => Ok(v as i32),
            HandleValue::Int8(v) => Ok(v as i32),
            HandleValue::Uint8(v) => Ok(v as i32),
            HandleValue::Int16(v) => Ok(v as i32),
            HandleValue::Uint16(v) => Ok(v as i32),
            ref v => Err(Self::mismatch("int32", v)),
        }
    }

    /// Read as uint32. Narrow integers widen first, then bitcast.
    pub fn get_uint32(&self, handle: Handle) -> BridgeResult<u32> {
        match self.entry(handle)?.value {
            HandleValue::Uint32(v) => Ok(v),
            HandleValue::Int32(v) => Ok(v as u32),
            HandleValue::Int8(v) => Ok(v as i32 as u32),
            HandleValue::Uint8(v) => Ok(v as u32),
            HandleValue::Int16(v) => Ok(v as i32 as u32),
            HandleValue::Uint16(v) => Ok(v as u32),
            ref v => Err(Self::mismatch("uint32", v)),
        }
    }

    /// Read as int64. Only 64-bit tags qualify.
    pub fn get_int64(&self, handle: Handle) -> BridgeResult<i64> {
        match self.entry(handle)?.value {
            HandleValue::Int64(v) => Ok(v),
            HandleValue::Uint64(v) => Ok(v as i64),
            ref v => Err(Self::mismatch("int64", v)),
        }
    }

    /// Read as uint64.
    pub fn get_uint64(&self, handle: Handle) -> BridgeResult<u64> {
        match self.entry(handle)?.value {
            HandleValue::Uint64(v) => Ok(v),
            HandleValue::Int64(v) => Ok(v as u64),
            ref v => Err(Self::mismatch("uint64", v)),
        }
    }

    /// Read as float32. No widening applies.
    pub fn get_float(&self, handle: Handle) -> BridgeResult<f32> {
        match self.entry(handle)?.value {
            HandleValue::Float(v) => Ok(v),
            ref v => Err(Self::mismatch("float32", v)),
        }
    }

    /// Read as float64. Accepts float32, widened.
    pub fn get_double(&self, handle: Handle) -> BridgeResult<f64> {
        match self.entry(handle)?.value {
            HandleValue::Double(v) => Ok(v),
            HandleValue::Float(v) => Ok(v as f64),
            ref v => Err(Self::mismatch("float64", v)),
        }
    }

    /// Read as a raw pointer. Pointer tags never interconvert with integers.
    pub fn get_voidp(&self, handle: Handle) -> BridgeResult<*mut c_void> {
        match self.entry(handle)?.value {
            HandleValue::VoidPtr(p) => Ok(p),
            ref v => Err(Self::mismatch("void*", v)),
        }
    }

    /// Read as a C string pointer (a pointer slot viewed as `char*`).
    pub fn get_charp(&self, handle: Handle) -> BridgeResult<*mut c_char> {
        Ok(self.get_voidp(handle)? as *mut c_char)
    }

    /// Read as a C function pointer.
    pub fn get_funcp(&self, handle: Handle) -> BridgeResult<CFuncPtr> {
        match self.entry(handle)?.value {
            HandleValue::FuncPtr(p) => Ok(p),
            ref v => Err(Self::mismatch("void(*)(void)", v)),
        }
    }

    /// Read as a dynamic value. Returns a new reference.
    pub fn get_var(&self, handle: Handle) -> BridgeResult<Variant> {
        match self.entry(handle)?.value {
            HandleValue::Var(ref v) => Ok(v.clone()),
            ref v => Err(Self::mismatch("var", v)),
        }
    }

    /// Read as a host function id.
    pub fn get_func_id(&self, handle: Handle) -> BridgeResult<i32> {
        match self.entry(handle)?.value {
            HandleValue::FuncId(id) => Ok(id),
            ref v => Err(Self::mismatch("function", v)),
        }
    }

    /// The tagged value of a live handle, for callers that branch on the
    /// current tag (response encoding does).
    pub fn value(&self, handle: Handle) -> BridgeResult<&HandleValue> {
        self.entry(handle).map(|entry| &entry.value)
    }

    /// Read with C default argument promotion, for variadic calls.
    pub fn get_default(&self, handle: Handle) -> BridgeResult<VarArg> {
        match self.entry(handle)?.value {
            HandleValue::Int8(v) => Ok(VarArg::Int(v as i64)),
            HandleValue::Uint8(v) => Ok(VarArg::Int(v as i64)),
            HandleValue::Int16(v) => Ok(VarArg::Int(v as i64)),
            HandleValue::Uint16(v) => Ok(VarArg::Int(v as i64)),
            HandleValue::Int32(v) => Ok(VarArg::Int(v as i64)),
            HandleValue::Uint32(v) => Ok(VarArg::Int(v as i64)),
            HandleValue::Int64(v) => Ok(VarArg::Int(v)),
            HandleValue::Uint64(v) => Ok(VarArg::Int(v as i64)),
            HandleValue::Float(v) => Ok(VarArg::Dbl(v as f64)),
            HandleValue::Double(v) => Ok(VarArg::Dbl(v)),
            HandleValue::VoidPtr(p) => Ok(VarArg::Int(p as i64)),
            HandleValue::FuncPtr(p) => Ok(VarArg::Int(p as usize as i64)),
            ref v => Err(BridgeError::UnsupportedType(format!(
                "{} as a variadic argument",
                v.type_name()
            ))),
        }
    }

    /// Attach the slot deallocator for a func-id handle. When the handle is
    /// destroyed, `free_func` runs with the stored func id.
    pub fn set_func_id_free(&mut self, handle: Handle, free_func: FreeFuncFn) -> BridgeResult<()> {
        let entry = self
            .entries
            .get_mut(&handle)
            .ok_or(BridgeError::HandleLookupFailed(handle))?;
        match entry.value {
            HandleValue::FuncId(_) => {
                entry.free_func = Some(free_func);
                Ok(())
            }
            ref v => Err(Self::mismatch("function", v)),
        }
    }

    /// Destroy a handle. Var entries release their reference; func-id
    /// entries run their free callback, if any. Destroying an unregistered
    /// handle is an error with no side effect.
    pub fn destroy(&mut self, handle: Handle) -> BridgeResult<()> {
        let entry = self
            .entries
            .remove(&handle)
            .ok_or(BridgeError::HandleLookupFailed(handle))?;
        if let HandleValue::FuncId(func_id) = entry.value {
            if let Some(free_func) = entry.free_func {
                free_func(func_id);
            }
        }
        Ok(())
    }

    /// Destroy every handle in `handles`, reporting the first failure after
    /// attempting them all.
    pub fn destroy_many(&mut self, handles: &[Handle]) -> BridgeResult<()> {
        let mut first_err = None;
        for &handle in handles {
            if let Err(err) = self.destroy(handle) {
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Number of live handles. The test harness asserts this is zero at
    /// teardown.
    pub fn live_count(&self) -> usize {
        self.entries.len()
    }

    /// Drop every entry, releasing Var references. Free callbacks do not
    /// run; this is the teardown path, after the slots are already gone.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

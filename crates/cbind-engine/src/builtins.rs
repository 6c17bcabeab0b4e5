//! Builtin command suite.
//!
//! These are the functions every embedding gets for free: typed memory
//! loads and stores, pointer and numeric arithmetic, comparisons, the
//! malloc family, and the dynamic-value (Var) operations for strings,
//! arrays, array buffers, and dictionaries. Each builtin is registered as
//! an ordinary function id; nothing here is reserved.
//!
//! [`register_builtins`] installs the whole suite and returns the
//! name → id map the embedding hands to its host-side glue.

use crate::dispatch::{CallContext, Registry};
use cbind_core::{BridgeError, BridgeResult, VarArray, VarBuffer, VarDict, Variant};
use rustc_hash::FxHashMap;
use std::os::raw::{c_char, c_void};

/// Function ids assigned to the builtin suite, keyed by builtin name.
#[derive(Debug, Default)]
pub struct BuiltinIds {
    ids: FxHashMap<&'static str, i32>,
}

impl BuiltinIds {
    fn insert(&mut self, name: &'static str, id: i32) {
        let previous = self.ids.insert(name, id);
        debug_assert!(previous.is_none(), "duplicate builtin {}", name);
    }

    /// Function id of the named builtin.
    pub fn get(&self, name: &str) -> Option<i32> {
        self.ids.get(name).copied()
    }

    /// Number of registered builtins.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// True when no builtins are registered.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Register the full builtin suite into `registry`.
pub fn register_builtins(registry: &mut Registry) -> BuiltinIds {
    let mut ids = BuiltinIds::default();
    register_memory(registry, &mut ids);
    register_arithmetic(registry, &mut ids);
    register_comparisons(registry, &mut ids);
    register_allocation(registry, &mut ids);
    register_var(registry, &mut ids);
    register_array(registry, &mut ids);
    register_array_buffer(registry, &mut ids);
    register_dict(registry, &mut ids);
    ids
}

macro_rules! register_mem {
    ($registry:ident, $ids:ident,
     $($get_name:literal, $set_name:literal => $ty:ty, $arg:ident, $ret:ident);* $(;)?) => {
        $(
            let id = $registry.register(|ctx| {
                ctx.check_arg_count(1)?;
                let ptr = ctx.arg_voidp(0)? as *const $ty;
                let value = unsafe { ptr.read_unaligned() };
                ctx.$ret(value)
            });
            $ids.insert($get_name, id);

            let id = $registry.register(|ctx| {
                ctx.check_arg_count(2)?;
                let ptr = ctx.arg_voidp(0)? as *mut $ty;
                let value = ctx.$arg(1)? as $ty;
                unsafe {
                    ptr.write_unaligned(value);
                }
                Ok(())
            });
            $ids.insert($set_name, id);
        )*
    };
}

fn register_memory(registry: &mut Registry, ids: &mut BuiltinIds) {
    register_mem! {
        registry, ids,
        "get_void_p", "set_void_p" => *mut c_void, arg_voidp, register_ret_voidp;
        "get_int8", "set_int8" => i8, arg_int32, register_ret_int8;
        "get_uint8", "set_uint8" => u8, arg_uint32, register_ret_uint8;
        "get_int16", "set_int16" => i16, arg_int32, register_ret_int16;
        "get_uint16", "set_uint16" => u16, arg_uint32, register_ret_uint16;
        "get_int32", "set_int32" => i32, arg_int32, register_ret_int32;
        "get_uint32", "set_uint32" => u32, arg_uint32, register_ret_uint32;
        "get_int64", "set_int64" => i64, arg_int64, register_ret_int64;
        "get_uint64", "set_uint64" => u64, arg_uint64, register_ret_uint64;
        "get_float32", "set_float32" => f32, arg_float, register_ret_float;
        "get_float64", "set_float64" => f64, arg_double, register_ret_double;
    }
}

macro_rules! register_int_arith {
    ($registry:ident, $ids:ident,
     $($ty_tag:literal => $arg:ident, $ret:ident);* $(;)?) => {
        $(
            let id = $registry.register(|ctx| {
                ctx.check_arg_count(2)?;
                let a = ctx.$arg(0)?;
                let b = ctx.$arg(1)?;
                ctx.$ret(a.wrapping_add(b))
            });
            $ids.insert(concat!("add_", $ty_tag), id);

            let id = $registry.register(|ctx| {
                ctx.check_arg_count(2)?;
                let a = ctx.$arg(0)?;
                let b = ctx.$arg(1)?;
                ctx.$ret(a.wrapping_sub(b))
            });
            $ids.insert(concat!("sub_", $ty_tag), id);
        )*
    };
}

fn register_arithmetic(registry: &mut Registry, ids: &mut BuiltinIds) {
    // Pointer arithmetic is byte-granular, like C's void* extension.
    let id = registry.register(|ctx| {
        ctx.check_arg_count(2)?;
        let base = ctx.arg_voidp(0)? as isize;
        let offset = ctx.arg_int32(1)? as isize;
        ctx.register_ret_voidp(base.wrapping_add(offset) as *mut c_void)
    });
    ids.insert("add_void_p", id);

    let id = registry.register(|ctx| {
        ctx.check_arg_count(2)?;
        let base = ctx.arg_voidp(0)? as isize;
        let offset = ctx.arg_int32(1)? as isize;
        ctx.register_ret_voidp(base.wrapping_sub(offset) as *mut c_void)
    });
    ids.insert("sub_void_p", id);

    register_int_arith! {
        registry, ids,
        "int32" => arg_int32, register_ret_int32;
        "uint32" => arg_uint32, register_ret_uint32;
        "int64" => arg_int64, register_ret_int64;
        "uint64" => arg_uint64, register_ret_uint64;
    }

    let id = registry.register(|ctx| {
        ctx.check_arg_count(2)?;
        let a = ctx.arg_double(0)?;
        let b = ctx.arg_double(1)?;
        ctx.register_ret_double(a + b)
    });
    ids.insert("add_float64", id);

    let id = registry.register(|ctx| {
        ctx.check_arg_count(2)?;
        let a = ctx.arg_double(0)?;
        let b = ctx.arg_double(1)?;
        ctx.register_ret_double(a - b)
    });
    ids.insert("sub_float64", id);
}

macro_rules! register_cmp {
    ($registry:ident, $ids:ident, $ty_tag:literal, $arg:ident,
     $(($name:literal, $op:tt)),* $(,)?) => {
        $(
            let id = $registry.register(|ctx| {
                ctx.check_arg_count(2)?;
                let a = ctx.$arg(0)?;
                let b = ctx.$arg(1)?;
                ctx.register_ret_int32((a $op b) as i32)
            });
            $ids.insert(concat!($name, "_", $ty_tag), id);
        )*
    };
}

macro_rules! register_cmp_family {
    ($registry:ident, $ids:ident, $($ty_tag:literal => $arg:ident);* $(;)?) => {
        $(
            register_cmp! {
                $registry, $ids, $ty_tag, $arg,
                ("lt", <), ("lte", <=), ("gt", >), ("gte", >=), ("eq", ==), ("ne", !=),
            }
        )*
    };
}

fn register_comparisons(registry: &mut Registry, ids: &mut BuiltinIds) {
    register_cmp_family! {
        registry, ids,
        "int32" => arg_int32;
        "uint32" => arg_uint32;
        "int64" => arg_int64;
        "uint64" => arg_uint64;
        "float64" => arg_double;
    }

    let id = registry.register(|ctx| {
        ctx.check_arg_count(2)?;
        let a = ctx.arg_voidp(0)?;
        let b = ctx.arg_voidp(1)?;
        ctx.register_ret_int32((a == b) as i32)
    });
    ids.insert("eq_void_p", id);

    let id = registry.register(|ctx| {
        ctx.check_arg_count(2)?;
        let a = ctx.arg_voidp(0)?;
        let b = ctx.arg_voidp(1)?;
        ctx.register_ret_int32((a != b) as i32)
    });
    ids.insert("ne_void_p", id);
}

#[cfg(target_arch = "x86_64")]
unsafe fn call_variadic_snprintf(
    buf: *mut c_char,
    size: usize,
    fmt: *const c_char,
    iargs: &[i64],
    dargs: &[f64],
) -> BridgeResult<i32> {
    // The x86_64 SysV ABI retrieves integer- and double-class variadic
    // arguments from independent register sequences, so the double extras
    // can be appended after the integer extras without disturbing the
    // order the callee sees.
    let result = match (iargs.len(), dargs.len()) {
        (0, 0) => libc::snprintf(buf, size, fmt),
        (0, 1) => libc::snprintf(buf, size, fmt, dargs[0]),
        (0, 2) => libc::snprintf(buf, size, fmt, dargs[0], dargs[1]),
        (1, 0) => libc::snprintf(buf, size, fmt, iargs[0]),
        (1, 1) => libc::snprintf(buf, size, fmt, iargs[0], dargs[0]),
        (1, 2) => libc::snprintf(buf, size, fmt, iargs[0], dargs[0], dargs[1]),
        (2, 0) => libc::snprintf(buf, size, fmt, iargs[0], iargs[1]),
        (2, 1) => libc::snprintf(buf, size, fmt, iargs[0], iargs[1], dargs[0]),
        (2, 2) => libc::snprintf(buf, size, fmt, iargs[0], iargs[1], dargs[0], dargs[1]),
        (3, 0) => libc::snprintf(buf, size, fmt, iargs[0], iargs[1], iargs[2]),
        (3, 1) => libc::snprintf(buf, size, fmt, iargs[0], iargs[1], iargs[2], dargs[0]),
        (3, 2) => {
            libc::snprintf(buf, size, fmt, iargs[0], iargs[1], iargs[2], dargs[0], dargs[1])
        }
        (4, 0) => libc::snprintf(buf, size, fmt, iargs[0], iargs[1], iargs[2], iargs[3]),
        (4, 1) => {
            libc::snprintf(buf, size, fmt, iargs[0], iargs[1], iargs[2], iargs[3], dargs[0])
        }
        (4, 2) => libc::snprintf(
            buf,
            size,
            fmt,
            iargs[0],
            iargs[1],
            iargs[2],
            iargs[3],
            dargs[0],
            dargs[1],
        ),
        _ => {
            return Err(BridgeError::ProtocolError(
                "variadic argument count exceeds the unrolled matrix".into(),
            ))
        }
    };
    Ok(result)
}

fn register_allocation(registry: &mut Registry, ids: &mut BuiltinIds) {
    let id = registry.register(|ctx| {
        ctx.check_arg_count(1)?;
        let size = ctx.arg_uint32(0)? as usize;
        let ptr = unsafe { libc::malloc(size) };
        if ptr.is_null() && size != 0 {
            return Err(BridgeError::AllocationFailed(format!("malloc({})", size)));
        }
        ctx.register_ret_voidp(ptr)
    });
    ids.insert("malloc", id);

    let id = registry.register(|ctx| {
        ctx.check_arg_count(1)?;
        let ptr = ctx.arg_voidp(0)?;
        unsafe {
            libc::free(ptr);
        }
        Ok(())
    });
    ids.insert("free", id);

    let id = registry.register(|ctx| {
        ctx.check_arg_count(3)?;
        let ptr = ctx.arg_voidp(0)?;
        let value = ctx.arg_int32(1)?;
        let len = ctx.arg_uint32(2)? as usize;
        let result = unsafe { libc::memset(ptr, value, len) };
        ctx.register_ret_voidp(result)
    });
    ids.insert("memset", id);

    let id = registry.register(|ctx| {
        ctx.check_arg_count(3)?;
        let dst = ctx.arg_voidp(0)?;
        let src = ctx.arg_voidp(1)?;
        let len = ctx.arg_uint32(2)? as usize;
        let result = unsafe { libc::memcpy(dst, src, len) };
        ctx.register_ret_voidp(result)
    });
    ids.insert("memcpy", id);

    let id = registry.register(|ctx| {
        ctx.check_arg_count(1)?;
        let ptr = ctx.arg_charp(0)?;
        let len = unsafe { libc::strlen(ptr) };
        ctx.register_ret_uint32(len as u32)
    });
    ids.insert("strlen", id);

    let id = registry.register(|ctx| {
        ctx.check_arg_count(1)?;
        let ptr = ctx.arg_charp(0)?;
        let result = unsafe { libc::puts(ptr) };
        ctx.register_ret_int32(result)
    });
    ids.insert("puts", id);

    let id = registry.register(|ctx| {
        ctx.check_min_arg_count(3)?;
        let buf = ctx.arg_charp(0)?;
        let size = ctx.arg_uint32(1)? as usize;
        let fmt = ctx.arg_charp(2)?;
        let (iargs, dargs) = ctx.collect_varargs(3)?;
        #[cfg(target_arch = "x86_64")]
        {
            let result = unsafe { call_variadic_snprintf(buf, size, fmt, &iargs, &dargs)? };
            ctx.register_ret_int32(result)
        }
        #[cfg(not(target_arch = "x86_64"))]
        {
            let _ = (buf, size, fmt, iargs, dargs);
            Err(BridgeError::UnsupportedType(
                "variadic call on this target".into(),
            ))
        }
    });
    ids.insert("snprintf", id);
}

fn register_var(registry: &mut Registry, ids: &mut BuiltinIds) {
    let id = registry.register(|ctx| {
        ctx.check_arg_count(1)?;
        let var = ctx.arg_var(0)?;
        ctx.retained().retain(var);
        Ok(())
    });
    ids.insert("var_add_ref", id);

    let id = registry.register(|ctx| {
        ctx.check_arg_count(1)?;
        let var = ctx.arg_var(0)?;
        if !ctx.retained().release(&var) {
            tracing::warn!("release without a matching add_ref");
        }
        Ok(())
    });
    ids.insert("var_release", id);

    let id = registry.register(|ctx| {
        ctx.check_arg_count(2)?;
        let ptr = ctx.arg_voidp(0)? as *const u8;
        let len = ctx.arg_uint32(1)? as usize;
        let bytes = unsafe { std::slice::from_raw_parts(ptr, len) };
        let text = std::str::from_utf8(bytes)
            .map_err(|err| BridgeError::ProtocolError(format!("invalid UTF-8: {}", err)))?;
        ctx.register_ret_var(Variant::from_utf8(text))
    });
    ids.insert("var_from_utf8", id);

    let id = registry.register(|ctx| {
        ctx.check_arg_count(2)?;
        let var = ctx.arg_var(0)?;
        let len_out = ctx.arg_voidp(1)? as *mut u32;
        let text = var.as_str().ok_or(BridgeError::TypeMismatch {
            expected: "string",
            got: var.type_name(),
        })?;

        // Hand back a NUL-terminated malloc'd copy the host frees later.
        let copy = unsafe { libc::malloc(text.len() + 1) as *mut u8 };
        if copy.is_null() {
            return Err(BridgeError::AllocationFailed(format!(
                "malloc({})",
                text.len() + 1
            )));
        }
        unsafe {
            std::ptr::copy_nonoverlapping(text.as_ptr(), copy, text.len());
            *copy.add(text.len()) = 0;
            if !len_out.is_null() {
                *len_out = text.len() as u32;
            }
        }
        ctx.register_ret_voidp(copy as *mut c_void)
    });
    ids.insert("var_to_utf8", id);
}

fn arg_array(ctx: &CallContext<'_>, index: usize) -> BridgeResult<VarArray> {
    let var = ctx.arg_var(index)?;
    match var {
        Variant::Array(arr) => Ok(arr),
        other => Err(BridgeError::TypeMismatch {
            expected: "array",
            got: other.type_name(),
        }),
    }
}

fn arg_buffer(ctx: &CallContext<'_>, index: usize) -> BridgeResult<VarBuffer> {
    let var = ctx.arg_var(index)?;
    match var {
        Variant::ArrayBuffer(buf) => Ok(buf),
        other => Err(BridgeError::TypeMismatch {
            expected: "arraybuffer",
            got: other.type_name(),
        }),
    }
}

fn arg_dict(ctx: &CallContext<'_>, index: usize) -> BridgeResult<VarDict> {
    let var = ctx.arg_var(index)?;
    match var {
        Variant::Dictionary(dict) => Ok(dict),
        other => Err(BridgeError::TypeMismatch {
            expected: "dictionary",
            got: other.type_name(),
        }),
    }
}

fn arg_string_key(ctx: &CallContext<'_>, index: usize) -> BridgeResult<String> {
    let var = ctx.arg_var(index)?;
    match var.as_str() {
        Some(key) => Ok(key.to_owned()),
        None => Err(BridgeError::TypeMismatch {
            expected: "string",
            got: var.type_name(),
        }),
    }
}

fn register_array(registry: &mut Registry, ids: &mut BuiltinIds) {
    let id = registry.register(|ctx| {
        ctx.check_arg_count(0)?;
        ctx.register_ret_var(Variant::Array(VarArray::new()))
    });
    ids.insert("array_create", id);

    let id = registry.register(|ctx| {
        ctx.check_arg_count(2)?;
        let arr = arg_array(ctx, 0)?;
        let index = ctx.arg_uint32(1)? as usize;
        ctx.register_ret_var(arr.get(index))
    });
    ids.insert("array_get", id);

    let id = registry.register(|ctx| {
        ctx.check_arg_count(3)?;
        let arr = arg_array(ctx, 0)?;
        let index = ctx.arg_uint32(1)? as usize;
        let value = ctx.arg_var(2)?;
        arr.set(index, value);
        ctx.register_ret_int32(1)
    });
    ids.insert("array_set", id);

    let id = registry.register(|ctx| {
        ctx.check_arg_count(1)?;
        let arr = arg_array(ctx, 0)?;
        ctx.register_ret_uint32(arr.len() as u32)
    });
    ids.insert("array_get_length", id);

    let id = registry.register(|ctx| {
        ctx.check_arg_count(2)?;
        let arr = arg_array(ctx, 0)?;
        let len = ctx.arg_uint32(1)? as usize;
        arr.set_len(len);
        ctx.register_ret_int32(1)
    });
    ids.insert("array_set_length", id);
}

fn register_array_buffer(registry: &mut Registry, ids: &mut BuiltinIds) {
    let id = registry.register(|ctx| {
        ctx.check_arg_count(1)?;
        let len = ctx.arg_uint32(0)? as usize;
        ctx.register_ret_var(Variant::ArrayBuffer(VarBuffer::new(len)))
    });
    ids.insert("array_buffer_create", id);

    let id = registry.register(|ctx| {
        ctx.check_arg_count(1)?;
        let buf = arg_buffer(ctx, 0)?;
        ctx.register_ret_uint32(buf.byte_length() as u32)
    });
    ids.insert("array_buffer_byte_length", id);

    let id = registry.register(|ctx| {
        ctx.check_arg_count(1)?;
        let buf = arg_buffer(ctx, 0)?;
        ctx.register_ret_voidp(buf.map() as *mut c_void)
    });
    ids.insert("array_buffer_map", id);

    let id = registry.register(|ctx| {
        ctx.check_arg_count(1)?;
        let buf = arg_buffer(ctx, 0)?;
        buf.unmap();
        Ok(())
    });
    ids.insert("array_buffer_unmap", id);
}

fn register_dict(registry: &mut Registry, ids: &mut BuiltinIds) {
    let id = registry.register(|ctx| {
        ctx.check_arg_count(0)?;
        ctx.register_ret_var(Variant::Dictionary(VarDict::new()))
    });
    ids.insert("dict_create", id);

    let id = registry.register(|ctx| {
        ctx.check_arg_count(2)?;
        let dict = arg_dict(ctx, 0)?;
        let key = arg_string_key(ctx, 1)?;
        ctx.register_ret_var(dict.get(&key))
    });
    ids.insert("dict_get", id);

    let id = registry.register(|ctx| {
        ctx.check_arg_count(3)?;
        let dict = arg_dict(ctx, 0)?;
        let key = arg_string_key(ctx, 1)?;
        let value = ctx.arg_var(2)?;
        dict.set(&key, value);
        ctx.register_ret_int32(1)
    });
    ids.insert("dict_set", id);

    let id = registry.register(|ctx| {
        ctx.check_arg_count(2)?;
        let dict = arg_dict(ctx, 0)?;
        let key = arg_string_key(ctx, 1)?;
        dict.delete(&key);
        Ok(())
    });
    ids.insert("dict_delete", id);

    let id = registry.register(|ctx| {
        ctx.check_arg_count(2)?;
        let dict = arg_dict(ctx, 0)?;
        let key = arg_string_key(ctx, 1)?;
        ctx.register_ret_int32(dict.has_key(&key) as i32)
    });
    ids.insert("dict_has_key", id);
}

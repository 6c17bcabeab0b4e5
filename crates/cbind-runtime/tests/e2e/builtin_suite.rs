//! Builtin commands over the wire.

use super::harness::Host;
use cbind_engine::{register_builtins, BuiltinIds, Registry};

/// Record type this embedding marshals through raw pointers. The field
/// offsets hard-coded in the wire requests below depend on this layout.
#[repr(C)]
struct Vec2 {
    x: i32,
    y: i32,
}

cbind_engine::assert_record_layout! {
    Vec2 { size: 8, x: 0, y: 4 }
}

fn builtin_host() -> (Host, BuiltinIds) {
    let mut registry = Registry::new();
    let ids = register_builtins(&mut registry);
    (Host::start(registry), ids)
}

#[test]
fn test_record_fields_through_asserted_offsets() {
    let (host, ids) = builtin_host();
    let malloc = ids.get("malloc").unwrap();
    let add = ids.get("add_void_p").unwrap();
    let set_int32 = ids.get("set_int32").unwrap();
    let get_int32 = ids.get("get_int32").unwrap();
    let free = ids.get("free").unwrap();

    // malloc(sizeof(Vec2)); write x at offset 0 and y at offset 4; read
    // both back. The literals match the asserted layout above.
    host.send(&format!(
        "{{\"id\": 1,\
          \"set\": {{\"1\": [\"uint32\", 8], \"2\": [\"int32\", 4],\
                    \"3\": [\"int32\", 11], \"4\": [\"int32\", -22]}},\
          \"commands\": [\
            {{\"id\": {malloc}, \"args\": [1], \"ret\": 5}},\
            {{\"id\": {add}, \"args\": [5, 2], \"ret\": 6}},\
            {{\"id\": {set_int32}, \"args\": [5, 3]}},\
            {{\"id\": {set_int32}, \"args\": [6, 4]}},\
            {{\"id\": {get_int32}, \"args\": [5], \"ret\": 7}},\
            {{\"id\": {get_int32}, \"args\": [6], \"ret\": 8}}],\
          \"get\": [7, 8],\
          \"destroy\": [1, 2, 3, 4, 6, 7, 8]}}"
    ));
    host.expect_response("{\"id\":1,\"values\":[11,-22]}");

    host.send(&format!(
        "{{\"id\": 2,\
          \"commands\": [{{\"id\": {free}, \"args\": [5]}}],\
          \"destroy\": [5]}}"
    ));
    host.expect_response("{\"id\":2,\"values\":[]}");

    let engine = host.shutdown();
    assert_eq!(engine.live_handle_count(), 0);
}

#[test]
fn test_pointer_arithmetic_batch() {
    let (host, ids) = builtin_host();
    let malloc = ids.get("malloc").unwrap();
    let memset = ids.get("memset").unwrap();
    let add = ids.get("add_void_p").unwrap();
    let set_int32 = ids.get("set_int32").unwrap();
    let get_int32 = ids.get("get_int32").unwrap();
    let free = ids.get("free").unwrap();

    // malloc(16); memset(p, 0, 16); q = p + 4; *q = 42; read *q back.
    host.send(&format!(
        "{{\"id\": 1,\
          \"set\": {{\"1\": [\"uint32\", 16], \"2\": [\"int32\", 0],\
                    \"3\": [\"uint32\", 16], \"4\": [\"int32\", 4],\
                    \"5\": [\"int32\", 42]}},\
          \"commands\": [\
            {{\"id\": {malloc}, \"args\": [1], \"ret\": 6}},\
            {{\"id\": {memset}, \"args\": [6, 2, 3], \"ret\": 7}},\
            {{\"id\": {add}, \"args\": [6, 4], \"ret\": 8}},\
            {{\"id\": {set_int32}, \"args\": [8, 5]}},\
            {{\"id\": {get_int32}, \"args\": [8], \"ret\": 9}}],\
          \"get\": [9],\
          \"destroy\": [1, 2, 3, 4, 5, 7, 8, 9]}}"
    ));
    host.expect_response("{\"id\":1,\"values\":[42]}");

    host.send(&format!(
        "{{\"id\": 2,\
          \"commands\": [{{\"id\": {free}, \"args\": [6]}}],\
          \"destroy\": [6]}}"
    ));
    host.expect_response("{\"id\":2,\"values\":[]}");

    let engine = host.shutdown();
    assert_eq!(engine.live_handle_count(), 0);
}

#[test]
fn test_string_through_native_memory() {
    let (host, ids) = builtin_host();
    let var_to_utf8 = ids.get("var_to_utf8").unwrap();
    let strlen = ids.get("strlen").unwrap();
    let var_from_utf8 = ids.get("var_from_utf8").unwrap();
    let free = ids.get("free").unwrap();

    let malloc = ids.get("malloc").unwrap();
    let get_uint32 = ids.get("get_uint32").unwrap();

    // Copy a string var into native memory (length written through a
    // malloc'd out-pointer), measure it, read it back.
    host.send(&format!(
        "{{\"id\": 1,\
          \"set\": {{\"1\": [\"var\", \"bridge\"], \"2\": [\"uint32\", 4],\
                    \"3\": [\"uint32\", 6]}},\
          \"commands\": [\
            {{\"id\": {malloc}, \"args\": [2], \"ret\": 4}},\
            {{\"id\": {var_to_utf8}, \"args\": [1, 4], \"ret\": 5}},\
            {{\"id\": {get_uint32}, \"args\": [4], \"ret\": 6}},\
            {{\"id\": {strlen}, \"args\": [5], \"ret\": 7}},\
            {{\"id\": {var_from_utf8}, \"args\": [5, 3], \"ret\": 8}},\
            {{\"id\": {free}, \"args\": [5]}},\
            {{\"id\": {free}, \"args\": [4]}}],\
          \"get\": [6, 7, 8],\
          \"destroy\": [1, 2, 3, 4, 5, 6, 7, 8]}}",
    ));
    host.expect_response("{\"id\":1,\"values\":[6,6,\"bridge\"]}");

    let engine = host.shutdown();
    assert_eq!(engine.live_handle_count(), 0);
}

#[test]
fn test_dict_and_array_vars() {
    let (host, ids) = builtin_host();
    let dict_create = ids.get("dict_create").unwrap();
    let dict_set = ids.get("dict_set").unwrap();
    let dict_get = ids.get("dict_get").unwrap();
    let dict_has_key = ids.get("dict_has_key").unwrap();
    let array_create = ids.get("array_create").unwrap();
    let array_set = ids.get("array_set").unwrap();
    let array_get_length = ids.get("array_get_length").unwrap();

    host.send(&format!(
        "{{\"id\": 1,\
          \"set\": {{\"1\": [\"var\", \"key\"], \"2\": [\"var\", 7], \"3\": [\"uint32\", 2]}},\
          \"commands\": [\
            {{\"id\": {dict_create}, \"args\": [], \"ret\": 4}},\
            {{\"id\": {dict_set}, \"args\": [4, 1, 2], \"ret\": 5}},\
            {{\"id\": {dict_get}, \"args\": [4, 1], \"ret\": 6}},\
            {{\"id\": {dict_has_key}, \"args\": [4, 1], \"ret\": 7}},\
            {{\"id\": {array_create}, \"args\": [], \"ret\": 8}},\
            {{\"id\": {array_set}, \"args\": [8, 3, 2], \"ret\": 9}},\
            {{\"id\": {array_get_length}, \"args\": [8], \"ret\": 10}}],\
          \"get\": [6, 7, 10],\
          \"destroy\": [1, 2, 3, 4, 5, 6, 7, 8, 9, 10]}}",
    ));
    host.expect_response("{\"id\":1,\"values\":[7,1,3]}");

    let engine = host.shutdown();
    assert_eq!(engine.live_handle_count(), 0);
}

#[cfg(target_arch = "x86_64")]
#[test]
fn test_snprintf_over_the_wire() {
    let (host, ids) = builtin_host();
    let malloc = ids.get("malloc").unwrap();
    let var_to_utf8 = ids.get("var_to_utf8").unwrap();
    let snprintf = ids.get("snprintf").unwrap();
    let strlen = ids.get("strlen").unwrap();
    let var_from_utf8 = ids.get("var_from_utf8").unwrap();
    let free = ids.get("free").unwrap();

    host.send(&format!(
        "{{\"id\": 1,\
          \"set\": {{\"1\": [\"uint32\", 64], \"2\": [\"var\", \"%d+%d=%d\"],\
                    \"3\": [\"uint32\", 64], \"4\": [\"int32\", 2],\
                    \"5\": [\"int32\", 3], \"6\": [\"int32\", 5],\
                    \"7\": [\"uint32\", 4]}},\
          \"commands\": [\
            {{\"id\": {malloc}, \"args\": [1], \"ret\": 8}},\
            {{\"id\": {malloc}, \"args\": [7], \"ret\": 9}},\
            {{\"id\": {var_to_utf8}, \"args\": [2, 9], \"ret\": 10}},\
            {{\"id\": {snprintf}, \"args\": [8, 3, 10, 4, 5, 6], \"ret\": 11}},\
            {{\"id\": {strlen}, \"args\": [8], \"ret\": 12}},\
            {{\"id\": {var_from_utf8}, \"args\": [8, 12], \"ret\": 13}},\
            {{\"id\": {free}, \"args\": [8]}},\
            {{\"id\": {free}, \"args\": [9]}},\
            {{\"id\": {free}, \"args\": [10]}}],\
          \"get\": [11, 13],\
          \"destroy\": [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13]}}",
    ));
    host.expect_response("{\"id\":1,\"values\":[5,\"2+3=5\"]}");

    let engine = host.shutdown();
    assert_eq!(engine.live_handle_count(), 0);
}

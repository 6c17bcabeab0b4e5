//! Callback trampoline round trips over the wire.

use super::harness::Host;
use cbind_engine::{CFuncPtr, Registry};

cbind_engine::callback_signature! {
    /// int (*)(int)
    pub mod cb_int_ret_int: fn(value: i32) -> i32;
}

cbind_engine::callback_signature! {
    /// int64_t (*)(int64_t)
    pub mod cb_i64_ret_i64: fn(value: i64) -> i64;
}

cbind_engine::callback_signature! {
    /// int (*)(int), pool reserved for the exhaustion test
    pub mod cb_exhaust: fn(value: i32) -> i32;
}

extern "C" fn call_with_10_and_add_1(f: cb_int_ret_int::Signature) -> i32 {
    f(10) + 1
}

extern "C" fn sum_calls_of_10_and_20(f: cb_i64_ret_i64::Signature) -> i64 {
    f(10) + f(20)
}

/// Registry with function 0 = `call_with_10_and_add_1`,
/// function 1 = `sum_calls_of_10_and_20`.
fn callback_registry() -> Registry {
    let mut registry = Registry::new();

    registry.register(|ctx| {
        ctx.check_arg_count(1)?;
        let ptr = ctx.arg_code_ptr(0, cb_int_ret_int::alloc, cb_int_ret_int::free)?;
        let f = unsafe { std::mem::transmute::<CFuncPtr, cb_int_ret_int::Signature>(ptr) };
        let result = call_with_10_and_add_1(f);
        ctx.register_ret_int32(result)
    });

    registry.register(|ctx| {
        ctx.check_arg_count(1)?;
        let ptr = ctx.arg_code_ptr(0, cb_i64_ret_i64::alloc, cb_i64_ret_i64::free)?;
        let f = unsafe { std::mem::transmute::<CFuncPtr, cb_i64_ret_i64::Signature>(ptr) };
        let result = sum_calls_of_10_and_20(f);
        ctx.register_ret_int64(result)
    });

    registry
}

#[test]
fn test_callback_round_trip() {
    let host = Host::start(callback_registry());
    host.send(
        "{\"id\": 1,\
          \"set\": {\"1\": [\"function\", 2]},\
          \"commands\": [{\"id\": 0, \"args\": [1], \"ret\": 2}],\
          \"get\": [2],\
          \"destroy\": [1, 2]}",
    );

    // The worker is now blocked inside the trampoline.
    host.expect_response("{\"cbId\":1,\"id\":2,\"values\":[10]}");

    // The host function doubles its argument.
    host.send("{\"id\":2,\"cbId\":1,\"values\":[20]}");
    host.expect_response("{\"id\":1,\"values\":[21]}");

    // Destroying handle 1 released the trampoline slot again.
    assert!(cb_int_ret_int::slot_func_ids().iter().all(|&id| id == 0));

    let engine = host.shutdown();
    assert_eq!(engine.live_handle_count(), 0);
}

#[test]
fn test_int64_callbacks() {
    let host = Host::start(callback_registry());
    host.send(
        "{\"id\": 1,\
          \"set\": {\"1\": [\"function\", 2]},\
          \"commands\": [{\"id\": 1, \"args\": [1], \"ret\": 2}],\
          \"get\": [2],\
          \"destroy\": [1, 2]}",
    );

    // First call: f(10). The host replies with 1 << 10.
    host.expect_response("{\"cbId\":1,\"id\":2,\"values\":[[\"long\",10,0]]}");
    host.send("{\"id\":2,\"cbId\":1,\"values\":[[\"long\",1024,0]]}");

    // Second call: f(20). The host replies with 1 << 20.
    host.expect_response("{\"cbId\":2,\"id\":2,\"values\":[[\"long\",20,0]]}");
    host.send("{\"id\":2,\"cbId\":2,\"values\":[[\"long\",1048576,0]]}");

    // The sum of both intermediary results.
    host.expect_response("{\"id\":1,\"values\":[[\"long\",1049600,0]]}");

    let engine = host.shutdown();
    assert_eq!(engine.live_handle_count(), 0);
}

#[test]
fn test_callback_slot_exhaustion_and_reuse() {
    // Function 0 binds a trampoline but never calls it.
    let mut registry = Registry::new();
    registry.register(|ctx| {
        ctx.check_arg_count(1)?;
        ctx.arg_code_ptr(0, cb_exhaust::alloc, cb_exhaust::free)?;
        ctx.register_ret_int32(0)
    });
    let host = Host::start(registry);

    let pool = cb_exhaust::slot_func_ids().len() as i32;
    for i in 0..pool {
        let func_handle = 2 * i + 1;
        let ret_handle = 2 * i + 2;
        host.send(&format!(
            "{{\"id\": {i},\
              \"set\": {{\"{func_handle}\": [\"function\", {}]}},\
              \"commands\": [{{\"id\": 0, \"args\": [{func_handle}], \"ret\": {ret_handle}}}]}}",
            100 + i
        ));
        host.expect_response(&format!("{{\"id\":{i},\"values\":[]}}"));
    }

    // Every slot is taken; one more bind fails and aborts its batch.
    host.send(
        "{\"id\": 99,\
          \"set\": {\"77\": [\"function\", 777]},\
          \"commands\": [{\"id\": 0, \"args\": [77], \"ret\": 78}],\
          \"destroy\": [77]}",
    );
    let response = host.recv();
    assert!(response.contains("\"error\":\"Allocation failed"), "{}", response);

    // Destroying the bound handles frees every slot.
    let handles: Vec<String> = (0..pool)
        .flat_map(|i| [2 * i + 1, 2 * i + 2])
        .map(|h| h.to_string())
        .collect();
    host.send(&format!(
        "{{\"id\": 200, \"destroy\": [{}]}}",
        handles.join(",")
    ));
    host.expect_response("{\"id\":200,\"values\":[]}");
    assert!(cb_exhaust::slot_func_ids().iter().all(|&id| id == 0));

    let engine = host.shutdown();
    assert_eq!(engine.live_handle_count(), 0);
}

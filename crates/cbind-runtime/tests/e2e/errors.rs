//! Error surfaces over the wire.

use super::harness::Host;
use cbind_engine::{dispatch, register_builtins, Registry};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[test]
fn test_type_mismatch_names_both_tags_and_stops_batch() {
    let mut registry = Registry::new();
    let ids = register_builtins(&mut registry);
    let add = ids.get("add_int32").unwrap();
    let host = Host::start(registry);

    host.send(&format!(
        "{{\"id\": 1,\
          \"set\": {{\"1\": [\"float64\", 1.5], \"2\": [\"int32\", 1]}},\
          \"commands\": [\
            {{\"id\": {add}, \"args\": [1, 2], \"ret\": 3}},\
            {{\"id\": {add}, \"args\": [2, 2], \"ret\": 4}}],\
          \"destroy\": [1, 2]}}"
    ));
    host.expect_response(
        "{\"error\":\"Type mismatch. Expected int32. Got float64.\",\"id\":1}",
    );

    // Neither command's result handle exists.
    let engine = host.shutdown();
    assert!(engine.table().get_int32(3).is_err());
    assert!(engine.table().get_int32(4).is_err());
    assert_eq!(engine.live_handle_count(), 0);
}

#[test]
fn test_va_list_function_is_rejected() {
    let observed = Arc::new(AtomicBool::new(false));
    let later_ran = observed.clone();

    let mut registry = Registry::new();
    // Function 0 takes a va_list; the generator emits a stub that refuses
    // at dispatch time.
    registry.register(dispatch::unsupported_stub("va_list argument"));
    // Function 1 records that it ran.
    registry.register(move |ctx| {
        ctx.check_arg_count(0)?;
        later_ran.store(true, Ordering::SeqCst);
        Ok(())
    });
    let host = Host::start(registry);

    host.send(
        "{\"id\": 1,\
          \"commands\": [\
            {\"id\": 0, \"args\": []},\
            {\"id\": 1, \"args\": []}]}",
    );
    host.expect_response("{\"error\":\"Unsupported type: va_list argument.\",\"id\":1}");

    // The rest of the batch never executed.
    assert!(!observed.load(Ordering::SeqCst));
    host.shutdown();
}

#[test]
fn test_function_id_out_of_range() {
    let host = Host::start(Registry::new());
    host.send("{\"id\": 1, \"commands\": [{\"id\": 5, \"args\": []}]}");
    host.expect_response("{\"error\":\"Function id 5 is out of range [-2, 0).\",\"id\":1}");
    host.shutdown();
}

#[test]
fn test_error_if_conditional_abort() {
    let host = Host::start(Registry::new());

    // Zero flag: the batch continues.
    host.send(
        "{\"id\": 1,\
          \"set\": {\"1\": [\"int32\", 0]},\
          \"commands\": [{\"id\": -1, \"args\": [1]}],\
          \"destroy\": [1]}",
    );
    host.expect_response("{\"id\":1,\"values\":[]}");

    // Nonzero flag: the batch aborts.
    host.send(
        "{\"id\": 2,\
          \"set\": {\"1\": [\"int32\", 7]},\
          \"commands\": [{\"id\": -1, \"args\": [1]}],\
          \"destroy\": [1]}",
    );
    let response = host.recv();
    assert!(response.contains("\"error\""), "{}", response);

    let engine = host.shutdown();
    assert_eq!(engine.live_handle_count(), 0);
}

#[test]
fn test_malformed_request_still_answers() {
    let host = Host::start(Registry::new());
    host.send("{\"id\": \"not-a-number\"}");
    let response = host.recv();
    assert!(response.starts_with("{\"error\":\"Malformed request:"), "{}", response);
    host.shutdown();
}

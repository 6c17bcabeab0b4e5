//! Frame-level exchanges with no commands.

use super::harness::Host;
use cbind_engine::Registry;

#[test]
fn test_function_handle_registration() {
    let host = Host::start(Registry::new());
    host.send("{\"id\": 1, \"set\": {\"1\": [\"function\", 2]}}");
    host.expect_response("{\"id\":1,\"values\":[]}");

    let mut engine = host.shutdown();
    assert_eq!(engine.table().get_func_id(1).unwrap(), 2);
    engine.table_mut().destroy(1).unwrap();
    assert_eq!(engine.live_handle_count(), 0);
}

#[test]
fn test_set_get_destroy_round_trip() {
    let host = Host::start(Registry::new());
    host.send(
        "{\"id\": 1,\
          \"set\": {\"1\": [\"int32\", -7], \"2\": [\"long\", 10, 0]},\
          \"get\": [1, 2],\
          \"destroy\": [1, 2]}",
    );
    host.expect_response("{\"id\":1,\"values\":[-7,[\"long\",10,0]]}");

    let engine = host.shutdown();
    assert_eq!(engine.live_handle_count(), 0);
}

#[test]
fn test_requests_processed_in_enqueue_order() {
    let host = Host::start(Registry::new());
    for id in 1..=5 {
        host.send(&format!("{{\"id\": {}}}", id));
    }
    for id in 1..=5 {
        host.expect_response(&format!("{{\"id\":{},\"values\":[]}}", id));
    }
    host.shutdown();
}

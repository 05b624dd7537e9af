#![cfg(feature = "inspect")]

use std::{cell::RefCell, rc::Rc};

use astrolabe::{Inspector, Runtime, RuntimeOptions};
use serde_json::{json, Value as Json};

fn inspector() -> Inspector {
    Inspector::new(Runtime::new(RuntimeOptions::new()).unwrap())
}

#[test]
fn evaluate_returns_remote_objects() {
    let inspector = inspector();

    let response = inspector
        .send("Runtime.evaluate", &json!({ "expression": "6 * 7;" }))
        .unwrap();

    assert_eq!(response["id"], 1);
    assert_eq!(response["result"]["result"]["type"], "number");
    assert_eq!(response["result"]["result"]["value"], 42.0);

    let response = inspector
        .send("Runtime.evaluate", &json!({ "expression": "'a' + 'b';" }))
        .unwrap();

    assert_eq!(response["id"], 2);
    assert_eq!(response["result"]["result"]["value"], "ab");
}

#[test]
fn evaluation_failures_notify_the_listener() {
    let inspector = inspector();
    let notifications = Rc::new(RefCell::new(Vec::<Json>::new()));
    let sink = Rc::clone(&notifications);

    inspector.on_notification(move |notification| {
        sink.borrow_mut().push(notification);
    });

    let response = inspector
        .send("Runtime.evaluate", &json!({ "expression": "missing;" }))
        .unwrap();

    assert!(response["result"]["exceptionDetails"]["text"]
        .as_str()
        .unwrap()
        .contains("missing is not defined"));

    let notifications = notifications.borrow();

    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0]["method"], "Runtime.exceptionThrown");
    assert_eq!(
        notifications[0]["params"]["exceptionDetails"]["text"],
        "ReferenceError: missing is not defined",
    );
}

#[test]
fn heap_usage_reports_statistics() {
    let inspector = inspector();

    inspector
        .send("Runtime.evaluate", &json!({ "expression": "const a = {};" }))
        .unwrap();

    let response = inspector.send("Runtime.getHeapUsage", &json!({})).unwrap();

    assert!(response["result"]["live_values"].as_u64().unwrap() >= 1);
    assert!(response["result"]["used_heap_size"].as_u64().is_some());
}

#[test]
fn collect_garbage_runs_a_collection_pass() {
    let inspector = inspector();

    inspector
        .send("Runtime.evaluate", &json!({ "expression": "let junk = {}; junk = 0;" }))
        .unwrap();

    inspector
        .send("HeapProfiler.collectGarbage", &json!({}))
        .unwrap();

    let response = inspector.send("Runtime.getHeapUsage", &json!({})).unwrap();

    // Only the global object itself remains.
    assert_eq!(response["result"]["live_values"].as_u64(), Some(1));
}

#[test]
fn unknown_methods_answer_with_an_error() {
    let inspector = inspector();

    let response = inspector.send("Debugger.pause", &json!({})).unwrap();

    assert_eq!(response["error"]["code"], -32601);
    assert!(response["error"]["message"]
        .as_str()
        .unwrap()
        .contains("Debugger.pause"));
}

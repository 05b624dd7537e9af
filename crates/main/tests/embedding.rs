use std::{cell::RefCell, rc::Rc};

use astrolabe::{
    CallbackSignature,
    FunctionBinder,
    Interceptor,
    ObjectStore,
    PromiseKind,
    Runtime,
    RuntimeOptions,
    ValueKind,
};

fn runtime() -> Runtime {
    Runtime::new(RuntimeOptions::new()).unwrap()
}

#[test]
fn function_binders_install_onto_targets() {
    let runtime = runtime();
    let log = Rc::new(RefCell::new(Vec::new()));

    let greet_log = Rc::clone(&log);
    let part_log = Rc::clone(&log);

    let binder = FunctionBinder::new()
        .bind("greet", CallbackSignature::function(), move |_| {
            greet_log.borrow_mut().push("greet");

            Ok(None)
        })
        .bind("part", CallbackSignature::function(), move |_| {
            part_log.borrow_mut().push("part");

            Ok(None)
        });

    assert_eq!(binder.len(), 2);

    let target = runtime.create_object().unwrap();

    runtime.global().set("api", &target).unwrap();

    assert!(binder.register(&runtime, &[target.try_clone().unwrap()]).unwrap());

    runtime.execute("api.greet(); api.part(); api.greet();").unwrap();

    assert_eq!(*log.borrow(), vec!["greet", "part", "greet"]);

    target.close().unwrap();
    runtime.close().unwrap();
}

#[test]
fn unregistration_is_idempotent() {
    let runtime = runtime();

    let binder = FunctionBinder::new().bind(
        "probe",
        CallbackSignature::function(),
        |_| Ok(None),
    );

    let target = runtime.create_object().unwrap();
    let targets = [target.try_clone().unwrap()];

    assert!(binder.register(&runtime, &targets).unwrap());
    assert!(target.has("probe").unwrap());

    assert!(binder.unregister(&runtime, &targets).unwrap());
    assert!(!target.has("probe").unwrap());

    // A second pass finds nothing to remove and still succeeds.
    assert!(binder.unregister(&runtime, &targets).unwrap());

    target.close().unwrap();
    runtime.close().unwrap();
}

#[test]
fn reregistration_overwrites_the_previous_installation() {
    let runtime = runtime();
    let hits = Rc::new(RefCell::new(0_usize));

    let first = Rc::clone(&hits);
    let second = Rc::clone(&hits);

    let target = runtime.create_object().unwrap();

    runtime.global().set("api", &target).unwrap();

    FunctionBinder::new()
        .bind("tick", CallbackSignature::function(), move |_| {
            *first.borrow_mut() += 1;

            Ok(None)
        })
        .register(&runtime, &[target.try_clone().unwrap()])
        .unwrap();

    FunctionBinder::new()
        .bind("tick", CallbackSignature::function(), move |_| {
            *second.borrow_mut() += 10;

            Ok(None)
        })
        .register(&runtime, &[target.try_clone().unwrap()])
        .unwrap();

    runtime.execute("api.tick();").unwrap();

    assert_eq!(*hits.borrow(), 10);

    target.close().unwrap();
    runtime.close().unwrap();
}

#[test]
fn stores_materialize_globals_once() {
    let runtime = runtime();
    let store = ObjectStore::new(runtime.clone());

    assert!(store.is_empty());

    let console = store.get_or_create("console").unwrap();

    assert_eq!(console.kind(), ValueKind::Object);
    assert_eq!(store.len(), 1);

    // Script-side mutations are visible through later lookups.
    runtime.execute("console.level = 3;").unwrap();

    let again = store.get_or_create("console").unwrap();

    assert_eq!(again.get("level").unwrap().as_f64(), Some(3.0));

    console.close().unwrap();
    again.close().unwrap();
    store.close().unwrap();

    assert!(store.is_empty());

    runtime.close().unwrap();
}

#[test]
fn stores_adopt_existing_globals() {
    let runtime = runtime();
    let store = ObjectStore::new(runtime.clone());

    runtime.execute("var registry = { kind: 'existing' };").unwrap();

    let registry = store.get_or_create("registry").unwrap();

    assert_eq!(registry.get("kind").unwrap().as_str(), Some("existing"));

    registry.close().unwrap();
    store.close().unwrap();
    runtime.close().unwrap();
}

#[test]
fn promises_settle_through_the_message_loop() {
    let runtime = runtime();

    let (promise, resolver) = runtime.create_promise().unwrap();

    assert_eq!(promise.promise_state().unwrap(), PromiseKind::Pending);

    let settlement = runtime.create_number(9.0).unwrap();

    resolver.resolve(&settlement).unwrap();

    assert!(runtime.pump_message_loop().unwrap());
    assert_eq!(promise.promise_state().unwrap(), PromiseKind::Fulfilled);
    assert_eq!(promise.promise_result().unwrap().as_f64(), Some(9.0));

    promise.close().unwrap();
    runtime.close().unwrap();
}

#[test]
fn rejected_promises_carry_their_reason() {
    let runtime = runtime();

    let (promise, resolver) = runtime.create_promise().unwrap();
    let reason = runtime.create_string("boom").unwrap();

    resolver.reject(&reason).unwrap();
    runtime.pump_message_loop().unwrap();

    assert_eq!(promise.promise_state().unwrap(), PromiseKind::Rejected);
    assert_eq!(promise.promise_result().unwrap().as_str(), Some("boom"));

    promise.close().unwrap();
    runtime.close().unwrap();
}

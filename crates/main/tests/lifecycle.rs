use astrolabe::{Runtime, RuntimeOptions, ScriptError, ValueKind};

fn runtime() -> Runtime {
    Runtime::new(RuntimeOptions::new()).unwrap()
}

#[test]
fn scopes_release_everything_created_inside() {
    let runtime = runtime();

    assert_eq!(runtime.reference_count().unwrap(), 0);

    runtime
        .scope(|scope| {
            let runtime = scope.runtime();

            let _object = runtime.create_object()?;
            let _array = runtime.create_array()?;
            let _result = runtime.execute("const box = {}; box;")?;

            assert_eq!(runtime.reference_count()?, 3);

            Ok(())
        })
        .unwrap();

    assert_eq!(runtime.reference_count().unwrap(), 0);

    runtime.close().unwrap();
}

#[test]
fn scopes_release_on_the_error_path_too() {
    let runtime = runtime();

    let result: Result<(), ScriptError> = runtime.scope(|scope| {
        let _object = scope.runtime().create_object()?;

        Err(ScriptError::Terminated)
    });

    assert!(result.is_err());
    assert_eq!(runtime.reference_count().unwrap(), 0);

    runtime.close().unwrap();
}

#[test]
fn escape_promotes_a_wrapper_to_the_caller() {
    let runtime = runtime();

    let escaped = runtime
        .scope(|scope| {
            let object = scope.runtime().create_object()?;
            let doomed = scope.runtime().create_array()?;

            let _ = doomed;

            scope.escape(object)
        })
        .unwrap();

    assert_eq!(runtime.reference_count().unwrap(), 1);
    assert_eq!(escaped.kind(), ValueKind::Object);

    escaped.close().unwrap();

    assert_eq!(runtime.reference_count().unwrap(), 0);

    runtime.close().unwrap();
}

#[test]
fn nested_escape_lands_in_the_enclosing_scope() {
    let runtime = runtime();

    runtime
        .scope(|outer| {
            let promoted = outer.runtime().scope(|inner| {
                let object = inner.runtime().create_object()?;

                inner.escape(object)
            })?;

            // Still alive: the inner scope handed it to the outer one.
            assert_eq!(promoted.kind(), ValueKind::Object);
            assert_eq!(outer.runtime().reference_count()?, 1);

            Ok(())
        })
        .unwrap();

    assert_eq!(runtime.reference_count().unwrap(), 0);

    runtime.close().unwrap();
}

#[test]
fn weak_references_are_invalidated_by_collection() {
    let runtime = runtime();

    let object = runtime.create_object().unwrap();

    object.set_weak(true).unwrap();

    assert!(object.is_weak().unwrap());

    runtime.low_memory_notification().unwrap();

    assert!(matches!(object.get("x"), Err(ScriptError::StaleHandle)));

    runtime.close().unwrap();
}

#[test]
fn strong_references_survive_collection() {
    let runtime = runtime();

    let object = runtime.create_object().unwrap();
    let number = runtime.create_number(1.0).unwrap();

    object.set("n", &number).unwrap();

    runtime.low_memory_notification().unwrap();

    assert_eq!(object.get("n").unwrap().as_f64(), Some(1.0));

    object.close().unwrap();
    runtime.close().unwrap();
}

#[test]
fn reachable_targets_keep_weak_wrappers_alive() {
    let runtime = runtime();

    let held = runtime.execute("const keep = {}; keep;").unwrap();

    held.set_weak(true).unwrap();

    runtime.low_memory_notification().unwrap();

    // The object is still reachable from the global binding.
    assert_eq!(held.kind(), ValueKind::Object);
    assert!(held.own_keys().is_ok());

    held.close().unwrap();
    runtime.close().unwrap();
}

#[test]
fn stale_handles_are_detected_after_close() {
    let runtime = runtime();

    let object = runtime.create_object().unwrap();

    object.close().unwrap();

    assert!(matches!(object.get("x"), Err(ScriptError::StaleHandle)));
    assert!(matches!(object.try_clone(), Err(ScriptError::StaleHandle)));

    runtime.close().unwrap();
}

#[test]
fn wrappers_do_not_cross_runtimes() {
    let first = runtime();
    let second = runtime();

    let alien = first.create_object().unwrap();

    let result = second.global().set("x", &alien);

    assert!(matches!(result, Err(ScriptError::CrossRuntimeHandle)));

    alien.close().unwrap();
    first.close().unwrap();
    second.close().unwrap();
}

#[test]
fn runtimes_close_independently() {
    let first = runtime();
    let second = runtime();

    first.execute("const a = { x: 1 };").unwrap();
    second.execute("const b = [1, 2, 3];").unwrap();

    first.close().unwrap();

    assert_eq!(second.execute("b.length;").unwrap().as_f64(), Some(3.0));

    second.close().unwrap();

    assert!(matches!(second.execute("1;"), Err(ScriptError::RuntimeClosed)));
}

#[test]
fn global_wrapper_is_unmanaged() {
    let runtime = runtime();

    let global = runtime.global();

    assert_eq!(global.kind(), ValueKind::GlobalObject);
    assert_eq!(runtime.reference_count().unwrap(), 0);

    // Closing and weakening the global wrapper are no-ops.
    global.close().unwrap();
    global.set_weak(true).unwrap();
    assert!(!runtime.global().is_weak().unwrap());

    runtime.close().unwrap();
}

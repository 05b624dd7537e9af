use astrolabe::{
    Converter,
    Native,
    ObjectConverter,
    Runtime,
    RuntimeOptions,
    ScriptError,
    ValueKind,
};
use chrono::{TimeZone, Utc};

fn runtime() -> Runtime {
    Runtime::new(RuntimeOptions::new()).unwrap()
}

#[test]
fn primitives_round_trip() {
    let runtime = runtime();
    let converter = ObjectConverter::new();

    for native in [
        Native::Unit,
        Native::Bool(true),
        Native::Int(-7),
        Native::Float(2.5),
        Native::Str(String::from("hello")),
    ] {
        let value = converter.to_script(&runtime, &native).unwrap();

        assert_eq!(converter.from_script(&value).unwrap(), native);
    }

    runtime.close().unwrap();
}

#[test]
fn instants_round_trip_to_the_millisecond() {
    let runtime = runtime();
    let converter = ObjectConverter::new();

    let instant = Utc.timestamp_millis_opt(1_724_828_400_123).unwrap();

    let value = converter
        .to_script(&runtime, &Native::Instant(instant))
        .unwrap();

    assert_eq!(value.kind(), ValueKind::Date);
    assert_eq!(value.epoch_millis().unwrap(), 1_724_828_400_123);
    assert_eq!(
        converter.from_script(&value).unwrap(),
        Native::Instant(instant),
    );

    value.close().unwrap();
    runtime.close().unwrap();
}

#[test]
fn lists_preserve_order() {
    let runtime = runtime();
    let converter = ObjectConverter::new();

    let native = Native::List(vec![
        Native::Int(3),
        Native::Str(String::from("two")),
        Native::Bool(false),
        Native::List(vec![Native::Int(1)]),
    ]);

    let value = converter.to_script(&runtime, &native).unwrap();

    assert_eq!(value.kind(), ValueKind::Array);
    assert_eq!(value.length().unwrap(), 4);
    assert_eq!(converter.from_script(&value).unwrap(), native);

    value.close().unwrap();
    runtime.close().unwrap();
}

#[test]
fn maps_preserve_entry_order() {
    let runtime = runtime();
    let converter = ObjectConverter::new();

    let native = Native::Map(vec![
        (Native::Str(String::from("zeta")), Native::Int(1)),
        (Native::Str(String::from("alpha")), Native::Int(2)),
        (Native::Int(3), Native::Str(String::from("three"))),
    ]);

    let value = converter.to_script(&runtime, &native).unwrap();

    assert_eq!(value.kind(), ValueKind::Map);
    assert_eq!(converter.from_script(&value).unwrap(), native);

    value.close().unwrap();
    runtime.close().unwrap();
}

#[test]
fn sets_preserve_insertion_order() {
    let runtime = runtime();
    let converter = ObjectConverter::new();

    let native = Native::Set(vec![Native::Int(3), Native::Int(1), Native::Int(2)]);

    let value = converter.to_script(&runtime, &native).unwrap();

    assert_eq!(value.kind(), ValueKind::Set);
    assert_eq!(converter.from_script(&value).unwrap(), native);

    value.close().unwrap();
    runtime.close().unwrap();
}

#[test]
fn script_objects_convert_to_string_keyed_maps() {
    let runtime = runtime();
    let converter = ObjectConverter::new();

    let value = runtime
        .execute("const cfg = { port: 8080, host: 'local' }; cfg;")
        .unwrap();

    assert_eq!(
        converter.from_script(&value).unwrap(),
        Native::Map(vec![
            (Native::Str(String::from("port")), Native::Int(8080)),
            (Native::Str(String::from("host")), Native::Str(String::from("local"))),
        ]),
    );

    value.close().unwrap();
    runtime.close().unwrap();
}

#[test]
fn aggregate_keys_are_rejected() {
    let runtime = runtime();
    let converter = ObjectConverter::new();

    let native = Native::Map(vec![(
        Native::List(vec![Native::Int(1)]),
        Native::Int(1),
    )]);

    let result = converter.to_script(&runtime, &native);

    assert!(matches!(result, Err(ScriptError::Conversion { .. })));

    runtime.close().unwrap();
}

#[test]
fn depth_limit_rejects_deep_nesting() {
    let runtime = runtime();
    let converter = ObjectConverter::with_max_depth(3);

    let mut native = Native::Int(0);

    for _ in 0..5 {
        native = Native::List(vec![native]);
    }

    let result = converter.to_script(&runtime, &native);

    assert!(matches!(result, Err(ScriptError::Conversion { .. })));

    runtime.close().unwrap();
}

#[test]
fn functions_do_not_convert() {
    let runtime = runtime();
    let converter = ObjectConverter::new();

    let value = runtime.execute("function f() {} f;").unwrap();

    assert_eq!(value.kind(), ValueKind::Function);
    assert!(matches!(
        converter.from_script(&value),
        Err(ScriptError::Conversion { .. }),
    ));

    value.close().unwrap();
    runtime.close().unwrap();
}

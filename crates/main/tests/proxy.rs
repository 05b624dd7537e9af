use std::{cell::RefCell, rc::Rc};

use astrolabe::{
    ProxyHandler,
    Runtime,
    RuntimeOptions,
    ScriptResult,
    Value,
    ValueKind,
    VirtualProperties,
};

fn runtime() -> Runtime {
    Runtime::new(RuntimeOptions::new()).unwrap()
}

#[test]
fn virtual_properties_resolve_lazily() {
    let runtime = runtime();
    let hits = Rc::new(RefCell::new(0_usize));
    let counter = Rc::clone(&hits);

    let api = VirtualProperties::new()
        .property("version", |runtime| runtime.create_string("1.4.0"))
        .property("pid", move |runtime| {
            *counter.borrow_mut() += 1;

            runtime.create_number(4242.0)
        });

    let proxy = runtime.create_proxy(api).unwrap();

    runtime.global().set("app", &proxy).unwrap();

    assert_eq!(*hits.borrow(), 0);
    assert_eq!(
        runtime.execute("app.version;").unwrap().as_str(),
        Some("1.4.0"),
    );
    assert_eq!(runtime.execute("app.pid;").unwrap().as_f64(), Some(4242.0));
    assert_eq!(*hits.borrow(), 1);

    proxy.close().unwrap();
    runtime.close().unwrap();
}

#[test]
fn virtual_properties_advertise_their_keys() {
    let runtime = runtime();

    let api = VirtualProperties::new()
        .property("name", |runtime| runtime.create_string("astrolabe"))
        .property("version", |runtime| runtime.create_string("0.1"));

    let proxy = runtime.create_proxy(api).unwrap();

    assert_eq!(proxy.kind(), ValueKind::Proxy);
    assert_eq!(proxy.own_keys().unwrap(), vec!["name", "version"]);
    assert!(proxy.has("version").unwrap());
    assert!(!proxy.has("missing").unwrap());

    proxy.close().unwrap();
    runtime.close().unwrap();
}

#[test]
fn default_has_consults_advertised_keys() {
    struct Advertised;

    impl ProxyHandler for Advertised {
        fn own_keys(&self, _runtime: &Runtime) -> ScriptResult<Vec<compact_str::CompactString>> {
            Ok(vec![compact_str::CompactString::from("alpha")])
        }
    }

    let runtime = runtime();
    let proxy = runtime.create_proxy(Advertised).unwrap();

    assert!(proxy.has("alpha").unwrap());
    assert!(!proxy.has("beta").unwrap());

    proxy.close().unwrap();
    runtime.close().unwrap();
}

#[test]
fn unknown_properties_fall_through_to_undefined() {
    let runtime = runtime();

    let proxy = runtime.create_proxy(VirtualProperties::new()).unwrap();

    runtime.global().set("empty", &proxy).unwrap();

    assert!(runtime.execute("empty.anything;").unwrap().is_undefined());

    proxy.close().unwrap();
    runtime.close().unwrap();
}

struct Recorder {
    writes: Rc<RefCell<Vec<(String, f64)>>>,
    deleted: Rc<RefCell<Vec<String>>>,
}

impl ProxyHandler for Recorder {
    fn get(&self, runtime: &Runtime, name: &str) -> ScriptResult<Option<Value>> {
        match name {
            "total" => {
                let total: f64 = self.writes.borrow().iter().map(|(_, value)| value).sum();

                Ok(Some(runtime.create_number(total)?))
            }

            _ => Ok(None),
        }
    }

    fn set(&self, _runtime: &Runtime, name: &str, value: Value) -> ScriptResult<bool> {
        let Some(value) = value.as_f64() else {
            return Ok(false);
        };

        self.writes.borrow_mut().push((String::from(name), value));

        Ok(true)
    }

    fn delete(&self, _runtime: &Runtime, name: &str) -> ScriptResult<bool> {
        self.deleted.borrow_mut().push(String::from(name));

        Ok(true)
    }

    fn own_keys(&self, _runtime: &Runtime) -> ScriptResult<Vec<compact_str::CompactString>> {
        Ok(vec![compact_str::CompactString::from("total")])
    }

    fn invoke(&self, runtime: &Runtime, _this: Value, args: Vec<Value>) -> ScriptResult<Value> {
        runtime.create_number(args.len() as f64)
    }
}

#[test]
fn custom_handlers_intercept_writes_and_deletes() {
    let runtime = runtime();

    let writes = Rc::new(RefCell::new(Vec::new()));
    let deleted = Rc::new(RefCell::new(Vec::new()));

    let proxy = runtime
        .create_proxy(Recorder {
            writes: Rc::clone(&writes),
            deleted: Rc::clone(&deleted),
        })
        .unwrap();

    runtime.global().set("meter", &proxy).unwrap();

    runtime.execute("meter.a = 2; meter.b = 3;").unwrap();

    assert_eq!(
        *writes.borrow(),
        vec![(String::from("a"), 2.0), (String::from("b"), 3.0)],
    );

    assert_eq!(runtime.execute("meter.total;").unwrap().as_f64(), Some(5.0));

    runtime.execute("delete meter.a;").unwrap();

    assert_eq!(*deleted.borrow(), vec![String::from("a")]);

    proxy.close().unwrap();
    runtime.close().unwrap();
}

#[test]
fn callable_proxies_intercept_invocation() {
    let runtime = runtime();

    let proxy = runtime
        .create_proxy(Recorder {
            writes: Rc::new(RefCell::new(Vec::new())),
            deleted: Rc::new(RefCell::new(Vec::new())),
        })
        .unwrap();

    runtime.global().set("count", &proxy).unwrap();

    assert_eq!(
        runtime.execute("count(10, 20, 30);").unwrap().as_f64(),
        Some(3.0),
    );

    proxy.close().unwrap();
    runtime.close().unwrap();
}

#[test]
fn handlers_retire_with_the_proxy() {
    let runtime = runtime();

    let proxy = runtime.create_proxy(VirtualProperties::new()).unwrap();

    proxy.close().unwrap();
    runtime.low_memory_notification().unwrap();

    // The handler registry is empty again; a fresh proxy starts clean.
    let replacement = runtime.create_proxy(VirtualProperties::new()).unwrap();

    assert_eq!(replacement.kind(), ValueKind::Proxy);

    replacement.close().unwrap();
    runtime.close().unwrap();
}

use astrolabe::{Runtime, RuntimeOptions, ScriptError};

fn runtime() -> Runtime {
    Runtime::new(RuntimeOptions::new()).unwrap()
}

#[test]
fn syntax_error_carries_exact_diagnostics() {
    let runtime = runtime();

    let error = runtime
        .execute("const a = 1;\na ==== 2;")
        .expect_err("quadruple equals must be rejected");

    let ScriptError::Compilation { details } = error else {
        panic!("expected a compilation error");
    };

    assert_eq!(details.message, "SyntaxError: Unexpected token '='");
    assert_eq!(details.resource_name, "undefined");
    assert_eq!(details.source_line, "a ==== 2;");
    assert_eq!(details.line_number, 2);
    assert_eq!(details.start_column, 5);
    assert_eq!(details.end_column, 6);
    assert_eq!(details.start_position, 18);
    assert_eq!(details.end_position, 19);

    assert_eq!(
        details.to_string(),
        "Error: SyntaxError: Unexpected token '='\n\
         Resource: undefined\n\
         Source Code: a ==== 2;\n\
         Line Number: 2\n\
         Column: 5, 6\n\
         Position: 18, 19",
    );

    runtime.close().unwrap();
}

#[test]
fn const_reassignment_throws_at_the_assignment() {
    let runtime = runtime();

    let error = runtime
        .execute("const a = 1; a = 2;")
        .expect_err("const reassignment must throw");

    let ScriptError::Execution { details } = error else {
        panic!("expected an execution error");
    };

    assert_eq!(details.message, "TypeError: Assignment to constant variable.");
    assert_eq!(details.resource_name, "undefined");
    assert_eq!(details.source_line, "const a = 1; a = 2;");
    assert_eq!(details.line_number, 1);
    assert_eq!(details.start_column, 15);
    assert_eq!(details.end_column, 16);
    assert_eq!(details.start_position, 15);
    assert_eq!(details.end_position, 16);

    runtime.close().unwrap();
}

#[test]
fn explicit_resource_name_is_reported() {
    let runtime = runtime();

    let error = runtime
        .execute_with_resource("let x = ;", Some("boot.js"))
        .expect_err("missing initializer expression must be rejected");

    let details = error.details().expect("compilation details");

    assert_eq!(details.resource_name, "boot.js");
    assert_eq!(details.line_number, 1);

    runtime.close().unwrap();
}

#[test]
fn default_resource_name_comes_from_options() {
    let mut options = RuntimeOptions::new();

    options.set_default_resource_name("embedded.js");

    let runtime = Runtime::new(options).unwrap();

    let error = runtime
        .execute("undeclared;")
        .expect_err("unknown identifier must throw");

    let details = error.details().expect("execution details");

    assert_eq!(details.resource_name, "embedded.js");

    runtime.close().unwrap();
}

#[test]
fn message_strips_structure() {
    let runtime = runtime();

    let error = runtime.execute("const a = 1; a = 2;").unwrap_err();

    assert_eq!(error.message(), "TypeError: Assignment to constant variable.");

    let closed = runtime.clone();

    runtime.close().unwrap();

    let error = closed.execute("1;").unwrap_err();

    assert!(matches!(error, ScriptError::RuntimeClosed));
    assert_eq!(error.message(), "runtime is closed");
}

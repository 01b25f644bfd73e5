//! Global object templates and host functions.

use std::cell::Cell;
use std::rc::Rc;

use super::{create_test_isolate, eval_number, eval_string};
use handlescope::{Context, Error, ErrorKind, FunctionTemplate, ObjectTemplate, Value};

#[test]
fn test_template_values_are_globals() {
    let isolate = create_test_isolate();
    let mut template = ObjectTemplate::new();
    template
        .set_value("answer", 42)
        .set_value("greeting", "hello")
        .set_value("enabled", true)
        .set_value("nothing", ());
    assert_eq!(template.len(), 4);

    let ctx = Context::new(&isolate, Some(&template), 0);
    assert_eq!(eval_number(&ctx, "answer"), 42.0);
    assert_eq!(eval_string(&ctx, "greeting + ' world'"), "hello world");
    assert_eq!(eval_string(&ctx, "enabled"), "true");
    assert_eq!(eval_string(&ctx, "typeof nothing"), "undefined");
}

#[test]
fn test_nested_templates() {
    let isolate = create_test_isolate();
    let mut config = ObjectTemplate::new();
    config.set_value("retries", 3);

    let mut template = ObjectTemplate::new();
    template.set_template("config", &config);
    // The nested template was copied.
    config.set_value("late", 1);

    let ctx = Context::new(&isolate, Some(&template), 0);
    assert_eq!(eval_number(&ctx, "config.retries"), 3.0);
    assert_eq!(eval_string(&ctx, "typeof config.late"), "undefined");
    assert_eq!(eval_string(&ctx, "JSON.stringify(config)"), r#"{"retries":3}"#);
}

#[test]
fn test_each_context_gets_fresh_objects() {
    let isolate = create_test_isolate();
    let mut inner = ObjectTemplate::new();
    inner.set_value("n", 0);
    let mut template = ObjectTemplate::new();
    template.set_template("state", &inner);

    let a = Context::new(&isolate, Some(&template), 1);
    let b = Context::new(&isolate, Some(&template), 2);
    a.run_script("state.n = 5", "a.js").unwrap();
    assert_eq!(eval_number(&a, "state.n"), 5.0);
    assert_eq!(eval_number(&b, "state.n"), 0.0);
}

#[test]
fn test_host_function_arguments() {
    let isolate = create_test_isolate();
    let mut template = ObjectTemplate::new();
    template.set_function(
        "add",
        FunctionTemplate::new(|info| {
            let sum: f64 = info.args.iter().map(Value::to_number).sum();
            Ok(Value::Number(sum))
        }),
    );
    template.set_function(
        "second",
        FunctionTemplate::new(|info| Ok(info.arg(1))),
    );

    let ctx = Context::new(&isolate, Some(&template), 0);
    assert_eq!(eval_number(&ctx, "add(1, 2, 3)"), 6.0);
    assert_eq!(eval_string(&ctx, "second('a')"), "undefined");
    assert_eq!(eval_string(&ctx, "second('a', 'b')"), "b");
    assert_eq!(eval_string(&ctx, "typeof add"), "function");
    assert_eq!(eval_string(&ctx, "add"), "function add() { [native code] }");
}

#[test]
fn test_host_function_receives_this() {
    let isolate = create_test_isolate();
    let mut api = ObjectTemplate::new();
    api.set_value("label", "api");
    api.set_function(
        "whoami",
        FunctionTemplate::new(|info| {
            Ok(info.isolate.get_property(&info.this, "label"))
        }),
    );
    let mut template = ObjectTemplate::new();
    template.set_template("api", &api);

    let ctx = Context::new(&isolate, Some(&template), 0);
    assert_eq!(eval_string(&ctx, "api.whoami()"), "api");
}

#[test]
fn test_host_function_errors() {
    let isolate = create_test_isolate();
    let mut template = ObjectTemplate::new();
    template.set_function(
        "fail",
        FunctionTemplate::new(|info| Err(info.error(ErrorKind::RangeError, "too far"))),
    );

    let ctx = Context::new(&isolate, Some(&template), 0);
    let err = ctx.run_script("1;\nfail()", "host.js").unwrap_err();
    let Error::Runtime(script_error) = &err else {
        panic!("expected runtime error, got {:?}", err);
    };
    assert_eq!(script_error.message, "RangeError: too far");
    assert_eq!(script_error.location.as_ref().map(|l| l.line), Some(2));
    assert!(err.stack().unwrap().contains("host.js:2:1"));
}

#[test]
fn test_shared_function_template() {
    let isolate = create_test_isolate();
    let calls = Rc::new(Cell::new(0));
    let counter = {
        let calls = calls.clone();
        FunctionTemplate::new(move |_| {
            calls.set(calls.get() + 1);
            Ok(Value::Number(calls.get() as f64))
        })
    };
    let mut template = ObjectTemplate::new();
    template.set_function("tick", counter.clone());
    template.set_function("tock", counter);

    let a = Context::new(&isolate, Some(&template), 0);
    let b = Context::new(&isolate, Some(&template), 0);
    a.run_script("tick(); tock()", "a.js").unwrap();
    b.run_script("tick()", "b.js").unwrap();
    assert_eq!(calls.get(), 3);
}

#[test]
fn test_template_instances_from_host() {
    let isolate = create_test_isolate();
    let mut point = ObjectTemplate::new();
    point.set_value("x", 1).set_value("y", 2);

    let ctx = Context::new(&isolate, None, 0);
    let r = ctx.add_value(Value::Object(point.new_instance(&isolate)));
    assert_eq!(ctx.stringify_json(r).unwrap(), r#"{"x":1,"y":2}"#);
}

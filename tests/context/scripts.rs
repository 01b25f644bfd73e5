//! Compiled scripts owned by a context.

use super::{create_test_context, create_test_isolate};
use handlescope::{Error, UnboundScript};

#[test]
fn test_compile_once_run_many() {
    let isolate = create_test_isolate();
    let ctx = create_test_context(&isolate);
    ctx.run_script("var hits = 0;", "setup.js").unwrap();

    let script = ctx.compile_script("hits = hits + 1", "inc.js").unwrap();
    assert_eq!(script.origin(), "inc.js");
    for expected in 1..=5 {
        let r = ctx.run_compiled(script).unwrap();
        assert_eq!(ctx.to_number(r), expected as f64);
    }
    assert_eq!(ctx.script_count(), 1);
}

#[test]
fn test_compiled_scripts_keep_their_address() {
    let isolate = create_test_isolate();
    let ctx = create_test_context(&isolate);

    let first: *const UnboundScript = ctx.compile_script("1", "first.js").unwrap();
    let mut others = Vec::new();
    for i in 0..200 {
        let source = format!("{} * 2", i);
        let script: *const UnboundScript = ctx.compile_script(&source, "many.js").unwrap();
        others.push((script, i));
    }
    assert_eq!(ctx.script_count(), 201);

    // Earlier scripts remain valid after many later compiles.
    let first = unsafe { &*first };
    assert_eq!(first.origin(), "first.js");
    assert_eq!(ctx.to_number(ctx.run_compiled(first).unwrap()), 1.0);
    for (script, i) in others {
        let script = unsafe { &*script };
        let r = ctx.run_compiled(script).unwrap();
        assert_eq!(ctx.to_number(r), (i * 2) as f64);
    }
}

#[test]
fn test_compile_error_adds_no_script() {
    let isolate = create_test_isolate();
    let ctx = create_test_context(&isolate);

    let err = ctx.compile_script("let = 1", "bad.js").unwrap_err();
    assert!(matches!(err, Error::Compile(_)));
    assert_eq!(ctx.script_count(), 0);
}

#[test]
fn test_compiled_script_reports_its_origin() {
    let isolate = create_test_isolate();
    let ctx = create_test_context(&isolate);

    let script = ctx
        .compile_script("\n\nthrow new RangeError('out of range')", "origin.js")
        .unwrap();
    let err = ctx.run_compiled(script).unwrap_err();
    let script_error = err.script_error().unwrap();
    assert_eq!(script_error.message, "RangeError: out of range");
    let location = script_error.location.as_ref().unwrap();
    assert_eq!((location.origin.as_str(), location.line), ("origin.js", 3));
    assert!(err.stack().unwrap().contains("origin.js:3:1"));
}

#[test]
fn test_compiled_results_follow_current_scope() {
    let isolate = create_test_isolate();
    let ctx = create_test_context(&isolate);
    let script = ctx.compile_script("[1, 2, 3]", "array.js").unwrap();

    let scope = ctx.push_scope();
    let r = ctx.run_compiled(script).unwrap();
    assert_eq!(r.scope, scope);
    assert!(ctx.pop_scope(scope));
    assert!(!ctx.is_live(r));

    let again = ctx.run_compiled(script).unwrap();
    assert_eq!(ctx.stringify_json(again).unwrap(), "[1,2,3]");
}

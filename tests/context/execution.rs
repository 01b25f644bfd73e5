//! Script execution: completion values, bindings and diagnostics.

use super::{create_test_context, create_test_isolate, eval_number, eval_string};
use handlescope::{Error, ValueType};

#[test]
fn test_completion_value() {
    let isolate = create_test_isolate();
    let ctx = create_test_context(&isolate);
    assert_eq!(eval_number(&ctx, "1 + 2 * 3"), 7.0);
    assert_eq!(eval_number(&ctx, "(1 + 2) * 3"), 9.0);
    assert_eq!(eval_string(&ctx, "'a' + 'b' + 1"), "ab1");
    assert_eq!(eval_string(&ctx, "[1, 2, 3]"), "1,2,3");
    assert_eq!(eval_string(&ctx, "({ a: 1 })"), "[object Object]");
}

#[test]
fn test_empty_script_is_undefined() {
    let isolate = create_test_isolate();
    let ctx = create_test_context(&isolate);
    let r = ctx.run_script("", "test.js").unwrap();
    assert_eq!(ctx.type_of(r), ValueType::Undefined);
    let r = ctx.run_script("let unused = 1;", "test.js").unwrap();
    assert_eq!(ctx.type_of(r), ValueType::Undefined);
}

#[test]
fn test_operators() {
    let isolate = create_test_isolate();
    let ctx = create_test_context(&isolate);
    assert_eq!(eval_string(&ctx, "1 < 2 && 'yes'"), "yes");
    assert_eq!(eval_string(&ctx, "0 || 'fallback'"), "fallback");
    assert_eq!(eval_string(&ctx, "1 === 1 ? 'same' : 'different'"), "same");
    assert_eq!(eval_string(&ctx, "'1' == 1"), "true");
    assert_eq!(eval_string(&ctx, "'1' === 1"), "false");
    assert_eq!(eval_string(&ctx, "typeof 'x'"), "string");
    assert_eq!(eval_string(&ctx, "typeof notDeclared"), "undefined");
    assert_eq!(eval_number(&ctx, "-(4 - 10) % 4"), 2.0);
    assert_eq!(eval_string(&ctx, "!0"), "true");
}

#[test]
fn test_bindings_persist_across_scripts() {
    let isolate = create_test_isolate();
    let ctx = create_test_context(&isolate);
    ctx.run_script("let counter = 1; var total = 10;", "a.js").unwrap();
    ctx.run_script("counter = counter + 1; total = total + counter;", "b.js")
        .unwrap();
    assert_eq!(eval_number(&ctx, "counter"), 2.0);
    assert_eq!(eval_number(&ctx, "total"), 12.0);
    assert_eq!(eval_number(&ctx, "globalThis.total"), 12.0);
    assert_eq!(eval_string(&ctx, "typeof globalThis.counter"), "undefined");
}

#[test]
fn test_bindings_survive_collection() {
    let isolate = create_test_isolate();
    let ctx = create_test_context(&isolate);
    ctx.run_script("let keep = { n: [1, 2, 3] };", "test.js").unwrap();
    isolate.collect_garbage();
    assert_eq!(eval_string(&ctx, "keep.n"), "1,2,3");
}

#[test]
fn test_const_assignment_is_type_error() {
    let isolate = create_test_isolate();
    let ctx = create_test_context(&isolate);
    ctx.run_script("const fixed = 1;", "test.js").unwrap();

    let err = ctx.run_script("fixed = 2", "test.js").unwrap_err();
    let Error::Runtime(script_error) = &err else {
        panic!("expected runtime error, got {:?}", err);
    };
    assert_eq!(
        script_error.message,
        "TypeError: Assignment to constant variable."
    );
    assert_eq!(eval_number(&ctx, "fixed"), 1.0);
}

#[test]
fn test_redeclaration_is_rejected_before_running() {
    let isolate = create_test_isolate();
    let ctx = create_test_context(&isolate);
    ctx.run_script("let x = 1;", "test.js").unwrap();

    let err = ctx.run_script("var ran = true; let x = 2;", "test.js").unwrap_err();
    assert_eq!(
        err.script_error().map(|e| e.message.as_str()),
        Some("SyntaxError: Identifier 'x' has already been declared")
    );
    assert_eq!(eval_string(&ctx, "typeof ran"), "undefined");
    assert_eq!(eval_number(&ctx, "x"), 1.0);
}

#[test]
fn test_compile_error_location() {
    let isolate = create_test_isolate();
    let ctx = create_test_context(&isolate);

    let err = ctx.run_script("let x = ;", "broken.js").unwrap_err();
    let Error::Compile(script_error) = &err else {
        panic!("expected compile error, got {:?}", err);
    };
    assert_eq!(script_error.message, "SyntaxError: Unexpected token ';'");
    let location = script_error.location.as_ref().unwrap();
    assert_eq!(location.origin, "broken.js");
    assert_eq!((location.line, location.column), (1, 9));
    assert_eq!(
        err.to_string(),
        "SyntaxError: Unexpected token ';' at broken.js:1:9"
    );
    assert!(err.stack().unwrap().contains("broken.js:1:9"));
}

#[test]
fn test_compile_error_on_later_line() {
    let isolate = create_test_isolate();
    let ctx = create_test_context(&isolate);

    let err = ctx.run_script("let a = 1;\nlet b = a +;", "lines.js").unwrap_err();
    let location = err.script_error().unwrap().location.clone().unwrap();
    assert_eq!(location.line, 2);
}

#[test]
fn test_reference_error() {
    let isolate = create_test_isolate();
    let ctx = create_test_context(&isolate);

    let err = ctx.run_script("missing + 1", "test.js").unwrap_err();
    assert!(matches!(err, Error::Runtime(_)));
    assert_eq!(
        err.script_error().unwrap().message,
        "ReferenceError: missing is not defined"
    );
}

#[test]
fn test_type_errors() {
    let isolate = create_test_isolate();
    let ctx = create_test_context(&isolate);

    let err = ctx.run_script("null.x", "test.js").unwrap_err();
    assert_eq!(
        err.script_error().unwrap().message,
        "TypeError: Cannot read properties of null (reading 'x')"
    );

    let err = ctx.run_script("let notFn = 1; notFn()", "test.js").unwrap_err();
    assert_eq!(
        err.script_error().unwrap().message,
        "TypeError: notFn is not a function"
    );
}

#[test]
fn test_thrown_error_carries_stack() {
    let isolate = create_test_isolate();
    let ctx = create_test_context(&isolate);

    let err = ctx
        .run_script("throw new Error('boom')", "throw.js")
        .unwrap_err();
    let script_error = err.script_error().unwrap();
    assert_eq!(script_error.message, "Error: boom");
    let stack = script_error.stack.as_deref().unwrap();
    assert!(stack.starts_with("Error: boom"));
    assert!(stack.contains("at throw.js:1:1"));
}

#[test]
fn test_thrown_primitive_has_no_stack() {
    let isolate = create_test_isolate();
    let ctx = create_test_context(&isolate);

    let err = ctx.run_script("throw 'plain'", "test.js").unwrap_err();
    assert_eq!(err.script_error().unwrap().message, "plain");
    assert!(err.stack().is_none());
}

#[test]
fn test_failed_run_registers_nothing() {
    let isolate = create_test_isolate();
    let ctx = create_test_context(&isolate);

    let scope = ctx.push_scope();
    ctx.new_value(1);
    assert!(ctx.run_script("throw new TypeError('no')", "test.js").is_err());
    assert!(ctx.run_script("(", "test.js").is_err());
    assert_eq!(ctx.value_count(), 1);
    assert_eq!(ctx.current_scope(), scope);
    assert!(ctx.pop_scope(scope));
}

#[test]
fn test_contexts_are_isolated() {
    let isolate = create_test_isolate();
    let a = create_test_context(&isolate);
    let b = create_test_context(&isolate);

    a.run_script("var shared = 'a';", "a.js").unwrap();
    assert_eq!(eval_string(&b, "typeof shared"), "undefined");
    b.run_script("var shared = 'b';", "b.js").unwrap();
    assert_eq!(eval_string(&a, "shared"), "a");
}

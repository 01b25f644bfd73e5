//! Recovering the owning context from runtime callbacks.

use super::{create_test_context, create_test_isolate, eval_number};
use handlescope::{
    Context, EMBEDDER_SLOT_CONTEXT, EngineContext, ErrorKind, FunctionTemplate, Isolate,
    IsolateOptions, ObjectTemplate, Value, ValueRef,
};

#[test]
fn test_from_engine_finds_each_owner() {
    let isolate = create_test_isolate();
    let a = Context::new(&isolate, None, 1);
    let b = Context::new(&isolate, None, 2);

    // Both wrappers outlive the references below.
    let found_a = unsafe { Context::from_engine(a.engine()) }.unwrap();
    let found_b = unsafe { Context::from_engine(b.engine()) }.unwrap();
    assert!(std::ptr::eq(found_a, &*a));
    assert!(std::ptr::eq(found_b, &*b));
    assert_eq!(found_a.owner_token(), 1);
    assert_eq!(found_b.owner_token(), 2);
}

#[test]
fn test_owner_follows_moved_handle() {
    let isolate = create_test_isolate();
    let template = owner_template();
    let first = Context::new(&isolate, Some(&template), 1);
    let address: *const Context = &*first;

    // Moving the pinned handle moves the box pointer, never the wrapper.
    let mut contexts = vec![first];
    contexts.push(Context::new(&isolate, Some(&template), 2));
    let first = contexts.remove(0);
    assert!(std::ptr::eq(&*first, address));

    let found = unsafe { Context::from_engine(first.engine()) }.unwrap();
    assert!(std::ptr::eq(found, &*first));
    assert_eq!(eval_number(&first, "ownerToken()"), 1.0);
    assert_eq!(eval_number(&contexts[0], "ownerToken()"), 2.0);
}

#[test]
fn test_from_engine_after_destroy() {
    let isolate = create_test_isolate();
    let ctx = create_test_context(&isolate);
    let engine = ctx.engine().clone();
    assert!(engine.aligned_pointer(EMBEDDER_SLOT_CONTEXT).is_some());

    ctx.destroy();
    assert!(engine.is_disposed());
    assert!(engine.aligned_pointer(EMBEDDER_SLOT_CONTEXT).is_none());
    assert!(unsafe { Context::from_engine(&engine) }.is_none());
}

#[test]
fn test_reused_memory_is_not_mistaken_for_old_owner() {
    let isolate = create_test_isolate();
    let template = owner_template();
    let old = Context::new(&isolate, Some(&template), 7);
    let old_engine = old.engine().clone();
    old.destroy();

    let fresh = Context::new(&isolate, Some(&template), 99);
    assert!(unsafe { Context::from_engine(&old_engine) }.is_none());
    assert_eq!(eval_number(&fresh, "ownerToken()"), 99.0);
}

#[test]
fn test_runtime_slot_is_reserved() {
    let isolate = create_test_isolate();
    let ctx = create_test_context(&isolate);
    let engine = ctx.engine();
    assert!(engine.embedder_slot_count() >= 2);
    assert!(!engine.set_aligned_pointer(0, None));
    assert!(!engine.set_aligned_pointer(engine.embedder_slot_count(), None));
}

#[test]
fn test_context_slot_cannot_be_overwritten() {
    let isolate = create_test_isolate();
    let ctx = Context::new(&isolate, Some(&owner_template()), 5);

    assert!(!ctx.engine().set_aligned_pointer(EMBEDDER_SLOT_CONTEXT, None));
    assert!(ctx.engine().aligned_pointer(EMBEDDER_SLOT_CONTEXT).is_some());
    assert_eq!(eval_number(&ctx, "ownerToken()"), 5.0);
}

#[test]
fn test_extra_slots_belong_to_the_host() {
    let isolate = Isolate::with_options(IsolateOptions::new().embedder_slots(3));
    let ctx = Context::new(&isolate, None, 0);
    let mut marker = 0u8;
    let pointer = std::ptr::NonNull::from(&mut marker).cast();

    assert!(ctx.engine().set_aligned_pointer(2, Some(pointer)));
    assert_eq!(ctx.engine().aligned_pointer(2), Some(pointer));
    assert!(unsafe { Context::from_engine(ctx.engine()) }.is_some());
}

fn owner_template() -> ObjectTemplate {
    let mut template = ObjectTemplate::new();
    template.set_function(
        "ownerToken",
        FunctionTemplate::new(|info| {
            let ctx = info
                .owner()
                .ok_or_else(|| info.error(ErrorKind::Error, "no owner"))?;
            Ok(Value::Number(ctx.owner_token() as f64))
        }),
    );
    template.set_function(
        "remember",
        FunctionTemplate::new(|info| {
            let ctx = info
                .owner()
                .ok_or_else(|| info.error(ErrorKind::Error, "no owner"))?;
            let r = ctx.add_value(info.arg(0));
            Ok(Value::Number(r.index as f64))
        }),
    );
    template
}

#[test]
fn test_callback_recovers_its_context() {
    let isolate = create_test_isolate();
    let template = owner_template();
    let a = Context::new(&isolate, Some(&template), 11);
    let b = Context::new(&isolate, Some(&template), 22);

    assert_eq!(eval_number(&a, "ownerToken()"), 11.0);
    assert_eq!(eval_number(&b, "ownerToken()"), 22.0);
    assert_eq!(eval_number(&a, "ownerToken() + 1"), 12.0);
}

#[test]
fn test_callback_owner_is_the_running_context() {
    let isolate = create_test_isolate();
    let mut template = ObjectTemplate::new();
    template.set_function(
        "isOwner",
        FunctionTemplate::new(|info| {
            let same = info
                .owner()
                .is_some_and(|ctx| EngineContext::ptr_eq(ctx.engine(), info.context));
            Ok(Value::Boolean(same))
        }),
    );
    let ctx = Context::new(&isolate, Some(&template), 0);

    let r = ctx.run_script("isOwner()", "test.js").unwrap();
    assert!(ctx.to_boolean(r));
}

#[test]
fn test_callback_registers_values_in_its_context() {
    let isolate = create_test_isolate();
    let ctx = Context::new(&isolate, Some(&owner_template()), 0);

    let scope = ctx.push_scope();
    let index = eval_number(&ctx, "remember({ kept: 'yes' })") as usize;
    let stored = ValueRef { scope, index };
    assert!(ctx.is_live(stored));
    isolate.collect_garbage();
    assert_eq!(ctx.stringify_json(stored).unwrap(), r#"{"kept":"yes"}"#);
    assert!(ctx.pop_scope(scope));
    assert!(!ctx.is_live(stored));
}

#[test]
fn test_current_context_during_callback() {
    let isolate = create_test_isolate();
    let mut template = ObjectTemplate::new();
    template.set_function(
        "isCurrent",
        FunctionTemplate::new(|info| {
            let current = info.isolate.current_context();
            let same = current
                .map(|c| EngineContext::ptr_eq(&c, info.context))
                .unwrap_or(false);
            Ok(Value::Boolean(same && info.isolate.is_locked()))
        }),
    );
    let ctx = Context::new(&isolate, Some(&template), 0);

    let r = ctx.run_script("isCurrent()", "test.js").unwrap();
    assert!(ctx.to_boolean(r));
    assert!(isolate.current_context().is_none());
    assert!(!isolate.is_locked());
}

//! Scope protocol: push, pop, staleness and reuse of indices.

use std::io;
use std::sync::{Arc, Mutex};

use tracing_subscriber::fmt::MakeWriter;

use super::{create_test_context, create_test_isolate};
use handlescope::{ScopeId, ValueRef, ValueType};

/// Collects formatted log output for assertions.
#[derive(Clone, Default)]
struct LogBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl LogBuffer {
    fn contents(&self) -> String {
        String::from_utf8(self.bytes.lock().unwrap().clone()).unwrap()
    }
}

struct LogBufferWriter<'a> {
    bytes: &'a Arc<Mutex<Vec<u8>>>,
}

impl io::Write for LogBufferWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogBufferWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        LogBufferWriter { bytes: &self.bytes }
    }
}

#[test]
fn test_pop_invalidates_scope_values() {
    let isolate = create_test_isolate();
    let ctx = create_test_context(&isolate);

    let s1 = ctx.push_scope();
    let x = ctx.new_value("x");
    let y = ctx.new_value("y");
    assert_eq!(x, ValueRef { scope: s1, index: 0 });
    assert_eq!(y, ValueRef { scope: s1, index: 1 });

    assert!(ctx.pop_scope(s1));
    assert!(!ctx.is_live(x));
    assert!(!ctx.is_live(y));
    assert_eq!(ctx.value_count(), 0);
}

#[test]
fn test_nested_scopes() {
    let isolate = create_test_isolate();
    let ctx = create_test_context(&isolate);

    let s1 = ctx.push_scope();
    let x = ctx.new_value(1);
    let s2 = ctx.push_scope();
    let y = ctx.new_value(2);
    assert_eq!(y, ValueRef { scope: s2, index: 1 });

    assert_eq!(ctx.to_number(x), 1.0);
    assert_eq!(ctx.to_number(y), 2.0);

    assert!(ctx.pop_scope(s2));
    assert_eq!(ctx.value_count(), 1);
    assert_eq!(ctx.to_number(x), 1.0);

    assert!(ctx.pop_scope(s1));
    assert_eq!(ctx.value_count(), 0);
}

#[test]
fn test_pop_of_unknown_scope_changes_nothing() {
    let isolate = create_test_isolate();
    let ctx = create_test_context(&isolate);

    let s1 = ctx.push_scope();
    let x = ctx.new_value(true);
    let never_pushed = ScopeId::from_raw(s1.as_u64() + 1);

    assert!(!ctx.pop_scope(never_pushed));
    assert_eq!(ctx.current_scope(), s1);
    assert_eq!(ctx.scope_depth(), 1);
    assert_eq!(ctx.value_count(), 1);
    assert!(ctx.to_boolean(x));
}

#[test]
fn test_pop_of_outer_scope_is_rejected() {
    let isolate = create_test_isolate();
    let ctx = create_test_context(&isolate);

    let s1 = ctx.push_scope();
    let s2 = ctx.push_scope();
    assert!(!ctx.pop_scope(s1));
    assert_eq!(ctx.current_scope(), s2);
    assert!(ctx.pop_scope(s2));
    assert!(ctx.pop_scope(s1));
    assert!(!ctx.pop_scope(s1));
    assert!(!ctx.pop_scope(ScopeId::ROOT));
}

#[test]
fn test_reused_index_from_new_scope() {
    let isolate = create_test_isolate();
    let ctx = create_test_context(&isolate);

    let s1 = ctx.push_scope();
    let old = ctx.new_value("old");
    assert!(ctx.pop_scope(s1));

    let s2 = ctx.push_scope();
    let new = ctx.new_value("new");
    assert_eq!(old.index, new.index);
    assert_ne!(old.scope, new.scope);

    assert!(!ctx.is_live(old));
    assert_eq!(ctx.type_of(old), ValueType::Undefined);
    assert_eq!(ctx.to_display_string(new), "new");
    assert!(ctx.pop_scope(s2));
}

#[test]
fn test_root_scope_values_outlive_scopes() {
    let isolate = create_test_isolate();
    let ctx = create_test_context(&isolate);

    let root = ctx.new_value(42);
    assert_eq!(root.scope, ScopeId::ROOT);
    {
        let scope = ctx.scope();
        let inner = ctx.new_value(1);
        assert_eq!(inner.scope, scope.id());
    }
    assert_eq!(ctx.scope_depth(), 0);
    assert_eq!(ctx.to_number(root), 42.0);
}

#[test]
fn test_value_scope_close_reports_pop() {
    let isolate = create_test_isolate();
    let ctx = create_test_context(&isolate);

    let outer = ctx.scope();
    let r = ctx.new_value(5);
    assert!(outer.close());
    assert!(!ctx.is_live(r));
    assert_eq!(ctx.scope_depth(), 0);
}

#[test]
fn test_script_results_register_under_current_scope() {
    let isolate = create_test_isolate();
    let ctx = create_test_context(&isolate);

    let s1 = ctx.push_scope();
    let r = ctx.run_script("[1, 2]", "test.js").unwrap();
    assert_eq!(r.scope, s1);
    assert!(ctx.pop_scope(s1));
    assert!(!ctx.is_live(r));
}

/// Deterministic xorshift generator.
struct Rng(u64);

impl Rng {
    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }
}

/// Random LIFO walk checked against a shadow model of which refs are live.
#[test]
fn test_random_lifo_walk_matches_model() {
    let isolate = create_test_isolate();
    let ctx = create_test_context(&isolate);
    let mut rng = Rng(0x9E37_79B9_7F4A_7C15);

    // (scope id, table length when pushed)
    let mut open: Vec<(ScopeId, usize)> = Vec::new();
    let mut live: Vec<(ValueRef, u64, bool)> = Vec::new();
    let mut dead: Vec<ValueRef> = Vec::new();
    let mut last_scope = ScopeId::ROOT;
    let mut counter = 0u64;

    for _ in 0..1500 {
        match rng.next() % 10 {
            0..=2 => {
                let id = ctx.push_scope();
                assert!(id > last_scope, "scope ids must strictly increase");
                last_scope = id;
                open.push((id, ctx.value_count()));
            }
            3..=4 if !open.is_empty() => {
                let Some(&(id, base)) = open.last() else {
                    continue;
                };

                // Popping anything but the innermost scope is a no-op.
                if open.len() >= 2 {
                    let (outer, _) = open[open.len() - 2];
                    let len = ctx.value_count();
                    assert!(!ctx.pop_scope(outer));
                    assert_eq!(ctx.value_count(), len);
                    assert_eq!(ctx.current_scope(), id);
                    assert_eq!(ctx.scope_depth(), open.len());
                }

                assert!(ctx.pop_scope(id));
                open.pop();
                assert_eq!(ctx.value_count(), base);

                let (released, kept): (Vec<_>, Vec<_>) =
                    live.into_iter().partition(|(r, _, _)| r.index >= base);
                live = kept;
                dead.extend(released.into_iter().map(|(r, _, _)| r));
            }
            _ => {
                counter += 1;
                let len = ctx.value_count();
                let (r, is_object) = if counter % 3 == 0 {
                    (ctx.parse_json(&format!("[{}]", counter)).unwrap(), true)
                } else {
                    (ctx.new_value(counter as f64), false)
                };
                assert_eq!(r.scope, ctx.current_scope());
                assert_eq!(r.index, len);
                assert_eq!(ctx.value_count(), len + 1);
                live.push((r, counter, is_object));
            }
        }

        for &(r, n, is_object) in &live {
            if is_object {
                assert_eq!(ctx.stringify_json(r).unwrap(), format!("[{}]", n));
            } else {
                assert_eq!(ctx.to_number(r), n as f64);
            }
        }
        for &r in &dead {
            assert!(!ctx.is_live(r), "{} should be stale", r);
        }
    }

    while let Some((id, base)) = open.pop() {
        assert!(ctx.pop_scope(id));
        assert_eq!(ctx.value_count(), base);
    }
}

#[test]
fn test_stale_read_logs_warning() {
    let logs = LogBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .with_ansi(false)
        .with_writer(logs.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let isolate = create_test_isolate();
    let ctx = create_test_context(&isolate);
    let scope = ctx.push_scope();
    let live = ctx.new_value("live");
    assert_eq!(ctx.to_display_string(live), "live");
    assert!(logs.contents().is_empty());

    assert!(ctx.pop_scope(scope));
    assert_eq!(ctx.type_of(live), ValueType::Undefined);

    let output = logs.contents();
    assert!(output.contains("WARN"), "expected a warning, got: {output}");
    assert!(
        output.contains("use of stale value reference"),
        "expected stale reference message, got: {output}"
    );
    assert!(
        output.contains(&format!("value={}", live)),
        "expected the token in the warning, got: {output}"
    );
}

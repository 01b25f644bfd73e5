//! Reference scripting runtime.
//!
//! A small garbage-collected script engine that supplies the primitives the
//! context wrapper sequences: persistent handles with explicit reset, per
//! context embedder slots, compile/run/JSON entry points, and an execution
//! lock with an entered-context stack.
//!
//! Collection only happens at safe points. While a script is executing,
//! [`Isolate::collect_garbage`] and [`Isolate::maybe_collect`] do nothing, so
//! intermediate values held on the native stack never need rooting.

pub mod ast;
pub mod interp;
pub mod json;
pub mod lexer;
pub mod parser;
pub mod template;
pub mod value;

use std::cell::{Cell, RefCell};
use std::ffi::c_void;
use std::fmt;
use std::ptr::NonNull;
use std::rc::{Rc, Weak};

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::trace;

use crate::config::IsolateOptions;
use crate::context::EMBEDDER_SLOT_CONTEXT;
use crate::error::{ScriptError, SourceLocation};
use crate::gc::{Gc, GcStats, Heap};

pub use ast::Program;
pub use template::{FunctionTemplate, HostValue, ObjectTemplate};
pub use value::{
    CheapClone, JsObject, JsString, NativeFunction, ObjectKind, Value, ValueType, number_to_string,
};

/// Embedder slot owned by the runtime itself; hosts cannot write it.
pub const EMBEDDER_SLOT_RUNTIME: usize = 0;

type SharedHeap = Rc<RefCell<Heap<JsObject>>>;

// ============================================================================
// Isolate
// ============================================================================

struct IsolateInner {
    heap: SharedHeap,
    lock_depth: Cell<usize>,
    executing: Cell<usize>,
    entered: RefCell<Vec<EngineContext>>,
    options: IsolateOptions,
}

/// An isolated runtime instance: one heap, one execution lock.
///
/// Cloning yields another handle to the same isolate.
#[derive(Clone)]
pub struct Isolate {
    inner: Rc<IsolateInner>,
}

impl Isolate {
    pub fn new() -> Self {
        Self::with_options(IsolateOptions::default())
    }

    pub fn with_options(options: IsolateOptions) -> Self {
        Self {
            inner: Rc::new(IsolateInner {
                heap: Rc::new(RefCell::new(Heap::with_threshold(options.gc_threshold))),
                lock_depth: Cell::new(0),
                executing: Cell::new(0),
                entered: RefCell::new(Vec::new()),
                options,
            }),
        }
    }

    pub fn options(&self) -> IsolateOptions {
        self.inner.options
    }

    pub fn ptr_eq(a: &Isolate, b: &Isolate) -> bool {
        Rc::ptr_eq(&a.inner, &b.inner)
    }

    /// Acquire the execution lock. Re-entrant; released when the last guard
    /// drops.
    pub fn lock(&self) -> Locker<'_> {
        self.inner.lock_depth.set(self.inner.lock_depth.get() + 1);
        Locker { isolate: self }
    }

    pub fn is_locked(&self) -> bool {
        self.inner.lock_depth.get() > 0
    }

    /// Innermost entered context, if any.
    pub fn current_context(&self) -> Option<EngineContext> {
        self.inner.entered.borrow().last().cloned()
    }

    /// True while a script is running on this isolate.
    pub fn is_executing(&self) -> bool {
        self.inner.executing.get() > 0
    }

    fn begin_execution(&self) -> ExecutionGuard<'_> {
        self.inner.executing.set(self.inner.executing.get() + 1);
        ExecutionGuard { isolate: self }
    }

    // ---- heap access ----

    pub fn alloc(&self, object: JsObject) -> Gc {
        self.inner.heap.borrow_mut().alloc(object)
    }

    pub fn with_object<R>(&self, gc: Gc, f: impl FnOnce(&JsObject) -> R) -> Option<R> {
        self.inner.heap.borrow().get(gc).map(f)
    }

    pub fn with_object_mut<R>(&self, gc: Gc, f: impl FnOnce(&mut JsObject) -> R) -> Option<R> {
        self.inner.heap.borrow_mut().get_mut(gc).map(f)
    }

    /// Root `gc` for as long as the returned handle lives.
    pub fn persistent(&self, gc: Gc) -> Persistent {
        Persistent::new(self, gc)
    }

    pub fn gc_stats(&self) -> GcStats {
        self.inner.heap.borrow().stats()
    }

    pub fn set_gc_threshold(&self, threshold: usize) {
        self.inner.heap.borrow_mut().set_gc_threshold(threshold);
    }

    /// Run a full collection. Does nothing while a script is executing.
    /// Returns the number of objects freed.
    pub fn collect_garbage(&self) -> usize {
        if self.is_executing() {
            return 0;
        }
        let freed = self.inner.heap.borrow_mut().collect(std::iter::empty());
        trace!(freed, "gc cycle");
        freed
    }

    /// Collect if enough allocations happened since the last cycle.
    pub fn maybe_collect(&self) -> usize {
        let due = self.inner.heap.borrow().should_collect();
        if due { self.collect_garbage() } else { 0 }
    }

    // ---- values ----

    pub fn value_type(&self, value: &Value) -> ValueType {
        match value {
            Value::Undefined => ValueType::Undefined,
            Value::Null => ValueType::Null,
            Value::Boolean(_) => ValueType::Boolean,
            Value::Number(_) => ValueType::Number,
            Value::String(_) => ValueType::String,
            Value::Object(gc) => self
                .with_object(*gc, JsObject::value_type)
                .unwrap_or(ValueType::Undefined),
        }
    }

    /// ToString, as script code would render the value.
    pub fn to_display_string(&self, value: &Value) -> String {
        let mut visiting = FxHashSet::default();
        self.display(value, &mut visiting)
    }

    fn display(&self, value: &Value, visiting: &mut FxHashSet<Gc>) -> String {
        match value {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Number(n) => number_to_string(*n),
            Value::String(s) => s.to_string(),
            Value::Object(gc) => {
                // Cyclic arrays print the repeated element as empty.
                if !visiting.insert(*gc) {
                    return String::new();
                }
                let text = self.display_object(*gc, visiting);
                visiting.remove(gc);
                text
            }
        }
    }

    fn display_object(&self, gc: Gc, visiting: &mut FxHashSet<Gc>) -> String {
        enum Shape {
            Array(Vec<Value>),
            Function(JsString),
            Error(Option<Value>, Option<Value>),
            Plain,
        }

        let shape = self.with_object(gc, |obj| match &obj.kind {
            ObjectKind::Array(elements) => Shape::Array(elements.clone()),
            ObjectKind::Function(func) => Shape::Function(func.name.cheap_clone()),
            ObjectKind::Error => Shape::Error(
                obj.get_own("name").cloned(),
                obj.get_own("message").cloned(),
            ),
            ObjectKind::Ordinary => Shape::Plain,
        });

        match shape {
            Some(Shape::Array(elements)) => elements
                .iter()
                .map(|element| {
                    if element.is_null_or_undefined() {
                        String::new()
                    } else {
                        self.display(element, visiting)
                    }
                })
                .collect::<Vec<_>>()
                .join(","),
            Some(Shape::Function(name)) => format!("function {}() {{ [native code] }}", name),
            Some(Shape::Error(name, message)) => {
                let name = match name {
                    Some(v) if !matches!(v, Value::Undefined) => self.display(&v, visiting),
                    _ => "Error".to_string(),
                };
                let message = match message {
                    Some(v) if !matches!(v, Value::Undefined) => self.display(&v, visiting),
                    _ => String::new(),
                };
                if message.is_empty() {
                    name
                } else if name.is_empty() {
                    message
                } else {
                    format!("{}: {}", name, message)
                }
            }
            Some(Shape::Plain) => "[object Object]".to_string(),
            None => String::new(),
        }
    }

    /// Property read. Primitives other than strings have no properties here.
    pub fn get_property(&self, target: &Value, key: &str) -> Value {
        match target {
            Value::String(s) if key == "length" => {
                Value::Number(s.as_str().encode_utf16().count() as f64)
            }
            Value::Object(gc) => self
                .with_object(*gc, |obj| obj.get(key))
                .flatten()
                .unwrap_or_default(),
            _ => Value::Undefined,
        }
    }

    /// Property write. Returns false if `target` is not a live object.
    pub fn set_property(&self, target: Gc, key: JsString, value: Value) -> bool {
        self.with_object_mut(target, |obj| obj.set(key, value))
            .is_some()
    }

    /// Allocate an error object of the given kind.
    pub fn new_error(&self, kind: ErrorKind, message: &str) -> Value {
        let mut error = JsObject {
            kind: ObjectKind::Error,
            ..JsObject::default()
        };
        let text = if message.is_empty() {
            kind.name().to_string()
        } else {
            format!("{}: {}", kind.name(), message)
        };
        error.set(JsString::from("name"), Value::from(kind.name()));
        error.set(JsString::from("message"), Value::from(message));
        error.set(JsString::from("stack"), Value::from(text));
        Value::Object(self.alloc(error))
    }

    // ---- contexts ----

    /// Create a runtime context whose global object carries the built-in
    /// globals plus the entries of `template`.
    pub fn new_context(&self, template: Option<&ObjectTemplate>) -> EngineContext {
        let _locker = self.lock();
        let global = self.alloc(JsObject::new());
        let lexical = self.alloc(JsObject::new());
        let global_root = self.persistent(global);
        let lexical_root = self.persistent(lexical);

        interp::install_globals(self, global);
        if let Some(template) = template {
            template.apply_to(self, global);
        }

        let slots = (0..self.inner.options.effective_embedder_slots())
            .map(|_| Cell::new(None))
            .collect();

        EngineContext {
            inner: Rc::new(EngineContextInner {
                isolate: self.clone(),
                global: global_root,
                lexical: lexical_root,
                bindings: RefCell::new(FxHashMap::default()),
                slots,
            }),
        }
    }
}

impl Default for Isolate {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Isolate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Isolate")
            .field("locked", &self.is_locked())
            .field("executing", &self.is_executing())
            .field("options", &self.inner.options)
            .finish()
    }
}

/// RAII guard for the isolate's execution lock.
pub struct Locker<'a> {
    isolate: &'a Isolate,
}

impl Drop for Locker<'_> {
    fn drop(&mut self) {
        let depth = &self.isolate.inner.lock_depth;
        depth.set(depth.get().saturating_sub(1));
    }
}

struct ExecutionGuard<'a> {
    isolate: &'a Isolate,
}

impl Drop for ExecutionGuard<'_> {
    fn drop(&mut self) {
        let executing = &self.isolate.inner.executing;
        executing.set(executing.get().saturating_sub(1));
    }
}

// ============================================================================
// Persistent
// ============================================================================

/// Strong handle that keeps one heap object alive until reset or dropped.
pub struct Persistent {
    gc: Gc,
    heap: Weak<RefCell<Heap<JsObject>>>,
    rooted: Cell<bool>,
}

impl Persistent {
    fn new(isolate: &Isolate, gc: Gc) -> Self {
        let rooted = isolate.inner.heap.borrow_mut().root(gc);
        Self {
            gc,
            heap: Rc::downgrade(&isolate.inner.heap),
            rooted: Cell::new(rooted),
        }
    }

    /// The object, or `None` once the handle has been reset.
    pub fn get(&self) -> Option<Gc> {
        self.rooted.get().then_some(self.gc)
    }

    pub fn is_empty(&self) -> bool {
        !self.rooted.get()
    }

    /// Release the root. Safe to call any number of times.
    pub fn reset(&self) {
        if !self.rooted.replace(false) {
            return;
        }
        if let Some(heap) = self.heap.upgrade() {
            match heap.try_borrow_mut() {
                Ok(mut heap) => heap.unroot(self.gc),
                Err(_) => tracing::warn!(gc = ?self.gc, "heap busy; persistent root leaked"),
            }
        }
    }
}

impl Drop for Persistent {
    fn drop(&mut self) {
        self.reset();
    }
}

impl fmt::Debug for Persistent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Persistent")
            .field("gc", &self.gc)
            .field("rooted", &self.rooted.get())
            .finish()
    }
}

// ============================================================================
// EngineContext
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BindingKind {
    Let,
    Const,
}

struct EngineContextInner {
    isolate: Isolate,
    global: Persistent,
    /// Holds `let`/`const` bindings shared by every script run in the context.
    lexical: Persistent,
    bindings: RefCell<FxHashMap<JsString, BindingKind>>,
    slots: Box<[Cell<Option<NonNull<c_void>>>]>,
}

/// A runtime execution context: a global object plus top-level bindings.
///
/// Cloning yields another handle to the same context.
#[derive(Clone)]
pub struct EngineContext {
    inner: Rc<EngineContextInner>,
}

impl EngineContext {
    pub fn isolate(&self) -> &Isolate {
        &self.inner.isolate
    }

    pub fn ptr_eq(a: &EngineContext, b: &EngineContext) -> bool {
        Rc::ptr_eq(&a.inner, &b.inner)
    }

    /// Global object handle. No longer kept alive after [`dispose`](Self::dispose).
    pub fn global(&self) -> Gc {
        self.inner.global.gc
    }

    pub(crate) fn lexical(&self) -> Gc {
        self.inner.lexical.gc
    }

    pub(crate) fn binding(&self, name: &str) -> Option<BindingKind> {
        self.inner.bindings.borrow().get(name).copied()
    }

    pub(crate) fn declare(&self, name: JsString, kind: BindingKind) {
        self.inner.bindings.borrow_mut().insert(name, kind);
    }

    pub fn embedder_slot_count(&self) -> usize {
        self.inner.slots.len()
    }

    /// Store a host pointer in an embedder slot. Returns false for the
    /// runtime's own slot, the slot holding the owning
    /// [`Context`](crate::Context), or an out-of-range index.
    pub fn set_aligned_pointer(&self, index: usize, pointer: Option<NonNull<c_void>>) -> bool {
        if index == EMBEDDER_SLOT_RUNTIME || index == EMBEDDER_SLOT_CONTEXT {
            return false;
        }
        self.set_slot(index, pointer)
    }

    pub(crate) fn set_slot(&self, index: usize, pointer: Option<NonNull<c_void>>) -> bool {
        match self.inner.slots.get(index) {
            Some(slot) => {
                slot.set(pointer);
                true
            }
            None => false,
        }
    }

    pub fn aligned_pointer(&self, index: usize) -> Option<NonNull<c_void>> {
        self.inner.slots.get(index).and_then(Cell::get)
    }

    /// Make this the isolate's current context until the guard drops.
    pub fn enter(&self) -> ContextScope<'_> {
        self.inner.isolate.inner.entered.borrow_mut().push(self.clone());
        ContextScope { context: self }
    }

    /// Release the context's roots and embedder slots. Idempotent.
    pub fn dispose(&self) {
        for slot in self.inner.slots.iter() {
            slot.set(None);
        }
        self.inner.bindings.borrow_mut().clear();
        self.inner.lexical.reset();
        self.inner.global.reset();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.global.is_empty()
    }

    /// Run a compiled program in this context.
    pub(crate) fn run(&self, program: &Program, origin: &str) -> Result<Value, ScriptError> {
        if self.is_disposed() {
            return Err(ScriptError::new("Error: context has been disposed"));
        }
        let isolate = self.isolate();
        let _locker = isolate.lock();
        let _scope = self.enter();
        let _executing = isolate.begin_execution();
        interp::run(self, program, origin)
    }
}

impl fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineContext")
            .field("global", &self.inner.global)
            .field("slots", &self.inner.slots.len())
            .finish()
    }
}

/// RAII guard returned by [`EngineContext::enter`].
pub struct ContextScope<'a> {
    context: &'a EngineContext,
}

impl ContextScope<'_> {
    pub fn context(&self) -> &EngineContext {
        self.context
    }
}

impl Drop for ContextScope<'_> {
    fn drop(&mut self) {
        self.context.inner.isolate.inner.entered.borrow_mut().pop();
    }
}

// ============================================================================
// Compilation and native calls
// ============================================================================

/// Compile source text. Syntax errors carry the origin, line and column.
pub fn compile(source: &str, origin: &str) -> Result<Program, ScriptError> {
    parser::parse(source).map_err(|err| {
        let message = format!("SyntaxError: {}", err.message);
        let location = SourceLocation {
            origin: origin.to_string(),
            line: err.span.line,
            column: err.span.column,
        };
        let stack = format!("{}\n    at {}", message, location);
        ScriptError::new(message)
            .with_location(location)
            .with_stack(stack)
    })
}

/// Arguments of a native function call.
pub struct CallInfo<'a> {
    pub isolate: &'a Isolate,
    /// Context the call runs in. [`owner`](Self::owner) recovers the host
    /// wrapper from it.
    pub context: &'a EngineContext,
    pub this: Value,
    pub args: &'a [Value],
}

impl CallInfo<'_> {
    /// Argument `index`, or undefined when absent.
    pub fn arg(&self, index: usize) -> Value {
        self.args.get(index).cloned().unwrap_or_default()
    }

    /// Build an error value suitable for returning as `Err`.
    pub fn error(&self, kind: ErrorKind, message: &str) -> Value {
        self.isolate.new_error(kind, message)
    }
}

/// Built-in error constructors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Error,
    TypeError,
    RangeError,
    ReferenceError,
    SyntaxError,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 5] = [
        ErrorKind::Error,
        ErrorKind::TypeError,
        ErrorKind::RangeError,
        ErrorKind::ReferenceError,
        ErrorKind::SyntaxError,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::Error => "Error",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::RangeError => "RangeError",
            ErrorKind::ReferenceError => "ReferenceError",
            ErrorKind::SyntaxError => "SyntaxError",
        }
    }
}

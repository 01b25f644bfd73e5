//! Host-facing context wrapper.
//!
//! A [`Context`] owns a runtime context, the scoped [`ValueTable`] that backs
//! every [`ValueRef`] it hands out, and the compiled scripts created through
//! it. Native callbacks recover the wrapper with [`CallInfo::owner`], which
//! reads a pointer embedded in the runtime context rather than consulting any
//! global registry. The wrapper is pinned so that pointer never dangles.
//!
//! All methods take `&self`; table state lives in a `RefCell` so a host
//! callback running inside a script can still register values.

use std::borrow::Cow;
use std::cell::{Cell, RefCell};
use std::ffi::c_void;
use std::fmt;
use std::marker::PhantomPinned;
use std::pin::Pin;
use std::ptr::NonNull;

use tracing::{debug, trace, warn};

use crate::error::{Error, Result, ScriptError};
use crate::runtime::{
    self, CallInfo, CheapClone, EngineContext, HostValue, Isolate, ObjectTemplate, Persistent, Program,
    Value, ValueType, json,
};
use crate::stable::StableVec;
use crate::table::{ScopeId, ValueRef, ValueTable};

/// Embedder slot of the runtime context that points back at its [`Context`].
pub const EMBEDDER_SLOT_CONTEXT: usize = 1;

/// Table entry: a value plus, for heap objects, the root keeping it alive.
///
/// Dropping the entry releases the root.
pub struct PersistentValue {
    value: Value,
    _root: Option<Persistent>,
}

impl PersistentValue {
    fn new(isolate: &Isolate, value: Value) -> Self {
        let root = value.as_object().map(|gc| isolate.persistent(gc));
        Self { value, _root: root }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }
}

impl fmt::Debug for PersistentValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value.fmt(f)
    }
}

/// A compiled script owned by the context that compiled it.
#[derive(Debug)]
pub struct UnboundScript {
    program: Program,
    origin: String,
}

impl UnboundScript {
    pub fn origin(&self) -> &str {
        &self.origin
    }
}

/// Owner of a runtime context and of every host-visible value minted in it.
pub struct Context {
    isolate: Isolate,
    engine: EngineContext,
    owner_token: usize,
    values: RefCell<ValueTable<PersistentValue>>,
    scripts: StableVec<UnboundScript>,
    torn_down: Cell<bool>,
    _pinned: PhantomPinned,
}

impl Context {
    /// Create a context whose global object is built from `template`.
    ///
    /// The runtime context stores the wrapper's address, so the wrapper is
    /// pinned and cannot be moved out of its box:
    ///
    /// ```compile_fail
    /// use handlescope::{Context, Isolate};
    ///
    /// let isolate = Isolate::new();
    /// let moved: Context = *Context::new(&isolate, None, 0);
    /// ```
    pub fn new(
        isolate: &Isolate,
        template: Option<&ObjectTemplate>,
        owner_token: usize,
    ) -> Pin<Box<Context>> {
        let _locker = isolate.lock();
        let engine = isolate.new_context(template);
        let context = Box::pin(Context {
            isolate: isolate.clone(),
            engine,
            owner_token,
            values: RefCell::new(ValueTable::new()),
            scripts: StableVec::new(),
            torn_down: Cell::new(false),
            _pinned: PhantomPinned,
        });
        let address = NonNull::from(context.as_ref().get_ref()).cast::<c_void>();
        context.engine.set_slot(EMBEDDER_SLOT_CONTEXT, Some(address));
        debug!(owner_token, "context created");
        context
    }

    /// Release the runtime context and every remaining value.
    pub fn destroy(self: Pin<Box<Self>>) {
        drop(self);
    }

    /// Recover the wrapper that owns `engine`, if any.
    ///
    /// Inside a native callback use [`CallInfo::owner`] instead.
    ///
    /// # Safety
    ///
    /// The returned reference borrows `engine`, not the wrapper. The caller
    /// must not use it after the owning [`Context`] is dropped, which an
    /// [`EngineContext`] clone can easily outlive.
    pub unsafe fn from_engine(engine: &EngineContext) -> Option<&Context> {
        let pointer = engine.aligned_pointer(EMBEDDER_SLOT_CONTEXT)?;
        // Safety: only `Context::new` writes this slot, with the address of
        // a pinned wrapper, and `teardown` clears it before the wrapper is
        // freed. The caller upholds the lifetime.
        Some(unsafe { pointer.cast::<Context>().as_ref() })
    }

    pub fn owner_token(&self) -> usize {
        self.owner_token
    }

    pub fn isolate(&self) -> &Isolate {
        &self.isolate
    }

    pub fn engine(&self) -> &EngineContext {
        &self.engine
    }

    // ============ VALUE TABLE ============

    /// Register `value` under the current scope.
    pub fn add_value(&self, value: Value) -> ValueRef {
        let entry = PersistentValue::new(&self.isolate, value);
        let r = self.values.borrow_mut().add(entry);
        trace!(value = %r, "value registered");
        r
    }

    /// Dereference `r`. A stale reference yields undefined and logs a warning.
    pub fn value(&self, r: ValueRef) -> Value {
        match self.try_value(r) {
            Ok(value) => value,
            Err(_) => {
                let values = self.values.borrow();
                warn!(
                    value = %r,
                    owner = ?values.owner_of(r.index),
                    len = values.len(),
                    "use of stale value reference; returning undefined"
                );
                Value::Undefined
            }
        }
    }

    pub fn try_value(&self, r: ValueRef) -> Result<Value> {
        self.values
            .borrow()
            .get(r)
            .map(|entry| entry.value.cheap_clone())
            .ok_or(Error::StaleReference(r))
    }

    pub fn is_live(&self, r: ValueRef) -> bool {
        self.values.borrow().get(r).is_some()
    }

    /// Open a nested scope.
    pub fn push_scope(&self) -> ScopeId {
        let _locker = self.isolate.lock();
        let mut values = self.values.borrow_mut();
        let id = values.push_scope();
        debug!(scope = %id, depth = values.depth(), base = values.len(), "scope pushed");
        id
    }

    /// Close the innermost scope, releasing its values. Returns false and
    /// changes nothing if `id` is not the innermost scope.
    pub fn pop_scope(&self, id: ScopeId) -> bool {
        let _locker = self.isolate.lock();
        let mut values = self.values.borrow_mut();
        let before = values.len();
        if values.pop_scope(id) {
            debug!(
                scope = %id,
                released = before - values.len(),
                "scope popped"
            );
            true
        } else {
            debug!(
                offered = %id,
                current = %values.current_scope(),
                "scope pop rejected"
            );
            false
        }
    }

    /// Open a scope that closes when the guard drops.
    pub fn scope(&self) -> ValueScope<'_> {
        ValueScope {
            context: self,
            id: self.push_scope(),
            open: true,
        }
    }

    pub fn current_scope(&self) -> ScopeId {
        self.values.borrow().current_scope()
    }

    pub fn scope_depth(&self) -> usize {
        self.values.borrow().depth()
    }

    pub fn value_count(&self) -> usize {
        self.values.borrow().len()
    }

    // ============ EXECUTION ============

    pub fn global(&self) -> ValueRef {
        self.add_value(Value::Object(self.engine.global()))
    }

    /// Compile and run `source`, registering its completion value.
    pub fn run_script(&self, source: &str, origin: &str) -> Result<ValueRef> {
        let program = runtime::compile(source, origin).map_err(Error::Compile)?;
        self.run_program(&program, origin)
    }

    /// Compile `source` into a script that lives as long as this context.
    pub fn compile_script(&self, source: &str, origin: &str) -> Result<&UnboundScript> {
        let program = runtime::compile(source, origin).map_err(Error::Compile)?;
        Ok(self.scripts.push(UnboundScript {
            program,
            origin: origin.to_string(),
        }))
    }

    pub fn run_compiled(&self, script: &UnboundScript) -> Result<ValueRef> {
        self.run_program(&script.program, &script.origin)
    }

    /// Number of scripts compiled through this context.
    pub fn script_count(&self) -> usize {
        self.scripts.len()
    }

    fn run_program(&self, program: &Program, origin: &str) -> Result<ValueRef> {
        let value = self
            .engine
            .run(program, origin)
            .map_err(Error::Runtime)?;
        Ok(self.register(value))
    }

    /// Register a freshly produced value, then give the collector a safe
    /// point now that the value is rooted.
    fn register(&self, value: Value) -> ValueRef {
        let r = self.add_value(value);
        self.isolate.maybe_collect();
        r
    }

    pub fn parse_json(&self, text: &str) -> Result<ValueRef> {
        let value = json::parse(&self.isolate, text).map_err(Error::marshal)?;
        Ok(self.register(value))
    }

    /// Serialize the referenced value. Undefined and functions serialize as
    /// `undefined`.
    pub fn stringify_json(&self, r: ValueRef) -> Result<String> {
        let value = self.try_value(r)?;
        let text = json::stringify(&self.isolate, &value).map_err(Error::marshal)?;
        Ok(text.unwrap_or_else(|| "undefined".to_string()))
    }

    /// Serialize into `buffer` when the text and a NUL terminator fit;
    /// otherwise return an owned string and leave `buffer` untouched.
    pub fn stringify_json_into<'b>(
        &self,
        r: ValueRef,
        buffer: &'b mut [u8],
    ) -> Result<Cow<'b, str>> {
        let text = self.stringify_json(r)?;
        let len = text.len();
        if len >= buffer.len() {
            return Ok(Cow::Owned(text));
        }
        let (head, tail) = buffer.split_at_mut(len);
        head.copy_from_slice(text.as_bytes());
        if let Some(nul) = tail.first_mut() {
            *nul = 0;
        }
        match std::str::from_utf8(head) {
            Ok(s) => Ok(Cow::Borrowed(s)),
            Err(_) => Ok(Cow::Owned(text)),
        }
    }

    // ============ HOST VALUES ============

    pub fn new_value(&self, value: impl Into<HostValue>) -> ValueRef {
        self.add_value(value.into().into_value())
    }

    pub fn type_of(&self, r: ValueRef) -> ValueType {
        self.isolate.value_type(&self.value(r))
    }

    pub fn to_display_string(&self, r: ValueRef) -> String {
        self.isolate.to_display_string(&self.value(r))
    }

    pub fn to_number(&self, r: ValueRef) -> f64 {
        let value = self.value(r);
        match value {
            Value::Object(_) => {
                Value::from(self.isolate.to_display_string(&value)).to_number()
            }
            other => other.to_number(),
        }
    }

    pub fn to_boolean(&self, r: ValueRef) -> bool {
        self.value(r).to_boolean()
    }

    pub fn same_value(&self, a: ValueRef, b: ValueRef) -> bool {
        self.value(a).same_value(&self.value(b))
    }

    /// Read property `key` of the referenced value.
    pub fn get(&self, object: ValueRef, key: &str) -> Result<ValueRef> {
        let target = self.try_value(object)?;
        if target.is_null_or_undefined() {
            let kind = self.isolate.to_display_string(&target);
            return Err(Error::Runtime(ScriptError::new(format!(
                "TypeError: Cannot read properties of {} (reading '{}')",
                kind, key
            ))));
        }
        let value = self.isolate.get_property(&target, key);
        Ok(self.add_value(value))
    }

    /// Write property `key` of the referenced object.
    pub fn set(&self, object: ValueRef, key: &str, value: ValueRef) -> Result<()> {
        let Some(gc) = self.try_value(object)?.as_object() else {
            return Err(Error::InvalidArgument(format!("{} is not an object", object)));
        };
        let value = self.try_value(value)?;
        self.isolate.set_property(gc, key.into(), value);
        Ok(())
    }

    // ============ TEARDOWN ============

    fn teardown(&self) {
        if self.torn_down.replace(true) {
            return;
        }
        let _locker = self.isolate.lock();
        self.engine.set_slot(EMBEDDER_SLOT_CONTEXT, None);
        let released = {
            let mut values = self.values.borrow_mut();
            let released = values.len();
            values.clear();
            released
        };
        self.engine.dispose();
        debug!(owner_token = self.owner_token, released, "context destroyed");
        self.isolate.maybe_collect();
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("owner_token", &self.owner_token)
            .field("values", &self.values.borrow())
            .field("scripts", &self.scripts.len())
            .finish()
    }
}

impl<'a> CallInfo<'a> {
    /// The [`Context`] whose script made this call, if the runtime context
    /// has one.
    pub fn owner(&self) -> Option<&'a Context> {
        // Safety: native functions only run inside `EngineContext::run`,
        // which is reached only through `Context::run_program` while the
        // wrapper is borrowed. The wrapper therefore outlives the call.
        unsafe { Context::from_engine(self.context) }
    }
}

/// RAII scope from [`Context::scope`]. Pops on drop.
pub struct ValueScope<'a> {
    context: &'a Context,
    id: ScopeId,
    open: bool,
}

impl ValueScope<'_> {
    pub fn id(&self) -> ScopeId {
        self.id
    }

    /// Pop now and report whether the pop was accepted.
    pub fn close(mut self) -> bool {
        self.open = false;
        self.context.pop_scope(self.id)
    }
}

impl Drop for ValueScope<'_> {
    fn drop(&mut self) {
        if self.open {
            self.context.pop_scope(self.id);
        }
    }
}

//! Object and function templates.
//!
//! A template describes the properties a fresh object gets. Entries are
//! primitives, nested templates or host functions; live objects are never
//! stored in a template, since a template may outlive any context.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::gc::Gc;

use super::value::{CheapClone, JsObject, JsString, NativeFn, NativeFunction, Value};
use super::{CallInfo, Isolate};

/// Primitive a host can hand to the runtime.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum HostValue {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

impl HostValue {
    pub fn into_value(self) -> Value {
        match self {
            HostValue::Undefined => Value::Undefined,
            HostValue::Null => Value::Null,
            HostValue::Bool(b) => Value::Boolean(b),
            HostValue::Number(n) => Value::Number(n),
            HostValue::String(s) => Value::String(JsString::from(s)),
        }
    }
}

impl From<bool> for HostValue {
    fn from(b: bool) -> Self {
        HostValue::Bool(b)
    }
}

impl From<f64> for HostValue {
    fn from(n: f64) -> Self {
        HostValue::Number(n)
    }
}

impl From<i32> for HostValue {
    fn from(n: i32) -> Self {
        HostValue::Number(n.into())
    }
}

impl From<u32> for HostValue {
    fn from(n: u32) -> Self {
        HostValue::Number(n.into())
    }
}

impl From<i64> for HostValue {
    fn from(n: i64) -> Self {
        HostValue::Number(n as f64)
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        HostValue::String(s.to_string())
    }
}

impl From<String> for HostValue {
    fn from(s: String) -> Self {
        HostValue::String(s)
    }
}

impl From<()> for HostValue {
    fn from(_: ()) -> Self {
        HostValue::Undefined
    }
}

/// Host callback exposed to scripts as a function.
#[derive(Clone)]
pub struct FunctionTemplate {
    callback: Rc<NativeFn>,
}

impl FunctionTemplate {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&CallInfo<'_>) -> Result<Value, Value> + 'static,
    {
        Self {
            callback: Rc::new(callback),
        }
    }

    /// Allocate a function object for this template.
    pub fn instantiate(&self, isolate: &Isolate, name: &str) -> Gc {
        isolate.alloc(JsObject::function(NativeFunction {
            name: JsString::from(name),
            func: self.callback.cheap_clone(),
        }))
    }
}

impl fmt::Debug for FunctionTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FunctionTemplate")
    }
}

#[derive(Debug, Clone)]
enum TemplateEntry {
    Value(HostValue),
    Template(ObjectTemplate),
    Function(FunctionTemplate),
}

/// Blueprint for objects, used for a context's global object or for nested
/// values inside it.
#[derive(Debug, Clone, Default)]
pub struct ObjectTemplate {
    entries: IndexMap<JsString, TemplateEntry>,
}

impl ObjectTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_value(&mut self, name: &str, value: impl Into<HostValue>) -> &mut Self {
        self.entries
            .insert(JsString::from(name), TemplateEntry::Value(value.into()));
        self
    }

    /// Nest a template. The nested template is copied; later changes to
    /// `template` do not affect this one.
    pub fn set_template(&mut self, name: &str, template: &ObjectTemplate) -> &mut Self {
        self.entries.insert(
            JsString::from(name),
            TemplateEntry::Template(template.clone()),
        );
        self
    }

    pub fn set_function(&mut self, name: &str, function: FunctionTemplate) -> &mut Self {
        self.entries
            .insert(JsString::from(name), TemplateEntry::Function(function));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Allocate a new object populated from this template.
    pub fn new_instance(&self, isolate: &Isolate) -> Gc {
        let target = isolate.alloc(JsObject::new());
        self.apply_to(isolate, target);
        target
    }

    /// Install this template's entries as properties of `target`.
    pub fn apply_to(&self, isolate: &Isolate, target: Gc) {
        for (name, entry) in &self.entries {
            let value = match entry {
                TemplateEntry::Value(v) => v.clone().into_value(),
                TemplateEntry::Template(t) => Value::Object(t.new_instance(isolate)),
                TemplateEntry::Function(f) => Value::Object(f.instantiate(isolate, name.as_str())),
            };
            isolate.with_object_mut(target, |obj| obj.set(name.cheap_clone(), value));
        }
    }
}

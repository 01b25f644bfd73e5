//! Runtime value representation
//!
//! The `Value` type and the heap object layout used by the reference runtime.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::gc::{Gc, Traceable};

use super::CallInfo;

/// Trait for types that have cheap (O(1), reference-counted) clones.
///
/// Makes it explicit at call sites when a clone only bumps a reference count.
pub trait CheapClone: Clone {
    fn cheap_clone(&self) -> Self {
        self.clone()
    }
}

impl<T: ?Sized> CheapClone for Rc<T> {}

/// A runtime value.
///
/// Primitives are held inline; objects are handles into the isolate heap and
/// are only kept alive while something roots them.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    String(JsString),
    Object(Gc),
}

impl CheapClone for Value {}

impl Value {
    pub fn is_null_or_undefined(&self) -> bool {
        matches!(self, Value::Null | Value::Undefined)
    }

    pub fn as_object(&self) -> Option<Gc> {
        match self {
            Value::Object(gc) => Some(*gc),
            _ => None,
        }
    }

    /// ToBoolean
    pub fn to_boolean(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Boolean(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Object(_) => true,
        }
    }

    /// ToNumber for primitives; objects convert to NaN.
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Boolean(true) => 1.0,
            Value::Boolean(false) => 0.0,
            Value::Number(n) => *n,
            Value::String(s) => string_to_number(s.as_str()),
            Value::Object(_) => f64::NAN,
        }
    }

    /// Strict equality (===)
    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Gc::ptr_eq(*a, *b),
            _ => false,
        }
    }

    /// SameValue: like `===` but NaN equals NaN and +0 differs from -0.
    pub fn same_value(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => {
                if a.is_nan() && b.is_nan() {
                    true
                } else {
                    a == b && a.is_sign_negative() == b.is_sign_negative()
                }
            }
            _ => self.strict_equals(other),
        }
    }
}

fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    match trimmed {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ => trimmed.parse::<f64>().unwrap_or(f64::NAN),
    }
}

/// Format a number the way script code prints it.
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 {
            "Infinity".to_string()
        } else {
            "-Infinity".to_string()
        }
    } else if n == 0.0 {
        "0".to_string()
    } else {
        n.to_string()
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", number_to_string(*n)),
            Value::String(s) => write!(f, "{:?}", s.as_str()),
            Value::Object(gc) => write!(f, "[object {:?}]", gc),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.strict_equals(other)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(JsString::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(JsString::from(s))
    }
}

impl From<JsString> for Value {
    fn from(s: JsString) -> Self {
        Value::String(s)
    }
}

/// Immutable, reference-counted string.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct JsString(Rc<str>);

impl CheapClone for JsString {}

impl JsString {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl AsRef<str> for JsString {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for JsString {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for JsString {
    fn eq(&self, other: &str) -> bool {
        &*self.0 == other
    }
}

impl PartialEq<&str> for JsString {
    fn eq(&self, other: &&str) -> bool {
        &*self.0 == *other
    }
}

impl From<&str> for JsString {
    fn from(s: &str) -> Self {
        JsString(s.into())
    }
}

impl From<String> for JsString {
    fn from(s: String) -> Self {
        JsString(s.into())
    }
}

impl fmt::Debug for JsString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

impl fmt::Display for JsString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Coarse value classification exposed to hosts.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Undefined = 0,
    Null = 1,
    Boolean = 2,
    Number = 3,
    String = 4,
    Object = 5,
    Array = 6,
    Function = 7,
}

impl ValueType {
    /// Result of the `typeof` operator for values of this type.
    pub fn type_of(self) -> &'static str {
        match self {
            ValueType::Undefined => "undefined",
            ValueType::Null | ValueType::Object | ValueType::Array => "object",
            ValueType::Boolean => "boolean",
            ValueType::Number => "number",
            ValueType::String => "string",
            ValueType::Function => "function",
        }
    }
}

/// Host callback signature. `Err` carries the thrown value.
pub type NativeFn = dyn Fn(&CallInfo<'_>) -> Result<Value, Value>;

/// Native function attached to a function object.
#[derive(Clone)]
pub struct NativeFunction {
    pub name: JsString,
    pub func: Rc<NativeFn>,
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .finish()
    }
}

/// Object behaviour beyond ordinary properties.
#[derive(Debug, Clone, Default)]
pub enum ObjectKind {
    #[default]
    Ordinary,
    Array(Vec<Value>),
    Function(NativeFunction),
    Error,
}

/// A heap object.
#[derive(Debug, Clone, Default)]
pub struct JsObject {
    pub kind: ObjectKind,
    pub properties: IndexMap<JsString, Value>,
}

impl JsObject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn array(elements: Vec<Value>) -> Self {
        Self {
            kind: ObjectKind::Array(elements),
            properties: IndexMap::new(),
        }
    }

    pub fn function(func: NativeFunction) -> Self {
        Self {
            kind: ObjectKind::Function(func),
            properties: IndexMap::new(),
        }
    }

    pub fn value_type(&self) -> ValueType {
        match self.kind {
            ObjectKind::Array(_) => ValueType::Array,
            ObjectKind::Function(_) => ValueType::Function,
            ObjectKind::Ordinary | ObjectKind::Error => ValueType::Object,
        }
    }

    pub fn get_own(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// Property lookup including array elements, `length` and function `name`.
    pub fn get(&self, key: &str) -> Option<Value> {
        match &self.kind {
            ObjectKind::Array(elements) => {
                if key == "length" {
                    return Some(Value::Number(elements.len() as f64));
                }
                if let Some(element) = array_index(key).and_then(|i| elements.get(i)) {
                    return Some(element.clone());
                }
            }
            ObjectKind::Function(func) if key == "name" => {
                return Some(Value::String(func.name.clone()));
            }
            _ => {}
        }
        self.properties.get(key).cloned()
    }

    pub fn set(&mut self, key: JsString, value: Value) {
        if let ObjectKind::Array(elements) = &mut self.kind {
            let limit = elements.len() + MAX_ARRAY_GAP;
            if let Some(index) = array_index(key.as_str()).filter(|&i| i <= limit) {
                if index >= elements.len() {
                    elements.resize(index + 1, Value::Undefined);
                }
                if let Some(slot) = elements.get_mut(index) {
                    *slot = value;
                }
                return;
            }
            if key == "length" {
                if let Value::Number(n) = value {
                    if n >= 0.0 && n.fract() == 0.0 && n <= limit as f64 {
                        elements.resize(n as usize, Value::Undefined);
                    }
                }
                return;
            }
        }
        self.properties.insert(key, value);
    }
}

/// Writes further than this past the end of an array become plain properties.
const MAX_ARRAY_GAP: usize = 1 << 16;

/// Canonical array index (`"0"`, `"17"`, never `"01"`).
fn array_index(key: &str) -> Option<usize> {
    let index: u32 = key.parse().ok()?;
    if index.to_string() != key {
        return None;
    }
    Some(index as usize)
}

impl Traceable for JsObject {
    fn trace<F: FnMut(Gc)>(&self, mut visitor: F) {
        if let ObjectKind::Array(elements) = &self.kind {
            for element in elements {
                if let Value::Object(gc) = element {
                    visitor(*gc);
                }
            }
        }
        for value in self.properties.values() {
            if let Value::Object(gc) = value {
                visitor(*gc);
            }
        }
    }
}

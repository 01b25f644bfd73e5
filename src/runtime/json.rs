//! JSON parse and stringify primitives.
//!
//! Both directions go through `serde_json::Value`; `preserve_order` keeps
//! object keys in source order.

use rustc_hash::FxHashSet;
use serde_json::{Map, Number};

use crate::gc::Gc;

use super::value::{JsObject, JsString, ObjectKind, Value};
use super::Isolate;

/// Largest integer an f64 represents exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Parse JSON text into freshly allocated runtime values.
pub fn parse(isolate: &Isolate, text: &str) -> Result<Value, String> {
    let json: serde_json::Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
    Ok(from_json(isolate, &json))
}

pub fn from_json(isolate: &Isolate, json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Boolean(*b),
        serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        serde_json::Value::String(s) => Value::from(s.as_str()),
        serde_json::Value::Array(items) => {
            let elements = items.iter().map(|item| from_json(isolate, item)).collect();
            Value::Object(isolate.alloc(JsObject::array(elements)))
        }
        serde_json::Value::Object(map) => {
            let mut object = JsObject::new();
            for (key, item) in map {
                object.set(JsString::from(key.as_str()), from_json(isolate, item));
            }
            Value::Object(isolate.alloc(object))
        }
    }
}

/// Serialize a value. `Ok(None)` means the value has no JSON form
/// (undefined or a function).
pub fn stringify(isolate: &Isolate, value: &Value) -> Result<Option<String>, String> {
    let mut visited = FxHashSet::default();
    match to_json(isolate, value, &mut visited)? {
        Some(json) => serde_json::to_string(&json)
            .map(Some)
            .map_err(|e| e.to_string()),
        None => Ok(None),
    }
}

enum Shape {
    Array(Vec<Value>),
    Object(Vec<(JsString, Value)>),
    Function,
}

fn to_json(
    isolate: &Isolate,
    value: &Value,
    visited: &mut FxHashSet<Gc>,
) -> Result<Option<serde_json::Value>, String> {
    let gc = match value {
        Value::Undefined => return Ok(None),
        Value::Null => return Ok(Some(serde_json::Value::Null)),
        Value::Boolean(b) => return Ok(Some(serde_json::Value::Bool(*b))),
        Value::Number(n) => return Ok(Some(number_to_json(*n))),
        Value::String(s) => return Ok(Some(serde_json::Value::String(s.to_string()))),
        Value::Object(gc) => *gc,
    };

    // Check for circular references
    if !visited.insert(gc) {
        return Err("Converting circular structure to JSON".to_string());
    }

    let shape = isolate.with_object(gc, |obj| match &obj.kind {
        ObjectKind::Array(elements) => Shape::Array(elements.clone()),
        ObjectKind::Function(_) => Shape::Function,
        ObjectKind::Ordinary | ObjectKind::Error => Shape::Object(
            obj.properties
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ),
    });

    let result = match shape {
        None | Some(Shape::Function) => None,
        Some(Shape::Array(elements)) => {
            let mut items = Vec::with_capacity(elements.len());
            for element in &elements {
                // Holes and unserializable elements become null.
                items.push(to_json(isolate, element, visited)?.unwrap_or(serde_json::Value::Null));
            }
            Some(serde_json::Value::Array(items))
        }
        Some(Shape::Object(properties)) => {
            let mut map = Map::new();
            for (key, prop) in &properties {
                if let Some(json) = to_json(isolate, prop, visited)? {
                    map.insert(key.to_string(), json);
                }
            }
            Some(serde_json::Value::Object(map))
        }
    };

    visited.remove(&gc);
    Ok(result)
}

fn number_to_json(n: f64) -> serde_json::Value {
    if n.is_nan() || n.is_infinite() {
        return serde_json::Value::Null;
    }
    // Integral values print without a fraction, as script code expects.
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        return serde_json::Value::Number(Number::from(n as i64));
    }
    Number::from_f64(n).map_or(serde_json::Value::Null, serde_json::Value::Number)
}

//! Isolate and object template functions.

use std::ffi::c_char;

use crate::config::IsolateOptions;
use crate::runtime::{HostValue, Isolate, ObjectTemplate};

use super::c_str_to_str;

// ============================================================================
// Isolate
// ============================================================================

/// Opaque isolate handle.
pub struct HsIsolate {
    pub(crate) isolate: Isolate,
}

/// Create an isolate. `HANDLESCOPE_GC_THRESHOLD` overrides the default
/// collection threshold.
#[unsafe(no_mangle)]
pub extern "C" fn hs_isolate_new() -> *mut HsIsolate {
    Box::into_raw(Box::new(HsIsolate {
        isolate: Isolate::with_options(IsolateOptions::from_env()),
    }))
}

/// Release the caller's isolate handle. Contexts created from it stay valid.
#[unsafe(no_mangle)]
pub extern "C" fn hs_isolate_free(iso: *mut HsIsolate) {
    if !iso.is_null() {
        unsafe {
            drop(Box::from_raw(iso));
        }
    }
}

/// Run a garbage collection. Returns the number of objects freed.
#[unsafe(no_mangle)]
pub extern "C" fn hs_isolate_collect(iso: *mut HsIsolate) -> usize {
    match unsafe { iso.as_ref() } {
        Some(iso) => iso.isolate.collect_garbage(),
        None => 0,
    }
}

// ============================================================================
// Object Templates
// ============================================================================

/// Opaque object template handle.
pub struct HsTemplate {
    pub(crate) template: ObjectTemplate,
}

#[unsafe(no_mangle)]
pub extern "C" fn hs_template_new() -> *mut HsTemplate {
    Box::into_raw(Box::new(HsTemplate {
        template: ObjectTemplate::new(),
    }))
}

#[unsafe(no_mangle)]
pub extern "C" fn hs_template_free(template: *mut HsTemplate) {
    if !template.is_null() {
        unsafe {
            drop(Box::from_raw(template));
        }
    }
}

fn set_template_value(template: *mut HsTemplate, name: *const c_char, value: HostValue) -> bool {
    let Some(template) = (unsafe { template.as_mut() }) else {
        return false;
    };
    let Some(name) = (unsafe { c_str_to_str(name) }) else {
        return false;
    };
    template.template.set_value(name, value);
    true
}

/// Set a number property. Returns false on NULL or non-UTF-8 input.
#[unsafe(no_mangle)]
pub extern "C" fn hs_template_set_number(
    template: *mut HsTemplate,
    name: *const c_char,
    value: f64,
) -> bool {
    set_template_value(template, name, HostValue::Number(value))
}

/// Set a string property. Returns false on NULL or non-UTF-8 input.
#[unsafe(no_mangle)]
pub extern "C" fn hs_template_set_string(
    template: *mut HsTemplate,
    name: *const c_char,
    value: *const c_char,
) -> bool {
    let Some(value) = (unsafe { c_str_to_str(value) }) else {
        return false;
    };
    set_template_value(template, name, HostValue::from(value))
}

/// Set a boolean property. Returns false on NULL or non-UTF-8 input.
#[unsafe(no_mangle)]
pub extern "C" fn hs_template_set_bool(
    template: *mut HsTemplate,
    name: *const c_char,
    value: bool,
) -> bool {
    set_template_value(template, name, HostValue::Bool(value))
}

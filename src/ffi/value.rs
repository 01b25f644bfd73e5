//! Scope, value and JSON functions.

use std::borrow::Cow;
use std::ffi::{CString, c_char};
use std::ptr;

use crate::error::Error;
use crate::runtime::ValueType;
use crate::table::ScopeId;

use super::{HsContext, HsStringResult, HsValueRef, HsValueResult, bytes_to_str};

// ============================================================================
// Scopes
// ============================================================================

/// Open a value scope. Returns its id, or 0 for a NULL context.
#[unsafe(no_mangle)]
pub extern "C" fn hs_push_scope(ctx: *mut HsContext) -> u64 {
    match unsafe { ctx.as_ref() } {
        Some(ctx) => ctx.ctx.push_scope().as_u64(),
        None => 0,
    }
}

/// Close the innermost scope. Returns false, changing nothing, unless
/// `scope` is the innermost open scope.
#[unsafe(no_mangle)]
pub extern "C" fn hs_pop_scope(ctx: *mut HsContext, scope: u64) -> bool {
    match unsafe { ctx.as_ref() } {
        Some(ctx) => ctx.ctx.pop_scope(ScopeId::from_raw(scope)),
        None => false,
    }
}

// ============================================================================
// Value Inspection
// ============================================================================

/// Type of the referenced value. Stale references report undefined.
#[unsafe(no_mangle)]
pub extern "C" fn hs_value_type(ctx: *mut HsContext, value: HsValueRef) -> ValueType {
    match unsafe { ctx.as_ref() } {
        Some(ctx) => ctx.ctx.type_of(value.into()),
        None => ValueType::Undefined,
    }
}

/// True if `value` can still be dereferenced.
#[unsafe(no_mangle)]
pub extern "C" fn hs_value_is_live(ctx: *mut HsContext, value: HsValueRef) -> bool {
    match unsafe { ctx.as_ref() } {
        Some(ctx) => ctx.ctx.is_live(value.into()),
        None => false,
    }
}

// ============================================================================
// JSON
// ============================================================================

/// Parse `len` bytes of JSON text.
#[unsafe(no_mangle)]
pub extern "C" fn hs_json_parse(
    ctx: *mut HsContext,
    text: *const c_char,
    len: usize,
) -> HsValueResult {
    let Some(ctx) = (unsafe { ctx.as_mut() }) else {
        return HsValueResult::null_context();
    };
    ctx.clear_error();

    let Some(text) = (unsafe { bytes_to_str(text, len) }) else {
        let error = Error::InvalidArgument("invalid or NULL JSON text".to_string());
        return HsValueResult::err(ctx, &error);
    };

    match ctx.ctx.parse_json(text) {
        Ok(r) => HsValueResult::ok(r),
        Err(e) => HsValueResult::err(ctx, &e),
    }
}

/// Serialize the referenced value.
///
/// If the text and its NUL terminator fit in `buffer` (`size` bytes), the
/// text is written there and `data == buffer`. Otherwise `data` is a heap
/// string with `owned == true` that must be released with `hs_free_string`.
/// `buffer` may be NULL when `size` is 0.
#[unsafe(no_mangle)]
pub extern "C" fn hs_json_stringify(
    ctx: *mut HsContext,
    value: HsValueRef,
    buffer: *mut c_char,
    size: usize,
) -> HsStringResult {
    let Some(ctx) = (unsafe { ctx.as_mut() }) else {
        return HsStringResult::err(super::NULL_CONTEXT.as_ptr() as *const c_char);
    };
    ctx.clear_error();

    let buffer: &mut [u8] = if buffer.is_null() {
        &mut []
    } else {
        // SAFETY: Caller guarantees buffer points to size writable bytes
        unsafe { std::slice::from_raw_parts_mut(buffer as *mut u8, size) }
    };

    match ctx.ctx.stringify_json_into(value.into(), buffer) {
        Ok(Cow::Borrowed(text)) => HsStringResult {
            data: text.as_ptr() as *const c_char,
            len: text.len(),
            owned: false,
            error: ptr::null(),
        },
        Ok(Cow::Owned(text)) => {
            let len = text.len();
            match CString::new(text) {
                Ok(c_str) => HsStringResult {
                    data: c_str.into_raw(),
                    len,
                    owned: true,
                    error: ptr::null(),
                },
                Err(_) => {
                    let error = Error::marshal("JSON text contains a NUL byte");
                    let (error, _) = ctx.set_error(&error);
                    HsStringResult::err(error)
                }
            }
        }
        Err(e) => {
            let (error, _) = ctx.set_error(&e);
            HsStringResult::err(error)
        }
    }
}

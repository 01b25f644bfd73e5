//! C FFI for handlescope.
//!
//! All types are opaque pointers, and all functions use C calling conventions.
//!
//! # Thread Safety
//!
//! This library is NOT thread-safe. An isolate and every context created from
//! it must stay on one thread.
//!
//! # Memory Management
//!
//! - `HsIsolate`: created by `hs_isolate_new()`, freed by `hs_isolate_free()`.
//!   Contexts keep their isolate alive, so the order of frees does not matter.
//! - `HsTemplate`: created by `hs_template_new()`, freed by `hs_template_free()`
//! - `HsContext`: created by `hs_context_new()`, freed by `hs_context_free()`
//! - `HsValueRef`: plain data, never freed. Valid until its scope is popped.
//! - `HsScript`: owned by the context that compiled it; never freed separately.
//! - Error strings: valid until the next hs_* call on the same context
//! - Overflow strings from `hs_json_stringify` (`owned == true`): freed by
//!   `hs_free_string()`

mod context;
mod isolate;
mod value;

use std::ffi::{CStr, CString, c_char};
use std::pin::Pin;
use std::ptr;

use crate::context::{Context, UnboundScript};
use crate::error::Error;
use crate::table::{ScopeId, ValueRef};

pub use context::*;
pub use isolate::*;
pub use value::*;

// ============================================================================
// Version
// ============================================================================

/// Library version string
const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "\0");

/// Returns the library version string.
///
/// The returned string is valid for the lifetime of the library.
#[unsafe(no_mangle)]
pub extern "C" fn hs_version() -> *const c_char {
    VERSION.as_ptr() as *const c_char
}

// ============================================================================
// Opaque Types
// ============================================================================

/// Opaque context handle.
///
/// Owns the wrapped context and the error strings handed back to the caller.
pub struct HsContext {
    pub(crate) ctx: Pin<Box<Context>>,
    pub(crate) last_error: Option<CString>,
    pub(crate) last_stack: Option<CString>,
}

impl HsContext {
    pub(crate) fn new(ctx: Pin<Box<Context>>) -> Self {
        Self {
            ctx,
            last_error: None,
            last_stack: None,
        }
    }

    /// Store `error` and return pointers to its message and stack text.
    /// The pointers are valid until the next call to this function.
    pub(crate) fn set_error(&mut self, error: &Error) -> (*const c_char, *const c_char) {
        self.last_error = Some(to_c_string_lossy(&error.to_string()));
        self.last_stack = error.stack().map(to_c_string_lossy);
        (
            self.last_error.as_ref().map_or(ptr::null(), |s| s.as_ptr()),
            self.last_stack.as_ref().map_or(ptr::null(), |s| s.as_ptr()),
        )
    }

    pub(crate) fn clear_error(&mut self) {
        self.last_error = None;
        self.last_stack = None;
    }
}

/// Compiled script. Lives as long as the context that compiled it and keeps
/// its address for that whole time.
pub type HsScript = UnboundScript;

/// Capability token for a value inside one context.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HsValueRef {
    pub scope: u64,
    pub index: usize,
}

impl From<ValueRef> for HsValueRef {
    fn from(r: ValueRef) -> Self {
        Self {
            scope: r.scope.as_u64(),
            index: r.index,
        }
    }
}

impl From<HsValueRef> for ValueRef {
    fn from(r: HsValueRef) -> Self {
        ValueRef {
            scope: ScopeId::from_raw(r.scope),
            index: r.index,
        }
    }
}

// ============================================================================
// Result Types
// ============================================================================

/// Result for operations producing a value.
#[repr(C)]
pub struct HsValueResult {
    /// True on success, false on error.
    pub ok: bool,
    /// The registered value. Zeroed on error.
    pub value: HsValueRef,
    /// Error message, or NULL on success. Valid until next hs_* call.
    pub error: *const c_char,
    /// Stack-trace text for script errors, or NULL.
    pub stack: *const c_char,
}

impl HsValueResult {
    pub(crate) fn ok(value: ValueRef) -> Self {
        Self {
            ok: true,
            value: value.into(),
            error: ptr::null(),
            stack: ptr::null(),
        }
    }

    pub(crate) fn err(ctx: &mut HsContext, error: &Error) -> Self {
        let (error, stack) = ctx.set_error(error);
        Self {
            ok: false,
            value: HsValueRef { scope: 0, index: 0 },
            error,
            stack,
        }
    }

    pub(crate) fn null_context() -> Self {
        Self {
            ok: false,
            value: HsValueRef { scope: 0, index: 0 },
            error: NULL_CONTEXT.as_ptr() as *const c_char,
            stack: ptr::null(),
        }
    }
}

/// Result of `hs_compile_script`.
#[repr(C)]
pub struct HsScriptResult {
    /// The compiled script, or NULL on error.
    pub script: *const HsScript,
    /// Error message, or NULL on success. Valid until next hs_* call.
    pub error: *const c_char,
}

/// Result of `hs_json_stringify`.
#[repr(C)]
pub struct HsStringResult {
    /// NUL-terminated text: the caller's buffer, a heap string, or NULL on
    /// error.
    pub data: *const c_char,
    /// Length in bytes, excluding the terminator.
    pub len: usize,
    /// True if `data` must be released with `hs_free_string`.
    pub owned: bool,
    /// Error message, or NULL on success. Valid until next hs_* call.
    pub error: *const c_char,
}

impl HsStringResult {
    pub(crate) fn err(error: *const c_char) -> Self {
        Self {
            data: ptr::null(),
            len: 0,
            owned: false,
            error,
        }
    }
}

const NULL_CONTEXT: &[u8] = b"NULL context\0";

// ============================================================================
// Utility Functions
// ============================================================================

/// Free a string allocated by handlescope (e.g., from hs_json_stringify).
///
/// # Safety
/// `s` must be a pointer returned by a handlescope function with
/// `owned == true` (or NULL).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hs_free_string(s: *mut c_char) {
    if !s.is_null() {
        // SAFETY: s was allocated by a handlescope function using CString::into_raw
        unsafe { drop(CString::from_raw(s)) };
    }
}

/// Helper to convert a C string to a Rust &str.
///
/// # Safety
/// `s` must be NULL or a valid NUL-terminated string.
pub(crate) unsafe fn c_str_to_str<'a>(s: *const c_char) -> Option<&'a str> {
    if s.is_null() {
        None
    } else {
        // SAFETY: Caller guarantees s is a valid C string
        unsafe { CStr::from_ptr(s) }.to_str().ok()
    }
}

/// Helper to view `len` bytes at `data` as UTF-8.
///
/// # Safety
/// `data` must be NULL or point to `len` readable bytes.
pub(crate) unsafe fn bytes_to_str<'a>(data: *const c_char, len: usize) -> Option<&'a str> {
    if data.is_null() {
        return if len == 0 { Some("") } else { None };
    }
    // SAFETY: Caller guarantees data points to len bytes
    let bytes = unsafe { std::slice::from_raw_parts(data as *const u8, len) };
    std::str::from_utf8(bytes).ok()
}

/// Allocate a C string, replacing interior NULs.
pub(crate) fn to_c_string_lossy(s: &str) -> CString {
    match CString::new(s) {
        Ok(c_str) => c_str,
        Err(_) => CString::new(s.replace('\0', "\u{FFFD}")).unwrap_or_default(),
    }
}

//! Context lifecycle and execution functions.

use std::ffi::c_char;
use std::ptr;

use crate::context::Context;
use crate::error::Error;

use super::{
    HsContext, HsIsolate, HsScript, HsScriptResult, HsTemplate, HsValueResult, bytes_to_str,
};

// ============================================================================
// Context Lifecycle
// ============================================================================

/// Create a context. `template` may be NULL. `owner_token` is stored as is
/// and handed back by `hs_context_owner_token`.
///
/// Returns NULL if `iso` is NULL.
#[unsafe(no_mangle)]
pub extern "C" fn hs_context_new(
    iso: *mut HsIsolate,
    template: *mut HsTemplate,
    owner_token: usize,
) -> *mut HsContext {
    let Some(iso) = (unsafe { iso.as_ref() }) else {
        return ptr::null_mut();
    };
    let template = unsafe { template.as_ref() }.map(|t| &t.template);
    let ctx = Context::new(&iso.isolate, template, owner_token);
    Box::into_raw(Box::new(HsContext::new(ctx)))
}

/// Free a context, releasing every value and script it owns.
#[unsafe(no_mangle)]
pub extern "C" fn hs_context_free(ctx: *mut HsContext) {
    if !ctx.is_null() {
        unsafe {
            drop(Box::from_raw(ctx));
        }
    }
}

/// Owner token given to `hs_context_new`, or 0 for NULL.
#[unsafe(no_mangle)]
pub extern "C" fn hs_context_owner_token(ctx: *mut HsContext) -> usize {
    match unsafe { ctx.as_ref() } {
        Some(ctx) => ctx.ctx.owner_token(),
        None => 0,
    }
}

/// Register the global object under the current scope.
#[unsafe(no_mangle)]
pub extern "C" fn hs_context_global(ctx: *mut HsContext) -> HsValueResult {
    let Some(ctx) = (unsafe { ctx.as_mut() }) else {
        return HsValueResult::null_context();
    };
    ctx.clear_error();
    HsValueResult::ok(ctx.ctx.global())
}

// ============================================================================
// Execution
// ============================================================================

/// Compile and run `source_len` bytes of UTF-8 source.
#[unsafe(no_mangle)]
pub extern "C" fn hs_run_script(
    ctx: *mut HsContext,
    source: *const c_char,
    source_len: usize,
    origin: *const c_char,
    origin_len: usize,
) -> HsValueResult {
    let Some(ctx) = (unsafe { ctx.as_mut() }) else {
        return HsValueResult::null_context();
    };
    ctx.clear_error();

    let (Some(source), Some(origin)) = (unsafe { bytes_to_str(source, source_len) }, unsafe {
        bytes_to_str(origin, origin_len)
    }) else {
        let error = Error::InvalidArgument("invalid or NULL source".to_string());
        return HsValueResult::err(ctx, &error);
    };

    match ctx.ctx.run_script(source, origin) {
        Ok(r) => HsValueResult::ok(r),
        Err(e) => HsValueResult::err(ctx, &e),
    }
}

/// Compile a script owned by `ctx`. The returned pointer stays valid until
/// the context is freed.
#[unsafe(no_mangle)]
pub extern "C" fn hs_compile_script(
    ctx: *mut HsContext,
    source: *const c_char,
    source_len: usize,
    origin: *const c_char,
    origin_len: usize,
) -> HsScriptResult {
    let Some(ctx) = (unsafe { ctx.as_mut() }) else {
        return HsScriptResult {
            script: ptr::null(),
            error: super::NULL_CONTEXT.as_ptr() as *const c_char,
        };
    };
    ctx.clear_error();

    let (Some(source), Some(origin)) = (unsafe { bytes_to_str(source, source_len) }, unsafe {
        bytes_to_str(origin, origin_len)
    }) else {
        let error = Error::InvalidArgument("invalid or NULL source".to_string());
        let (error, _) = ctx.set_error(&error);
        return HsScriptResult {
            script: ptr::null(),
            error,
        };
    };

    let compiled = ctx
        .ctx
        .compile_script(source, origin)
        .map(|script| script as *const HsScript);
    match compiled {
        Ok(script) => HsScriptResult {
            script,
            error: ptr::null(),
        },
        Err(e) => {
            let (error, _) = ctx.set_error(&e);
            HsScriptResult {
                script: ptr::null(),
                error,
            }
        }
    }
}

/// Run a script from `hs_compile_script`.
#[unsafe(no_mangle)]
pub extern "C" fn hs_script_run(ctx: *mut HsContext, script: *const HsScript) -> HsValueResult {
    let Some(ctx) = (unsafe { ctx.as_mut() }) else {
        return HsValueResult::null_context();
    };
    ctx.clear_error();

    let Some(script) = (unsafe { script.as_ref() }) else {
        let error = Error::InvalidArgument("NULL script".to_string());
        return HsValueResult::err(ctx, &error);
    };

    match ctx.ctx.run_compiled(script) {
        Ok(r) => HsValueResult::ok(r),
        Err(e) => HsValueResult::err(ctx, &e),
    }
}

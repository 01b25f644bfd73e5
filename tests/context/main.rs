//! Integration tests for the context façade, organized by feature
//!
//! These tests exercise the crate through the public API.
//!
//! ## Aggressive Test Defaults
//!
//! Tests use aggressive defaults to catch bugs early:
//! - `GC_THRESHOLD=1` - GC at every safe point to catch missing roots
//!
//! Override via environment variables:
//!
//! ```bash
//! cargo test                           # Default: aggressive settings
//! GC_THRESHOLD=100 cargo test          # Less aggressive GC for faster runs
//! ```

#![allow(clippy::unwrap_used, clippy::panic, clippy::indexing_slicing)]

mod execution;
mod owner;
mod scopes;
mod scripts;
mod templates;

use std::pin::Pin;

use handlescope::{Context, Isolate, IsolateOptions};

/// Create a new isolate with aggressive defaults for testing:
/// - GC_THRESHOLD=1 (collect at every safe point) to catch rooting bugs
pub fn create_test_isolate() -> Isolate {
    // Override via environment variable if needed:
    // GC_THRESHOLD=100 cargo test  # Faster runs
    // GC_THRESHOLD=0 cargo test    # Disable automatic GC
    let gc_threshold = std::env::var("GC_THRESHOLD")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(1);
    Isolate::with_options(IsolateOptions::default().gc_threshold(gc_threshold))
}

pub fn create_test_context(isolate: &Isolate) -> Pin<Box<Context>> {
    Context::new(isolate, None, 0)
}

/// Run `source` and render its completion value as a string.
pub fn eval_string(ctx: &Context, source: &str) -> String {
    let r = ctx.run_script(source, "test.js").unwrap();
    ctx.to_display_string(r)
}

pub fn eval_number(ctx: &Context, source: &str) -> f64 {
    let r = ctx.run_script(source, "test.js").unwrap();
    ctx.to_number(r)
}

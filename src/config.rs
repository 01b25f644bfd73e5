//! Isolate configuration.

use serde::Deserialize;

use crate::gc::DEFAULT_GC_THRESHOLD;

/// Environment variable read by [`IsolateOptions::from_env`].
pub const GC_THRESHOLD_ENV: &str = "HANDLESCOPE_GC_THRESHOLD";

/// Embedder slots every runtime context carries at minimum: slot 0 belongs to
/// the runtime and slot 1 holds the owning wrapper.
pub const MIN_EMBEDDER_SLOTS: usize = 2;

/// Options for creating an [`Isolate`](crate::Isolate).
///
/// Deserializable so hosts can embed it in their own config files:
///
/// ```
/// let options: handlescope::IsolateOptions =
///     serde_json::from_str(r#"{ "gc_threshold": 500 }"#).unwrap();
/// assert_eq!(options.gc_threshold, 500);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct IsolateOptions {
    /// Net allocations between automatic collections (0 disables them).
    pub gc_threshold: usize,
    /// Auxiliary pointer slots per runtime context. Raised to
    /// [`MIN_EMBEDDER_SLOTS`] if lower.
    pub embedder_slots: usize,
}

impl Default for IsolateOptions {
    fn default() -> Self {
        Self {
            gc_threshold: DEFAULT_GC_THRESHOLD,
            embedder_slots: MIN_EMBEDDER_SLOTS,
        }
    }
}

impl IsolateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults, with `gc_threshold` overridden by `HANDLESCOPE_GC_THRESHOLD`
    /// when it is set to a valid integer.
    pub fn from_env() -> Self {
        let mut options = Self::default();
        if let Some(threshold) = std::env::var(GC_THRESHOLD_ENV)
            .ok()
            .and_then(|s| s.trim().parse::<usize>().ok())
        {
            options.gc_threshold = threshold;
        }
        options
    }

    pub fn gc_threshold(mut self, threshold: usize) -> Self {
        self.gc_threshold = threshold;
        self
    }

    pub fn embedder_slots(mut self, slots: usize) -> Self {
        self.embedder_slots = slots;
        self
    }

    pub(crate) fn effective_embedder_slots(&self) -> usize {
        self.embedder_slots.max(MIN_EMBEDDER_SLOTS)
    }
}

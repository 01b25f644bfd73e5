//! Scoped capability handles for a garbage-collected script runtime
//!
//! A host that does not take part in the runtime's collector holds
//! [`ValueRef`]s: small, copyable tokens naming an entry in a per-context
//! value table. Scopes bulk-release every value registered while they were
//! open; a token from a closed scope is detected and never dereferenced.
//!
//! # Example
//!
//! ```
//! use handlescope::{Context, Isolate, ValueType};
//!
//! let isolate = Isolate::new();
//! let ctx = Context::new(&isolate, None, 7);
//!
//! let scope = ctx.push_scope();
//! let sum = ctx.run_script("1 + 2 * 3", "example.js").unwrap();
//! assert_eq!(ctx.to_number(sum), 7.0);
//! assert!(ctx.pop_scope(scope));
//!
//! // The scope is closed: the token is stale and reads as undefined.
//! assert!(!ctx.is_live(sum));
//! assert_eq!(ctx.type_of(sum), ValueType::Undefined);
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod gc;
pub mod runtime;
pub mod stable;
pub mod table;

#[cfg(feature = "c-api")]
pub mod ffi;

pub use config::IsolateOptions;
pub use context::{Context, EMBEDDER_SLOT_CONTEXT, UnboundScript, ValueScope};
pub use error::{Error, Result, ScriptError, SourceLocation};
pub use gc::GcStats;
pub use runtime::{
    CallInfo, EngineContext, ErrorKind, FunctionTemplate, HostValue, Isolate, Locker,
    ObjectTemplate, Value, ValueType,
};
pub use table::{ScopeId, ValueRef};

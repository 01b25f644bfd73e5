//! Error types for the context façade

use std::fmt;

use thiserror::Error;

use crate::table::ValueRef;

/// Source location information for error messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    /// Origin label the script was compiled with.
    pub origin: String,
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.origin, self.line, self.column)
    }
}

/// Diagnostic produced by the runtime for a failed compile or run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptError {
    /// `Name: message` text, e.g. `TypeError: x is not a function`.
    pub message: String,
    pub location: Option<SourceLocation>,
    /// Runtime stack-trace text, when the thrown value carried one.
    pub stack: Option<String>,
}

impl ScriptError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            location: None,
            stack: None,
        }
    }

    pub fn with_location(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{} at {}", self.message, location),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for ScriptError {}

/// Main error type for context operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Malformed source text.
    #[error("{0}")]
    Compile(ScriptError),

    /// Exception raised while a script ran.
    #[error("{0}")]
    Runtime(ScriptError),

    /// JSON encode or decode failure.
    #[error("JSON error: {message}")]
    Marshal { message: String },

    /// The reference's scope has closed, or its index is out of range.
    #[error("stale value reference {0}")]
    StaleReference(ValueRef),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    pub fn marshal(message: impl Into<String>) -> Self {
        Error::Marshal {
            message: message.into(),
        }
    }

    /// Script diagnostic for compile and runtime failures.
    pub fn script_error(&self) -> Option<&ScriptError> {
        match self {
            Error::Compile(e) | Error::Runtime(e) => Some(e),
            _ => None,
        }
    }

    pub fn stack(&self) -> Option<&str> {
        self.script_error().and_then(|e| e.stack.as_deref())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

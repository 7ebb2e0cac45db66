//! # Error Definitions
//!
//! Failures raised while encoding, decoding or reviving values.

use crate::value::Value;

/// Codec, registry and value-level failures.
#[derive(Debug, Clone)]
pub enum Error {
    /// The value (or one of its children) has no wire representation.
    /// `path` is the dotted/bracketed traversal path from the root.
    Encode { message: String, path: String },
    /// The payload is not a well-formed flattened value.
    Decode(String),
    /// A tagged entry names a type with no reviver and no built-in meaning.
    UnknownTag(String),
    /// A reviver received a value of the wrong shape.
    Shape { tag: String, detail: String },
    /// Two handlers were registered under the same tag.
    DuplicateTag(String),
    /// A byte stream could not be drained.
    Stream(String),
    /// A capability could not be reduced or revived.
    Capability(String),
    /// A value raised by user code inside a function value.
    Thrown(Value),
}

impl Error {
    pub fn shape(tag: &str, detail: impl Into<String>) -> Self {
        Self::Shape { tag: tag.to_string(), detail: detail.into() }
    }

    /// Shorthand for throwing an `Error`-named error value from user code.
    pub fn throw(name: &str, message: impl Into<String>) -> Self {
        Self::Thrown(Value::Error(crate::value::ErrorValue::new(name, message)))
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Encode { message, path } if path.is_empty() => write!(f, "{}", message),
            Self::Encode { message, path } => write!(f, "{} (at {})", message, path),
            Self::Decode(msg) => write!(f, "Invalid input: {}", msg),
            Self::UnknownTag(tag) => write!(f, "Unknown type {}", tag),
            Self::Shape { tag, detail } => write!(f, "Malformed {} payload: {}", tag, detail),
            Self::DuplicateTag(tag) => write!(f, "A handler for tag '{}' is already registered", tag),
            Self::Stream(msg) => write!(f, "Stream error: {}", msg),
            Self::Capability(msg) => write!(f, "Capability error: {}", msg),
            Self::Thrown(value) => match value {
                Value::Error(e) => write!(f, "{}: {}", e.name(), e.message()),
                other => write!(f, "Uncaught {:?}", other),
            },
        }
    }
}

impl std::error::Error for Error {}

/// Specialized `Result` for codec operations.
pub type Result<T> = std::result::Result<T, Error>;

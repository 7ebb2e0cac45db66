//! # Error Definitions
//!
//! Failures of a call, and their conversion into an error value that can be
//! sent back over the wire.

use capwire::ErrorValue;
use capwire::Value;

use crate::transport::TransportError;

#[derive(Debug, Clone)]
pub enum Error {
    /// Encoding or decoding failed, or user code threw (`capwire::Error::Thrown`).
    Codec(capwire::Error),
    /// A chain step could not be carried out against the live graph.
    Resolution(String),
    /// A heap id was unknown, or a capability could not be revived.
    Capability(String),
    /// A message did not follow the envelope or request shape.
    Protocol(String),
    Transport(TransportError),
    /// The peer answered with `{error}`.
    Remote(Value),
    /// The connection closed before the reply arrived.
    ConnectionLost,
}

impl Error {
    /// The error value sent back in an `{error}` reply.
    ///
    /// Values thrown by user code go back unchanged; everything else becomes
    /// an error object with a standard name.
    pub fn into_value(self) -> Value {
        match self {
            Self::Codec(capwire::Error::Thrown(value)) | Self::Remote(value) => value,
            Self::Resolution(msg) => Value::Error(ErrorValue::new("TypeError", msg)),
            Self::Capability(msg) => Value::Error(ErrorValue::new("ReferenceError", msg)),
            other => Value::Error(ErrorValue::new("Error", other.to_string())),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Codec(e) => write!(f, "{}", e),
            Self::Resolution(msg) => write!(f, "{}", msg),
            Self::Capability(msg) => write!(f, "{}", msg),
            Self::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            Self::Transport(e) => write!(f, "Transport error: {}", e),
            Self::Remote(Value::Error(e)) => write!(f, "Remote {}: {}", e.name(), e.message()),
            Self::Remote(other) => write!(f, "Remote threw {:?}", other),
            Self::ConnectionLost => write!(f, "Connection lost before the reply arrived"),
        }
    }
}

impl std::error::Error for Error {}

impl From<capwire::Error> for Error {
    fn from(e: capwire::Error) -> Self {
        match e {
            capwire::Error::Capability(msg) => Self::Capability(msg),
            other => Self::Codec(other),
        }
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

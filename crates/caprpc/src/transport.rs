//! # Transport Abstraction
//!
//! A minimal, async interface for moving messages between the two ends of a
//! connection.
//!
//! ## Philosophy
//!
//! - **Message-Oriented**: one `send` is one message on the peer's `recv`.
//!   Framing, upgrade handshakes and routing belong to the implementation.
//! - **Opaque**: the transport never looks inside an envelope.

use std::fmt;

/// Errors that occur at the transport layer.
#[derive(Debug, Clone)]
pub enum TransportError {
    /// The peer is unreachable or the connection was dropped.
    ConnectionLost(String),
    /// Generic I/O error or internal transport failure.
    Io(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

pub type Result<T> = std::result::Result<T, TransportError>;

/// One end of a message-oriented connection.
///
/// Object-safe, so it can be shared as `Arc<dyn Transport>`.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends one message to the peer.
    async fn send(&self, message: &str) -> Result<()>;

    /// Waits for the next message. `Ok(None)` means the peer closed the
    /// connection.
    async fn recv(&self) -> Result<Option<String>>;
}

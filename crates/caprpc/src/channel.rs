//! In-process transport built on tokio channels.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::sync::mpsc;

use crate::transport;
use crate::transport::Transport;
use crate::transport::TransportError;

/// A duplex channel transport.
///
/// Messages sent via `send()` appear on the peer's `recv()` and vice versa.
/// Dropping one end closes the other.
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<String>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
}

impl ChannelTransport {
    pub fn new(tx: mpsc::UnboundedSender<String>, rx: mpsc::UnboundedReceiver<String>) -> Self {
        Self { tx, rx: Arc::new(Mutex::new(rx)) }
    }

    /// Creates a pair of transports connected to each other.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();
        (Self::new(tx_a, rx_b), Self::new(tx_b, rx_a))
    }
}

#[async_trait::async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, message: &str) -> transport::Result<()> {
        self.tx
            .send(message.to_string())
            .map_err(|_| TransportError::ConnectionLost("channel closed".into()))
    }

    async fn recv(&self) -> transport::Result<Option<String>> {
        let mut rx = self.rx.lock().await;
        Ok(rx.recv().await)
    }
}

pub mod console;

use std::path::Path;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::types::{IncomingMessage, Recipient};

/// Trait for the peer-to-peer chat transport the gateway sits on.
/// Implementations push received messages into the inbound bus and
/// expose the two send operations the gateway needs.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send a text message.
    async fn send_text(&self, to: &Recipient, text: &str) -> Result<(), TransportError>;

    /// Upload a local file.
    async fn send_file(&self, to: &Recipient, path: &Path) -> Result<(), TransportError>;
}

/// Async queue that decouples the transport's receive side from the
/// gateway's dispatch loop.
pub struct InboundBus {
    tx: mpsc::Sender<IncomingMessage>,
    rx: mpsc::Receiver<IncomingMessage>,
}

impl InboundBus {
    pub fn new(buffer_size: usize) -> Self {
        let (tx, rx) = mpsc::channel(buffer_size);
        Self { tx, rx }
    }

    /// Sender handle for the transport side.
    pub fn sender(&self) -> mpsc::Sender<IncomingMessage> {
        self.tx.clone()
    }

    /// Receiver half for the gateway dispatch loop.
    pub fn into_receiver(self) -> mpsc::Receiver<IncomingMessage> {
        self.rx
    }
}

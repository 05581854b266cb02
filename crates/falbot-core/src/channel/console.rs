//! Console transport for local development: stdin lines become private
//! messages, replies and artifact paths are printed to stdout.

use std::path::Path;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::error;

use crate::error::TransportError;
use crate::types::{IncomingMessage, Recipient};

use super::ChatTransport;

pub struct ConsoleTransport;

impl ConsoleTransport {
    pub fn new() -> Self {
        Self
    }

    /// Read stdin in a blocking thread and feed each line into the
    /// inbound bus as a PM from the `console` user.
    pub fn spawn_stdin_reader(tx: mpsc::Sender<IncomingMessage>) {
        std::thread::spawn(move || {
            let stdin = std::io::stdin();
            let mut line = String::new();
            loop {
                line.clear();
                match stdin.read_line(&mut line) {
                    Ok(0) => break, // EOF
                    Ok(_) => {
                        let text = line.trim();
                        if text.is_empty() {
                            continue;
                        }
                        let msg = IncomingMessage::pm("console", "console", text);
                        if tx.blocking_send(msg).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("stdin read failed: {}", e);
                        break;
                    }
                }
            }
        });
    }
}

impl Default for ConsoleTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatTransport for ConsoleTransport {
    async fn send_text(&self, to: &Recipient, text: &str) -> Result<(), TransportError> {
        println!("[{}] {}", to, text);
        Ok(())
    }

    async fn send_file(&self, to: &Recipient, path: &Path) -> Result<(), TransportError> {
        println!("[{}] <file: {}>", to, path.display());
        Ok(())
    }
}

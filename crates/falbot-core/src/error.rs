use std::path::PathBuf;

use crate::types::Atoms;

/// Core error types for falbot.
#[derive(Debug, thiserror::Error)]
pub enum FalbotError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    #[error("Billing error: {0}")]
    Billing(#[from] BillingError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("No fal API key configured")]
    NoApiKey,
}

/// Errors surfaced to the user verbatim: bad flags, unknown models,
/// unknown commands. Never have side effects.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Unknown command: !{0}")]
    Unknown(String),

    #[error("Unknown task: {0}")]
    UnknownTask(String),

    #[error("Unknown model '{name}' for {task}")]
    UnknownModel { task: String, name: String },

    #[error("Invalid option: {0}")]
    InvalidOption(String),

    #[error("Missing argument: {0}")]
    MissingArgument(String),
}

#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("Insufficient funds: balance {balance} atoms, required {required} atoms")]
    InsufficientFunds { balance: Atoms, required: Atoms },

    #[error("Exchange rate unavailable: {0}")]
    RateUnavailable(String),

    #[error("Ledger error: {0}")]
    Ledger(String),
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Job failed: {0}")]
    Failed(String),

    #[error("Job timed out after {0} seconds")]
    Timeout(u64),

    #[error("Job canceled")]
    Canceled,

    #[error("Job completed with no artifacts")]
    NoArtifacts,
}

impl QueueError {
    /// Transient errors are retried inside the poll loop; everything else
    /// terminates the job immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            QueueError::Http(_) => true,
            QueueError::Api { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Download error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Download failed ({status}): {url}")]
    Status { status: u16, url: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Upload failed: {0}")]
    Upload(String),
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Send error: {0}")]
    Send(String),

    #[error("Transport closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, FalbotError>;

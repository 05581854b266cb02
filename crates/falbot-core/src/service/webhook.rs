//! Optional passthrough of non-command chat to an external AI endpoint.

use serde_json::{json, Value};

use crate::error::{FalbotError, TransportError};
use crate::util::http;

pub struct WebhookClient {
    url: String,
    api_key: String,
}

impl WebhookClient {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self { url: url.into(), api_key: api_key.into() }
    }

    /// Forward a user message and return the endpoint's reply text.
    pub async fn relay(&self, user: &str, message: &str) -> Result<String, FalbotError> {
        let mut request = http::client()
            .post(&self.url)
            .json(&json!({ "user": user, "message": message }));
        if !self.api_key.is_empty() {
            request = request.header("X-Api-Key", &self.api_key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| FalbotError::Transport(TransportError::Send(e.to_string())))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FalbotError::Transport(TransportError::Send(format!(
                "webhook returned {}",
                status
            ))));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| FalbotError::Transport(TransportError::Send(e.to_string())))?;
        Ok(parse_reply(&data))
    }
}

/// Extract the reply text; tolerate both `{"reply": ...}` and
/// `{"message": ...}` shapes.
fn parse_reply(data: &Value) -> String {
    data.get("reply")
        .or_else(|| data.get("message"))
        .and_then(|v| v.as_str())
        .unwrap_or("(no reply)")
        .to_string()
}

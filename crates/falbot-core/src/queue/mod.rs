//! Client for the fal asynchronous inference queue.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::QueueError;
use crate::registry::response;
use crate::types::{FinalResult, ProgressEvent, Task};
use crate::util::http;

/// Handle returned by a successful submit.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitHandle {
    pub request_id: String,
    pub status_url: String,
    pub response_url: String,
    pub cancel_url: String,
    pub queue_position: Option<u64>,
}

/// Trait seam for the queue, mocked in pipeline tests.
#[async_trait]
pub trait InferenceQueue: Send + Sync {
    /// Submit a job to the remote backend.
    async fn submit(&self, endpoint_path: &str, body: &Value) -> Result<SubmitHandle, QueueError>;

    /// Poll the job to a terminal state, emitting lifecycle events as it
    /// goes. Cancellation is signalled through the watch channel.
    async fn track(
        &self,
        handle: &SubmitHandle,
        task: Task,
        events: mpsc::Sender<ProgressEvent>,
        cancel: watch::Receiver<bool>,
    ) -> Result<FinalResult, QueueError>;
}

/// Remote job status, as reported by `GET status_url?logs=1`.
#[derive(Debug, Clone, PartialEq)]
enum RemoteState {
    InQueue,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug)]
struct StatusPage {
    state: RemoteState,
    queue_position: Option<u64>,
    logs: Vec<String>,
}

/// Drop a trailing `/status` segment so the handle's response URL can be
/// fetched directly.
pub fn strip_status_suffix(url: &str) -> &str {
    url.strip_suffix("/status").unwrap_or(url)
}

fn parse_status_page(data: &Value) -> Result<StatusPage, QueueError> {
    let status = data
        .get("status")
        .and_then(|v| v.as_str())
        .ok_or_else(|| QueueError::Parse("status field missing".to_string()))?;
    let state = match status {
        "IN_QUEUE" => RemoteState::InQueue,
        "IN_PROGRESS" => RemoteState::InProgress,
        "COMPLETED" => RemoteState::Completed,
        "FAILED" => RemoteState::Failed,
        other => return Err(QueueError::Parse(format!("unknown status '{}'", other))),
    };
    let queue_position = data.get("queue_position").and_then(|v| v.as_u64());
    let logs = data
        .get("logs")
        .and_then(|v| v.as_array())
        .map(|entries| {
            entries
                .iter()
                .filter_map(|e| e.get("message").and_then(|m| m.as_str()))
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default();
    Ok(StatusPage { state, queue_position, logs })
}

fn parse_submit_response(queue_base: &str, endpoint_path: &str, data: &Value) -> Result<SubmitHandle, QueueError> {
    let request_id = data
        .get("request_id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| QueueError::Parse("request_id missing from submit response".to_string()))?
        .to_string();

    let derived = format!("{}/{}/requests/{}", queue_base, endpoint_path, request_id);
    let field = |key: &str| data.get(key).and_then(|v| v.as_str()).map(|s| s.to_string());

    Ok(SubmitHandle {
        status_url: field("status_url").unwrap_or_else(|| format!("{}/status", derived)),
        response_url: field("response_url").unwrap_or_else(|| derived.clone()),
        cancel_url: field("cancel_url").unwrap_or_else(|| format!("{}/cancel", derived)),
        queue_position: data.get("queue_position").and_then(|v| v.as_u64()),
        request_id,
    })
}

/// Sleep for `delay`, returning early with `true` when cancellation fires.
async fn sleep_or_cancel(delay: Duration, cancel: &mut watch::Receiver<bool>) -> bool {
    if *cancel.borrow() {
        return true;
    }
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return false,
            res = cancel.changed() => match res {
                Ok(()) if *cancel.borrow() => return true,
                Ok(()) => continue,
                Err(_) => {
                    // sender gone: no cancellation can arrive, finish the wait
                    sleep.as_mut().await;
                    return false;
                }
            },
        }
    }
}

/// HTTP client for the fal queue API.
pub struct FalQueueClient {
    api_key: String,
    queue_base: String,
    poll_interval: Duration,
    max_transient_retries: u32,
    deadline: Duration,
}

impl FalQueueClient {
    pub fn new(api_key: impl Into<String>, queue_base: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            queue_base: queue_base.into().trim_end_matches('/').to_string(),
            poll_interval: Duration::from_secs(2),
            max_transient_retries: 5,
            deadline: Duration::from_secs(1800),
        }
    }

    pub fn with_timings(mut self, poll_interval: Duration, deadline: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.deadline = deadline;
        self
    }

    fn auth(&self) -> String {
        format!("Key {}", self.api_key)
    }

    async fn get_json(&self, url: &str) -> Result<Value, QueueError> {
        let response = http::client()
            .get(url)
            .header("Authorization", self.auth())
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(QueueError::Api { status: status.as_u16(), message });
        }
        Ok(response.json().await?)
    }

    async fn poll_status(&self, status_url: &str) -> Result<StatusPage, QueueError> {
        let url = format!("{}?logs=1", status_url);
        let data = self.get_json(&url).await?;
        parse_status_page(&data)
    }

    async fn fetch_result(&self, handle: &SubmitHandle, task: Task) -> Result<FinalResult, QueueError> {
        let url = strip_status_suffix(&handle.response_url);
        let payload = self.get_json(url).await?;
        response::parse_final(task, &payload)
    }

    /// Best-effort cancel; failures are logged and swallowed.
    async fn cancel_remote(&self, handle: &SubmitHandle) {
        let result = http::client()
            .post(&handle.cancel_url)
            .header("Authorization", self.auth())
            .send()
            .await;
        match result {
            Ok(r) if r.status().is_success() => debug!(request = %handle.request_id, "remote cancel accepted"),
            Ok(r) => warn!(request = %handle.request_id, status = %r.status(), "remote cancel rejected"),
            Err(e) => warn!(request = %handle.request_id, "remote cancel failed: {}", e),
        }
    }

    fn backoff(&self, current: Duration) -> Duration {
        let doubled = (current * 2).min(Duration::from_secs(10));
        let jitter = rand::thread_rng().gen_range(0..500);
        doubled + Duration::from_millis(jitter)
    }
}

#[async_trait]
impl InferenceQueue for FalQueueClient {
    async fn submit(&self, endpoint_path: &str, body: &Value) -> Result<SubmitHandle, QueueError> {
        let url = format!("{}/{}", self.queue_base, endpoint_path);
        let mut attempt = 0u32;
        let mut delay = Duration::from_millis(500);
        loop {
            let result = async {
                let response = http::client()
                    .post(&url)
                    .header("Authorization", self.auth())
                    .json(body)
                    .send()
                    .await?;
                let status = response.status();
                if !status.is_success() {
                    let message = response.text().await.unwrap_or_default();
                    return Err(QueueError::Api { status: status.as_u16(), message });
                }
                let data: Value = response.json().await?;
                parse_submit_response(&self.queue_base, endpoint_path, &data)
            }
            .await;

            match result {
                Ok(handle) => {
                    debug!(request = %handle.request_id, endpoint = endpoint_path, "job submitted");
                    return Ok(handle);
                }
                Err(e) if e.is_transient() && attempt < self.max_transient_retries => {
                    attempt += 1;
                    warn!(endpoint = endpoint_path, attempt, "transient submit error: {}", e);
                    tokio::time::sleep(delay).await;
                    delay = self.backoff(delay);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn track(
        &self,
        handle: &SubmitHandle,
        task: Task,
        events: mpsc::Sender<ProgressEvent>,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<FinalResult, QueueError> {
        let started = Instant::now();
        let mut delay = self.poll_interval;
        let mut transient_failures = 0u32;
        let mut logs_seen = 0usize;
        let mut announced_progress = false;

        loop {
            if started.elapsed() >= self.deadline {
                self.cancel_remote(handle).await;
                return Err(QueueError::Timeout(self.deadline.as_secs()));
            }

            match self.poll_status(&handle.status_url).await {
                Ok(page) => {
                    transient_failures = 0;
                    delay = self.poll_interval;
                    for line in page.logs.iter().skip(logs_seen) {
                        let _ = events.send(ProgressEvent::Log { line: line.clone() }).await;
                    }
                    logs_seen = logs_seen.max(page.logs.len());

                    match page.state {
                        RemoteState::InQueue => {
                            let _ = events
                                .send(ProgressEvent::Queued { position: page.queue_position })
                                .await;
                        }
                        RemoteState::InProgress => {
                            if !announced_progress {
                                announced_progress = true;
                                let _ = events.send(ProgressEvent::InProgress).await;
                            }
                        }
                        RemoteState::Completed => {
                            return self.fetch_result(handle, task).await;
                        }
                        RemoteState::Failed => {
                            let reason = page
                                .logs
                                .last()
                                .cloned()
                                .unwrap_or_else(|| "backend reported failure".to_string());
                            return Err(QueueError::Failed(reason));
                        }
                    }
                }
                Err(e) if e.is_transient() => {
                    transient_failures += 1;
                    if transient_failures > self.max_transient_retries {
                        return Err(e);
                    }
                    warn!(request = %handle.request_id, transient_failures, "poll error: {}", e);
                    delay = self.backoff(delay);
                }
                Err(e) => return Err(e),
            }

            if sleep_or_cancel(delay, &mut cancel).await {
                self.cancel_remote(handle).await;
                return Err(QueueError::Canceled);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strip_status_suffix() {
        assert_eq!(
            strip_status_suffix("https://queue.fal.run/fal-ai/flux/dev/requests/abc/status"),
            "https://queue.fal.run/fal-ai/flux/dev/requests/abc"
        );
        assert_eq!(strip_status_suffix("https://x/requests/abc"), "https://x/requests/abc");
    }

    #[test]
    fn test_parse_submit_response_explicit_urls() {
        let data = json!({
            "request_id": "req-1",
            "status_url": "https://q/s",
            "response_url": "https://q/r",
            "cancel_url": "https://q/c",
            "queue_position": 3
        });
        let handle = parse_submit_response("https://queue.fal.run", "fal-ai/flux/dev", &data).unwrap();
        assert_eq!(handle.request_id, "req-1");
        assert_eq!(handle.status_url, "https://q/s");
        assert_eq!(handle.queue_position, Some(3));
    }

    #[test]
    fn test_parse_submit_response_derives_urls() {
        let data = json!({ "request_id": "req-2" });
        let handle = parse_submit_response("https://queue.fal.run", "fal-ai/veo2", &data).unwrap();
        assert_eq!(handle.status_url, "https://queue.fal.run/fal-ai/veo2/requests/req-2/status");
        assert_eq!(handle.response_url, "https://queue.fal.run/fal-ai/veo2/requests/req-2");
        assert_eq!(handle.cancel_url, "https://queue.fal.run/fal-ai/veo2/requests/req-2/cancel");
    }

    #[test]
    fn test_parse_submit_response_missing_id() {
        let data = json!({ "status": "ok" });
        assert!(matches!(
            parse_submit_response("https://q", "e", &data),
            Err(QueueError::Parse(_))
        ));
    }

    #[test]
    fn test_parse_status_page() {
        let data = json!({
            "status": "IN_QUEUE",
            "queue_position": 7,
            "logs": [
                { "message": "waiting", "level": "INFO", "timestamp": "2026-01-01T00:00:00Z" }
            ]
        });
        let page = parse_status_page(&data).unwrap();
        assert_eq!(page.state, RemoteState::InQueue);
        assert_eq!(page.queue_position, Some(7));
        assert_eq!(page.logs, vec!["waiting".to_string()]);
    }

    #[test]
    fn test_parse_status_page_unknown_state() {
        let data = json!({ "status": "EXPLODED" });
        assert!(matches!(parse_status_page(&data), Err(QueueError::Parse(_))));
    }

    #[tokio::test]
    async fn test_sleep_or_cancel_cancels() {
        let (tx, mut rx) = watch::channel(false);
        tx.send(true).unwrap();
        assert!(sleep_or_cancel(Duration::from_secs(60), &mut rx).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_or_cancel_completes() {
        let (_tx, mut rx) = watch::channel(false);
        assert!(!sleep_or_cancel(Duration::from_secs(2), &mut rx).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_or_cancel_sender_dropped() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        assert!(!sleep_or_cancel(Duration::from_secs(2), &mut rx).await);
    }
}

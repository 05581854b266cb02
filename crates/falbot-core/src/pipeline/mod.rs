//! The job pipeline: turns a parsed generation command into a billed,
//! tracked, delivered job with ordered compensation on failure.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::billing::{BillingCoordinator, DebitReceipt};
use crate::channel::ChatTransport;
use crate::commands::GenerateRequest;
use crate::courier::Courier;
use crate::error::{BillingError, QueueError};
use crate::progress::ProgressThrottler;
use crate::queue::{InferenceQueue, SubmitHandle};
use crate::registry::{request, ModelRegistry};
use crate::types::{FinalResult, IncomingMessage, Job, JobState, ProgressEvent, Recipient};
use crate::util::truncate_string;

/// Format a USD amount with at least two and at most four decimals.
fn fmt_usd(x: f64) -> String {
    let s = format!("{:.4}", x);
    let s = s.trim_end_matches('0');
    match s.split_once('.') {
        Some((_, frac)) if frac.len() >= 2 => s.to_string(),
        Some((int, frac)) => format!("{}.{}{}", int, frac, "0".repeat(2 - frac.len())),
        None => format!("{}.00", s),
    }
}

/// Orchestrates one job end to end. The pipeline is the only component
/// that mutates `Job.state`, and the only place errors become user
/// messages and compensation.
pub struct JobPipeline {
    registry: Arc<ModelRegistry>,
    billing: Arc<BillingCoordinator>,
    queue: Arc<dyn InferenceQueue>,
    courier: Arc<dyn Courier>,
    transport: Arc<dyn ChatTransport>,
}

impl JobPipeline {
    pub fn new(
        registry: Arc<ModelRegistry>,
        billing: Arc<BillingCoordinator>,
        queue: Arc<dyn InferenceQueue>,
        courier: Arc<dyn Courier>,
        transport: Arc<dyn ChatTransport>,
    ) -> Self {
        Self { registry, billing, queue, courier, transport }
    }

    async fn send(&self, to: &Recipient, text: &str) {
        if let Err(e) = self.transport.send_text(to, text).await {
            warn!(to = %to, "send failed: {}", e);
        }
    }

    /// Run one generation command to completion.
    pub async fn run(&self, origin: &IncomingMessage, req: GenerateRequest, cancel: watch::Receiver<bool>) {
        let to = origin.reply_target();
        let user = origin.sender_id.clone();

        let desc = match self.registry.current(req.task, Some(&user)) {
            Some(d) => d,
            None => {
                self.send(&to, &format!("⚠️ no models registered for {}", req.task)).await;
                return;
            }
        };

        if req.is_bare() {
            self.send(&to, &self.registry.render_help(desc)).await;
            return;
        }

        // Validate options and build the request body before touching the
        // ledger: user errors must have no side effects.
        let opts = match request::parse_options(desc, &req.flags) {
            Ok(opts) => opts,
            Err(e) => {
                self.send(&to, &format!("⚠️ {}", e)).await;
                return;
            }
        };
        let body = match request::build_request(desc, &req.prompt, req.image_url.as_deref(), &opts) {
            Ok(body) => body,
            Err(e) => {
                self.send(&to, &format!("⚠️ {}", e)).await;
                return;
            }
        };
        let price_usd = desc.pricing.price_usd(&opts);

        let mut job = Job::new(&user, to.clone(), req.task, desc.name);
        job.price_usd = price_usd;
        info!(job = %job.id, user = %user, model = desc.name, price_usd, "job accepted");

        let receipt = match self.billing.authorize_and_debit(&user, price_usd).await {
            Ok(receipt) => receipt,
            Err(BillingError::InsufficientFunds { balance, required }) => {
                self.send(
                    &to,
                    &format!(
                        "💸 insufficient funds: this costs {} atoms (≈ ${}), your balance is {} atoms",
                        required,
                        fmt_usd(price_usd),
                        balance
                    ),
                )
                .await;
                return;
            }
            Err(BillingError::RateUnavailable(reason)) => {
                warn!(job = %job.id, "rate unavailable: {}", reason);
                self.send(&to, "⚠️ exchange rate unavailable right now, try again in a minute").await;
                return;
            }
            Err(e) => {
                error!(job = %job.id, "authorization error: {}", e);
                self.send(&to, "⚠️ something went wrong, you were not charged").await;
                return;
            }
        };
        job.debit_atoms = receipt.atoms;
        job.rate = receipt.snapshot.clone();
        if job.transition(JobState::Billed).is_err() {
            return;
        }

        // Acknowledge before any progress event.
        self.send(&to, &format!("⚙️ {} via {} — submitting (≈ ${})", job.task, desc.name, fmt_usd(price_usd)))
            .await;

        let handle = match self.queue.submit(desc.endpoint_path, &body).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(job = %job.id, "submit failed: {}", e);
                let _ = job.transition(JobState::Failed);
                self.refund(&mut job, &receipt).await;
                self.send(&to, &self.with_refund_note("❌ could not start the job".to_string(), &receipt))
                    .await;
                return;
            }
        };
        if job.transition(JobState::Submitted).is_err() {
            return;
        }

        let outcome = self.track_with_progress(&mut job, &handle, cancel).await;

        match outcome {
            Ok(result) => self.deliver_all(&mut job, &receipt, result).await,
            Err(e) => {
                let _ = job.transition(JobState::Failed);
                self.refund(&mut job, &receipt).await;
                let msg = match e {
                    QueueError::Canceled => "🛑 job canceled".to_string(),
                    QueueError::Timeout(secs) => format!("⏱ job timed out after {} minutes", secs / 60),
                    QueueError::Failed(reason) => {
                        format!("❌ generation failed: {}", truncate_string(&reason, 200, "…"))
                    }
                    QueueError::NoArtifacts => "❌ generation finished without output".to_string(),
                    other => {
                        error!(job = %job.id, "tracking error: {}", other);
                        "❌ generation failed unexpectedly".to_string()
                    }
                };
                self.send(&job.reply_to.clone(), &self.with_refund_note(msg, &receipt)).await;
            }
        }
    }

    /// Poll the queue while forwarding throttled progress to the user.
    async fn track_with_progress(
        &self,
        job: &mut Job,
        handle: &SubmitHandle,
        cancel: watch::Receiver<bool>,
    ) -> Result<FinalResult, QueueError> {
        let (tx, mut rx) = mpsc::channel::<ProgressEvent>(64);
        // The submit response may already carry a queue position; surface
        // it before the first poll lands.
        if let Some(position) = handle.queue_position {
            let _ = tx.try_send(ProgressEvent::Queued { position: Some(position) });
        }
        let track_fut = self.queue.track(handle, job.task, tx, cancel);
        tokio::pin!(track_fut);

        let mut throttler = ProgressThrottler::new(Instant::now());
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                res = &mut track_fut => {
                    while let Ok(ev) = rx.try_recv() {
                        self.apply_event(job, &ev);
                        if let Some(msg) = throttler.offer(&ev, Instant::now()) {
                            self.send(&job.reply_to.clone(), &msg).await;
                        }
                    }
                    return res;
                }
                Some(ev) = rx.recv() => {
                    self.apply_event(job, &ev);
                    if let Some(msg) = throttler.offer(&ev, Instant::now()) {
                        self.send(&job.reply_to.clone(), &msg).await;
                    }
                }
                _ = ticker.tick() => {
                    let now = Instant::now();
                    for msg in throttler.tick(now) {
                        self.send(&job.reply_to.clone(), &msg).await;
                    }
                    if let Some(msg) = throttler.maybe_reassure(now) {
                        self.send(&job.reply_to.clone(), &msg).await;
                    }
                }
            }
        }
    }

    fn apply_event(&self, job: &mut Job, event: &ProgressEvent) {
        let next = match event {
            ProgressEvent::Queued { .. } => Some(JobState::Queued),
            ProgressEvent::InProgress => Some(JobState::InProgress),
            _ => None,
        };
        if let Some(next) = next {
            if job.state.can_transition_to(next) {
                let _ = job.transition(next);
            }
        }
    }

    /// Deliver every artifact in order. Any delivered artifact commits
    /// the debit; zero delivered refunds it.
    async fn deliver_all(&self, job: &mut Job, receipt: &DebitReceipt, result: FinalResult) {
        let to = job.reply_to.clone();
        if job.transition(JobState::Completed).is_err() {
            return;
        }

        let total = result.artifacts.len();
        let mut delivered = 0usize;
        for artifact in &result.artifacts {
            match self.courier.deliver(artifact, &to, self.transport.as_ref()).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!(job = %job.id, url = %artifact.url, "artifact delivery failed: {}", e),
            }
        }

        if delivered == 0 {
            let _ = job.transition(JobState::Failed);
            self.refund(job, receipt).await;
            self.send(&to, &self.with_refund_note("⚠️ generation succeeded but delivery failed".to_string(), receipt))
                .await;
            return;
        }

        let _ = job.transition(JobState::Delivered);
        if delivered < total {
            self.send(&to, &format!("⚠️ {} of {} artifacts could not be delivered", total - delivered, total))
                .await;
        }

        // The billing receipt is the last user-visible message.
        self.send(&to, &self.receipt_message(job, receipt)).await;
        info!(job = %job.id, delivered, total, atoms = receipt.atoms, "job delivered");
    }

    fn receipt_message(&self, job: &Job, receipt: &DebitReceipt) -> String {
        if receipt.atoms == 0 {
            return "✅ done".to_string();
        }
        format!(
            "✅ billed {} atoms (≈ ${}), remaining balance {}",
            receipt.atoms,
            fmt_usd(job.price_usd),
            receipt.balance_after
        )
    }

    fn with_refund_note(&self, msg: String, receipt: &DebitReceipt) -> String {
        if receipt.atoms > 0 {
            format!("{} — {} atoms refunded", msg, receipt.atoms)
        } else {
            msg
        }
    }

    /// Compensate the debit. The state machine guarantees this runs at
    /// most once per job: every caller transitions to Failed first and
    /// returns right after.
    async fn refund(&self, job: &mut Job, receipt: &DebitReceipt) {
        if receipt.atoms > 0 {
            if let Err(e) = self.billing.refund(&job.user_id, receipt.atoms).await {
                error!(job = %job.id, user = %job.user_id, atoms = receipt.atoms, "refund failed: {}", e);
            }
        }
        let _ = job.transition(JobState::Refunded);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fmt_usd() {
        assert_eq!(fmt_usd(0.02), "0.02");
        assert_eq!(fmt_usd(4.0), "4.00");
        assert_eq!(fmt_usd(0.025), "0.025");
        assert_eq!(fmt_usd(2.5), "2.50");
        assert_eq!(fmt_usd(0.0001), "0.0001");
    }
}

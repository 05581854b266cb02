//! Per-job throttling of user-visible progress updates.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::types::{ProgressEvent, ProgressKind};

fn min_interval(kind: ProgressKind) -> Duration {
    match kind {
        ProgressKind::Queue => Duration::from_secs(30),
        ProgressKind::Progress => Duration::from_secs(20),
        ProgressKind::Log => Duration::from_secs(15),
        ProgressKind::Reassurance => Duration::from_secs(120),
    }
}

#[derive(Debug, Default)]
struct KindState {
    last_sent_at: Option<Instant>,
    last_sent: Option<String>,
    pending: Option<String>,
}

/// Stream transformer over progress events. Per kind it enforces a
/// minimum interval, keeps only the latest pending message, drops
/// messages identical to the last one sent, and lets the first message
/// of each kind through immediately. Errors bypass it entirely.
///
/// Events of one kind are never reordered: `offer` either emits the
/// message now or stores it as the single pending slot that `tick`
/// flushes later.
pub struct ProgressThrottler {
    states: HashMap<ProgressKind, KindState>,
    started_at: Instant,
    last_activity: Instant,
}

impl ProgressThrottler {
    pub fn new(now: Instant) -> Self {
        Self {
            states: HashMap::new(),
            started_at: now,
            last_activity: now,
        }
    }

    /// Offer an event. Returns the rendered message if it should be sent
    /// right now; otherwise it is recorded as pending (or dropped as a
    /// duplicate).
    pub fn offer(&mut self, event: &ProgressEvent, now: Instant) -> Option<String> {
        let kind = match event.kind() {
            Some(kind) => kind,
            // errors are never throttled
            None => {
                self.last_activity = now;
                return Some(event.render());
            }
        };
        let message = event.render();
        let state = self.states.entry(kind).or_default();

        let due = match state.last_sent_at {
            None => true,
            Some(at) => now.duration_since(at) >= min_interval(kind),
        };
        if due && state.last_sent.as_deref() != Some(message.as_str()) {
            state.last_sent_at = Some(now);
            state.last_sent = Some(message.clone());
            state.pending = None;
            self.last_activity = now;
            return Some(message);
        }

        // Keep only the latest message per kind; identical-to-sent
        // messages are dropped outright.
        if state.last_sent.as_deref() != Some(message.as_str()) {
            state.pending = Some(message);
        }
        None
    }

    /// Flush pending messages whose interval has expired and that still
    /// differ from the last sent one. Call on every poll tick.
    pub fn tick(&mut self, now: Instant) -> Vec<String> {
        let mut out = Vec::new();
        for (kind, state) in self.states.iter_mut() {
            let due = match state.last_sent_at {
                None => true,
                Some(at) => now.duration_since(at) >= min_interval(*kind),
            };
            if !due {
                continue;
            }
            if let Some(pending) = state.pending.take() {
                if state.last_sent.as_deref() != Some(pending.as_str()) {
                    state.last_sent_at = Some(now);
                    state.last_sent = Some(pending.clone());
                    out.push(pending);
                }
            }
        }
        if !out.is_empty() {
            self.last_activity = now;
        }
        out
    }

    /// Long-operation reassurance: when nothing reached the user for the
    /// reassurance interval, synthesize one.
    pub fn maybe_reassure(&mut self, now: Instant) -> Option<String> {
        if now.duration_since(self.last_activity) < min_interval(ProgressKind::Reassurance) {
            return None;
        }
        let elapsed = now.duration_since(self.started_at).as_secs();
        let event = ProgressEvent::Reassurance { elapsed_secs: elapsed };
        self.offer(&event, now)
    }
}

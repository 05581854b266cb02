use serde::{Deserialize, Serialize};

/// Smallest indivisible unit of the billing currency.
pub type Atoms = i64;

/// Inference task families supported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    TextToImage,
    ImageToImage,
    TextToSpeech,
    TextToVideo,
    ImageToVideo,
}

impl Task {
    pub const ALL: [Task; 5] = [
        Task::TextToImage,
        Task::ImageToImage,
        Task::TextToSpeech,
        Task::TextToVideo,
        Task::ImageToVideo,
    ];

    /// Command word used in chat (e.g. `!text2image`).
    pub fn command(&self) -> &'static str {
        match self {
            Task::TextToImage => "text2image",
            Task::ImageToImage => "image2image",
            Task::TextToSpeech => "text2speech",
            Task::TextToVideo => "text2video",
            Task::ImageToVideo => "image2video",
        }
    }

    /// Parse a task name as used in `!listmodels` / `!setmodel` arguments.
    /// Accepts both the command word and a few short aliases.
    pub fn parse(s: &str) -> Option<Task> {
        match s.to_ascii_lowercase().as_str() {
            "text2image" | "t2i" | "image" => Some(Task::TextToImage),
            "image2image" | "i2i" => Some(Task::ImageToImage),
            "text2speech" | "t2s" | "tts" | "speech" => Some(Task::TextToSpeech),
            "text2video" | "t2v" => Some(Task::TextToVideo),
            "image2video" | "i2v" => Some(Task::ImageToVideo),
            _ => None,
        }
    }
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.command())
    }
}

/// Where a message came from: private chat or group chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Pm,
    Gc,
}

/// Message received from the chat transport.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub kind: ChatKind,
    pub sender_id: String,
    pub sender_nick: String,
    pub group_id: Option<String>,
    pub text: String,
}

impl IncomingMessage {
    pub fn pm(sender_id: impl Into<String>, sender_nick: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind: ChatKind::Pm,
            sender_id: sender_id.into(),
            sender_nick: sender_nick.into(),
            group_id: None,
            text: text.into(),
        }
    }

    pub fn gc(
        sender_id: impl Into<String>,
        sender_nick: impl Into<String>,
        group_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            kind: ChatKind::Gc,
            sender_id: sender_id.into(),
            sender_nick: sender_nick.into(),
            group_id: Some(group_id.into()),
            text: text.into(),
        }
    }

    /// Where replies and artifacts for this message go: the group for
    /// group chat, the sender for private chat.
    pub fn reply_target(&self) -> Recipient {
        match (&self.kind, &self.group_id) {
            (ChatKind::Gc, Some(gid)) => Recipient { kind: ChatKind::Gc, id: gid.clone() },
            _ => Recipient { kind: ChatKind::Pm, id: self.sender_id.clone() },
        }
    }
}

/// Destination for an outbound text or file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub kind: ChatKind,
    pub id: String,
}

impl std::fmt::Display for Recipient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            ChatKind::Pm => write!(f, "pm:{}", self.id),
            ChatKind::Gc => write!(f, "gc:{}", self.id),
        }
    }
}

/// A cached USD quote for the billing coin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateSnapshot {
    pub usd_per_coin: f64,
    pub btc_per_coin: Option<f64>,
    pub fetched_at: chrono::DateTime<chrono::Utc>,
}

/// Lifecycle event emitted by the queue tracker.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Queued { position: Option<u64> },
    InProgress,
    Log { line: String },
    Reassurance { elapsed_secs: u64 },
    Error { reason: String },
}

/// Throttle channel for a progress event. Errors have no kind: they are
/// never throttled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgressKind {
    Queue,
    Progress,
    Log,
    Reassurance,
}

impl ProgressEvent {
    pub fn kind(&self) -> Option<ProgressKind> {
        match self {
            ProgressEvent::Queued { .. } => Some(ProgressKind::Queue),
            ProgressEvent::InProgress => Some(ProgressKind::Progress),
            ProgressEvent::Log { .. } => Some(ProgressKind::Log),
            ProgressEvent::Reassurance { .. } => Some(ProgressKind::Reassurance),
            ProgressEvent::Error { .. } => None,
        }
    }

    /// User-facing rendering of the event.
    pub fn render(&self) -> String {
        match self {
            ProgressEvent::Queued { position: Some(p) } => format!("⏳ queued at position {}", p),
            ProgressEvent::Queued { position: None } => "⏳ queued".to_string(),
            ProgressEvent::InProgress => "⚙️ generation started".to_string(),
            ProgressEvent::Log { line } => format!("· {}", line),
            ProgressEvent::Reassurance { elapsed_secs } => {
                format!("⏳ still working ({} min elapsed)", elapsed_secs / 60)
            }
            ProgressEvent::Error { reason } => format!("❌ {}", reason),
        }
    }
}

/// A single downloadable output of a completed job.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub url: String,
    pub content_type: String,
}

/// Parsed completion payload: one or more artifacts, delivered in order.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalResult {
    pub artifacts: Vec<Artifact>,
}

/// Job lifecycle states. The pipeline is the only writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    New,
    Billed,
    Submitted,
    Queued,
    InProgress,
    Completed,
    Delivered,
    Failed,
    Refunded,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Delivered | JobState::Refunded)
    }

    /// Legal transitions of the job state machine.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (New, Billed)
                | (Billed, Submitted)
                | (Billed, Failed)
                | (Submitted, Queued)
                | (Submitted, InProgress)
                | (Submitted, Completed)
                | (Submitted, Failed)
                | (Queued, Queued)
                | (Queued, InProgress)
                | (Queued, Completed)
                | (Queued, Failed)
                | (InProgress, Queued)
                | (InProgress, InProgress)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (Completed, Delivered)
                | (Completed, Failed)
                | (Failed, Refunded)
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::New => "new",
            JobState::Billed => "billed",
            JobState::Submitted => "submitted",
            JobState::Queued => "queued",
            JobState::InProgress => "in_progress",
            JobState::Completed => "completed",
            JobState::Delivered => "delivered",
            JobState::Failed => "failed",
            JobState::Refunded => "refunded",
        };
        f.write_str(s)
    }
}

/// One end-to-end execution of a command against a model for a user.
/// Lives only in memory for the duration of the pipeline.
#[derive(Debug)]
pub struct Job {
    pub id: uuid::Uuid,
    pub user_id: String,
    pub reply_to: Recipient,
    pub task: Task,
    pub model_name: String,
    pub price_usd: f64,
    pub debit_atoms: Atoms,
    pub rate: Option<RateSnapshot>,
    pub state: JobState,
    pub submitted_at: chrono::DateTime<chrono::Utc>,
}

impl Job {
    pub fn new(user_id: impl Into<String>, reply_to: Recipient, task: Task, model_name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            user_id: user_id.into(),
            reply_to,
            task,
            model_name: model_name.into(),
            price_usd: 0.0,
            debit_atoms: 0,
            rate: None,
            state: JobState::New,
            submitted_at: chrono::Utc::now(),
        }
    }

    /// Advance the state machine, rejecting illegal transitions.
    pub fn transition(&mut self, next: JobState) -> crate::error::Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(crate::error::FalbotError::Other(format!(
                "illegal job transition {} -> {} (job {})",
                self.state, next, self.id
            )));
        }
        tracing::debug!(job = %self.id, from = %self.state, to = %next, "job transition");
        self.state = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_parse_aliases() {
        assert_eq!(Task::parse("text2image"), Some(Task::TextToImage));
        assert_eq!(Task::parse("T2V"), Some(Task::TextToVideo));
        assert_eq!(Task::parse("tts"), Some(Task::TextToSpeech));
        assert_eq!(Task::parse("i2v"), Some(Task::ImageToVideo));
        assert_eq!(Task::parse("bogus"), None);
    }

    #[test]
    fn test_task_display_roundtrip() {
        for task in Task::ALL {
            assert_eq!(Task::parse(task.command()), Some(task));
        }
    }

    #[test]
    fn test_reply_target_pm_vs_gc() {
        let pm = IncomingMessage::pm("alice", "Alice", "!balance");
        assert_eq!(pm.reply_target(), Recipient { kind: ChatKind::Pm, id: "alice".into() });

        let gc = IncomingMessage::gc("alice", "Alice", "group7", "!balance");
        assert_eq!(gc.reply_target(), Recipient { kind: ChatKind::Gc, id: "group7".into() });
    }

    #[test]
    fn test_progress_event_kinds() {
        assert_eq!(ProgressEvent::Queued { position: Some(3) }.kind(), Some(ProgressKind::Queue));
        assert_eq!(ProgressEvent::InProgress.kind(), Some(ProgressKind::Progress));
        assert_eq!(ProgressEvent::Log { line: "x".into() }.kind(), Some(ProgressKind::Log));
        assert_eq!(ProgressEvent::Error { reason: "x".into() }.kind(), None);
    }

    #[test]
    fn test_progress_render() {
        let ev = ProgressEvent::Queued { position: Some(3) };
        assert!(ev.render().contains("position 3"));
        let ev = ProgressEvent::Reassurance { elapsed_secs: 300 };
        assert!(ev.render().contains("5 min"));
    }

    #[test]
    fn test_job_legal_path() {
        let mut job = Job::new("alice", Recipient { kind: ChatKind::Pm, id: "alice".into() }, Task::TextToImage, "flux/dev");
        assert_eq!(job.state, JobState::New);
        job.transition(JobState::Billed).unwrap();
        job.transition(JobState::Submitted).unwrap();
        job.transition(JobState::Queued).unwrap();
        job.transition(JobState::InProgress).unwrap();
        job.transition(JobState::Queued).unwrap(); // backend may bounce back
        job.transition(JobState::InProgress).unwrap();
        job.transition(JobState::Completed).unwrap();
        job.transition(JobState::Delivered).unwrap();
        assert!(job.state.is_terminal());
    }

    #[test]
    fn test_job_refund_path() {
        let mut job = Job::new("bob", Recipient { kind: ChatKind::Pm, id: "bob".into() }, Task::TextToVideo, "veo2");
        job.transition(JobState::Billed).unwrap();
        job.transition(JobState::Failed).unwrap(); // submit never happened
        job.transition(JobState::Refunded).unwrap();
        assert!(job.state.is_terminal());
    }

    #[test]
    fn test_job_illegal_transitions() {
        let mut job = Job::new("bob", Recipient { kind: ChatKind::Pm, id: "bob".into() }, Task::TextToImage, "flux/dev");
        assert!(job.transition(JobState::Delivered).is_err());
        assert!(job.transition(JobState::Submitted).is_err()); // must bill first
        job.transition(JobState::Billed).unwrap();
        assert!(job.transition(JobState::Delivered).is_err());
    }

    #[test]
    fn test_delivered_requires_completed() {
        // No path reaches Delivered without passing Billed.
        assert!(!JobState::New.can_transition_to(JobState::Delivered));
        assert!(!JobState::Submitted.can_transition_to(JobState::Delivered));
        assert!(JobState::Completed.can_transition_to(JobState::Delivered));
    }
}

//! Gateway wiring: inbound dispatch, per-job task spawning, shared
//! component construction.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, watch, Semaphore};
use tracing::{info, warn};

use crate::billing::ledger::FileLedger;
use crate::billing::oracle::{CoinGeckoSource, RateOracle};
use crate::billing::BillingCoordinator;
use crate::channel::ChatTransport;
use crate::commands::{parse_command, Command};
use crate::config::Config;
use crate::courier::{Courier, HttpCourier};
use crate::error::Result;
use crate::pipeline::JobPipeline;
use crate::queue::{FalQueueClient, InferenceQueue};
use crate::registry::ModelRegistry;
use crate::service::webhook::WebhookClient;
use crate::types::{IncomingMessage, Recipient, Task};
use crate::util::format_coin;

#[derive(Debug)]
struct ActiveJob {
    user_id: String,
    task: Task,
}

/// Top-level service: owns the registry, billing, pipeline, and the
/// dispatch loop. Jobs run on their own tasks, bounded by a global
/// semaphore; commands that only read state are answered inline.
pub struct Gateway {
    registry: Arc<ModelRegistry>,
    billing: Arc<BillingCoordinator>,
    pipeline: Arc<JobPipeline>,
    transport: Arc<dyn ChatTransport>,
    webhook: Option<Arc<WebhookClient>>,
    semaphore: Arc<Semaphore>,
    active: Arc<DashMap<uuid::Uuid, ActiveJob>>,
    shutdown: watch::Sender<bool>,
    coin_ticker: String,
    atoms_per_coin: i64,
}

impl Gateway {
    /// Build the full production stack from configuration.
    pub fn from_config(config: &Config, transport: Arc<dyn ChatTransport>) -> Result<Self> {
        let ledger = Arc::new(FileLedger::open(&config.ledger_path())?);
        let oracle = RateOracle::new(
            Arc::new(CoinGeckoSource::new(&config.coin_id)),
            Duration::from_secs(config.rate_ttl_secs),
            config.atoms_per_coin,
        );
        let billing = Arc::new(BillingCoordinator::new(oracle, ledger, config.billing_enabled));
        let queue = Arc::new(FalQueueClient::new(&config.fal_api_key, &config.queue_base).with_timings(
            Duration::from_secs(config.poll_interval_secs),
            Duration::from_secs(config.job_timeout_secs),
        ));
        let courier = Arc::new(HttpCourier::new());
        let webhook = if config.webhook_enabled {
            Some(Arc::new(WebhookClient::new(&config.webhook_url, &config.webhook_api_key)))
        } else {
            None
        };
        Ok(Self::with_parts(
            Arc::new(ModelRegistry::new()),
            billing,
            queue,
            courier,
            transport,
            webhook,
            &config.coin_ticker,
            config.atoms_per_coin,
            config.max_concurrent_jobs,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn with_parts(
        registry: Arc<ModelRegistry>,
        billing: Arc<BillingCoordinator>,
        queue: Arc<dyn InferenceQueue>,
        courier: Arc<dyn Courier>,
        transport: Arc<dyn ChatTransport>,
        webhook: Option<Arc<WebhookClient>>,
        coin_ticker: &str,
        atoms_per_coin: i64,
        max_concurrent_jobs: usize,
    ) -> Self {
        let pipeline = Arc::new(JobPipeline::new(
            registry.clone(),
            billing.clone(),
            queue,
            courier,
            transport.clone(),
        ));
        let (shutdown, _) = watch::channel(false);
        Self {
            registry,
            billing,
            pipeline,
            transport,
            webhook,
            semaphore: Arc::new(Semaphore::new(max_concurrent_jobs)),
            active: Arc::new(DashMap::new()),
            shutdown,
            coin_ticker: coin_ticker.to_string(),
            atoms_per_coin,
        }
    }

    /// Number of jobs currently running.
    pub fn active_jobs(&self) -> usize {
        self.active.len()
    }

    /// Signal cancellation to every running job.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Main dispatch loop; returns when the inbound channel closes.
    pub async fn run(&self, mut inbound: mpsc::Receiver<IncomingMessage>) {
        info!("falbot gateway started");
        while let Some(msg) = inbound.recv().await {
            self.handle_message(msg).await;
        }
        info!("inbound channel closed, gateway stopping ({} jobs active)", self.active.len());
    }

    async fn send(&self, to: &Recipient, text: &str) {
        if let Err(e) = self.transport.send_text(to, text).await {
            warn!(to = %to, "send failed: {}", e);
        }
    }

    pub async fn handle_message(&self, msg: IncomingMessage) {
        let to = msg.reply_target();
        match parse_command(&msg.text) {
            Err(e) => self.send(&to, &format!("⚠️ {}", e)).await,
            Ok(None) => self.handle_chat(&msg, &to).await,
            Ok(Some(cmd)) => self.handle_command(&msg, cmd, &to).await,
        }
    }

    async fn handle_command(&self, msg: &IncomingMessage, cmd: Command, to: &Recipient) {
        match cmd {
            Command::Help { task, model } => {
                self.send(to, &self.help_text(task, model.as_deref(), &msg.sender_id)).await;
            }
            Command::Balance => {
                let atoms = self.billing.balance(&msg.sender_id).await;
                let mut line = format!(
                    "💰 balance: {} {} ({} atoms)",
                    format_coin(atoms, self.atoms_per_coin),
                    self.coin_ticker,
                    atoms
                );
                if let Ok(snapshot) = self.billing.oracle().snapshot().await {
                    let usd = self.billing.oracle().atoms_to_usd(atoms, &snapshot);
                    line.push_str(&format!(" ≈ ${:.2}", usd));
                }
                self.send(to, &line).await;
            }
            Command::Rate => match self.billing.oracle().snapshot().await {
                Ok(snapshot) => {
                    let mut line = format!("📈 1 {} = ${:.6}", self.coin_ticker, snapshot.usd_per_coin);
                    if let Some(btc) = snapshot.btc_per_coin {
                        line.push_str(&format!(" / {:.10} BTC", btc));
                    }
                    line.push_str(&format!(" (as of {})", snapshot.fetched_at.format("%H:%M:%S UTC")));
                    self.send(to, &line).await;
                }
                Err(e) => self.send(to, &format!("⚠️ {}", e)).await,
            },
            Command::ListModels { task } => {
                self.send(to, &self.registry.render_list(task, Some(&msg.sender_id))).await;
            }
            Command::SetModel { task, model } => {
                match self.registry.set_current(task, &model, Some(&msg.sender_id)) {
                    Ok(()) => self.send(to, &format!("✅ {} model set to {}", task, model)).await,
                    Err(e) => self.send(to, &format!("⚠️ {}", e)).await,
                }
            }
            Command::Generate(req) => {
                let key = uuid::Uuid::new_v4();
                self.active.insert(key, ActiveJob { user_id: msg.sender_id.clone(), task: req.task });

                let pipeline = self.pipeline.clone();
                let semaphore = self.semaphore.clone();
                let active = self.active.clone();
                let cancel = self.shutdown.subscribe();
                let origin = msg.clone();
                tokio::spawn(async move {
                    let _permit = match semaphore.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => {
                            active.remove(&key);
                            return;
                        }
                    };
                    pipeline.run(&origin, req, cancel).await;
                    if let Some((_, job)) = active.remove(&key) {
                        tracing::debug!(user = %job.user_id, task = %job.task, "job slot released");
                    }
                });
            }
        }
    }

    /// Non-command text: relayed to the webhook endpoint when enabled,
    /// otherwise answered with a usage hint.
    async fn handle_chat(&self, msg: &IncomingMessage, to: &Recipient) {
        match &self.webhook {
            Some(webhook) => match webhook.relay(&msg.sender_id, &msg.text).await {
                Ok(reply) => self.send(to, &reply).await,
                Err(e) => {
                    warn!(user = %msg.sender_id, "webhook relay failed: {}", e);
                    self.send(to, "⚠️ chat backend unavailable, try !help").await;
                }
            },
            None => self.send(to, "Commands start with `!` — try !help").await,
        }
    }

    fn help_text(&self, task: Option<Task>, model: Option<&str>, user_id: &str) -> String {
        match task {
            None => {
                let mut lines = vec![
                    format!("{} falbot — AI generation over chat", crate::LOGO),
                    String::new(),
                    "!help [task] [model] — this help, or a model's options".to_string(),
                    "!balance — your balance".to_string(),
                    "!rate — current exchange rate".to_string(),
                    "!listmodels <task> — models for a task".to_string(),
                    "!setmodel <task> <model> — pick your model".to_string(),
                ];
                for t in Task::ALL {
                    lines.push(format!("!{} …", t.command()));
                }
                lines.join("\n")
            }
            Some(task) => {
                let desc = match model {
                    Some(name) => self.registry.get(task, name),
                    None => self.registry.current(task, Some(user_id)),
                };
                match desc {
                    Some(desc) => self.registry.render_help(desc),
                    None => format!("⚠️ unknown model for {} — see !listmodels {}", task, task),
                }
            }
        }
    }
}

pub mod catalog;
pub mod request;
pub mod response;

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::CommandError;
use crate::types::Task;

use request::ParsedOptions;

/// Value type accepted for a request option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Str,
    Int,
    Float,
    Bool,
}

/// One recognized option flag for a model.
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub key: &'static str,
    pub kind: ParamKind,
    pub help: &'static str,
}

/// How a model's effective price is computed from its options.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Pricing {
    /// Fixed price per job.
    Flat(f64),
    /// Price per generated image, multiplied by `num_images`.
    PerImage(f64),
    /// Base price covers `included_secs`; each extra second costs more.
    PerSecond {
        base: f64,
        included_secs: i64,
        per_extra_sec: f64,
    },
}

impl Pricing {
    /// Effective USD price for a job with the given parsed options.
    pub fn price_usd(&self, opts: &ParsedOptions) -> f64 {
        match *self {
            Pricing::Flat(p) => p,
            Pricing::PerImage(p) => {
                let n = opts.get_i64("num_images").unwrap_or(1).max(1);
                p * n as f64
            }
            Pricing::PerSecond { base, included_secs, per_extra_sec } => {
                let duration = opts.get_i64("duration").unwrap_or(included_secs);
                let extra = (duration - included_secs).max(0);
                base + extra as f64 * per_extra_sec
            }
        }
    }

    /// Price with no options supplied, for catalog display.
    pub fn base_usd(&self) -> f64 {
        match *self {
            Pricing::Flat(p) | Pricing::PerImage(p) => p,
            Pricing::PerSecond { base, .. } => base,
        }
    }
}

/// Immutable catalog entry for one model.
#[derive(Debug)]
pub struct ModelDescriptor {
    pub task: Task,
    pub name: &'static str,
    pub endpoint_path: &'static str,
    pub pricing: Pricing,
    pub schema: &'static [ParamSpec],
    pub help: &'static str,
}

impl ModelDescriptor {
    pub fn param(&self, key: &str) -> Option<&ParamSpec> {
        self.schema.iter().find(|p| p.key == key)
    }
}

/// Read-mostly catalog of models plus current-model selection per
/// `(task, user)`. Preferences are in-memory; a restart resets them to
/// the global defaults.
pub struct ModelRegistry {
    catalog: &'static [ModelDescriptor],
    defaults: RwLock<HashMap<Task, &'static str>>,
    prefs: RwLock<HashMap<(Task, String), &'static str>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::with_catalog(catalog::CATALOG)
    }

    pub fn with_catalog(catalog: &'static [ModelDescriptor]) -> Self {
        let mut defaults = HashMap::new();
        for (task, name) in catalog::DEFAULTS {
            if catalog.iter().any(|d| d.task == *task && d.name == *name) {
                defaults.insert(*task, *name);
            }
        }
        Self {
            catalog,
            defaults: RwLock::new(defaults),
            prefs: RwLock::new(HashMap::new()),
        }
    }

    /// Look up a model by task and name.
    pub fn get(&self, task: Task, name: &str) -> Option<&'static ModelDescriptor> {
        self.catalog.iter().find(|d| d.task == task && d.name == name)
    }

    /// All models for a task, in catalog order.
    pub fn list(&self, task: Task) -> Vec<&'static ModelDescriptor> {
        self.catalog.iter().filter(|d| d.task == task).collect()
    }

    /// Resolve the current model for `(task, user)`: user preference,
    /// else global default, else first catalog entry for the task.
    pub fn current(&self, task: Task, user_id: Option<&str>) -> Option<&'static ModelDescriptor> {
        if let Some(user) = user_id {
            let prefs = self.prefs.read().unwrap_or_else(|e| e.into_inner());
            if let Some(name) = prefs.get(&(task, user.to_string())) {
                if let Some(desc) = self.get(task, name) {
                    return Some(desc);
                }
            }
        }
        {
            let defaults = self.defaults.read().unwrap_or_else(|e| e.into_inner());
            if let Some(name) = defaults.get(&task) {
                if let Some(desc) = self.get(task, name) {
                    return Some(desc);
                }
            }
        }
        self.catalog.iter().find(|d| d.task == task)
    }

    /// Set the current model for a user, or the global default when no
    /// user is given. Rejects names not in the catalog.
    pub fn set_current(&self, task: Task, name: &str, user_id: Option<&str>) -> Result<(), CommandError> {
        let desc = self.get(task, name).ok_or_else(|| CommandError::UnknownModel {
            task: task.to_string(),
            name: name.to_string(),
        })?;
        match user_id {
            Some(user) => {
                let mut prefs = self.prefs.write().unwrap_or_else(|e| e.into_inner());
                prefs.insert((task, user.to_string()), desc.name);
            }
            None => {
                let mut defaults = self.defaults.write().unwrap_or_else(|e| e.into_inner());
                defaults.insert(task, desc.name);
            }
        }
        Ok(())
    }

    /// Render the model list for `!listmodels <task>`.
    pub fn render_list(&self, task: Task, user_id: Option<&str>) -> String {
        let current = self.current(task, user_id).map(|d| d.name);
        let mut lines = vec![format!("Models for {}:", task)];
        for desc in self.list(task) {
            let marker = if Some(desc.name) == current { "▸" } else { " " };
            lines.push(format!(
                "{} {} — ${:.3} — {}",
                marker,
                desc.name,
                desc.pricing.base_usd(),
                desc.help
            ));
        }
        lines.push(format!("Switch with: !setmodel {} <model>", task));
        lines.join("\n")
    }

    /// Render the help text for a model, including its option flags.
    pub fn render_help(&self, desc: &ModelDescriptor) -> String {
        let mut lines = vec![
            format!("!{} — {} (${:.3})", desc.task.command(), desc.name, desc.pricing.base_usd()),
            desc.help.to_string(),
        ];
        if !desc.schema.is_empty() {
            lines.push("Options:".to_string());
            for p in desc.schema {
                let kind = match p.kind {
                    ParamKind::Str => "string",
                    ParamKind::Int => "int",
                    ParamKind::Float => "float",
                    ParamKind::Bool => "bool",
                };
                lines.push(format!("  --{} <{}> — {}", p.key, kind, p.help));
            }
        }
        lines.join("\n")
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

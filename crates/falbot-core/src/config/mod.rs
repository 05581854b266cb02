use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Root configuration for falbot, loaded from a flat JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// fal.ai API key. Required to run the gateway.
    pub fal_api_key: String,
    /// Base URL of the fal queue API.
    pub queue_base: String,

    /// When false, every job is authorized with a zero-atom debit and the
    /// ledger is never touched.
    pub billing_enabled: bool,
    /// CoinGecko id of the billing coin.
    pub coin_id: String,
    /// Ticker shown in receipts and balance output.
    pub coin_ticker: String,
    /// Atoms per whole coin. Wownero uses 11 decimal places.
    pub atoms_per_coin: i64,
    /// Seconds a fetched rate stays fresh.
    pub rate_ttl_secs: u64,
    /// Ledger file location. Defaults to `<data dir>/ledger.json`.
    pub ledger_path: Option<PathBuf>,

    /// Forward non-command text to an external AI-chat endpoint.
    pub webhook_enabled: bool,
    pub webhook_url: String,
    pub webhook_api_key: String,

    /// Global cap on concurrently running jobs.
    pub max_concurrent_jobs: usize,
    /// Absolute per-job deadline.
    pub job_timeout_secs: u64,
    /// Status poll tick.
    pub poll_interval_secs: u64,

    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fal_api_key: String::new(),
            queue_base: "https://queue.fal.run".to_string(),
            billing_enabled: true,
            coin_id: "wownero".to_string(),
            coin_ticker: "WOW".to_string(),
            atoms_per_coin: 100_000_000_000,
            rate_ttl_secs: 300,
            ledger_path: None,
            webhook_enabled: false,
            webhook_url: String::new(),
            webhook_api_key: String::new(),
            max_concurrent_jobs: 64,
            job_timeout_secs: 1800,
            poll_interval_secs: 2,
            debug: false,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Invalid(format!("{}: {}", path.display(), e)))?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the default location, or fall back to defaults plus the
    /// FAL_API_KEY environment variable.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        let mut config = if path.exists() {
            Self::load(&path)?
        } else {
            Config::default()
        };
        if config.fal_api_key.is_empty() {
            if let Ok(key) = std::env::var("FAL_API_KEY") {
                config.fal_api_key = key;
            }
        }
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.fal_api_key.is_empty() {
            return Err(ConfigError::NoApiKey);
        }
        if self.atoms_per_coin <= 0 {
            return Err(ConfigError::Invalid("atoms_per_coin must be positive".to_string()));
        }
        if self.webhook_enabled && self.webhook_url.is_empty() {
            return Err(ConfigError::Invalid("webhook_enabled requires webhook_url".to_string()));
        }
        Ok(())
    }

    /// Resolved ledger file path.
    pub fn ledger_path(&self) -> PathBuf {
        self.ledger_path
            .clone()
            .unwrap_or_else(|| get_data_dir().join("ledger.json"))
    }
}

/// Get the falbot data directory (~/.falbot), creating it if needed.
pub fn get_data_dir() -> PathBuf {
    let dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".falbot");
    std::fs::create_dir_all(&dir).ok();
    dir
}

/// Default config file location (~/.falbot/config.json).
pub fn default_config_path() -> PathBuf {
    get_data_dir().join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = Config::default();
        assert!(c.billing_enabled);
        assert_eq!(c.atoms_per_coin, 100_000_000_000);
        assert_eq!(c.coin_ticker, "WOW");
        assert_eq!(c.max_concurrent_jobs, 64);
        assert_eq!(c.job_timeout_secs, 1800);
        assert_eq!(c.queue_base, "https://queue.fal.run");
    }

    #[test]
    fn test_load_partial_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, r#"{"fal_api_key": "k-123", "billing_enabled": false}"#).unwrap();

        let c = Config::load(&path).unwrap();
        assert_eq!(c.fal_api_key, "k-123");
        assert!(!c.billing_enabled);
        // untouched keys keep defaults
        assert_eq!(c.rate_ttl_secs, 300);
    }

    #[test]
    fn test_missing_api_key_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, r#"{"billing_enabled": true}"#).unwrap();

        assert!(matches!(Config::load(&path), Err(ConfigError::NoApiKey)));
    }

    #[test]
    fn test_webhook_requires_url() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, r#"{"fal_api_key": "k", "webhook_enabled": true}"#).unwrap();

        assert!(matches!(Config::load(&path), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_not_found() {
        let missing = PathBuf::from("/nonexistent/falbot-config.json");
        assert!(matches!(Config::load(&missing), Err(ConfigError::NotFound(_))));
    }
}

//! Durable per-user balances in integer atoms.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::BillingError;
use crate::types::Atoms;

/// Trait for balance stores. `add_delta` is the only writer path and is
/// linearizable per user: the returned balance is the post-update value,
/// and a debit that would go negative is rejected atomically.
#[async_trait]
pub trait BalanceLedger: Send + Sync {
    /// Current balance, zero for unknown users.
    async fn get(&self, user: &str) -> Atoms;

    /// Apply a signed delta. Rejects the update (leaving the balance
    /// untouched) if the result would be negative. Returns the new
    /// balance on success.
    async fn add_delta(&self, user: &str, delta: Atoms) -> Result<Atoms, BillingError>;
}

fn checked_apply(balances: &mut HashMap<String, Atoms>, user: &str, delta: Atoms) -> Result<Atoms, BillingError> {
    let balance = balances.get(user).copied().unwrap_or(0);
    let next = balance.checked_add(delta).ok_or_else(|| {
        BillingError::Ledger(format!("balance overflow for {}", user))
    })?;
    if next < 0 {
        return Err(BillingError::InsufficientFunds { balance, required: -delta });
    }
    balances.insert(user.to_string(), next);
    Ok(next)
}

/// In-memory ledger for tests and billing-disabled deployments.
pub struct MemoryLedger {
    balances: Mutex<HashMap<String, Atoms>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self { balances: Mutex::new(HashMap::new()) }
    }

    pub async fn set(&self, user: &str, atoms: Atoms) {
        self.balances.lock().await.insert(user.to_string(), atoms);
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BalanceLedger for MemoryLedger {
    async fn get(&self, user: &str) -> Atoms {
        self.balances.lock().await.get(user).copied().unwrap_or(0)
    }

    async fn add_delta(&self, user: &str, delta: Atoms) -> Result<Atoms, BillingError> {
        let mut balances = self.balances.lock().await;
        checked_apply(&mut balances, user, delta)
    }
}

/// File-backed ledger: a JSON map of user id to atoms, rewritten through
/// a temp file after every mutation.
pub struct FileLedger {
    path: PathBuf,
    balances: Mutex<HashMap<String, Atoms>>,
}

impl FileLedger {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let balances = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            match serde_json::from_str(&content) {
                Ok(map) => map,
                Err(e) => {
                    warn!("Ledger file {} is corrupt ({}), starting empty", path.display(), e);
                    HashMap::new()
                }
            }
        } else {
            HashMap::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            balances: Mutex::new(balances),
        })
    }

    fn persist(&self, balances: &HashMap<String, Atoms>) -> Result<(), BillingError> {
        let content = serde_json::to_string_pretty(balances)
            .map_err(|e| BillingError::Ledger(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content).map_err(|e| BillingError::Ledger(e.to_string()))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| BillingError::Ledger(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl BalanceLedger for FileLedger {
    async fn get(&self, user: &str) -> Atoms {
        self.balances.lock().await.get(user).copied().unwrap_or(0)
    }

    async fn add_delta(&self, user: &str, delta: Atoms) -> Result<Atoms, BillingError> {
        let mut balances = self.balances.lock().await;
        let next = checked_apply(&mut balances, user, delta)?;
        self.persist(&balances)?;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_memory_ledger_debit_and_refund() {
        let ledger = MemoryLedger::new();
        ledger.set("alice", 1_000_000).await;

        let after = ledger.add_delta("alice", -80_000).await.unwrap();
        assert_eq!(after, 920_000);

        let restored = ledger.add_delta("alice", 80_000).await.unwrap();
        assert_eq!(restored, 1_000_000);
    }

    #[tokio::test]
    async fn test_debit_rejected_below_zero() {
        let ledger = MemoryLedger::new();
        ledger.set("bob", 10).await;

        let err = ledger.add_delta("bob", -80_000).await.unwrap_err();
        match err {
            BillingError::InsufficientFunds { balance, required } => {
                assert_eq!(balance, 10);
                assert_eq!(required, 80_000);
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(ledger.get("bob").await, 10);
    }

    #[tokio::test]
    async fn test_debit_to_exactly_zero() {
        let ledger = MemoryLedger::new();
        ledger.set("carol", 80_000).await;
        assert_eq!(ledger.add_delta("carol", -80_000).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_user_is_zero() {
        let ledger = MemoryLedger::new();
        assert_eq!(ledger.get("ghost").await, 0);
        assert!(ledger.add_delta("ghost", -1).await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_debits_single_winner() {
        // Two debits of 60% each: exactly one may pass.
        let ledger = Arc::new(MemoryLedger::new());
        ledger.set("dave", 100).await;

        let a = {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.add_delta("dave", -60).await })
        };
        let b = {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.add_delta("dave", -60).await })
        };
        let results = [a.await.unwrap(), b.await.unwrap()];
        let wins = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(wins, 1);
        assert_eq!(ledger.get("dave").await, 40);
    }

    #[tokio::test]
    async fn test_file_ledger_persists() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("ledger.json");

        {
            let ledger = FileLedger::open(&path).unwrap();
            ledger.add_delta("alice", 500).await.unwrap();
            ledger.add_delta("alice", -200).await.unwrap();
        }

        let reopened = FileLedger::open(&path).unwrap();
        assert_eq!(reopened.get("alice").await, 300);
    }

    #[tokio::test]
    async fn test_file_ledger_corrupt_file_starts_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("ledger.json");
        std::fs::write(&path, "not json").unwrap();

        let ledger = FileLedger::open(&path).unwrap();
        assert_eq!(ledger.get("alice").await, 0);
    }
}

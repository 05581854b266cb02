pub mod ledger;
pub mod oracle;

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::BillingError;
use crate::types::{Atoms, RateSnapshot};

use ledger::BalanceLedger;
use oracle::RateOracle;

/// Outcome of a successful authorization.
#[derive(Debug, Clone)]
pub struct DebitReceipt {
    pub atoms: Atoms,
    /// Snapshot the debit was computed with. Absent when billing is
    /// disabled; a refund of the same job always reuses this value.
    pub snapshot: Option<RateSnapshot>,
    pub balance_after: Atoms,
}

/// Composes the rate oracle and the ledger into the authorize/refund
/// surface the pipeline uses.
pub struct BillingCoordinator {
    oracle: RateOracle,
    ledger: Arc<dyn BalanceLedger>,
    enabled: bool,
}

impl BillingCoordinator {
    pub fn new(oracle: RateOracle, ledger: Arc<dyn BalanceLedger>, enabled: bool) -> Self {
        Self { oracle, ledger, enabled }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn oracle(&self) -> &RateOracle {
        &self.oracle
    }

    /// Quote the price, then debit atomically. The ledger rejects debits
    /// that would push the balance negative.
    pub async fn authorize_and_debit(&self, user: &str, price_usd: f64) -> Result<DebitReceipt, BillingError> {
        if !self.enabled {
            return Ok(DebitReceipt { atoms: 0, snapshot: None, balance_after: self.ledger.get(user).await });
        }

        let (atoms, snapshot) = self.oracle.usd_to_atoms(price_usd).await?;
        let balance_after = self.ledger.add_delta(user, -atoms).await?;
        info!(user, atoms, price_usd, "debit authorized");
        Ok(DebitReceipt { atoms, snapshot: Some(snapshot), balance_after })
    }

    /// Return a previous debit. Called at most once per job by the
    /// pipeline's state machine; a zero-atom receipt is a no-op.
    pub async fn refund(&self, user: &str, atoms: Atoms) -> Result<Atoms, BillingError> {
        if atoms == 0 {
            return Ok(self.ledger.get(user).await);
        }
        match self.ledger.add_delta(user, atoms).await {
            Ok(balance) => {
                info!(user, atoms, balance, "refund applied");
                Ok(balance)
            }
            Err(e) => {
                warn!(user, atoms, "refund failed: {}", e);
                Err(e)
            }
        }
    }

    /// Admin deposit.
    pub async fn credit(&self, user: &str, atoms: Atoms) -> Result<Atoms, BillingError> {
        self.ledger.add_delta(user, atoms).await
    }

    pub async fn balance(&self, user: &str) -> Atoms {
        self.ledger.get(user).await
    }
}

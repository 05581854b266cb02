//! USD quote cache for the billing coin.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::BillingError;
use crate::types::{Atoms, RateSnapshot};
use crate::util::http;

/// One quote from the upstream source.
#[derive(Debug, Clone, Copy)]
pub struct RateQuote {
    pub usd_per_coin: f64,
    pub btc_per_coin: Option<f64>,
}

/// Trait for quote sources.
#[async_trait]
pub trait RateSource: Send + Sync {
    async fn quote(&self) -> Result<RateQuote, BillingError>;
}

/// CoinGecko simple-price source.
pub struct CoinGeckoSource {
    coin_id: String,
    base: String,
}

impl CoinGeckoSource {
    pub fn new(coin_id: impl Into<String>) -> Self {
        Self {
            coin_id: coin_id.into(),
            base: "https://api.coingecko.com/api/v3".to_string(),
        }
    }
}

#[async_trait]
impl RateSource for CoinGeckoSource {
    async fn quote(&self) -> Result<RateQuote, BillingError> {
        let url = format!(
            "{}/simple/price?ids={}&vs_currencies=usd,btc",
            self.base, self.coin_id
        );
        let response = http::client()
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| BillingError::RateUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BillingError::RateUnavailable(format!("quote source returned {}", status)));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| BillingError::RateUnavailable(e.to_string()))?;
        let entry = data
            .get(&self.coin_id)
            .ok_or_else(|| BillingError::RateUnavailable(format!("no quote for {}", self.coin_id)))?;
        let usd = entry
            .get("usd")
            .and_then(|v| v.as_f64())
            .filter(|v| *v > 0.0)
            .ok_or_else(|| BillingError::RateUnavailable("missing usd quote".to_string()))?;
        let btc = entry.get("btc").and_then(|v| v.as_f64());

        Ok(RateQuote { usd_per_coin: usd, btc_per_coin: btc })
    }
}

struct CachedQuote {
    snapshot: RateSnapshot,
    fetched: Instant,
}

/// TTL-cached USD→coin oracle. A fresh quote is served from cache; an
/// expired one triggers a fetch under the cache lock (first caller
/// fetches, the rest wait). A failing source falls back to the last good
/// quote while it is inside the staleness window (2×TTL).
pub struct RateOracle {
    source: Arc<dyn RateSource>,
    ttl: Duration,
    atoms_per_coin: i64,
    cache: Mutex<Option<CachedQuote>>,
}

impl RateOracle {
    pub fn new(source: Arc<dyn RateSource>, ttl: Duration, atoms_per_coin: i64) -> Self {
        Self {
            source,
            ttl,
            atoms_per_coin,
            cache: Mutex::new(None),
        }
    }

    pub fn atoms_per_coin(&self) -> i64 {
        self.atoms_per_coin
    }

    /// Current snapshot: cached if fresh, refetched if expired, stale
    /// fallback inside the staleness window.
    pub async fn snapshot(&self) -> Result<RateSnapshot, BillingError> {
        let mut cache = self.cache.lock().await;
        let now = Instant::now();

        if let Some(cached) = cache.as_ref() {
            if now.duration_since(cached.fetched) < self.ttl {
                return Ok(cached.snapshot.clone());
            }
        }

        match self.source.quote().await {
            Ok(quote) => {
                let snapshot = RateSnapshot {
                    usd_per_coin: quote.usd_per_coin,
                    btc_per_coin: quote.btc_per_coin,
                    fetched_at: chrono::Utc::now(),
                };
                debug!(usd = quote.usd_per_coin, "rate refreshed");
                *cache = Some(CachedQuote { snapshot: snapshot.clone(), fetched: now });
                Ok(snapshot)
            }
            Err(e) => {
                if let Some(cached) = cache.as_ref() {
                    let age = now.duration_since(cached.fetched);
                    if age < self.ttl * 2 {
                        warn!("quote source failed ({}), serving stale rate ({}s old)", e, age.as_secs());
                        return Ok(cached.snapshot.clone());
                    }
                }
                Err(e)
            }
        }
    }

    /// Convert a USD price to atoms, rounding up, with the snapshot used.
    pub async fn usd_to_atoms(&self, usd: f64) -> Result<(Atoms, RateSnapshot), BillingError> {
        let snapshot = self.snapshot().await?;
        let atoms = Self::atoms_at(usd, &snapshot, self.atoms_per_coin);
        Ok((atoms, snapshot))
    }

    /// Conversion under a fixed snapshot. Monotonic in `usd`.
    pub fn atoms_at(usd: f64, snapshot: &RateSnapshot, atoms_per_coin: i64) -> Atoms {
        ((usd / snapshot.usd_per_coin) * atoms_per_coin as f64).ceil() as Atoms
    }

    /// USD value of an atom amount under a given snapshot.
    pub fn atoms_to_usd(&self, atoms: Atoms, snapshot: &RateSnapshot) -> f64 {
        (atoms as f64 / self.atoms_per_coin as f64) * snapshot.usd_per_coin
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct ScriptedSource {
        rate: f64,
        fail: AtomicBool,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(rate: f64) -> Self {
            Self { rate, fail: AtomicBool::new(false), calls: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl RateSource for ScriptedSource {
        async fn quote(&self) -> Result<RateQuote, BillingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                Err(BillingError::RateUnavailable("scripted failure".to_string()))
            } else {
                Ok(RateQuote { usd_per_coin: self.rate, btc_per_coin: Some(0.0000002) })
            }
        }
    }

    fn oracle(source: Arc<ScriptedSource>) -> RateOracle {
        RateOracle::new(source, Duration::from_secs(300), 100_000_000)
    }

    #[tokio::test]
    async fn test_usd_to_atoms_ceil() {
        // $0.02 at $25/coin with 1e8 atoms per coin => 80_000 atoms
        let source = Arc::new(ScriptedSource::new(25.0));
        let oracle = oracle(source);
        let (atoms, snapshot) = oracle.usd_to_atoms(0.02).await.unwrap();
        assert_eq!(atoms, 80_000);
        assert!((snapshot.usd_per_coin - 25.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_monotonic_under_fixed_snapshot() {
        let snapshot = RateSnapshot {
            usd_per_coin: 0.37,
            btc_per_coin: None,
            fetched_at: chrono::Utc::now(),
        };
        let mut last = 0;
        for cents in 1..50 {
            let usd = cents as f64 * 0.01;
            let atoms = RateOracle::atoms_at(usd, &snapshot, 100_000_000_000);
            assert!(atoms >= last, "not monotonic at {}", usd);
            last = atoms;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_serves_within_ttl() {
        let source = Arc::new(ScriptedSource::new(25.0));
        let oracle = oracle(source.clone());

        oracle.snapshot().await.unwrap();
        tokio::time::advance(Duration::from_secs(100)).await;
        oracle.snapshot().await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(250)).await;
        oracle.snapshot().await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_fallback_within_window() {
        let source = Arc::new(ScriptedSource::new(25.0));
        let oracle = oracle(source.clone());

        oracle.snapshot().await.unwrap();
        source.fail.store(true, Ordering::SeqCst);

        // Expired but within 2x TTL: stale value served.
        tokio::time::advance(Duration::from_secs(400)).await;
        let snap = oracle.snapshot().await.unwrap();
        assert!((snap.usd_per_coin - 25.0).abs() < f64::EPSILON);

        // Beyond the staleness window: unavailable.
        tokio::time::advance(Duration::from_secs(300)).await;
        assert!(matches!(oracle.snapshot().await, Err(BillingError::RateUnavailable(_))));
    }

    #[tokio::test]
    async fn test_atoms_to_usd_inverse() {
        let source = Arc::new(ScriptedSource::new(25.0));
        let oracle = oracle(source);
        let (atoms, snapshot) = oracle.usd_to_atoms(0.02).await.unwrap();
        let usd = oracle.atoms_to_usd(atoms, &snapshot);
        assert!((usd - 0.02).abs() < 1e-9);
    }
}

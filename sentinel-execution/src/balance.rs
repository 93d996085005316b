//! TTL cache in front of the account-balance endpoint.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sentinel_broker::{BrokerResult, ExchangeClient};
use sentinel_core::Quantity;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Tunables for the balance cache.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct BalanceCacheConfig {
    /// Seconds a fetched balance stays fresh.
    pub ttl_secs: i64,
    /// Seconds after which a cached balance is discarded outright, fresh or
    /// not. Guards against drift over long uptimes.
    pub max_age_secs: i64,
}

impl Default for BalanceCacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            max_age_secs: 86_400,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct CachedBalance {
    value: Quantity,
    fetched_at: DateTime<Utc>,
}

/// Serves the account balance from cache within the TTL, refreshing from the
/// exchange otherwise. A failed refresh falls back to the last known value
/// when one is still held; with an empty cache the error propagates.
pub struct BalanceCache {
    config: BalanceCacheConfig,
    exchange: Arc<dyn ExchangeClient>,
    cached: Mutex<Option<CachedBalance>>,
}

impl BalanceCache {
    pub fn new(config: BalanceCacheConfig, exchange: Arc<dyn ExchangeClient>) -> Self {
        Self {
            config,
            exchange,
            cached: Mutex::new(None),
        }
    }

    /// Current balance, cached or refreshed.
    pub async fn get(&self, now: DateTime<Utc>) -> BrokerResult<Quantity> {
        let mut cached = self.cached.lock().await;

        if let Some(entry) = *cached {
            let age = now - entry.fetched_at;
            if age > Duration::seconds(self.config.max_age_secs) {
                debug!("cached balance exceeded max age; discarding");
                *cached = None;
            } else if age < Duration::seconds(self.config.ttl_secs) {
                return Ok(entry.value);
            }
        }

        match self.exchange.account_balance().await {
            Ok(value) => {
                *cached = Some(CachedBalance {
                    value,
                    fetched_at: now,
                });
                Ok(value)
            }
            Err(err) => {
                if let Some(entry) = *cached {
                    warn!(error = %err, "balance refresh failed; serving stale value");
                    return Ok(entry.value);
                }
                Err(err)
            }
        }
    }

    /// Drop the cached value so the next read hits the exchange.
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sentinel_broker::{BrokerError, BrokerInfo, ExchangeClient};
    use sentinel_core::OrderIntent;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FlakyBalance {
        fetches: AtomicUsize,
        failing: AtomicBool,
    }

    #[async_trait]
    impl ExchangeClient for FlakyBalance {
        fn info(&self) -> BrokerInfo {
            BrokerInfo {
                name: "flaky".into(),
                markets: vec![],
                supports_testnet: true,
            }
        }

        async fn set_leverage(&self, _symbol: &str, _leverage: u32) -> BrokerResult<()> {
            Ok(())
        }

        async fn place_entry(&self, _intent: &OrderIntent) -> BrokerResult<()> {
            Ok(())
        }

        async fn place_bracket(&self, _intent: &OrderIntent) -> BrokerResult<()> {
            Ok(())
        }

        async fn account_balance(&self) -> BrokerResult<Quantity> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(BrokerError::Transport("timeout".into()));
            }
            Ok(5_000.0)
        }
    }

    fn cache(exchange: Arc<FlakyBalance>) -> BalanceCache {
        BalanceCache::new(BalanceCacheConfig::default(), exchange)
    }

    #[tokio::test]
    async fn fresh_value_is_served_without_refetching() {
        let exchange = Arc::new(FlakyBalance::default());
        let cache = cache(exchange.clone());
        let start = Utc::now();

        assert_eq!(cache.get(start).await.unwrap(), 5_000.0);
        assert_eq!(cache.get(start + Duration::seconds(60)).await.unwrap(), 5_000.0);
        assert_eq!(exchange.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_ttl_refetches_and_failure_serves_stale() {
        let exchange = Arc::new(FlakyBalance::default());
        let cache = cache(exchange.clone());
        let start = Utc::now();

        cache.get(start).await.unwrap();
        exchange.failing.store(true, Ordering::SeqCst);

        let past_ttl = start + Duration::seconds(301);
        assert_eq!(cache.get(past_ttl).await.unwrap(), 5_000.0);
        assert_eq!(exchange.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn max_age_discards_the_stale_fallback() {
        let exchange = Arc::new(FlakyBalance::default());
        let cache = cache(exchange.clone());
        let start = Utc::now();

        cache.get(start).await.unwrap();
        exchange.failing.store(true, Ordering::SeqCst);

        let past_max_age = start + Duration::seconds(86_401);
        let err = cache.get(past_max_age).await.unwrap_err();
        assert!(matches!(err, BrokerError::Transport(_)));
    }

    #[tokio::test]
    async fn invalidate_forces_a_refetch() {
        let exchange = Arc::new(FlakyBalance::default());
        let cache = cache(exchange.clone());
        let start = Utc::now();

        cache.get(start).await.unwrap();
        cache.invalidate().await;
        cache.get(start).await.unwrap();
        assert_eq!(exchange.fetches.load(Ordering::SeqCst), 2);
    }
}

//! In-memory connector for dry runs.
//!
//! Prices follow a random walk, orders are accepted and remembered but never
//! routed anywhere, and sentiment is permanently neutral. Used by the
//! `--paper` flag and by tests that need a full pipeline without a network.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rand::Rng;
use sentinel_broker::{
    BrokerInfo, BrokerResult, ExchangeClient, MarketData, SentimentSource,
};
use sentinel_core::{Candle, Interval, OrderIntent, PriceSnapshot, Quantity, Symbol};
use tracing::info;

/// Random-walk price feed over a fixed symbol universe.
pub struct PaperMarket {
    prices: Mutex<HashMap<Symbol, f64>>,
    /// Maximum absolute per-tick move, as a fraction (0.05 = up to 5%).
    max_step: f64,
}

impl PaperMarket {
    /// Seed the universe with starting prices.
    #[must_use]
    pub fn new(seed_prices: HashMap<Symbol, f64>, max_step: f64) -> Self {
        Self {
            prices: Mutex::new(seed_prices),
            max_step,
        }
    }

    /// A small default universe, volatile enough to trip the anomaly
    /// threshold within a few polls.
    #[must_use]
    pub fn with_default_universe() -> Self {
        let mut prices = HashMap::new();
        prices.insert("BTCUSDT".to_string(), 60_000.0);
        prices.insert("ETHUSDT".to_string(), 3_000.0);
        prices.insert("SOLUSDT".to_string(), 150.0);
        Self::new(prices, 0.05)
    }
}

#[async_trait]
impl MarketData for PaperMarket {
    fn name(&self) -> &str {
        "paper"
    }

    async fn price_snapshot(&self) -> BrokerResult<PriceSnapshot> {
        let mut rng = rand::thread_rng();
        let mut prices = self.prices.lock().unwrap_or_else(|e| e.into_inner());
        for price in prices.values_mut() {
            let step = rng.gen_range(-self.max_step..=self.max_step);
            *price *= 1.0 + step;
        }
        Ok(PriceSnapshot::new(prices.clone()))
    }

    async fn candles(
        &self,
        symbol: &str,
        _interval: Interval,
        limit: usize,
    ) -> BrokerResult<Vec<Candle>> {
        let base = {
            let prices = self.prices.lock().unwrap_or_else(|e| e.into_inner());
            prices.get(symbol).copied().unwrap_or(100.0)
        };
        let mut rng = rand::thread_rng();
        let now = Utc::now();
        let mut close = base;
        let mut candles = Vec::with_capacity(limit);
        for i in 0..limit {
            close *= 1.0 + rng.gen_range(-0.01..=0.01);
            // Final bar gets a fat volume so spike-gated pipelines see action.
            let volume = if i + 1 == limit {
                rng.gen_range(3_000.0..6_000.0)
            } else {
                rng.gen_range(500.0..1_500.0)
            };
            candles.push(Candle {
                open_time: now - Duration::minutes(15 * (limit - i) as i64),
                close,
                volume,
            });
        }
        Ok(candles)
    }
}

/// Paper exchange: every call succeeds and is remembered for inspection.
pub struct PaperExchange {
    balance: f64,
    orders: Mutex<Vec<OrderIntent>>,
    leverage: Mutex<HashMap<Symbol, u32>>,
}

impl PaperExchange {
    #[must_use]
    pub fn new(balance: f64) -> Self {
        Self {
            balance,
            orders: Mutex::new(Vec::new()),
            leverage: Mutex::new(HashMap::new()),
        }
    }

    /// Orders accepted so far, in placement order.
    #[must_use]
    pub fn orders(&self) -> Vec<OrderIntent> {
        self.orders.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl ExchangeClient for PaperExchange {
    fn info(&self) -> BrokerInfo {
        BrokerInfo {
            name: "paper".into(),
            markets: vec!["usdt-m".into()],
            supports_testnet: true,
        }
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> BrokerResult<()> {
        self.leverage
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(symbol.to_string(), leverage);
        Ok(())
    }

    async fn place_entry(&self, intent: &OrderIntent) -> BrokerResult<()> {
        info!(symbol = %intent.symbol, side = %intent.side, "paper entry accepted");
        self.orders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(intent.clone());
        Ok(())
    }

    async fn place_bracket(&self, _intent: &OrderIntent) -> BrokerResult<()> {
        Ok(())
    }

    async fn account_balance(&self) -> BrokerResult<Quantity> {
        Ok(self.balance)
    }
}

/// Sentiment source that always reports a flat crowd.
pub struct NeutralSentiment;

#[async_trait]
impl SentimentSource for NeutralSentiment {
    async fn sentiment(&self, _base_asset: &str) -> BrokerResult<f64> {
        Ok(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn snapshots_drift_between_polls() {
        let market = PaperMarket::with_default_universe();
        let first = market.price_snapshot().await.unwrap();
        let second = market.price_snapshot().await.unwrap();
        assert_eq!(first.len(), second.len());
        assert!(first.price("BTCUSDT").is_some());
    }

    #[tokio::test]
    async fn candle_windows_are_ordered_and_sized() {
        let market = PaperMarket::with_default_universe();
        let candles = market.candles("BTCUSDT", Interval::FifteenMinutes, 30).await.unwrap();
        assert_eq!(candles.len(), 30);
        assert!(candles.windows(2).all(|w| w[0].open_time < w[1].open_time));
    }
}

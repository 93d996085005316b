//! Order sequencing against the exchange.
//!
//! The [`OrderOrchestrator`] is the only component allowed to place orders.
//! It re-checks the risk gate, sizes the position, and walks the
//! leverage -> entry -> bracket sequence with bounded retries. Risk counters
//! and the journal are only touched after the full sequence succeeds.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sentinel_broker::{BrokerError, ExchangeClient, Notifier};
use sentinel_core::{Candle, Decision, OrderIntent, Price, Side, TradeRecord};
use sentinel_journal::{JournalError, TradeJournal};
use sentinel_risk::{RiskError, RiskGate};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

mod balance;
pub use balance::{BalanceCache, BalanceCacheConfig};

/// Convenience alias for execution results.
pub type ExecutionResult<T> = Result<T, ExecutionError>;

/// Errors surfaced by the execution layer.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// Risk sizing rejected the trade.
    #[error(transparent)]
    Risk(#[from] RiskError),
    /// An exchange call failed beyond the retry budget, or failed with a
    /// non-retryable error, before any order was placed.
    #[error("exchange call failed at stage {stage}: {source}")]
    Exchange {
        stage: &'static str,
        #[source]
        source: BrokerError,
    },
    /// The entry order is live but its protective bracket could not be
    /// placed. The position is left open for manual intervention; no
    /// automatic rollback is attempted.
    #[error("entry for {symbol} is unprotected; bracket placement failed: {source}")]
    BracketAbandoned {
        symbol: String,
        #[source]
        source: BrokerError,
    },
    /// The trade executed but could not be journaled.
    #[error(transparent)]
    Journal(#[from] JournalError),
    /// Fewer than two candles; no support/resistance window to derive a stop.
    #[error("not enough candles to derive entry and stop for {symbol}")]
    MissingPriceWindow { symbol: String },
}

/// Why an execute call ended without placing orders.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SkipReason {
    /// The decision was hold.
    NotActionable,
    /// The risk gate refused the trade (cap, streak, or cooldown).
    RiskGate,
}

/// Outcome of one [`OrderOrchestrator::execute`] call.
#[derive(Debug)]
pub enum ExecutionOutcome {
    /// Nothing was placed; this is an expected, quiet path.
    Skipped(SkipReason),
    /// The full sequence succeeded and the trade was journaled.
    Executed(TradeRecord),
}

/// Tunables for order sequencing.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Total attempts per exchange call (first try included).
    pub retry_attempts: u32,
    /// Fixed delay between retry attempts, in seconds.
    pub retry_delay_secs: u64,
    /// Take-profit distance as a fraction of entry (0.10 = 10%).
    pub take_profit_pct: f64,
    /// Balance cache tunables.
    pub balance: BalanceCacheConfig,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            retry_delay_secs: 5,
            take_profit_pct: 0.10,
            balance: BalanceCacheConfig::default(),
        }
    }
}

/// Sequences a confirmed signal into exchange orders.
pub struct OrderOrchestrator {
    config: ExecutionConfig,
    exchange: Arc<dyn ExchangeClient>,
    notifier: Arc<dyn Notifier>,
    journal: Arc<TradeJournal>,
    balance: BalanceCache,
    risk: RiskGate,
}

impl OrderOrchestrator {
    pub fn new(
        config: ExecutionConfig,
        exchange: Arc<dyn ExchangeClient>,
        notifier: Arc<dyn Notifier>,
        journal: Arc<TradeJournal>,
        risk: RiskGate,
    ) -> Self {
        let balance = BalanceCache::new(config.balance.clone(), exchange.clone());
        Self {
            config,
            exchange,
            notifier,
            journal,
            balance,
            risk,
        }
    }

    /// Read access to the risk gate, for reporting.
    #[must_use]
    pub fn risk_gate(&self) -> &RiskGate {
        &self.risk
    }

    /// Mutable access to the risk gate, for registering externally settled
    /// trades and for test setup.
    pub fn risk_gate_mut(&mut self) -> &mut RiskGate {
        &mut self.risk
    }

    /// Turn a confirmed decision into a bracketed position.
    ///
    /// Candles are oldest-first; the latest close becomes the entry and the
    /// extreme of the prior closes becomes the stop. Risk registration and
    /// journaling happen only after every exchange call has succeeded.
    pub async fn execute(
        &mut self,
        symbol: &str,
        decision: Decision,
        candles: &[Candle],
        now: DateTime<Utc>,
    ) -> ExecutionResult<ExecutionOutcome> {
        let Some(side) = decision.side() else {
            return Ok(ExecutionOutcome::Skipped(SkipReason::NotActionable));
        };
        if !self.risk.can_trade(symbol, now) {
            info!(symbol, "risk gate closed; skipping signal");
            return Ok(ExecutionOutcome::Skipped(SkipReason::RiskGate));
        }

        let (entry, stop) = entry_and_stop(symbol, side, candles)?;
        let balance = self
            .balance
            .get(now)
            .await
            .map_err(|source| ExecutionError::Exchange {
                stage: "balance",
                source,
            })?;
        let (quantity, leverage) = self.risk.size_and_leverage(balance, entry, stop)?;
        let take_profit = match side {
            Side::Buy => entry * (1.0 + self.config.take_profit_pct),
            Side::Sell => entry * (1.0 - self.config.take_profit_pct),
        };
        let intent = OrderIntent {
            symbol: symbol.to_string(),
            side,
            quantity,
            entry,
            stop,
            take_profit,
            leverage,
        };

        self.with_retry("set_leverage", || {
            self.exchange.set_leverage(symbol, leverage)
        })
        .await
        .map_err(|source| ExecutionError::Exchange {
            stage: "set_leverage",
            source,
        })?;

        self.with_retry("place_entry", || self.exchange.place_entry(&intent))
            .await
            .map_err(|source| ExecutionError::Exchange {
                stage: "place_entry",
                source,
            })?;

        if let Err(source) = self
            .with_retry("place_bracket", || self.exchange.place_bracket(&intent))
            .await
        {
            error!(symbol, error = %source, "bracket failed after entry; position unprotected");
            self.alert(&format!(
                "URGENT: {symbol} entry placed but stop/take-profit failed ({source}); flatten manually"
            ))
            .await;
            return Err(ExecutionError::BracketAbandoned {
                symbol: symbol.to_string(),
                source,
            });
        }

        let pnl = (take_profit - entry) / entry * quantity * f64::from(leverage);
        self.risk.register(pnl, symbol, now);

        let record = TradeRecord {
            timestamp: now,
            symbol: symbol.to_string(),
            side,
            entry,
            exit: take_profit,
            pnl,
        };
        self.journal.record(&record)?;
        info!(
            symbol,
            %side,
            quantity,
            entry,
            stop,
            take_profit,
            leverage,
            "bracketed order sequence complete"
        );
        self.alert(&format!(
            "{symbol}: {side} {quantity:.6} @ {entry} (stop {stop}, tp {take_profit}, {leverage}x)"
        ))
        .await;
        Ok(ExecutionOutcome::Executed(record))
    }

    /// Bounded retry for exchange calls. Only transient errors are retried;
    /// anything else aborts immediately.
    async fn with_retry<F, Fut>(&self, stage: &'static str, mut call: F) -> Result<(), BrokerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), BrokerError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match call().await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_transient() && attempt < self.config.retry_attempts => {
                    warn!(stage, attempt, error = %err, "transient exchange failure; retrying");
                    tokio::time::sleep(Duration::from_secs(self.config.retry_delay_secs)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn alert(&self, message: &str) {
        if let Err(err) = self.notifier.notify(message).await {
            warn!(error = %err, "notification delivery failed");
        }
    }
}

/// Entry is the latest close; the stop is the support (buy) or resistance
/// (sell) of the prior closes in the window.
fn entry_and_stop(symbol: &str, side: Side, candles: &[Candle]) -> ExecutionResult<(Price, Price)> {
    let Some((latest, prior)) = candles.split_last() else {
        return Err(ExecutionError::MissingPriceWindow {
            symbol: symbol.to_string(),
        });
    };
    if prior.is_empty() {
        return Err(ExecutionError::MissingPriceWindow {
            symbol: symbol.to_string(),
        });
    }
    let entry = latest.close;
    let stop = match side {
        Side::Buy => prior.iter().map(|candle| candle.close).fold(f64::INFINITY, f64::min),
        Side::Sell => prior
            .iter()
            .map(|candle| candle.close)
            .fold(f64::NEG_INFINITY, f64::max),
    };
    Ok((entry, stop))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn candle(close: f64) -> Candle {
        Candle {
            open_time: Utc::now(),
            close,
            volume: 100.0,
        }
    }

    #[test]
    fn entry_is_latest_close_and_stop_is_window_extreme() {
        let candles: Vec<Candle> = [101.0, 99.0, 104.0, 102.0].iter().copied().map(candle).collect();

        let (entry, stop) = entry_and_stop("BTCUSDT", Side::Buy, &candles).unwrap();
        assert_eq!(entry, 102.0);
        assert_eq!(stop, 99.0);

        let (entry, stop) = entry_and_stop("BTCUSDT", Side::Sell, &candles).unwrap();
        assert_eq!(entry, 102.0);
        assert_eq!(stop, 104.0);
    }

    #[test]
    fn single_candle_window_is_rejected() {
        let candles = vec![candle(100.0)];
        let err = entry_and_stop("BTCUSDT", Side::Buy, &candles).unwrap_err();
        assert!(matches!(err, ExecutionError::MissingPriceWindow { .. }));
    }
}

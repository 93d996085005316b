//! Composite scoring and signal confirmation.
//!
//! The [`SignalEngine`] turns a window of candles plus crowd sentiment into a
//! buy/sell/hold decision. A decision only fires after the composite score
//! clears its threshold for several consecutive evaluations, which filters
//! out one-tick flukes at the cost of reacting a few polls late.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use sentinel_broker::{base_asset, SentimentSource};
use sentinel_core::{Candle, Decision, Symbol};
use sentinel_indicators::{latest_snapshot, IndicatorError, IndicatorParams, IndicatorSnapshot};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Convenience alias for signal results.
pub type SignalResult<T> = Result<T, SignalError>;

/// Errors surfaced by the signal layer.
#[derive(Debug, Error)]
pub enum SignalError {
    /// Not enough candles to warm the indicators up. Callers treat this as
    /// a hold and skip the symbol.
    #[error("insufficient data: have {have} candles, need {need}")]
    InsufficientData { have: usize, need: usize },
    /// Indicator construction failed (bad periods).
    #[error(transparent)]
    Indicator(#[from] IndicatorError),
}

/// Tunables for scoring and confirmation.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct SignalConfig {
    /// Latest volume must exceed this multiple of the prior mean to count
    /// as a spike.
    pub spike_factor: f64,
    /// Consecutive evaluations the composite score must clear a threshold.
    pub confirm_period: usize,
    /// Composite score at or above which a confirmed window means buy.
    pub buy_threshold: f64,
    /// Composite score at or below which a confirmed window means sell.
    pub sell_threshold: f64,
    /// Mean compound sentiment at or above which the crowd counts bullish.
    pub bullish_sentiment: f64,
    /// Mean compound sentiment at or below which the crowd counts bearish.
    pub bearish_sentiment: f64,
    /// Maximum scores retained per symbol.
    pub max_history: usize,
    /// Tracked-symbol cap; exceeding it evicts the oldest half on prune.
    pub max_symbols: usize,
    /// Indicator periods.
    pub indicators: IndicatorParams,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            spike_factor: 3.0,
            confirm_period: 3,
            buy_threshold: 0.5,
            sell_threshold: -0.5,
            bullish_sentiment: 0.2,
            bearish_sentiment: -0.2,
            max_history: 100,
            max_symbols: 100,
            indicators: IndicatorParams::default(),
        }
    }
}

/// Outcome of one evaluation: the decision plus the score and a
/// human-readable reason for the journal and notifications.
#[derive(Clone, Debug, PartialEq)]
pub struct Evaluation {
    pub decision: Decision,
    pub score: f64,
    pub reason: String,
}

/// Streaming decision engine. Owns the per-symbol score histories; one
/// instance per bot process.
pub struct SignalEngine {
    config: SignalConfig,
    sentiment: Arc<dyn SentimentSource>,
    histories: HashMap<Symbol, VecDeque<f64>>,
    insertion_order: Vec<Symbol>,
}

impl SignalEngine {
    pub fn new(config: SignalConfig, sentiment: Arc<dyn SentimentSource>) -> Self {
        Self {
            config,
            sentiment,
            histories: HashMap::new(),
            insertion_order: Vec::new(),
        }
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &SignalConfig {
        &self.config
    }

    /// Number of symbols with recorded score history.
    #[must_use]
    pub fn tracked_symbols(&self) -> usize {
        self.histories.len()
    }

    /// Evaluate one symbol against its latest candle window.
    ///
    /// Candles are oldest-first. Fails with [`SignalError::InsufficientData`]
    /// below the indicator warm-up window; a sentiment fetch failure degrades
    /// to a neutral sub-score instead of propagating.
    pub async fn evaluate(&mut self, symbol: &str, candles: &[Candle]) -> SignalResult<Evaluation> {
        let need = self.config.indicators.warmup_bars();
        if candles.len() < need {
            return Err(SignalError::InsufficientData {
                have: candles.len(),
                need,
            });
        }

        let score = if self.volume_spike(candles) {
            let closes: Vec<f64> = candles.iter().map(|candle| candle.close).collect();
            let snapshot = latest_snapshot(&self.config.indicators, &closes)?
                .ok_or(SignalError::InsufficientData {
                    have: candles.len(),
                    need,
                })?;
            let technical = self.technical_score(&snapshot);
            let sentiment = self.sentiment_score(symbol).await;
            0.5 * technical + 0.5 * sentiment
        } else {
            // No spike, no signal: skip the rate-limited sentiment fetch
            // entirely and record a neutral score.
            debug!(symbol, "volume spike gate closed");
            0.0
        };

        self.push_score(symbol, score);
        Ok(self.confirm(symbol, score))
    }

    /// Drop the oldest half of tracked symbols once the cap is exceeded.
    /// Approximate LRU by insertion order, called periodically by the
    /// monitor loop rather than on every evaluation.
    pub fn prune(&mut self) {
        if self.histories.len() <= self.config.max_symbols {
            return;
        }
        let evict = self.insertion_order.len() / 2;
        for symbol in self.insertion_order.drain(..evict) {
            self.histories.remove(&symbol);
        }
        warn!(
            remaining = self.histories.len(),
            "score history pruned to bound memory"
        );
    }

    fn volume_spike(&self, candles: &[Candle]) -> bool {
        let Some((latest, prior)) = candles.split_last() else {
            return false;
        };
        if prior.is_empty() {
            return false;
        }
        let mean: f64 =
            prior.iter().map(|candle| candle.volume).sum::<f64>() / prior.len() as f64;
        latest.volume > self.config.spike_factor * mean
    }

    /// Three binary conditions on the latest bar, summed into {-2..+2} and
    /// normalized with `(sum + 1) / 3`. The normalization is historical
    /// policy, kept bit-for-bit rather than rebalanced.
    fn technical_score(&self, snapshot: &IndicatorSnapshot) -> f64 {
        let mut sum = 0.0_f64;
        if snapshot.rsi < 30.0 && snapshot.close < snapshot.bb_lower {
            sum += 1.0;
        }
        if snapshot.rsi > 70.0 && snapshot.close > snapshot.bb_upper {
            sum -= 1.0;
        }
        if snapshot.macd > snapshot.macd_signal {
            sum += 1.0;
        } else {
            sum -= 1.0;
        }
        (sum + 1.0) / 3.0
    }

    async fn sentiment_score(&self, symbol: &str) -> f64 {
        let compound = match self.sentiment.sentiment(base_asset(symbol)).await {
            Ok(compound) => compound,
            Err(err) => {
                warn!(symbol, error = %err, "sentiment fetch failed; scoring neutral");
                return 0.0;
            }
        };
        if compound >= self.config.bullish_sentiment {
            1.0
        } else if compound <= self.config.bearish_sentiment {
            -1.0
        } else {
            0.0
        }
    }

    fn push_score(&mut self, symbol: &str, score: f64) {
        let history = match self.histories.get_mut(symbol) {
            Some(history) => history,
            None => {
                self.insertion_order.push(symbol.to_string());
                self.histories
                    .entry(symbol.to_string())
                    .or_insert_with(VecDeque::new)
            }
        };
        history.push_back(score);
        while history.len() > self.config.max_history {
            history.pop_front();
        }
    }

    fn confirm(&self, symbol: &str, score: f64) -> Evaluation {
        let history = &self.histories[symbol];
        if history.len() < self.config.confirm_period {
            return Evaluation {
                decision: Decision::Hold,
                score,
                reason: "insufficient history".to_string(),
            };
        }

        let window = history
            .iter()
            .rev()
            .take(self.config.confirm_period)
            .copied();
        let mut all_buy = true;
        let mut all_sell = true;
        for value in window {
            all_buy &= value >= self.config.buy_threshold;
            all_sell &= value <= self.config.sell_threshold;
        }

        if all_buy {
            Evaluation {
                decision: Decision::Buy,
                score,
                reason: format!(
                    "{} consecutive scores >= {}",
                    self.config.confirm_period, self.config.buy_threshold
                ),
            }
        } else if all_sell {
            Evaluation {
                decision: Decision::Sell,
                score,
                reason: format!(
                    "{} consecutive scores <= {}",
                    self.config.confirm_period, self.config.sell_threshold
                ),
            }
        } else {
            Evaluation {
                decision: Decision::Hold,
                score,
                reason: "window not confirmed".to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use sentinel_broker::{BrokerError, BrokerResult};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedSentiment {
        compound: f64,
        calls: AtomicUsize,
    }

    impl FixedSentiment {
        fn new(compound: f64) -> Self {
            Self {
                compound,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SentimentSource for FixedSentiment {
        async fn sentiment(&self, _base_asset: &str) -> BrokerResult<f64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.compound)
        }
    }

    struct FailingSentiment;

    #[async_trait]
    impl SentimentSource for FailingSentiment {
        async fn sentiment(&self, _base_asset: &str) -> BrokerResult<f64> {
            Err(BrokerError::RateLimited("slow down".into()))
        }
    }

    fn candles(closes: &[f64], volumes: &[f64]) -> Vec<Candle> {
        assert_eq!(closes.len(), volumes.len());
        closes
            .iter()
            .zip(volumes)
            .map(|(&close, &volume)| Candle {
                open_time: Utc::now(),
                close,
                volume,
            })
            .collect()
    }

    /// Enough bars to clear the default warm-up, flat closes, with the
    /// latest volume controlling the spike gate.
    fn window(latest_volume: f64) -> Vec<Candle> {
        let closes = vec![100.0; 30];
        let mut volumes = vec![100.0; 30];
        volumes[29] = latest_volume;
        candles(&closes, &volumes)
    }

    fn engine(sentiment: Arc<dyn SentimentSource>) -> SignalEngine {
        SignalEngine::new(SignalConfig::default(), sentiment)
    }

    #[test]
    fn spike_gate_matches_reference_volumes() {
        let engine = engine(Arc::new(FixedSentiment::new(0.0)));
        let spiky = candles(
            &[1.0; 6],
            &[100.0, 200.0, 300.0, 400.0, 500.0, 2000.0],
        );
        let calm = candles(&[1.0; 6], &[100.0, 200.0, 300.0, 400.0, 500.0, 600.0]);
        assert!(engine.volume_spike(&spiky));
        assert!(!engine.volume_spike(&calm));
    }

    #[tokio::test]
    async fn insufficient_candles_is_an_error() {
        let mut engine = engine(Arc::new(FixedSentiment::new(0.0)));
        let short = window(100.0);
        let err = engine.evaluate("BTCUSDT", &short[..10]).await.unwrap_err();
        assert!(matches!(err, SignalError::InsufficientData { .. }));
    }

    #[tokio::test]
    async fn no_spike_scores_zero_and_skips_sentiment() {
        let sentiment = Arc::new(FixedSentiment::new(0.9));
        let mut engine = engine(sentiment.clone());
        let evaluation = engine.evaluate("BTCUSDT", &window(100.0)).await.unwrap();
        assert_eq!(evaluation.score, 0.0);
        assert_eq!(evaluation.decision, Decision::Hold);
        assert_eq!(sentiment.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn first_two_evaluations_hold_regardless_of_score() {
        // Bullish sentiment + bullish MACD is impossible on a flat series,
        // so force confirmation-limited holds via the gate instead: every
        // evaluation scores 0.0 and the first two must report "insufficient
        // history".
        let mut engine = engine(Arc::new(FixedSentiment::new(0.9)));
        for _ in 0..2 {
            let evaluation = engine.evaluate("BTCUSDT", &window(100.0)).await.unwrap();
            assert_eq!(evaluation.decision, Decision::Hold);
            assert_eq!(evaluation.reason, "insufficient history");
        }
        let third = engine.evaluate("BTCUSDT", &window(100.0)).await.unwrap();
        assert_ne!(third.reason, "insufficient history");
    }

    #[tokio::test]
    async fn three_confirmed_scores_trigger_a_decision() {
        let mut engine = engine(Arc::new(FixedSentiment::new(0.0)));
        for score in [0.6, 0.7, 0.8] {
            engine.push_score("BTCUSDT", score);
        }
        let confirmed = engine.confirm("BTCUSDT", 0.8);
        assert_eq!(confirmed.decision, Decision::Buy);

        for score in [-0.6, -0.7, -0.8] {
            engine.push_score("ETHUSDT", score);
        }
        let confirmed = engine.confirm("ETHUSDT", -0.8);
        assert_eq!(confirmed.decision, Decision::Sell);

        for score in [0.6, -0.7, 0.8] {
            engine.push_score("SOLUSDT", score);
        }
        let mixed = engine.confirm("SOLUSDT", 0.8);
        assert_eq!(mixed.decision, Decision::Hold);
    }

    #[test]
    fn score_history_is_bounded_fifo() {
        let mut engine = engine(Arc::new(FixedSentiment::new(0.0)));
        for i in 0..150 {
            engine.push_score("BTCUSDT", i as f64);
        }
        let history = &engine.histories["BTCUSDT"];
        assert_eq!(history.len(), 100);
        assert_eq!(*history.front().unwrap(), 50.0);
        assert_eq!(*history.back().unwrap(), 149.0);
    }

    #[test]
    fn prune_evicts_oldest_half_by_insertion_order() {
        let mut engine = engine(Arc::new(FixedSentiment::new(0.0)));
        for i in 0..101 {
            engine.push_score(&format!("SYM{i:03}USDT"), 0.0);
        }
        engine.prune();
        assert_eq!(engine.tracked_symbols(), 51);
        assert!(!engine.histories.contains_key("SYM000USDT"));
        assert!(engine.histories.contains_key("SYM100USDT"));
    }

    #[tokio::test]
    async fn sentiment_failure_degrades_to_neutral() {
        let mut engine = engine(Arc::new(FailingSentiment));
        // Flat closes with a spiking latest volume: MACD == signal on a
        // constant series, so the MACD condition contributes -1 and the
        // technical score is exactly 0.0; neutral sentiment keeps the
        // composite at 0.0.
        let evaluation = engine.evaluate("BTCUSDT", &window(10_000.0)).await.unwrap();
        assert_eq!(evaluation.score, 0.0);
    }
}

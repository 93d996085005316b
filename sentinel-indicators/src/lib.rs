//! Incremental technical indicators used by the signal engine.
//!
//! Every indicator implements [`Indicator`]: values are produced only after
//! the warm-up window is satisfied, so undefined early readings can never
//! drive a trading decision.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Common configuration errors emitted by indicators.
#[derive(Debug, Error, PartialEq)]
pub enum IndicatorError {
    /// Returned when a period of zero is provided.
    #[error("{name} requires period > 0 (got {period})")]
    InvalidPeriod {
        /// Human-readable indicator name.
        name: &'static str,
        /// User-provided period value.
        period: usize,
    },
    /// Returned when a parameter must be positive.
    #[error("{name} parameter '{parameter}' must be positive (got {value})")]
    InvalidParameter {
        name: &'static str,
        parameter: &'static str,
        value: f64,
    },
}

impl IndicatorError {
    /// Helper constructor for invalid period errors.
    pub fn invalid_period(name: &'static str, period: usize) -> Self {
        Self::InvalidPeriod { name, period }
    }
}

/// Core abstraction implemented by every indicator in this crate.
pub trait Indicator {
    /// Value produced after each update.
    type Output;

    /// Consumes a new data point and returns the most recent value, if available.
    fn next(&mut self, input: f64) -> Option<Self::Output>;

    /// Resets the indicator to its initial state.
    fn reset(&mut self);
}

/// Simple moving average over a fixed window.
#[derive(Clone, Debug)]
pub struct Sma {
    period: usize,
    window: VecDeque<f64>,
    sum: f64,
}

impl Sma {
    pub fn new(period: usize) -> Result<Self, IndicatorError> {
        if period == 0 {
            return Err(IndicatorError::invalid_period("SMA", period));
        }
        Ok(Self {
            period,
            window: VecDeque::with_capacity(period),
            sum: 0.0,
        })
    }
}

impl Indicator for Sma {
    type Output = f64;

    fn next(&mut self, input: f64) -> Option<f64> {
        self.window.push_back(input);
        self.sum += input;
        if self.window.len() > self.period {
            if let Some(old) = self.window.pop_front() {
                self.sum -= old;
            }
        }
        (self.window.len() == self.period).then(|| self.sum / self.period as f64)
    }

    fn reset(&mut self) {
        self.window.clear();
        self.sum = 0.0;
    }
}

/// Exponential moving average seeded with the first observation.
#[derive(Clone, Debug)]
pub struct Ema {
    alpha: f64,
    current: Option<f64>,
}

impl Ema {
    pub fn new(period: usize) -> Result<Self, IndicatorError> {
        if period == 0 {
            return Err(IndicatorError::invalid_period("EMA", period));
        }
        Ok(Self {
            alpha: 2.0 / (period as f64 + 1.0),
            current: None,
        })
    }
}

impl Indicator for Ema {
    type Output = f64;

    fn next(&mut self, input: f64) -> Option<f64> {
        let next = match self.current {
            Some(prev) => prev + self.alpha * (input - prev),
            None => input,
        };
        self.current = Some(next);
        self.current
    }

    fn reset(&mut self) {
        self.current = None;
    }
}

/// Relative strength index with Wilder smoothing.
#[derive(Clone, Debug)]
pub struct Rsi {
    period: usize,
    prev_close: Option<f64>,
    samples: usize,
    gain_sum: f64,
    loss_sum: f64,
    avg_gain: f64,
    avg_loss: f64,
}

impl Rsi {
    pub fn new(period: usize) -> Result<Self, IndicatorError> {
        if period == 0 {
            return Err(IndicatorError::invalid_period("RSI", period));
        }
        Ok(Self {
            period,
            prev_close: None,
            samples: 0,
            gain_sum: 0.0,
            loss_sum: 0.0,
            avg_gain: 0.0,
            avg_loss: 0.0,
        })
    }

    fn value(&self) -> f64 {
        if self.avg_loss == 0.0 {
            return 100.0;
        }
        let rs = self.avg_gain / self.avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    }
}

impl Indicator for Rsi {
    type Output = f64;

    fn next(&mut self, input: f64) -> Option<f64> {
        let Some(prev) = self.prev_close.replace(input) else {
            return None;
        };
        let change = input - prev;
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        self.samples += 1;

        if self.samples < self.period {
            self.gain_sum += gain;
            self.loss_sum += loss;
            return None;
        }
        if self.samples == self.period {
            self.gain_sum += gain;
            self.loss_sum += loss;
            self.avg_gain = self.gain_sum / self.period as f64;
            self.avg_loss = self.loss_sum / self.period as f64;
        } else {
            let n = self.period as f64;
            self.avg_gain = (self.avg_gain * (n - 1.0) + gain) / n;
            self.avg_loss = (self.avg_loss * (n - 1.0) + loss) / n;
        }
        Some(self.value())
    }

    fn reset(&mut self) {
        self.prev_close = None;
        self.samples = 0;
        self.gain_sum = 0.0;
        self.loss_sum = 0.0;
        self.avg_gain = 0.0;
        self.avg_loss = 0.0;
    }
}

/// Moving average convergence/divergence line plus its signal line.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MacdOutput {
    pub macd: f64,
    pub signal: f64,
}

/// MACD built from fast/slow EMAs with an EMA signal line.
#[derive(Clone, Debug)]
pub struct Macd {
    fast: Ema,
    slow: Ema,
    signal: Ema,
}

impl Macd {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Result<Self, IndicatorError> {
        Ok(Self {
            fast: Ema::new(fast)?,
            slow: Ema::new(slow)?,
            signal: Ema::new(signal)?,
        })
    }
}

impl Indicator for Macd {
    type Output = MacdOutput;

    fn next(&mut self, input: f64) -> Option<MacdOutput> {
        let fast = self.fast.next(input)?;
        let slow = self.slow.next(input)?;
        let macd = fast - slow;
        let signal = self.signal.next(macd)?;
        Some(MacdOutput { macd, signal })
    }

    fn reset(&mut self) {
        self.fast.reset();
        self.slow.reset();
        self.signal.reset();
    }
}

/// Upper/middle/lower Bollinger band values.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BollingerOutput {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

/// Bollinger bands over a fixed lookback with a standard-deviation multiplier.
#[derive(Clone, Debug)]
pub struct BollingerBands {
    period: usize,
    multiplier: f64,
    window: VecDeque<f64>,
}

impl BollingerBands {
    pub fn new(period: usize, multiplier: f64) -> Result<Self, IndicatorError> {
        if period == 0 {
            return Err(IndicatorError::invalid_period("BollingerBands", period));
        }
        if multiplier <= 0.0 {
            return Err(IndicatorError::InvalidParameter {
                name: "BollingerBands",
                parameter: "multiplier",
                value: multiplier,
            });
        }
        Ok(Self {
            period,
            multiplier,
            window: VecDeque::with_capacity(period),
        })
    }
}

impl Indicator for BollingerBands {
    type Output = BollingerOutput;

    fn next(&mut self, input: f64) -> Option<BollingerOutput> {
        self.window.push_back(input);
        if self.window.len() > self.period {
            self.window.pop_front();
        }
        if self.window.len() < self.period {
            return None;
        }
        let n = self.period as f64;
        let mean = self.window.iter().sum::<f64>() / n;
        let variance = self
            .window
            .iter()
            .map(|value| (value - mean).powi(2))
            .sum::<f64>()
            / n;
        let band = self.multiplier * variance.sqrt();
        Some(BollingerOutput {
            upper: mean + band,
            middle: mean,
            lower: mean - band,
        })
    }

    fn reset(&mut self) {
        self.window.clear();
    }
}

/// Periods used when deriving the indicator set.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct IndicatorParams {
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub bollinger_period: usize,
    pub bollinger_multiplier: f64,
}

impl Default for IndicatorParams {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            bollinger_period: 20,
            bollinger_multiplier: 2.0,
        }
    }
}

impl IndicatorParams {
    /// Minimum number of bars before every derived value is defined.
    #[must_use]
    pub fn warmup_bars(&self) -> usize {
        self.macd_slow
            .max(self.bollinger_period)
            .max(self.rsi_period + 1)
    }
}

/// Derived values for the most recent bar of a candle sequence.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IndicatorSnapshot {
    pub close: f64,
    pub rsi: f64,
    pub macd: f64,
    pub macd_signal: f64,
    pub bb_upper: f64,
    pub bb_middle: f64,
    pub bb_lower: f64,
}

/// Compute the latest-bar indicator snapshot for a close series.
///
/// Returns `None` until the warm-up window is satisfied.
pub fn latest_snapshot(
    params: &IndicatorParams,
    closes: &[f64],
) -> Result<Option<IndicatorSnapshot>, IndicatorError> {
    if closes.len() < params.warmup_bars() {
        return Ok(None);
    }
    let mut rsi = Rsi::new(params.rsi_period)?;
    let mut macd = Macd::new(params.macd_fast, params.macd_slow, params.macd_signal)?;
    let mut bollinger = BollingerBands::new(params.bollinger_period, params.bollinger_multiplier)?;

    let mut latest = None;
    for &close in closes {
        let rsi_value = rsi.next(close);
        let macd_value = macd.next(close);
        let bands = bollinger.next(close);
        if let (Some(rsi), Some(macd), Some(bands)) = (rsi_value, macd_value, bands) {
            latest = Some(IndicatorSnapshot {
                close,
                rsi,
                macd: macd.macd,
                macd_signal: macd.signal,
                bb_upper: bands.upper,
                bb_middle: bands.middle,
                bb_lower: bands.lower,
            });
        }
    }
    Ok(latest)
}

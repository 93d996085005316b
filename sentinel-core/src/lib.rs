//! Fundamental data types shared across the Sentinel workspace.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Alias for price precision.
pub type Price = f64;
/// Alias for quantity precision.
pub type Quantity = f64;
/// Alias used for human-readable market symbols (e.g., `BTCUSDT`).
pub type Symbol = String;

/// The side of an order or position.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Buy the instrument.
    Buy,
    /// Sell the instrument.
    Sell,
}

impl Side {
    /// Returns the opposite side (buy <-> sell).
    #[must_use]
    pub fn inverse(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "buy" | "long" => Ok(Self::Buy),
            "sell" | "short" => Ok(Self::Sell),
            other => Err(format!("unsupported side '{other}'")),
        }
    }
}

/// Outcome of a signal evaluation.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Buy,
    Sell,
    Hold,
}

impl Decision {
    /// The order side implied by the decision, if any.
    #[must_use]
    pub fn side(self) -> Option<Side> {
        match self {
            Self::Buy => Some(Side::Buy),
            Self::Sell => Some(Side::Sell),
            Self::Hold => None,
        }
    }

    /// True when the decision requires action.
    #[must_use]
    pub fn is_actionable(self) -> bool {
        !matches!(self, Self::Hold)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
            Self::Hold => write!(f, "hold"),
        }
    }
}

/// Interval granularity used when requesting candle data.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Interval {
    OneMinute,
    FiveMinutes,
    FifteenMinutes,
    OneHour,
    OneDay,
}

impl Interval {
    /// Convert the interval to Binance-compatible identifiers.
    #[must_use]
    pub fn to_binance(self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::FiveMinutes => "5m",
            Self::FifteenMinutes => "15m",
            Self::OneHour => "1h",
            Self::OneDay => "1d",
        }
    }
}

impl FromStr for Interval {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "1m" | "1min" | "1minute" => Ok(Self::OneMinute),
            "5m" | "5min" | "5minutes" => Ok(Self::FiveMinutes),
            "15m" | "15min" | "15minutes" => Ok(Self::FifteenMinutes),
            "1h" | "60m" | "1hour" => Ok(Self::OneHour),
            "1d" | "day" | "d" => Ok(Self::OneDay),
            other => Err(format!("unsupported interval '{other}'")),
        }
    }
}

/// Aggregated bar data, trimmed to what the signal pipeline consumes.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub close: Price,
    pub volume: Quantity,
}

/// A single price movement between two consecutive snapshots.
#[derive(Clone, Debug, PartialEq)]
pub struct PriceMove {
    pub symbol: Symbol,
    pub previous: Price,
    pub current: Price,
    /// Signed percentage change relative to the previous price.
    pub change_pct: f64,
}

impl PriceMove {
    /// Direction-agnostic magnitude of the move in percent.
    #[must_use]
    pub fn magnitude(&self) -> f64 {
        self.change_pct.abs()
    }

    /// True when the magnitude meets the anomaly threshold (boundary inclusive).
    #[must_use]
    pub fn is_anomalous(&self, threshold_pct: f64) -> bool {
        self.magnitude() >= threshold_pct
    }
}

/// Full-market view of last-traded prices, keyed by symbol.
///
/// Only symbols quoted in the settlement asset belong here; the market-data
/// connector applies that filter. A snapshot is immutable once captured and
/// superseded wholesale by the next poll.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PriceSnapshot {
    pub prices: HashMap<Symbol, Price>,
    pub captured_at: DateTime<Utc>,
}

impl PriceSnapshot {
    /// Build a snapshot stamped with the current time.
    #[must_use]
    pub fn new(prices: HashMap<Symbol, Price>) -> Self {
        Self {
            prices,
            captured_at: Utc::now(),
        }
    }

    /// Number of symbols captured.
    #[must_use]
    pub fn len(&self) -> usize {
        self.prices.len()
    }

    /// True when the snapshot holds no prices.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    /// Last price for a symbol, if present.
    #[must_use]
    pub fn price(&self, symbol: &str) -> Option<Price> {
        self.prices.get(symbol).copied()
    }

    /// Percentage moves for every symbol present in both `self` and the
    /// earlier `baseline`. Symbols without a baseline entry are skipped,
    /// never compared against stale data.
    #[must_use]
    pub fn moves_since(&self, baseline: &PriceSnapshot) -> Vec<PriceMove> {
        let mut moves = Vec::new();
        for (symbol, &current) in &self.prices {
            let Some(&previous) = baseline.prices.get(symbol) else {
                continue;
            };
            if previous == 0.0 {
                continue;
            }
            moves.push(PriceMove {
                symbol: symbol.clone(),
                previous,
                current,
                change_pct: (current - previous) / previous * 100.0,
            });
        }
        moves
    }
}

/// Desired bracketed order parameters, built once per confirmed signal and
/// consumed immediately by the execution layer.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct OrderIntent {
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: Quantity,
    pub entry: Price,
    pub stop: Price,
    pub take_profit: Price,
    pub leverage: u32,
}

/// Immutable record of an executed trade, one journal row each.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct TradeRecord {
    pub timestamp: DateTime<Utc>,
    pub symbol: Symbol,
    pub side: Side,
    pub entry: Price,
    pub exit: Price,
    pub pnl: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn snapshot(pairs: &[(&str, f64)]) -> PriceSnapshot {
        PriceSnapshot {
            prices: pairs
                .iter()
                .map(|(sym, price)| (sym.to_string(), *price))
                .collect(),
            captured_at: Utc::now(),
        }
    }

    #[test]
    fn side_inverse_flips() {
        assert_eq!(Side::Buy.inverse(), Side::Sell);
        assert_eq!(Side::Sell.inverse(), Side::Buy);
    }

    #[test]
    fn decision_side_mapping() {
        assert_eq!(Decision::Buy.side(), Some(Side::Buy));
        assert_eq!(Decision::Sell.side(), Some(Side::Sell));
        assert_eq!(Decision::Hold.side(), None);
        assert!(!Decision::Hold.is_actionable());
    }

    #[test]
    fn moves_since_computes_percentage_change() {
        let old = snapshot(&[("BTCUSDT", 100.0), ("ETHUSDT", 50.0)]);
        let new = snapshot(&[("BTCUSDT", 103.0), ("ETHUSDT", 49.0)]);
        let mut moves = new.moves_since(&old);
        moves.sort_by(|a, b| a.symbol.cmp(&b.symbol));

        assert_eq!(moves.len(), 2);
        assert!((moves[0].change_pct - 3.0).abs() < 1e-9);
        assert!((moves[1].change_pct - (-2.0)).abs() < 1e-9);
    }

    #[test]
    fn moves_since_skips_symbols_without_baseline() {
        let old = snapshot(&[("BTCUSDT", 100.0)]);
        let new = snapshot(&[("BTCUSDT", 100.5), ("NEWUSDT", 1.0)]);
        let moves = new.moves_since(&old);
        assert_eq!(moves.len(), 1);
        assert_eq!(moves[0].symbol, "BTCUSDT");
    }

    #[test]
    fn anomaly_threshold_is_boundary_inclusive() {
        let make = |change_pct: f64| PriceMove {
            symbol: "BTCUSDT".into(),
            previous: 100.0,
            current: 100.0 * (1.0 + change_pct / 100.0),
            change_pct,
        };
        assert!(make(3.0).is_anomalous(3.0));
        assert!(make(-3.0).is_anomalous(3.0));
        assert!(make(4.2).is_anomalous(3.0));
        assert!(!make(2.999).is_anomalous(3.0));
    }

    #[test]
    fn interval_round_trips_binance_identifier() {
        let interval: Interval = "1m".parse().unwrap();
        assert_eq!(interval.to_binance(), "1m");
        assert!("7m".parse::<Interval>().is_err());
    }
}

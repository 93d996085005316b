//! Trade-frequency gating and position sizing.
//!
//! The [`RiskGate`] is the single authority on whether the bot may open a new
//! position and how large it is allowed to be. Counters live in memory and
//! reset wholesale every 24 hours.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use sentinel_core::{Price, Quantity, Symbol};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Convenience alias for risk results.
pub type RiskResult<T> = Result<T, RiskError>;

/// Errors surfaced by the risk layer.
#[derive(Debug, Error)]
pub enum RiskError {
    /// Entry and stop coincide; sizing would divide by zero.
    #[error("stop distance is zero for entry {entry}")]
    InvalidStopDistance { entry: Price },
    /// Balance or prices are non-positive or non-finite.
    #[error("invalid sizing input: {0}")]
    InvalidInput(String),
}

/// Tunables for the risk gate. Tier boundaries are explicit so tests and
/// deployments can override them instead of relying on embedded constants.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Hard cap on trades per 24h epoch.
    pub max_daily_trades: u32,
    /// Consecutive losing trades that halt trading until the epoch resets.
    pub max_consecutive_losses: u32,
    /// Minimum minutes between trades on the same symbol.
    pub cooldown_minutes: i64,
    /// Fraction of the account balance risked per trade.
    pub risk_fraction: f64,
    /// Stop distance (percent of entry) at or below which the tight tier applies.
    pub tight_stop_pct: f64,
    /// Leverage applied within the tight tier.
    pub tight_stop_leverage: u32,
    /// Stop distance (percent of entry) at or below which the medium tier applies.
    pub medium_stop_pct: f64,
    /// Leverage applied within the medium tier.
    pub medium_stop_leverage: u32,
    /// Leverage applied beyond the medium tier.
    pub wide_stop_leverage: u32,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_daily_trades: 5,
            max_consecutive_losses: 3,
            cooldown_minutes: 30,
            risk_fraction: 0.02,
            tight_stop_pct: 1.0,
            tight_stop_leverage: 10,
            medium_stop_pct: 2.0,
            medium_stop_leverage: 5,
            wide_stop_leverage: 2,
        }
    }
}

/// Mutable counters tracked across one 24h epoch.
#[derive(Clone, Debug)]
struct RiskState {
    trades_today: u32,
    loss_streak: u32,
    last_trade_at: HashMap<Symbol, DateTime<Utc>>,
    epoch_start: DateTime<Utc>,
}

impl RiskState {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            trades_today: 0,
            loss_streak: 0,
            last_trade_at: HashMap::new(),
            epoch_start: now,
        }
    }
}

/// Stateful policy object enforcing trade-frequency and loss-streak limits.
///
/// All clock-dependent entry points take `now` explicitly so tests can drive
/// the epoch without sleeping.
#[derive(Debug)]
pub struct RiskGate {
    config: RiskConfig,
    state: RiskState,
}

impl RiskGate {
    /// Build a gate whose first epoch starts at `now`.
    #[must_use]
    pub fn new(config: RiskConfig, now: DateTime<Utc>) -> Self {
        Self {
            config,
            state: RiskState::new(now),
        }
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Trades registered in the current epoch.
    #[must_use]
    pub fn trades_today(&self) -> u32 {
        self.state.trades_today
    }

    /// Consecutive losing trades in the current epoch.
    #[must_use]
    pub fn loss_streak(&self) -> u32 {
        self.state.loss_streak
    }

    /// Whether a new trade on `symbol` is permitted right now.
    ///
    /// Three independent hard gates: the daily cap, the loss-streak cutoff,
    /// and the per-symbol cooldown. The 24h epoch rolls over lazily here
    /// before the gates are consulted.
    pub fn can_trade(&mut self, symbol: &str, now: DateTime<Utc>) -> bool {
        self.roll_epoch(now);

        if self.state.trades_today >= self.config.max_daily_trades {
            debug!(
                symbol,
                trades_today = self.state.trades_today,
                "daily trade cap reached"
            );
            return false;
        }
        if self.state.loss_streak >= self.config.max_consecutive_losses {
            debug!(
                symbol,
                loss_streak = self.state.loss_streak,
                "loss streak cutoff active"
            );
            return false;
        }
        if let Some(last) = self.state.last_trade_at.get(symbol) {
            let cooldown = Duration::minutes(self.config.cooldown_minutes);
            if now - *last < cooldown {
                debug!(symbol, "symbol still cooling down");
                return false;
            }
        }
        true
    }

    /// Position quantity and leverage for a prospective trade.
    ///
    /// Quantity risks `balance * risk_fraction` over the stop distance.
    /// Leverage is a step function of the stop distance as a percentage of
    /// entry, boundary inclusive at each tier.
    pub fn size_and_leverage(
        &self,
        balance: Quantity,
        entry: Price,
        stop: Price,
    ) -> RiskResult<(Quantity, u32)> {
        if !balance.is_finite() || balance <= 0.0 {
            return Err(RiskError::InvalidInput(format!("balance {balance}")));
        }
        if !entry.is_finite() || entry <= 0.0 {
            return Err(RiskError::InvalidInput(format!("entry {entry}")));
        }
        let stop_distance = (entry - stop).abs();
        if stop_distance == 0.0 || !stop_distance.is_finite() {
            return Err(RiskError::InvalidStopDistance { entry });
        }

        let risk_amount = balance * self.config.risk_fraction;
        let quantity = risk_amount / stop_distance;
        let distance_pct = stop_distance / entry * 100.0;
        let leverage = if distance_pct <= self.config.tight_stop_pct {
            self.config.tight_stop_leverage
        } else if distance_pct <= self.config.medium_stop_pct {
            self.config.medium_stop_leverage
        } else {
            self.config.wide_stop_leverage
        };
        Ok((quantity, leverage))
    }

    /// Record a completed trade: bump the daily counter, advance or reset the
    /// loss streak, and stamp the symbol cooldown.
    pub fn register(&mut self, pnl: f64, symbol: &str, now: DateTime<Utc>) {
        self.roll_epoch(now);
        self.state.trades_today += 1;
        if pnl < 0.0 {
            self.state.loss_streak += 1;
        } else {
            self.state.loss_streak = 0;
        }
        self.state.last_trade_at.insert(symbol.to_string(), now);
        info!(
            symbol,
            pnl,
            trades_today = self.state.trades_today,
            loss_streak = self.state.loss_streak,
            "trade registered with risk gate"
        );
    }

    fn roll_epoch(&mut self, now: DateTime<Utc>) {
        if now - self.state.epoch_start > Duration::hours(24) {
            info!("risk epoch rolled over; counters reset");
            self.state = RiskState::new(now);
        }
    }
}

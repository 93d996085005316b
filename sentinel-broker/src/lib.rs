//! Exchange-agnostic traits used by the rest of the bot.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sentinel_core::{Candle, Interval, OrderIntent, PriceSnapshot, Quantity};
use thiserror::Error;

/// Convenience alias for broker results.
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Common error type returned by connector implementations.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Represents transport-level failures (network, timeouts, etc.).
    #[error("transport error: {0}")]
    Transport(String),
    /// The exchange asked us to back off (HTTP 429/418 and friends).
    #[error("rate limited: {0}")]
    RateLimited(String),
    /// Returned when authentication fails or credentials are missing.
    #[error("authentication failed: {0}")]
    Authentication(String),
    /// Wraps serialization or parsing errors.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Exchange responded with a business error (e.g., insufficient margin).
    #[error("exchange error: {0}")]
    Exchange(String),
    /// A catch-all branch for other issues.
    #[error("unexpected error: {0}")]
    Other(String),
}

impl BrokerError {
    /// Whether retrying the same request may succeed without operator action.
    ///
    /// Transport hiccups and rate limits clear on their own; authentication,
    /// serialization, and exchange rejections do not.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::RateLimited(_))
    }

    /// Helper used by connectors when mapping any error type into a broker error.
    pub fn from_display(err: impl std::fmt::Display, kind: BrokerErrorKind) -> Self {
        match kind {
            BrokerErrorKind::Transport => Self::Transport(err.to_string()),
            BrokerErrorKind::RateLimited => Self::RateLimited(err.to_string()),
            BrokerErrorKind::Authentication => Self::Authentication(err.to_string()),
            BrokerErrorKind::Serialization => Self::Serialization(err.to_string()),
            BrokerErrorKind::Exchange => Self::Exchange(err.to_string()),
            BrokerErrorKind::Other => Self::Other(err.to_string()),
        }
    }
}

/// Enumerates the broad families of broker errors.
#[derive(Debug, Clone, Copy)]
pub enum BrokerErrorKind {
    Transport,
    RateLimited,
    Authentication,
    Serialization,
    Exchange,
    Other,
}

/// Represents metadata describing the capabilities of a connector.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BrokerInfo {
    pub name: String,
    pub markets: Vec<String>,
    pub supports_testnet: bool,
}

/// Read-only market data access (prices and candles).
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Human-friendly name of the connector used for logging purposes.
    fn name(&self) -> &str;

    /// Capture last-traded prices for every tradable symbol quoted in the
    /// settlement asset. A full snapshot every call; callers diff them.
    async fn price_snapshot(&self) -> BrokerResult<PriceSnapshot>;

    /// Fetch the most recent candles for a symbol, oldest first.
    async fn candles(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> BrokerResult<Vec<Candle>>;
}

/// Trait describing the order execution interface.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Return metadata about the connector for telemetry.
    fn info(&self) -> BrokerInfo;

    /// Configure leverage and isolated margin for a symbol before entry.
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> BrokerResult<()>;

    /// Place the entry limit order of a bracket.
    async fn place_entry(&self, intent: &OrderIntent) -> BrokerResult<()>;

    /// Place the protective stop and take-profit pair once the entry is in.
    async fn place_bracket(&self, intent: &OrderIntent) -> BrokerResult<()>;

    /// Available balance in the settlement asset.
    async fn account_balance(&self) -> BrokerResult<Quantity>;
}

/// Source of crowd sentiment for a base asset.
#[async_trait]
pub trait SentimentSource: Send + Sync {
    /// Mean compound sentiment for recent chatter about `base_asset`,
    /// in `[-1.0, 1.0]`. Zero when nothing was found.
    async fn sentiment(&self, base_asset: &str) -> BrokerResult<f64>;
}

/// Outbound operator notifications (webhooks, chat, ...).
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a human-readable message. Implementations should not let a
    /// delivery failure bubble into the trading path.
    async fn notify(&self, message: &str) -> BrokerResult<()>;
}

/// Quote-level helper: strips the settlement suffix from a symbol so that
/// sentiment lookups can search for the base asset (`BTCUSDT` -> `BTC`).
#[must_use]
pub fn base_asset(symbol: &str) -> &str {
    symbol.strip_suffix("USDT").unwrap_or(symbol)
}

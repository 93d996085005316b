//! Layered configuration loading utilities.

use std::path::{Path, PathBuf};

use anyhow::Result;
use config::{Config, ConfigError, Environment, File};
use sentinel_execution::ExecutionConfig;
use sentinel_risk::RiskConfig;
use sentinel_signal::SignalConfig;
use serde::Deserialize;

/// Root application configuration deserialized from layered sources.
#[derive(Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_journal_path")]
    pub journal_path: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Optional JSON log file alongside the stdout layer.
    #[serde(default)]
    pub log_path: Option<PathBuf>,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub social: SocialConfig,
    #[serde(default)]
    pub signal: SignalConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub alerting: AlertingConfig,
}

/// Polling-loop tunables.
#[derive(Clone, Debug, Deserialize)]
pub struct MonitorConfig {
    /// Seconds between price snapshots.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Absolute percentage move that counts as an anomaly.
    #[serde(default = "default_anomaly_threshold_pct")]
    pub anomaly_threshold_pct: f64,
    /// Candle granularity requested when a symbol is evaluated.
    #[serde(default = "default_candle_interval")]
    pub candle_interval: String,
    /// Number of candles fetched per evaluation.
    #[serde(default = "default_candle_limit")]
    pub candle_limit: usize,
    /// Ticks between maintenance sweeps (history prune, cache check).
    #[serde(default = "default_maintenance_every_ticks")]
    pub maintenance_every_ticks: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            anomaly_threshold_pct: default_anomaly_threshold_pct(),
            candle_interval: default_candle_interval(),
            candle_limit: default_candle_limit(),
            maintenance_every_ticks: default_maintenance_every_ticks(),
        }
    }
}

/// Exchange connector credentials and endpoints.
#[derive(Clone, Debug, Deserialize)]
pub struct ExchangeConfig {
    #[serde(default = "default_rest_url")]
    pub rest_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
    /// Signed-request receive window in milliseconds.
    #[serde(default = "default_recv_window_ms")]
    pub recv_window_ms: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            rest_url: default_rest_url(),
            api_key: String::new(),
            api_secret: String::new(),
            recv_window_ms: default_recv_window_ms(),
        }
    }
}

/// Social search credentials for the sentiment connector.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct SocialConfig {
    #[serde(default)]
    pub bearer_token: String,
    #[serde(default = "default_max_texts")]
    pub max_texts: usize,
}

/// Outbound operator notifications.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct AlertingConfig {
    /// Webhook receiving human-readable alerts; alerts are dropped when unset.
    #[serde(default)]
    pub webhook_url: Option<String>,
}

fn default_journal_path() -> PathBuf {
    PathBuf::from("data/trades.csv")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_anomaly_threshold_pct() -> f64 {
    3.0
}

fn default_candle_interval() -> String {
    "15m".to_string()
}

fn default_candle_limit() -> usize {
    50
}

fn default_maintenance_every_ticks() -> u64 {
    60
}

fn default_rest_url() -> String {
    "https://fapi.binance.com".to_string()
}

fn default_recv_window_ms() -> u64 {
    5_000
}

fn default_max_texts() -> usize {
    10
}

/// Loads configuration by merging files and environment variables.
///
/// Sources (lowest to highest precedence):
/// 1. `config/default.toml`
/// 2. `config/{environment}.toml` (if `environment` is Some)
/// 3. `config/local.toml` (optional, ignored in git)
/// 4. Environment variables prefixed with `SENTINEL_`
pub fn load_config(env: Option<&str>) -> Result<AppConfig> {
    load_config_from(Path::new("config"), env)
}

/// Same as [`load_config`] with an explicit config directory, for tests.
pub fn load_config_from(base_path: &Path, env: Option<&str>) -> Result<AppConfig> {
    let mut builder =
        Config::builder().add_source(File::from(base_path.join("default.toml")).required(false));
    if let Some(env_name) = env {
        builder = builder
            .add_source(File::from(base_path.join(format!("{env_name}.toml"))).required(false));
    }

    builder = builder.add_source(File::from(base_path.join("local.toml")).required(false));

    builder = builder.add_source(
        Environment::with_prefix("SENTINEL")
            .separator("__")
            .ignore_empty(true),
    );

    let config = builder.build()?;
    config
        .try_deserialize()
        .map_err(|err: ConfigError| err.into())
}

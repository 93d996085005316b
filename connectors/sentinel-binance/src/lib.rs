//! Binance USDT-M futures REST connector.
//!
//! Market data comes from the public endpoints; order placement and balance
//! reads use HMAC-SHA256 signed requests per the Binance futures API rules.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use sentinel_broker::{
    BrokerError, BrokerInfo, BrokerResult, ExchangeClient, MarketData,
};
use sentinel_core::{Candle, Interval, OrderIntent, PriceSnapshot, Quantity, Side};
use sha2::Sha256;
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

/// Margin-type change rejections that mean "already isolated".
const MARGIN_TYPE_NO_CHANGE: i64 = -4046;

/// API credentials required for private REST endpoints.
#[derive(Clone)]
pub struct BinanceCredentials {
    pub api_key: String,
    pub api_secret: String,
}

/// Configuration for the Binance futures REST client.
pub struct BinanceConfig {
    pub base_url: String,
    pub recv_window: u64,
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://fapi.binance.com".into(),
            recv_window: 5_000,
        }
    }
}

/// A thin wrapper over the Binance USDT-M futures REST API.
pub struct BinanceClient {
    http: Client,
    config: BinanceConfig,
    credentials: Option<BinanceCredentials>,
    info: BrokerInfo,
}

impl BinanceClient {
    /// Build a new client optionally configured with credentials.
    pub fn new(config: BinanceConfig, credentials: Option<BinanceCredentials>) -> BrokerResult<Self> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|err| BrokerError::Other(format!("failed to create http client: {err}")))?;
        Ok(Self {
            info: BrokerInfo {
                name: "binance-futures".into(),
                markets: vec!["usdt-m".into()],
                supports_testnet: config.base_url.contains("testnet"),
            },
            http,
            config,
            credentials,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url, path.trim_start_matches('/'))
    }

    fn creds(&self) -> BrokerResult<&BinanceCredentials> {
        self.credentials
            .as_ref()
            .ok_or_else(|| BrokerError::Authentication("missing Binance credentials".into()))
    }

    async fn public_get<T>(&self, path: &str, query: &[(String, String)]) -> BrokerResult<T>
    where
        T: DeserializeOwned,
    {
        let response = self
            .http
            .get(self.url(path))
            .query(query)
            .send()
            .await
            .map_err(|err| BrokerError::Transport(err.to_string()))?;
        Self::decode(response).await
    }

    /// Signed request: timestamp and recvWindow join the query string, which
    /// is then HMAC-signed with the API secret and appended as `signature`.
    async fn signed_request<T>(
        &self,
        method: Method,
        path: &str,
        mut query: Vec<(String, String)>,
    ) -> BrokerResult<T>
    where
        T: DeserializeOwned,
    {
        let creds = self.creds()?;
        query.push(("timestamp".into(), Utc::now().timestamp_millis().to_string()));
        query.push(("recvWindow".into(), self.config.recv_window.to_string()));
        let query_string = serde_urlencoded::to_string(&query)
            .map_err(|err| BrokerError::Serialization(err.to_string()))?;

        let mut mac = HmacSha256::new_from_slice(creds.api_secret.as_bytes())
            .map_err(|err| BrokerError::Other(format!("failed to create signing key: {err}")))?;
        mac.update(query_string.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());

        let url = format!("{}?{query_string}&signature={signature}", self.url(path));
        let response = self
            .http
            .request(method, url)
            .header("X-MBX-APIKEY", &creds.api_key)
            .send()
            .await
            .map_err(|err| BrokerError::Transport(err.to_string()))?;
        Self::decode(response).await
    }

    async fn decode<T>(response: reqwest::Response) -> BrokerResult<T>
    where
        T: DeserializeOwned,
    {
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| BrokerError::Transport(err.to_string()))?;

        if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418 {
            return Err(BrokerError::RateLimited(format!(
                "http {status}: {}",
                String::from_utf8_lossy(&body)
            )));
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(BrokerError::Authentication(format!(
                "http {status}: {}",
                String::from_utf8_lossy(&body)
            )));
        }
        if !status.is_success() {
            let detail = serde_json::from_slice::<ApiError>(&body)
                .map(|err| format!("{} (code {})", err.msg, err.code))
                .unwrap_or_else(|_| String::from_utf8_lossy(&body).into_owned());
            return Err(BrokerError::Exchange(detail));
        }

        serde_json::from_slice(&body).map_err(|err| {
            BrokerError::Serialization(format!("failed to deserialize payload: {err}"))
        })
    }

    fn map_side(side: Side) -> &'static str {
        match side {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    /// Isolated margin is required before the first order on a symbol;
    /// Binance rejects the call with a dedicated code when it is already set.
    async fn ensure_isolated_margin(&self, symbol: &str) -> BrokerResult<()> {
        let query = vec![
            ("symbol".to_string(), symbol.to_string()),
            ("marginType".to_string(), "ISOLATED".to_string()),
        ];
        match self
            .signed_request::<serde_json::Value>(Method::POST, "/fapi/v1/marginType", query)
            .await
        {
            Ok(_) => Ok(()),
            Err(BrokerError::Exchange(detail))
                if detail.contains(&MARGIN_TYPE_NO_CHANGE.to_string()) =>
            {
                debug!(symbol, "margin type already isolated");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl MarketData for BinanceClient {
    fn name(&self) -> &str {
        &self.info.name
    }

    async fn price_snapshot(&self) -> BrokerResult<PriceSnapshot> {
        let tickers: Vec<TickerPrice> = self.public_get("/fapi/v1/ticker/price", &[]).await?;
        let mut prices = HashMap::new();
        for ticker in tickers {
            if !ticker.symbol.ends_with("USDT") {
                continue;
            }
            match ticker.price.parse::<f64>() {
                Ok(price) => {
                    prices.insert(ticker.symbol, price);
                }
                Err(err) => warn!(symbol = %ticker.symbol, error = %err, "unparseable ticker price"),
            }
        }
        Ok(PriceSnapshot::new(prices))
    }

    async fn candles(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> BrokerResult<Vec<Candle>> {
        let query = vec![
            ("symbol".to_string(), symbol.to_string()),
            ("interval".to_string(), interval.to_binance().to_string()),
            ("limit".to_string(), limit.to_string()),
        ];
        let rows: Vec<Kline> = self.public_get("/fapi/v1/klines", &query).await?;
        rows.into_iter().map(Kline::into_candle).collect()
    }
}

#[async_trait]
impl ExchangeClient for BinanceClient {
    fn info(&self) -> BrokerInfo {
        self.info.clone()
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> BrokerResult<()> {
        self.ensure_isolated_margin(symbol).await?;
        let query = vec![
            ("symbol".to_string(), symbol.to_string()),
            ("leverage".to_string(), leverage.to_string()),
        ];
        self.signed_request::<serde_json::Value>(Method::POST, "/fapi/v1/leverage", query)
            .await?;
        Ok(())
    }

    async fn place_entry(&self, intent: &OrderIntent) -> BrokerResult<()> {
        let query = vec![
            ("symbol".to_string(), intent.symbol.clone()),
            ("side".to_string(), Self::map_side(intent.side).to_string()),
            ("type".to_string(), "LIMIT".to_string()),
            ("timeInForce".to_string(), "GTC".to_string()),
            ("quantity".to_string(), intent.quantity.to_string()),
            ("price".to_string(), intent.entry.to_string()),
        ];
        self.signed_request::<serde_json::Value>(Method::POST, "/fapi/v1/order", query)
            .await?;
        Ok(())
    }

    async fn place_bracket(&self, intent: &OrderIntent) -> BrokerResult<()> {
        let [stop, take_profit] = bracket_queries(intent);
        self.signed_request::<serde_json::Value>(Method::POST, "/fapi/v1/order", stop)
            .await?;
        self.signed_request::<serde_json::Value>(Method::POST, "/fapi/v1/order", take_profit)
            .await?;
        Ok(())
    }

    async fn account_balance(&self) -> BrokerResult<Quantity> {
        let balances: Vec<AssetBalance> = self
            .signed_request(Method::GET, "/fapi/v2/balance", Vec::new())
            .await?;
        balances
            .into_iter()
            .find(|balance| balance.asset == "USDT")
            .map(|balance| balance.available_balance)
            .ok_or_else(|| BrokerError::Exchange("no USDT balance in account".into()))
    }
}

/// The protective pair closing an entry: opposite side, same quantity,
/// reduce-only so a pre-existing position on the symbol is never touched.
fn bracket_queries(intent: &OrderIntent) -> [Vec<(String, String)>; 2] {
    let close_side = BinanceClient::map_side(intent.side.inverse()).to_string();
    let leg = |order_type: &str, trigger: f64| {
        vec![
            ("symbol".to_string(), intent.symbol.clone()),
            ("side".to_string(), close_side.clone()),
            ("type".to_string(), order_type.to_string()),
            ("stopPrice".to_string(), trigger.to_string()),
            ("quantity".to_string(), intent.quantity.to_string()),
            ("reduceOnly".to_string(), "true".to_string()),
        ]
    };
    [
        leg("STOP_MARKET", intent.stop),
        leg("TAKE_PROFIT_MARKET", intent.take_profit),
    ]
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
struct TickerPrice {
    symbol: String,
    price: String,
}

#[derive(Debug, Deserialize)]
struct AssetBalance {
    asset: String,
    #[serde(rename = "availableBalance", deserialize_with = "de_f64_str")]
    available_balance: f64,
}

/// Kline rows arrive as heterogeneous JSON arrays; only open time, close,
/// and volume survive into [`Candle`].
#[derive(Debug, Deserialize)]
struct Kline(
    i64,
    String,
    String,
    String,
    String,
    String,
    #[serde(default)] serde_json::Value,
    #[serde(default)] serde_json::Value,
    #[serde(default)] serde_json::Value,
    #[serde(default)] serde_json::Value,
    #[serde(default)] serde_json::Value,
    #[serde(default)] serde_json::Value,
);

impl Kline {
    fn into_candle(self) -> BrokerResult<Candle> {
        let open_time = millis_to_datetime(self.0)?;
        let close = self
            .4
            .parse::<f64>()
            .map_err(|err| BrokerError::Serialization(format!("bad close: {err}")))?;
        let volume = self
            .5
            .parse::<f64>()
            .map_err(|err| BrokerError::Serialization(format!("bad volume: {err}")))?;
        Ok(Candle {
            open_time,
            close,
            volume,
        })
    }
}

fn millis_to_datetime(millis: i64) -> BrokerResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| BrokerError::Serialization(format!("bad timestamp {millis}")))
}

fn de_f64_str<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    raw.parse::<f64>().map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kline_rows_become_candles() {
        let raw = r#"[[1700000000000,"100.0","110.0","90.0","105.5","1234.5",0,"0",0,"0","0","0"]]"#;
        let rows: Vec<Kline> = serde_json::from_str(raw).unwrap();
        let candle = rows.into_iter().next().unwrap().into_candle().unwrap();
        assert!((candle.close - 105.5).abs() < 1e-9);
        assert!((candle.volume - 1234.5).abs() < 1e-9);
    }

    #[test]
    fn bracket_legs_carry_quantity_and_reduce_only() {
        let intent = OrderIntent {
            symbol: "BTCUSDT".into(),
            side: Side::Buy,
            quantity: 0.25,
            entry: 100.0,
            stop: 95.0,
            take_profit: 110.0,
            leverage: 5,
        };
        let [stop, take_profit] = bracket_queries(&intent);

        for leg in [&stop, &take_profit] {
            let find = |key: &str| {
                leg.iter()
                    .find(|(k, _)| k == key)
                    .map(|(_, v)| v.as_str())
            };
            assert_eq!(find("side"), Some("SELL"));
            assert_eq!(find("quantity"), Some("0.25"));
            assert_eq!(find("reduceOnly"), Some("true"));
            assert_eq!(find("closePosition"), None);
        }
        let trigger = |leg: &[(String, String)]| {
            leg.iter()
                .find(|(k, _)| k == "stopPrice")
                .map(|(_, v)| v.clone())
                .unwrap()
        };
        assert_eq!(trigger(&stop), "95");
        assert_eq!(trigger(&take_profit), "110");
    }

    #[test]
    fn info_reflects_testnet_base_url() {
        let mainnet = BinanceClient::new(BinanceConfig::default(), None).unwrap();
        assert!(!mainnet.info().supports_testnet);

        let testnet = BinanceClient::new(
            BinanceConfig {
                base_url: "https://testnet.binancefuture.com".into(),
                recv_window: 5_000,
            },
            None,
        )
        .unwrap();
        assert!(testnet.info().supports_testnet);
    }

    #[test]
    fn balance_rows_parse_available_balance() {
        let raw = r#"[{"asset":"USDT","availableBalance":"9876.54"},{"asset":"BTC","availableBalance":"0.1"}]"#;
        let balances: Vec<AssetBalance> = serde_json::from_str(raw).unwrap();
        let usdt = balances.iter().find(|b| b.asset == "USDT").unwrap();
        assert!((usdt.available_balance - 9876.54).abs() < 1e-9);
    }
}

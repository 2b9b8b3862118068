use crate::core::balances::{AssetAmount, SubLedgerSource};
use crate::core::config::{BinanceProviderConfig, HttpConfig};
use crate::core::models::Candle;
use crate::core::price::{CandleSource, SpotPriceProvider};
use crate::providers::util::{RetryPolicy, http_client, with_retry};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use sha2::Sha256;
use std::collections::BTreeMap;
use tracing::{debug, instrument, warn};

type HmacSha256 = Hmac<Sha256>;

/// Largest kline page the exchange serves.
pub const KLINES_LIMIT: u32 = 1000;

const API_KEY_HEADER: &str = "X-MBX-APIKEY";

pub struct BinanceClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    retry: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct TickerPrice {
    price: String,
}

#[derive(Debug, Deserialize)]
struct AccountInfo {
    balances: Vec<SpotBalance>,
}

#[derive(Debug, Deserialize)]
struct SpotBalance {
    asset: String,
    free: String,
    locked: String,
}

#[derive(Debug, Deserialize)]
struct PositionPage<T> {
    rows: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlexiblePosition {
    asset: String,
    total_amount: String,
}

#[derive(Debug, Deserialize)]
struct LockedPosition {
    asset: String,
    amount: String,
}

fn parse_amount(value: &str, what: &str) -> Result<f64> {
    value
        .parse::<f64>()
        .with_context(|| format!("Invalid {what}: {value}"))
}

fn query_string(params: &BTreeMap<&str, String>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Parses one kline row: `[open_time, open, high, low, close, volume, close_time, ...]`.
fn parse_kline(row: &[serde_json::Value]) -> Result<Candle> {
    let number = |index: usize| -> Result<f64> {
        row.get(index)
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("Missing kline field {index}"))
            .and_then(|v| parse_amount(v, "kline price"))
    };
    let close_ms = row
        .get(6)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| anyhow!("Missing kline close time"))?;
    let close_time = Utc
        .timestamp_millis_opt(close_ms)
        .single()
        .ok_or_else(|| anyhow!("Invalid kline close time: {close_ms}"))?;

    Ok(Candle {
        close_time,
        close: number(4)?,
        high: number(2).ok(),
        low: number(3).ok(),
    })
}

impl BinanceClient {
    pub fn new(config: &BinanceProviderConfig, http: &HttpConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(http)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            retry: RetryPolicy::from(http),
        })
    }

    /// Appends `timestamp` and the hex HMAC-SHA256 signature of the sorted
    /// query string.
    fn sign(&self, mut params: BTreeMap<&str, String>) -> Result<String> {
        if self.api_key.is_empty() || self.api_secret.is_empty() {
            return Err(anyhow!("Binance API credentials are not configured"));
        }
        params.insert("timestamp", Utc::now().timestamp_millis().to_string());
        let query = query_string(&params);

        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| anyhow!("Invalid API secret: {e}"))?;
        mac.update(query.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());
        Ok(format!("{query}&signature={signature}"))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &str, signed: bool) -> Result<T> {
        let url = format!("{}{}?{}", self.base_url, path, query);
        let response = with_retry(
            || {
                let mut request = self.client.get(&url);
                if signed {
                    request = request.header(API_KEY_HEADER, &self.api_key);
                }
                request.send()
            },
            self.retry,
        )
        .await
        .with_context(|| format!("Request to {path} failed"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("HTTP error: {} for {}: {}", status, path, body));
        }
        response
            .json::<T>()
            .await
            .with_context(|| format!("Failed to parse response from {path}"))
    }

    /// One page of daily klines opening at or after `start`.
    #[instrument(skip(self))]
    pub async fn klines(&self, symbol: &str, start: DateTime<Utc>, limit: u32) -> Result<Vec<Candle>> {
        let query = format!(
            "symbol={}&interval=1d&startTime={}&limit={}",
            symbol,
            start.timestamp_millis(),
            limit.clamp(1, KLINES_LIMIT)
        );
        let rows: Vec<Vec<serde_json::Value>> = self.get_json("/api/v3/klines", &query, false).await?;
        rows.iter().map(|row| parse_kline(row)).collect()
    }

    async fn positions<T: DeserializeOwned>(&self, path: &str, page: u32, size: u32) -> Result<Vec<T>> {
        let params = BTreeMap::from([("current", page.to_string()), ("size", size.to_string())]);
        let query = self.sign(params)?;
        let page: PositionPage<T> = self.get_json(path, &query, true).await?;
        Ok(page.rows)
    }
}

#[async_trait]
impl SpotPriceProvider for BinanceClient {
    #[instrument(name = "BinanceSpotPrice", skip(self))]
    async fn spot_price(&self, symbol: &str) -> Result<f64> {
        let ticker: TickerPrice = self
            .get_json("/api/v3/ticker/price", &format!("symbol={symbol}"), false)
            .await?;
        parse_amount(&ticker.price, "ticker price")
    }
}

#[async_trait]
impl CandleSource for BinanceClient {
    /// Pages forward from just after `cursor` until the exchange runs out of
    /// rows or the cursor reaches `now`. Bars still open at `now` are dropped.
    #[instrument(name = "BinanceKlines", skip(self, now))]
    async fn fetch_since(
        &self,
        symbol: &str,
        cursor: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let mut start = cursor.map_or(DateTime::UNIX_EPOCH, |c| c + Duration::milliseconds(1));
        let mut candles = Vec::new();

        while start < now {
            let page = match self.klines(symbol, start, KLINES_LIMIT).await {
                Ok(page) => page,
                Err(e) if candles.is_empty() => return Err(e),
                Err(e) => {
                    warn!("Stopping kline pagination early: {e:#}");
                    break;
                }
            };
            let Some(last) = page.last().map(|c| c.close_time) else {
                break;
            };
            debug!(count = page.len(), %last, "Fetched kline page");
            candles.extend(page.into_iter().filter(|c| c.close_time <= now));

            let next = last + Duration::milliseconds(1);
            if next <= start {
                warn!(%start, "Kline cursor did not advance");
                break;
            }
            start = next;
        }
        Ok(candles)
    }
}

#[async_trait]
impl SubLedgerSource for BinanceClient {
    async fn spot_balances(&self) -> Result<Vec<AssetAmount>> {
        let query = self.sign(BTreeMap::new())?;
        let account: AccountInfo = self.get_json("/api/v3/account", &query, true).await?;
        account
            .balances
            .into_iter()
            .map(|b| {
                let amount = parse_amount(&b.free, "free balance")? + parse_amount(&b.locked, "locked balance")?;
                Ok(AssetAmount { asset: b.asset, amount })
            })
            .collect()
    }

    async fn flexible_positions(&self, page: u32, size: u32) -> Result<Vec<AssetAmount>> {
        let rows: Vec<FlexiblePosition> = self
            .positions("/sapi/v1/simple-earn/flexible/position", page, size)
            .await?;
        rows.into_iter()
            .map(|p| {
                Ok(AssetAmount {
                    amount: parse_amount(&p.total_amount, "flexible amount")?,
                    asset: p.asset,
                })
            })
            .collect()
    }

    async fn locked_positions(&self, page: u32, size: u32) -> Result<Vec<AssetAmount>> {
        let rows: Vec<LockedPosition> = self
            .positions("/sapi/v1/simple-earn/locked/position", page, size)
            .await?;
        rows.into_iter()
            .map(|p| {
                Ok(AssetAmount {
                    amount: parse_amount(&p.amount, "locked amount")?,
                    asset: p.asset,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(base_url: &str) -> BinanceClient {
        let config = BinanceProviderConfig {
            base_url: base_url.to_string(),
            api_key: "key".to_string(),
            api_secret: "secret".to_string(),
        };
        let http = HttpConfig {
            timeout_secs: 5,
            retries: 0,
            retry_delay_ms: 1,
        };
        BinanceClient::new(&config, &http).unwrap()
    }

    fn day_ms(day: i64) -> i64 {
        day * 86_400_000
    }

    /// Kline row for day `day` since the epoch.
    fn kline(day: i64, close: &str) -> serde_json::Value {
        serde_json::json!([
            day_ms(day),
            "1.0",
            "2.0",
            "0.5",
            close,
            "100.0",
            day_ms(day + 1) - 1,
            "0",
            10,
            "0",
            "0",
            "0"
        ])
    }

    #[test]
    fn test_signed_query_is_sorted_and_verifiable() {
        let client = client("http://localhost");
        let query = client
            .sign(BTreeMap::from([("size", "10".to_string()), ("current", "1".to_string())]))
            .unwrap();
        assert!(query.starts_with("current=1&size=10&timestamp="));
        let signature = query.rsplit("signature=").next().unwrap();
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));

        let unsigned = query.split("&signature=").next().unwrap();
        let mut mac = HmacSha256::new_from_slice(b"secret").unwrap();
        mac.update(unsigned.as_bytes());
        assert_eq!(signature, hex::encode(mac.finalize().into_bytes()));
    }

    #[test]
    fn test_sign_requires_credentials() {
        let config = BinanceProviderConfig::default();
        let client = BinanceClient::new(&config, &HttpConfig::default()).unwrap();
        assert!(client.sign(BTreeMap::new()).is_err());
    }

    #[tokio::test]
    async fn test_spot_price() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/ticker/price"))
            .and(query_param("symbol", "BNBUSDT"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"symbol": "BNBUSDT", "price": "312.45000000"}"#),
            )
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v3/ticker/price"))
            .and(query_param("symbol", "XYZUSDT"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_string(r#"{"code": -1121, "msg": "Invalid symbol."}"#),
            )
            .mount(&mock_server)
            .await;

        let client = client(&mock_server.uri());
        assert_eq!(client.spot_price("BNBUSDT").await.unwrap(), 312.45);
        let err = client.spot_price("XYZUSDT").await.unwrap_err();
        assert!(err.to_string().contains("HTTP error: 400"));
    }

    #[tokio::test]
    async fn test_klines_paginate_and_drop_open_bar() {
        let mock_server = MockServer::start().await;
        let now = Utc.timestamp_millis_opt(day_ms(4) + 3_600_000).unwrap();

        // First page answers the initial cursor, second the advanced one.
        Mock::given(method("GET"))
            .and(path("/api/v3/klines"))
            .and(query_param("startTime", (day_ms(1)).to_string()))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!([kline(1, "10.0"), kline(2, "11.0")])),
            )
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v3/klines"))
            .and(query_param("startTime", (day_ms(3)).to_string()))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!([kline(3, "12.0"), kline(4, "13.0")])),
            )
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v3/klines"))
            .and(query_param("startTime", (day_ms(5)).to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .expect(0)
            .mount(&mock_server)
            .await;

        let client = client(&mock_server.uri());
        let cursor = Utc.timestamp_millis_opt(day_ms(1) - 1).unwrap();
        let candles = client.fetch_since("BTCUSDT", Some(cursor), now).await.unwrap();

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        // Day 4 is still open at `now`.
        assert_eq!(closes, vec![10.0, 11.0, 12.0]);
        assert_eq!(candles[0].high, Some(2.0));
        assert_eq!(candles[0].low, Some(0.5));
    }

    #[tokio::test]
    async fn test_klines_stop_on_empty_page() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/klines"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = client(&mock_server.uri());
        let now = Utc.timestamp_millis_opt(day_ms(10)).unwrap();
        let cursor = Utc.timestamp_millis_opt(day_ms(5)).unwrap();
        assert!(client.fetch_since("BTCUSDT", Some(cursor), now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_spot_balances_are_signed_and_summed() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/account"))
            .and(header("X-MBX-APIKEY", "key"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"balances": [
                    {"asset": "BTC", "free": "0.5", "locked": "0.25"},
                    {"asset": "LDBTC", "free": "1.0", "locked": "0.0"}
                ]}"#,
            ))
            .mount(&mock_server)
            .await;

        let client = client(&mock_server.uri());
        let balances = client.spot_balances().await.unwrap();
        assert_eq!(
            balances,
            vec![AssetAmount::new("BTC", 0.75), AssetAmount::new("LDBTC", 1.0)]
        );
    }

    #[tokio::test]
    async fn test_yield_positions() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sapi/v1/simple-earn/flexible/position"))
            .and(query_param("current", "2"))
            .and(query_param("size", "100"))
            .and(header_exists("X-MBX-APIKEY"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"rows": [{"asset": "USDT", "totalAmount": "150.5", "latestAnnualPercentageRate": "0.05"}], "total": 101}"#,
            ))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/sapi/v1/simple-earn/locked/position"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"rows": [{"asset": "DOT", "amount": "20", "positionId": 1}], "total": 1}"#,
            ))
            .mount(&mock_server)
            .await;

        let client = client(&mock_server.uri());
        assert_eq!(
            client.flexible_positions(2, 100).await.unwrap(),
            vec![AssetAmount::new("USDT", 150.5)]
        );
        assert_eq!(
            client.locked_positions(1, 100).await.unwrap(),
            vec![AssetAmount::new("DOT", 20.0)]
        );
    }
}

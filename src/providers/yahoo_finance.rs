use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::core::config::{HttpConfig, YahooProviderConfig};
use crate::core::models::Candle;
use crate::core::price::{CandleSource, retain_after};
use crate::providers::util::{RetryPolicy, http_client, with_retry};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChartRange {
    Max,
    Between(DateTime<Utc>, DateTime<Utc>),
}

impl ChartRange {
    fn query(&self) -> String {
        match self {
            ChartRange::Max => "range=max".to_string(),
            ChartRange::Between(from, to) => {
                format!("period1={}&period2={}", from.timestamp(), to.timestamp())
            }
        }
    }
}

#[derive(Deserialize, Debug)]
struct YahooChartResponse {
    chart: ChartResult,
}

#[derive(Deserialize, Debug)]
struct ChartResult {
    result: Option<Vec<ChartItem>>,
}

#[derive(Deserialize, Debug)]
struct ChartItem {
    timestamp: Option<Vec<i64>>,
    indicators: Option<Indicators>,
}

#[derive(Deserialize, Debug)]
struct Indicators {
    quote: Vec<Quote>,
}

#[derive(Deserialize, Debug, Default)]
struct Quote {
    close: Option<Vec<Option<f64>>>,
    high: Option<Vec<Option<f64>>>,
    low: Option<Vec<Option<f64>>>,
}

fn value_at(series: &Option<Vec<Option<f64>>>, index: usize) -> Option<f64> {
    series.as_ref().and_then(|s| s.get(index).copied().flatten())
}

/// Daily candles of a chart item; rows without a close are skipped.
fn extract_candles(item: &ChartItem) -> Vec<Candle> {
    let Some(timestamps) = item.timestamp.as_ref() else {
        return Vec::new();
    };
    let empty = Quote::default();
    let quote = item
        .indicators
        .as_ref()
        .and_then(|inds| inds.quote.first())
        .unwrap_or(&empty);

    timestamps
        .iter()
        .enumerate()
        .filter_map(|(i, ts)| {
            let close = value_at(&quote.close, i)?;
            let close_time = Utc.timestamp_opt(*ts, 0).single()?;
            Some(Candle {
                close_time,
                close,
                high: value_at(&quote.high, i),
                low: value_at(&quote.low, i),
            })
        })
        .collect()
}

pub struct YahooChartClient {
    client: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

impl YahooChartClient {
    pub fn new(config: &YahooProviderConfig, http: &HttpConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(http)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            retry: RetryPolicy::from(http),
        })
    }

    #[instrument(name = "YahooChartFetch", skip(self), fields(symbol = %symbol))]
    pub async fn daily_chart(&self, symbol: &str, range: ChartRange) -> Result<Vec<Candle>> {
        let url = format!(
            "{}/v8/finance/chart/{}?interval=1d&{}",
            self.base_url,
            symbol,
            range.query()
        );
        debug!("Requesting chart data from {}", url);

        let response = with_retry(|| self.client.get(&url).send(), self.retry)
            .await
            .with_context(|| format!("Request error for symbol: {symbol}"))?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "HTTP error: {} for symbol: {}",
                response.status(),
                symbol
            ));
        }

        let text = response.text().await?;
        let data: YahooChartResponse = serde_json::from_str(&text)
            .map_err(|e| anyhow!("Failed to parse JSON response for {}: {}", symbol, e))?;

        let item = data
            .chart
            .result
            .and_then(|r| r.into_iter().next())
            .ok_or_else(|| anyhow!("No chart data found for symbol: {}", symbol))?;
        Ok(extract_candles(&item))
    }

    /// Completed daily candles after `cursor`.
    ///
    /// Bars are stamped at the session open in exchange time (FX at London
    /// midnight, 23:00 UTC in summer), so a bar is complete only once a full
    /// day has passed since its timestamp.
    async fn completed_since(
        &self,
        symbol: &str,
        cursor: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let range = match cursor {
            Some(cursor) => ChartRange::Between(cursor, now),
            None => ChartRange::Max,
        };
        let candles = retain_after(self.daily_chart(symbol, range).await?, cursor);
        Ok(candles
            .into_iter()
            .filter(|c| c.close_time + Duration::days(1) <= now)
            .collect())
    }
}

/// Equity history, addressed by ticker.
pub struct YahooEquitySource {
    client: Arc<YahooChartClient>,
}

impl YahooEquitySource {
    pub fn new(client: Arc<YahooChartClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CandleSource for YahooEquitySource {
    async fn fetch_since(
        &self,
        symbol: &str,
        cursor: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        self.client.completed_since(symbol, cursor, now).await
    }
}

/// Currency pair history; `EURUSD` is requested as `EURUSD=X`.
pub struct YahooFxSource {
    client: Arc<YahooChartClient>,
}

impl YahooFxSource {
    pub fn new(client: Arc<YahooChartClient>) -> Self {
        Self { client }
    }

    pub fn chart_symbol(pair: &str) -> String {
        let pair = pair.trim().to_uppercase();
        if pair.ends_with("=X") {
            pair
        } else {
            format!("{pair}=X")
        }
    }
}

#[async_trait]
impl CandleSource for YahooFxSource {
    async fn fetch_since(
        &self,
        symbol: &str,
        cursor: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        self.client
            .completed_since(&Self::chart_symbol(symbol), cursor, now)
            .await
    }
}

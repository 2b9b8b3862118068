//! Pricing abstractions

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::models::Candle;

#[async_trait]
pub trait SpotPriceProvider: Send + Sync {
    /// Last traded price of an exchange pair such as `BNBUSDT`.
    async fn spot_price(&self, symbol: &str) -> Result<f64>;
}

/// Daily history fetch strategy for one kind of source.
#[async_trait]
pub trait CandleSource: Send + Sync {
    /// Completed daily candles closing strictly after `cursor`, ascending.
    async fn fetch_since(
        &self,
        symbol: &str,
        cursor: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Candle>>;
}

/// Keeps candles closing strictly after `cursor`.
pub fn retain_after(candles: Vec<Candle>, cursor: Option<DateTime<Utc>>) -> Vec<Candle> {
    match cursor {
        Some(cursor) => candles
            .into_iter()
            .filter(|c| c.close_time > cursor)
            .collect(),
        None => candles,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn candle(day: u32) -> Candle {
        Candle {
            close_time: Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
            close: day as f64,
            high: None,
            low: None,
        }
    }

    #[test]
    fn test_retain_after_is_strict() {
        let candles = vec![candle(1), candle(2), candle(3)];
        let cursor = Some(candle(2).close_time);
        let kept = retain_after(candles.clone(), cursor);
        assert_eq!(kept, vec![candle(3)]);
        assert_eq!(retain_after(candles, None).len(), 3);
    }
}

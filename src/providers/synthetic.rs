use crate::core::models::Candle;
use crate::core::price::CandleSource;
use crate::core::registers::RegisterBook;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

/// Daily series for the stablecoin/settlement pair, derived from the
/// recorded stablecoin rate rather than fetched from a market.
///
/// Every fetch yields a single candle stamped `now`; the synchronizer
/// replaces the current day's candle with it.
pub struct SyntheticRateSource {
    registers: RegisterBook,
    rate_registers: Vec<String>,
}

impl SyntheticRateSource {
    pub fn new(registers: RegisterBook, rate_registers: Vec<String>) -> Self {
        Self {
            registers,
            rate_registers,
        }
    }
}

#[async_trait]
impl CandleSource for SyntheticRateSource {
    async fn fetch_since(
        &self,
        symbol: &str,
        _cursor: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let Some((register, rate)) = self.registers.first_present(&self.rate_registers).await? else {
            debug!(symbol, "No stablecoin rate recorded yet");
            return Ok(Vec::new());
        };
        if !(rate.is_finite() && rate > 0.0) {
            debug!(symbol, register = %register, rate, "Ignoring unusable stablecoin rate");
            return Ok(Vec::new());
        }
        Ok(vec![Candle {
            close_time: now,
            close: rate,
            high: None,
            low: None,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryCollection;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn source(registers: &RegisterBook) -> SyntheticRateSource {
        SyntheticRateSource::new(
            registers.clone(),
            vec!["usdt_ask".to_string(), "usdt_bid".to_string()],
        )
    }

    #[tokio::test]
    async fn test_emits_todays_rate() {
        let registers = RegisterBook::new(Arc::new(MemoryCollection::new("registers")));
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap();

        assert!(source(&registers).fetch_since("USDTUSD", None, now).await.unwrap().is_empty());

        registers.set("usdt_bid", 0.997).await.unwrap();
        let candles = source(&registers).fetch_since("USDTUSD", None, now).await.unwrap();
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].close, 0.997);
        assert_eq!(candles[0].close_time, now);
    }
}

//! Conversion of arbitrary currency amounts into the settlement currency.

use super::config::RatesConfig;
use super::price::SpotPriceProvider;
use super::registers::RegisterBook;
use crate::providers::caching::CachingSpotPriceProvider;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, instrument, warn};

const MONEY_DP: u32 = 8;

/// Rounds a monetary amount to 8 decimal places, half away from zero.
pub fn round_money(value: f64) -> f64 {
    Decimal::from_f64(value)
        .map(|d| d.round_dp_with_strategy(MONEY_DP, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|d| d.to_f64())
        .unwrap_or(value)
}

pub struct RateResolver {
    prices: Arc<dyn SpotPriceProvider>,
    registers: RegisterBook,
    config: Arc<RatesConfig>,
}

impl RateResolver {
    pub fn new(
        prices: Arc<dyn SpotPriceProvider>,
        registers: RegisterBook,
        config: RatesConfig,
    ) -> Self {
        Self {
            prices,
            registers,
            config: Arc::new(config.normalized()),
        }
    }

    /// Starts a conversion session with its own price cache.
    pub fn session(&self) -> RateSession {
        RateSession {
            prices: CachingSpotPriceProvider::new(Arc::clone(&self.prices)),
            registers: self.registers.clone(),
            config: Arc::clone(&self.config),
            stablecoin_rate: OnceCell::new(),
        }
    }

    /// One-off conversion in a fresh session.
    pub async fn convert(&self, amount: f64, currency: &str) -> f64 {
        self.session().convert(amount, currency).await
    }
}

/// Converts amounts while remembering every rate looked up along the way.
pub struct RateSession {
    prices: CachingSpotPriceProvider,
    registers: RegisterBook,
    config: Arc<RatesConfig>,
    stablecoin_rate: OnceCell<Option<f64>>,
}

impl RateSession {
    /// `amount` of `currency` expressed in the settlement currency.
    ///
    /// Falls back to the unconverted amount when no rate resolves: a fee that
    /// cannot be priced must not block recording the transaction.
    #[instrument(skip(self), fields(settlement = %self.config.settlement_currency))]
    pub async fn convert(&self, amount: f64, currency: &str) -> f64 {
        match self.usd_rate(currency).await {
            Some(rate) => round_money(amount * rate),
            None => {
                warn!(currency, "No conversion rate resolved, keeping amount unconverted");
                round_money(amount)
            }
        }
    }

    /// Like [`Self::convert`], but `None` when no rate resolves.
    pub async fn try_convert(&self, amount: f64, currency: &str) -> Option<f64> {
        self.usd_rate(currency)
            .await
            .map(|rate| round_money(amount * rate))
    }

    /// Settlement-currency value of one unit of `currency`.
    pub async fn usd_rate(&self, currency: &str) -> Option<f64> {
        let code = currency.trim().to_uppercase();
        let config = &self.config;

        if code == config.settlement_currency {
            return Some(1.0);
        }
        if code == config.stablecoin {
            return Some(self.stablecoin_factor().await);
        }

        if code == config.fee_token {
            let pair = format!("{code}{}", config.stablecoin);
            if let Some(price) = self.price(&pair).await {
                return Some(price * self.stablecoin_factor().await);
            }
        }

        for quote in &config.quote_assets {
            if *quote == code {
                continue;
            }
            if let Some(price) = self.price(&format!("{code}{quote}")).await {
                let factor = self.quote_usd_rate(quote).await;
                debug!(currency = %code, quote = %quote, price, factor, "Resolved via spot pair");
                return Some(price * factor);
            }
        }

        None
    }

    /// Stablecoin rate from the first present register of the configured chain.
    pub async fn stablecoin_rate(&self) -> Option<f64> {
        *self
            .stablecoin_rate
            .get_or_init(|| async {
                match self
                    .registers
                    .first_present(&self.config.stablecoin_rate_registers)
                    .await
                {
                    Ok(found) => found.map(|(_, rate)| rate).filter(|r| r.is_finite() && *r > 0.0),
                    Err(e) => {
                        warn!("Failed to read stablecoin rate registers: {e}");
                        None
                    }
                }
            })
            .await
    }

    /// Stablecoin rate used for compounding; par when no register is set.
    async fn stablecoin_factor(&self) -> f64 {
        self.stablecoin_rate().await.unwrap_or(1.0)
    }

    async fn quote_usd_rate(&self, quote: &str) -> f64 {
        let config = &self.config;
        if quote == config.settlement_currency {
            return 1.0;
        }
        let stable = self.stablecoin_factor().await;
        if quote == config.stablecoin {
            return stable;
        }
        // Other stablecoin variants are priced against the primary one when a
        // pair exists, otherwise treated at par with it.
        let pair = format!("{quote}{}", config.stablecoin);
        match self.price(&pair).await {
            Some(price) => price * stable,
            None => stable,
        }
    }

    async fn price(&self, pair: &str) -> Option<f64> {
        match self.prices.spot_price(pair).await {
            Ok(price) if price.is_finite() && price > 0.0 => Some(price),
            Ok(price) => {
                debug!(pair, price, "Ignoring unusable spot price");
                None
            }
            Err(e) => {
                debug!(pair, "Spot price unavailable: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryCollection;
    use anyhow::{Result, anyhow};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockSpotPrices {
        prices: HashMap<String, f64>,
        calls: Mutex<Vec<String>>,
    }

    impl MockSpotPrices {
        fn with(prices: &[(&str, f64)]) -> Self {
            Self {
                prices: prices.iter().map(|(s, p)| (s.to_string(), *p)).collect(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SpotPriceProvider for MockSpotPrices {
        async fn spot_price(&self, symbol: &str) -> Result<f64> {
            self.calls.lock().unwrap().push(symbol.to_string());
            self.prices
                .get(symbol)
                .copied()
                .ok_or_else(|| anyhow!("Invalid symbol: {}", symbol))
        }
    }

    async fn resolver(prices: Arc<MockSpotPrices>, registers: &[(&str, f64)]) -> RateResolver {
        let book = RegisterBook::new(Arc::new(MemoryCollection::new("registers")));
        for (name, value) in registers {
            book.set(name, *value).await.unwrap();
        }
        RateResolver::new(prices, book, RatesConfig::default())
    }

    #[tokio::test]
    async fn test_usd_is_identity() {
        let prices = Arc::new(MockSpotPrices::default());
        let resolver = resolver(prices.clone(), &[("usdt_ask", 1.2)]).await;

        assert_eq!(resolver.convert(100.0, "USD").await, 100.0);
        assert_eq!(resolver.convert(1.123456789, "usd").await, 1.12345679);
        assert!(prices.calls().is_empty());
    }

    #[tokio::test]
    async fn test_stablecoin_uses_first_present_register() {
        let prices = Arc::new(MockSpotPrices::default());
        let resolver = resolver(prices, &[("usdt_bid", 0.99), ("usdtAsk", 1.5)]).await;

        assert_eq!(resolver.convert(10.0, "USDT").await, 9.9);
    }

    #[tokio::test]
    async fn test_fee_token_compounds_with_stablecoin_rate() {
        let prices = Arc::new(MockSpotPrices::with(&[("BNBUSDT", 300.0)]));
        let resolver = resolver(prices, &[("usdt_ask", 0.98)]).await;

        assert_eq!(resolver.convert(0.01, "BNB").await, 2.94);
    }

    #[tokio::test]
    async fn test_quote_priority_falls_through_to_usd() {
        let prices = Arc::new(MockSpotPrices::with(&[("ETHUSD", 2000.0)]));
        let resolver = resolver(prices.clone(), &[("usdt_ask", 0.5)]).await;

        // A USD quote is not compounded with the stablecoin rate.
        assert_eq!(resolver.convert(2.0, "ETH").await, 4000.0);
        assert_eq!(prices.calls(), vec!["ETHUSDT", "ETHUSDC", "ETHFDUSD", "ETHUSD"]);
    }

    #[tokio::test]
    async fn test_stablecoin_quote_is_compounded() {
        let prices = Arc::new(MockSpotPrices::with(&[("ETHUSDT", 2000.0)]));
        let resolver = resolver(prices, &[("usdt_ask", 1.01)]).await;

        assert_eq!(resolver.convert(1.0, "ETH").await, 2020.0);
    }

    #[tokio::test]
    async fn test_unresolvable_currency_passes_through() {
        let prices = Arc::new(MockSpotPrices::default());
        let resolver = resolver(prices, &[]).await;

        assert_eq!(resolver.convert(12.5, "XYZ").await, 12.5);
        assert_eq!(resolver.session().try_convert(12.5, "XYZ").await, None);
        // No register configured, the stablecoin is taken at par.
        assert_eq!(resolver.convert(3.0, "USDT").await, 3.0);
        assert_eq!(resolver.session().try_convert(3.0, "USDT").await, Some(3.0));
    }

    #[tokio::test]
    async fn test_lowercase_rates_config_still_resolves() {
        let prices = Arc::new(MockSpotPrices::with(&[("BNBUSDT", 300.0), ("ETHUSD", 2000.0)]));
        let book = RegisterBook::new(Arc::new(MemoryCollection::new("registers")));
        book.set("usdt_ask", 0.5).await.unwrap();
        let config = RatesConfig {
            settlement_currency: "usd".to_string(),
            stablecoin: "usdt".to_string(),
            fee_token: "bnb".to_string(),
            quote_assets: vec!["usdt".to_string(), "usd".to_string()],
            ..RatesConfig::default()
        };
        let resolver = RateResolver::new(prices, book, config);

        assert_eq!(resolver.convert(10.0, "USD").await, 10.0);
        assert_eq!(resolver.convert(10.0, "USDT").await, 5.0);
        assert_eq!(resolver.convert(0.01, "bnb").await, 1.5);
        assert_eq!(resolver.convert(1.0, "ETH").await, 2000.0);
    }

    #[tokio::test]
    async fn test_session_caches_spot_lookups() {
        let prices = Arc::new(MockSpotPrices::with(&[("BNBUSDT", 250.0)]));
        let resolver = resolver(prices.clone(), &[("usdt_ask", 1.0)]).await;

        let session = resolver.session();
        assert_eq!(session.convert(0.002, "BNB").await, 0.5);
        assert_eq!(session.convert(0.004, "BNB").await, 1.0);
        assert_eq!(prices.calls(), vec!["BNBUSDT"]);

        // A new session looks the price up again.
        resolver.session().convert(1.0, "BNB").await;
        assert_eq!(prices.calls().len(), 2);
    }

    #[test]
    fn test_round_money() {
        assert_eq!(round_money(2.0 / 3.0), 0.66666667);
        assert_eq!(round_money(0.1 + 0.2), 0.3);
        assert_eq!(round_money(100.0), 100.0);
        assert_eq!(round_money(1e-9), 0.0);
    }
}

use crate::core::cache::Cache;
use crate::core::price::SpotPriceProvider;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Remembers spot prices, including failures, for as long as it lives.
///
/// One instance backs one conversion session so repeated fee conversions do
/// not query the exchange twice for the same pair.
#[derive(Clone)]
pub struct CachingSpotPriceProvider {
    inner: Arc<dyn SpotPriceProvider>,
    cache: Cache<String, Result<f64, String>>,
}

impl CachingSpotPriceProvider {
    pub fn new(inner: Arc<dyn SpotPriceProvider>) -> Self {
        Self {
            inner,
            cache: Cache::new(),
        }
    }
}

#[async_trait]
impl SpotPriceProvider for CachingSpotPriceProvider {
    async fn spot_price(&self, symbol: &str) -> Result<f64> {
        if let Some(cached) = self.cache.get(&symbol.to_string()).await {
            debug!("Cache hit for spot price: {}", symbol);
            return cached.map_err(|e| anyhow!(e));
        }
        debug!("Cache miss for spot price: {}", symbol);
        let result = self.inner.spot_price(symbol).await;
        self.cache
            .put(
                symbol.to_string(),
                result.as_ref().copied().map_err(|e| e.to_string()),
            )
            .await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockInnerProvider {
        call_count: AtomicUsize,
    }

    #[async_trait]
    impl SpotPriceProvider for MockInnerProvider {
        async fn spot_price(&self, symbol: &str) -> Result<f64> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            if symbol == "BNBUSDT" {
                Ok(300.0)
            } else {
                Err(anyhow!("Invalid symbol."))
            }
        }
    }

    #[tokio::test]
    async fn test_caching_spot_price_provider() {
        let inner = Arc::new(MockInnerProvider {
            call_count: AtomicUsize::new(0),
        });
        let caching = CachingSpotPriceProvider::new(inner.clone());

        assert_eq!(caching.spot_price("BNBUSDT").await.unwrap(), 300.0);
        assert_eq!(inner.call_count.load(Ordering::SeqCst), 1);

        assert_eq!(caching.spot_price("BNBUSDT").await.unwrap(), 300.0);
        assert_eq!(inner.call_count.load(Ordering::SeqCst), 1);

        // Failures are remembered too.
        assert!(caching.spot_price("XYZUSDT").await.is_err());
        let err = caching.spot_price("XYZUSDT").await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid symbol.");
        assert_eq!(inner.call_count.load(Ordering::SeqCst), 2);
    }
}

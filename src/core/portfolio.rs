//! Holding registration and maintenance.

use super::balances::{BalanceAggregator, SubLedgerSource, value_balances};
use super::error::{ServiceError, ServiceResult, ensure_finite};
use super::models::{Asset, AssetType, CandleSeries, CapitalAllocation, Exchange, Transaction};
use super::rates::RateResolver;
use super::rebalance::Rebalancer;
use super::registers::RegisterBook;
use super::store::Collection;
use super::sync::CandleSynchronizer;
use crate::store::Database;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone)]
pub struct NewAsset {
    pub symbol: String,
    pub exchange_id: String,
    pub asset_type: AssetType,
    /// Only used for fiat holdings; others start from the seed capital.
    pub capital_allocation: Option<f64>,
    pub max_price_window: Option<f64>,
    pub min_price_window: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeleteSummary {
    pub candle_series: usize,
    pub transactions: usize,
}

fn validate_bounds(max: Option<f64>, min: Option<f64>) -> ServiceResult<()> {
    if let Some(max) = max {
        ensure_finite("max_price_window", max)?;
    }
    if let Some(min) = min {
        ensure_finite("min_price_window", min)?;
    }
    if let (Some(max), Some(min)) = (max, min) {
        if min > max {
            return Err(ServiceError::InvalidInput(format!(
                "min_price_window {min} exceeds max_price_window {max}"
            )));
        }
    }
    Ok(())
}

pub struct Portfolio {
    assets: Arc<dyn Collection<Asset>>,
    candles: Arc<dyn Collection<CandleSeries>>,
    exchanges: Arc<dyn Collection<Exchange>>,
    transactions: Arc<dyn Collection<Transaction>>,
    ledger: Arc<dyn SubLedgerSource>,
    rates: Arc<RateResolver>,
    registers: RegisterBook,
    rebalancer: Rebalancer,
    synchronizer: Arc<CandleSynchronizer>,
    usd_total_register: String,
    fiat_total_register: String,
}

impl Portfolio {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: &Database,
        ledger: Arc<dyn SubLedgerSource>,
        rates: Arc<RateResolver>,
        registers: RegisterBook,
        rebalancer: Rebalancer,
        synchronizer: Arc<CandleSynchronizer>,
        usd_total_register: &str,
        fiat_total_register: &str,
    ) -> Self {
        Self {
            assets: Arc::clone(&db.assets),
            candles: Arc::clone(&db.candles),
            exchanges: Arc::clone(&db.exchanges),
            transactions: Arc::clone(&db.transactions),
            ledger,
            rates,
            registers,
            rebalancer,
            synchronizer,
            usd_total_register: usd_total_register.to_string(),
            fiat_total_register: fiat_total_register.to_string(),
        }
    }

    /// Creates the exchange if it is not stored yet.
    pub async fn ensure_exchange(&self, id: &str, name: &str) -> ServiceResult<Exchange> {
        if let Some(existing) = self.exchanges.find_by_id(id).await? {
            return Ok(existing);
        }
        let exchange = Exchange {
            id: id.to_string(),
            name: name.to_string(),
        };
        Ok(self.exchanges.insert(exchange).await?)
    }

    /// Settlement-currency value of everything held on the exchange.
    pub async fn current_balance(&self) -> ServiceResult<f64> {
        Ok(self.observed_balance().await?.unwrap_or(0.0))
    }

    /// Current balance, or `None` when no sub-ledger could be read.
    async fn observed_balance(&self) -> ServiceResult<Option<f64>> {
        let snapshot = BalanceAggregator::new(self.ledger.as_ref()).snapshot().await;
        if snapshot.is_unavailable() {
            return Ok(None);
        }
        let report = value_balances(
            &snapshot.balances,
            &self.rates.session(),
            &self.registers,
            &self.usd_total_register,
            &self.fiat_total_register,
        )
        .await?;
        Ok(Some(report.valued_total))
    }

    /// Registers a holding, seeds its capital, rebalances the others and
    /// runs a first sync.
    ///
    /// Sync failures are logged; the holding stays registered with whatever
    /// history could be fetched.
    #[instrument(skip(self, new), fields(symbol = %new.symbol))]
    pub async fn register_asset(&self, new: NewAsset) -> ServiceResult<Asset> {
        let symbol = new.symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return Err(ServiceError::InvalidInput("symbol must not be empty".to_string()));
        }
        if let Some(allocation) = new.capital_allocation {
            ensure_finite("capital_allocation", allocation)?;
        }
        validate_bounds(new.max_price_window, new.min_price_window)?;

        if self.exchanges.find_by_id(&new.exchange_id).await?.is_none() {
            return Err(ServiceError::NotFound(format!("Exchange {}", new.exchange_id)));
        }
        let duplicate = self
            .assets
            .find(&|a: &Asset| a.symbol == symbol && a.exchange_id == new.exchange_id)
            .await?;
        if !duplicate.is_empty() {
            return Err(ServiceError::InvalidInput(format!("{symbol} is already registered")));
        }

        let capital = match new.asset_type {
            AssetType::Fiat => new.capital_allocation.unwrap_or(0.0),
            _ => self.rebalancer.seed_capital(),
        };
        let asset = Asset {
            id: uuid::Uuid::new_v4().to_string(),
            symbol,
            exchange_id: new.exchange_id,
            asset_type: new.asset_type,
            capital_allocation: CapitalAllocation::Scalar(capital),
            max_price_window: new.max_price_window,
            min_price_window: new.min_price_window,
            trend_estimate: None,
        };
        let asset = self.assets.insert(asset).await?;
        self.candles.insert(CandleSeries::empty(&asset.id)).await?;
        info!(id = %asset.id, capital, "Registered holding");

        if !asset.is_fiat() {
            match self.observed_balance().await? {
                Some(balance) => {
                    self.rebalancer.rebalance(&asset.id, balance).await?;
                }
                None => warn!("Exchange balances unavailable, existing allocations left unchanged"),
            }
        }

        match self.synchronizer.sync(&asset).await {
            Ok(count) => info!(count, "Fetched initial history"),
            Err(e) => warn!("Initial history sync failed: {e}"),
        }

        self.get_asset(&asset.id).await
    }

    pub async fn get_asset(&self, id: &str) -> ServiceResult<Asset> {
        self.assets
            .find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Asset {id}")))
    }

    pub async fn find_by_symbol(&self, symbol: &str) -> ServiceResult<Asset> {
        let symbol = symbol.trim().to_uppercase();
        self.assets
            .find(&|a: &Asset| a.symbol == symbol)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ServiceError::NotFound(format!("Asset {symbol}")))
    }

    pub async fn list_assets(&self) -> ServiceResult<Vec<Asset>> {
        let mut assets = self.assets.all().await?;
        assets.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(assets)
    }

    /// Overrides the stored price window bounds.
    pub async fn update_bounds(&self, id: &str, max: Option<f64>, min: Option<f64>) -> ServiceResult<Asset> {
        validate_bounds(max, min)?;
        let current = self.get_asset(id).await?;
        // A single new bound must still be consistent with the stored one.
        validate_bounds(
            max.or(current.max_price_window),
            min.or(current.min_price_window),
        )?;

        self.assets
            .update(
                id,
                &|a| {
                    if max.is_some() {
                        a.max_price_window = max;
                    }
                    if min.is_some() {
                        a.min_price_window = min;
                    }
                },
                None,
            )
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Asset {id}")))
    }

    /// Removes a holding together with its history and transactions.
    pub async fn delete_asset(&self, id: &str) -> ServiceResult<DeleteSummary> {
        if !self.assets.delete(id).await? {
            return Err(ServiceError::NotFound(format!("Asset {id}")));
        }
        let summary = DeleteSummary {
            candle_series: self.candles.delete_many(&|s: &CandleSeries| s.id == id).await?,
            transactions: self
                .transactions
                .delete_many(&|t: &Transaction| t.asset_id == id)
                .await?,
        };
        info!(id, ?summary, "Deleted holding");
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::balances::AssetAmount;
    use crate::core::clock::FixedClock;
    use crate::core::config::{RatesConfig, ValuationConfig};
    use crate::core::models::{Candle, Side, TransactionStatus};
    use crate::core::price::{CandleSource, SpotPriceProvider};
    use crate::core::sync::CandleSources;
    use anyhow::{Result, anyhow};
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 10, 0, 0).unwrap()
    }

    struct Ledger(Vec<AssetAmount>);

    #[async_trait]
    impl SubLedgerSource for Ledger {
        async fn spot_balances(&self) -> Result<Vec<AssetAmount>> {
            Ok(self.0.clone())
        }

        async fn flexible_positions(&self, _page: u32, _size: u32) -> Result<Vec<AssetAmount>> {
            Ok(Vec::new())
        }

        async fn locked_positions(&self, _page: u32, _size: u32) -> Result<Vec<AssetAmount>> {
            Ok(Vec::new())
        }
    }

    struct DownLedger;

    #[async_trait]
    impl SubLedgerSource for DownLedger {
        async fn spot_balances(&self) -> Result<Vec<AssetAmount>> {
            Err(anyhow!("HTTP error: 503 Service Unavailable"))
        }

        async fn flexible_positions(&self, _page: u32, _size: u32) -> Result<Vec<AssetAmount>> {
            Err(anyhow!("HTTP error: 503 Service Unavailable"))
        }

        async fn locked_positions(&self, _page: u32, _size: u32) -> Result<Vec<AssetAmount>> {
            Err(anyhow!("HTTP error: 503 Service Unavailable"))
        }
    }

    struct NoPrices;

    #[async_trait]
    impl SpotPriceProvider for NoPrices {
        async fn spot_price(&self, symbol: &str) -> Result<f64> {
            Err(anyhow!("Invalid symbol: {symbol}"))
        }
    }

    struct ThreeDays;

    #[async_trait]
    impl CandleSource for ThreeDays {
        async fn fetch_since(
            &self,
            _symbol: &str,
            _cursor: Option<DateTime<Utc>>,
            now: DateTime<Utc>,
        ) -> Result<Vec<Candle>> {
            Ok((1..=3)
                .rev()
                .map(|d| Candle {
                    close_time: now - Duration::days(d),
                    close: 10.0 * d as f64,
                    high: None,
                    low: None,
                })
                .collect())
        }
    }

    async fn portfolio(db: &Database, balance_usd: f64) -> Portfolio {
        let ledger = Ledger(vec![AssetAmount::new("USD", balance_usd)]);
        portfolio_with_ledger(db, Arc::new(ledger)).await
    }

    async fn portfolio_with_ledger(db: &Database, ledger: Arc<dyn SubLedgerSource>) -> Portfolio {
        let registers = RegisterBook::new(Arc::clone(&db.registers));
        let rates = Arc::new(RateResolver::new(
            Arc::new(NoPrices),
            registers.clone(),
            RatesConfig::default(),
        ));
        let source: Arc<dyn CandleSource> = Arc::new(ThreeDays);
        let synchronizer = CandleSynchronizer::new(
            db,
            CandleSources {
                crypto: Arc::clone(&source),
                equity: Arc::clone(&source),
                fx: Arc::clone(&source),
                synthetic: source,
            },
            Arc::new(FixedClock::new(now())),
            &ValuationConfig::default(),
        );
        let rebalancer = Rebalancer::new(Arc::clone(&db.assets), registers.clone(), 200.0, "current_balance");
        let portfolio = Portfolio::new(
            db,
            ledger,
            rates,
            registers,
            rebalancer,
            Arc::new(synchronizer),
            "total_usd",
            "total_fiat",
        );
        portfolio.ensure_exchange("binance", "Binance").await.unwrap();
        portfolio
    }

    fn new_asset(symbol: &str, asset_type: AssetType) -> NewAsset {
        NewAsset {
            symbol: symbol.to_string(),
            exchange_id: "binance".to_string(),
            asset_type,
            capital_allocation: None,
            max_price_window: None,
            min_price_window: None,
        }
    }

    #[tokio::test]
    async fn test_register_seeds_rebalances_and_syncs() {
        let db = Database::in_memory();
        let portfolio = portfolio(&db, 500.0).await;

        let first = portfolio.register_asset(new_asset("btcusdt", AssetType::Crypto)).await.unwrap();
        assert_eq!(first.symbol, "BTCUSDT");
        assert_eq!(first.capital_allocation.amount(), 200.0);
        let series = db.candles.find_by_id(&first.id).await.unwrap().unwrap();
        assert_eq!(series.candles.len(), 3);
        assert!(first.trend_estimate.is_some());

        // 500 observed, 200 allocated, 200 seeded: 100 spread over one holding.
        let second = portfolio.register_asset(new_asset("ETHUSDT", AssetType::Crypto)).await.unwrap();
        assert_eq!(second.capital_allocation.amount(), 200.0);
        let first = portfolio.get_asset(&first.id).await.unwrap();
        assert_eq!(first.capital_allocation.amount(), 300.0);

        let registers = RegisterBook::new(Arc::clone(&db.registers));
        assert_eq!(registers.get("current_balance").await.unwrap(), Some(500.0));
    }

    #[tokio::test]
    async fn test_register_during_exchange_outage_keeps_allocations() {
        let db = Database::in_memory();
        let btc = portfolio(&db, 500.0)
            .await
            .register_asset(new_asset("BTCUSDT", AssetType::Crypto))
            .await
            .unwrap();
        assert_eq!(btc.capital_allocation.amount(), 200.0);

        let down = portfolio_with_ledger(&db, Arc::new(DownLedger)).await;
        let eth = down.register_asset(new_asset("ETHUSDT", AssetType::Crypto)).await.unwrap();
        assert_eq!(eth.capital_allocation.amount(), 200.0);

        assert_eq!(down.get_asset(&btc.id).await.unwrap().capital_allocation.amount(), 200.0);
        let registers = RegisterBook::new(Arc::clone(&db.registers));
        assert_eq!(registers.get("current_balance").await.unwrap(), Some(500.0));
        assert_eq!(down.current_balance().await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_fiat_keeps_given_allocation() {
        let db = Database::in_memory();
        let portfolio = portfolio(&db, 500.0).await;
        let btc = portfolio.register_asset(new_asset("BTCUSDT", AssetType::Crypto)).await.unwrap();

        let eur = portfolio
            .register_asset(NewAsset {
                capital_allocation: Some(1000.0),
                ..new_asset("EURUSD", AssetType::Fiat)
            })
            .await
            .unwrap();
        assert_eq!(eur.capital_allocation.amount(), 1000.0);
        // No rebalance for fiat holdings.
        assert_eq!(portfolio.get_asset(&btc.id).await.unwrap().capital_allocation.amount(), 200.0);
    }

    #[tokio::test]
    async fn test_register_validates_before_writing() {
        let db = Database::in_memory();
        let portfolio = portfolio(&db, 500.0).await;

        let err = portfolio.register_asset(new_asset("  ", AssetType::Crypto)).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));

        let err = portfolio
            .register_asset(NewAsset {
                max_price_window: Some(10.0),
                min_price_window: Some(20.0),
                ..new_asset("BTCUSDT", AssetType::Crypto)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));

        let err = portfolio
            .register_asset(NewAsset {
                exchange_id: "kraken".to_string(),
                ..new_asset("BTCUSDT", AssetType::Crypto)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));

        assert!(portfolio.list_assets().await.unwrap().is_empty());
        assert!(db.candles.all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_bounds_keeps_min_below_max() {
        let db = Database::in_memory();
        let portfolio = portfolio(&db, 500.0).await;
        let asset = portfolio.register_asset(new_asset("BTCUSDT", AssetType::Crypto)).await.unwrap();

        let updated = portfolio.update_bounds(&asset.id, Some(100.0), Some(50.0)).await.unwrap();
        assert_eq!(updated.max_price_window, Some(100.0));
        assert_eq!(updated.min_price_window, Some(50.0));

        let err = portfolio.update_bounds(&asset.id, Some(40.0), None).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
        let err = portfolio.update_bounds(&asset.id, Some(f64::NAN), None).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
        let err = portfolio.update_bounds("missing", Some(1.0), None).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let db = Database::in_memory();
        let portfolio = portfolio(&db, 500.0).await;
        let btc = portfolio.register_asset(new_asset("BTCUSDT", AssetType::Crypto)).await.unwrap();
        let eth = portfolio.register_asset(new_asset("ETHUSDT", AssetType::Crypto)).await.unwrap();

        for (id, asset_id) in [("t1", &btc.id), ("t2", &btc.id), ("t3", &eth.id)] {
            db.transactions
                .insert(Transaction {
                    id: id.to_string(),
                    asset_id: asset_id.clone(),
                    side: Side::Long,
                    status: TransactionStatus::Open,
                    open_price: 1.0,
                    amount: 1.0,
                    open_value_fiat: 1.0,
                    open_fee: 0.0,
                    opened_at: now(),
                    close_price: None,
                    close_value_fiat: None,
                    close_fee: None,
                    profit_percent: None,
                    profit_total_fiat: None,
                    closed_at: None,
                })
                .await
                .unwrap();
        }

        let summary = portfolio.delete_asset(&btc.id).await.unwrap();
        assert_eq!(
            summary,
            DeleteSummary {
                candle_series: 1,
                transactions: 2
            }
        );
        assert_eq!(db.transactions.all().await.unwrap().len(), 1);
        assert!(db.candles.find_by_id(&eth.id).await.unwrap().is_some());

        let err = portfolio.delete_asset(&btc.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }
}

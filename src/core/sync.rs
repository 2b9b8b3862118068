//! Incremental daily history synchronization.

use super::clock::Clock;
use super::config::ValuationConfig;
use super::error::{ServiceError, ServiceResult};
use super::locks::KeyedLocks;
use super::models::{Asset, AssetType, Candle, CandleSeries};
use super::price::CandleSource;
use super::stats::{self, PriceBounds};
use super::store::Collection;
use crate::store::Database;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// One fetch strategy per instrument classification.
#[derive(Clone)]
pub struct CandleSources {
    pub crypto: Arc<dyn CandleSource>,
    pub equity: Arc<dyn CandleSource>,
    pub fx: Arc<dyn CandleSource>,
    /// Computed rate pair, re-evaluated for the current day on every sync.
    pub synthetic: Arc<dyn CandleSource>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MergeOutcome {
    pub appended: usize,
    pub reopened: bool,
}

impl MergeOutcome {
    pub fn changed(&self) -> bool {
        self.appended > 0 || self.reopened
    }
}

/// Appends `incoming` to `existing` keeping one candle per calendar day with
/// strictly increasing close times.
///
/// Rows closing after `now`, non-finite rows and rows not after the current
/// tail are dropped. With `reopen_today`, a row on the same calendar day as
/// the tail replaces the tail instead of being dropped.
pub fn merge_candles(
    existing: &mut Vec<Candle>,
    mut incoming: Vec<Candle>,
    now: DateTime<Utc>,
    reopen_today: bool,
) -> MergeOutcome {
    incoming.sort_by_key(|c| c.close_time);
    let mut outcome = MergeOutcome::default();

    for candle in incoming {
        if candle.close_time > now || !candle.close.is_finite() {
            continue;
        }
        match existing.last_mut() {
            Some(tail) if candle.day() == tail.day() => {
                if reopen_today && candle.close_time >= tail.close_time && candle.day() == now.date_naive() {
                    *tail = candle;
                    outcome.reopened = true;
                }
            }
            Some(tail) if candle.close_time <= tail.close_time || candle.day() < tail.day() => {}
            _ => {
                existing.push(candle);
                outcome.appended += 1;
            }
        }
    }
    outcome
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    pub asset_id: String,
    pub symbol: String,
    pub result: Result<usize, String>,
    /// The failure was transient and the next run may succeed.
    pub retryable: bool,
}

pub struct CandleSynchronizer {
    assets: Arc<dyn Collection<Asset>>,
    series: Arc<dyn Collection<CandleSeries>>,
    sources: CandleSources,
    clock: Arc<dyn Clock>,
    lookback_years: u32,
    synthetic_symbol: String,
    locks: KeyedLocks,
}

impl CandleSynchronizer {
    pub fn new(
        db: &Database,
        sources: CandleSources,
        clock: Arc<dyn Clock>,
        config: &ValuationConfig,
    ) -> Self {
        Self {
            assets: Arc::clone(&db.assets),
            series: Arc::clone(&db.candles),
            sources,
            clock,
            lookback_years: config.lookback_years,
            synthetic_symbol: config.synthetic_symbol.clone(),
            locks: KeyedLocks::new(),
        }
    }

    fn is_synthetic(&self, asset: &Asset) -> bool {
        asset.symbol.eq_ignore_ascii_case(&self.synthetic_symbol)
    }

    fn source_for(&self, asset: &Asset) -> &dyn CandleSource {
        if self.is_synthetic(asset) {
            return self.sources.synthetic.as_ref();
        }
        match asset.asset_type {
            AssetType::Crypto => self.sources.crypto.as_ref(),
            AssetType::Stock => self.sources.equity.as_ref(),
            AssetType::Fiat => self.sources.fx.as_ref(),
        }
    }

    /// Brings the stored history of `asset` up to date and returns the number
    /// of candles appended.
    ///
    /// A second call within the same UTC day is a no-op. Upstream failures
    /// other than timeouts count as "no new data".
    #[instrument(skip(self, asset), fields(symbol = %asset.symbol))]
    pub async fn sync(&self, asset: &Asset) -> ServiceResult<usize> {
        let _guard = self.locks.lock(&asset.id).await;

        let series = self
            .series
            .find_by_id(&asset.id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Price history for {}", asset.symbol)))?;

        let now = self.clock.now();
        let last_close = series.last_close();
        let synthetic = self.is_synthetic(asset);

        if !synthetic {
            if let Some(last) = last_close {
                if last >= self.clock.last_completed_day() {
                    debug!(%last, "History is up to date");
                    return Ok(0);
                }
            }
        }

        let fetched = match self
            .source_for(asset)
            .fetch_since(&asset.symbol, last_close, now)
            .await
        {
            Ok(rows) => rows,
            Err(e) => match e.downcast::<ServiceError>() {
                Ok(ServiceError::Timeout(msg)) => return Err(ServiceError::Timeout(msg)),
                Ok(other) => {
                    warn!("History fetch failed: {other}");
                    return Ok(0);
                }
                Err(e) => {
                    warn!("History fetch failed: {e:#}");
                    return Ok(0);
                }
            },
        };
        debug!(fetched = fetched.len(), "Fetched candles");

        let mut candles = series.candles;
        let outcome = merge_candles(&mut candles, fetched, now, synthetic);
        if !outcome.changed() {
            return Ok(0);
        }

        let merged = candles.clone();
        self.series
            .update(&asset.id, &|s| s.candles = merged.clone(), None)
            .await?;
        info!(appended = outcome.appended, total = candles.len(), "Stored candles");

        self.refresh_statistics(asset, &candles, now).await?;
        Ok(outcome.appended)
    }

    /// Persists bounds once the history covers the full lookback window, and
    /// the trend whenever it can be computed.
    async fn refresh_statistics(
        &self,
        asset: &Asset,
        candles: &[Candle],
        now: DateTime<Utc>,
    ) -> ServiceResult<()> {
        let window_covered = candles
            .first()
            .is_some_and(|oldest| now - oldest.close_time >= stats::window(self.lookback_years));

        let bounds = if window_covered {
            match stats::stats(candles, self.lookback_years, now) {
                PriceBounds {
                    high: Some(high),
                    low: Some(low),
                } if low <= high => Some((high, low)),
                _ => None,
            }
        } else {
            debug!("History shorter than lookback window, keeping stored bounds");
            None
        };

        let trend = match stats::trend(candles) {
            Ok(trend) => Some(trend),
            Err(e) => {
                debug!("Trend not updated: {e}");
                None
            }
        };

        if bounds.is_none() && trend.is_none() {
            return Ok(());
        }

        self.assets
            .update(
                &asset.id,
                &|a| {
                    if let Some((high, low)) = bounds {
                        a.max_price_window = Some(high);
                        a.min_price_window = Some(low);
                    }
                    if trend.is_some() {
                        a.trend_estimate = trend;
                    }
                },
                None,
            )
            .await?;
        Ok(())
    }

    /// Syncs every stored asset; one failure does not stop the others.
    ///
    /// `on_done` is called once per asset as its sync finishes.
    pub async fn sync_all(&self, on_done: &(dyn Fn() + Send + Sync)) -> ServiceResult<Vec<SyncOutcome>> {
        let assets = self.assets.all().await?;
        let futures = assets.iter().map(|asset| async move {
            let result = self.sync(asset).await;
            on_done();
            SyncOutcome {
                asset_id: asset.id.clone(),
                symbol: asset.symbol.clone(),
                retryable: result.as_ref().is_err_and(ServiceError::is_retryable),
                result: result.map_err(|e| e.to_string()),
            }
        });
        Ok(join_all(futures).await)
    }
}

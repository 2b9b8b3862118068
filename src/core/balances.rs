//! Reconciled balances across the spot, flexible-yield and locked-yield
//! sub-ledgers.

use super::rates::{RateSession, round_money};
use super::registers::RegisterBook;
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, instrument, warn};

/// Largest page the yield endpoints accept.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Guard against a source that never returns a short page.
const MAX_PAGES: u32 = 1000;

/// Prefix of yield-wrapped token representations in spot balances.
pub const YIELD_WRAPPED_PREFIX: &str = "LD";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetAmount {
    pub asset: String,
    pub amount: f64,
}

impl AssetAmount {
    pub fn new(asset: &str, amount: f64) -> Self {
        Self {
            asset: asset.to_string(),
            amount,
        }
    }
}

/// The three independent balance queries of one exchange account.
#[async_trait]
pub trait SubLedgerSource: Send + Sync {
    async fn spot_balances(&self) -> Result<Vec<AssetAmount>>;

    /// One page (1-based) of flexible-yield positions.
    async fn flexible_positions(&self, page: u32, size: u32) -> Result<Vec<AssetAmount>>;

    /// One page (1-based) of locked-yield positions.
    async fn locked_positions(&self, page: u32, size: u32) -> Result<Vec<AssetAmount>>;
}

#[derive(Debug, Clone, Serialize)]
pub struct ValuedBalance {
    pub asset: String,
    pub amount: f64,
    /// `None` when no conversion rate resolved for the asset.
    pub usd_value: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BalanceReport {
    pub balances: Vec<ValuedBalance>,
    /// Sum of the priced valuations above; unpriced rows are left out.
    pub valued_total: f64,
    /// Previously recorded USD running total, carried as-is.
    pub usd_total: Option<f64>,
    /// Previously recorded secondary-fiat running total, carried as-is.
    pub fiat_total: Option<f64>,
}

impl BalanceReport {
    pub fn unpriced(&self) -> impl Iterator<Item = &ValuedBalance> {
        self.balances.iter().filter(|b| b.usd_value.is_none())
    }
}

/// Number of independent queries behind one aggregation.
pub const SUB_LEDGERS: usize = 3;

/// Aggregated balances plus how many sub-ledgers could not be read.
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceSnapshot {
    pub balances: Vec<AssetAmount>,
    pub failed_sources: usize,
}

impl BalanceSnapshot {
    /// True when no sub-ledger answered, so the balances say nothing about
    /// the account.
    pub fn is_unavailable(&self) -> bool {
        self.failed_sources >= SUB_LEDGERS
    }
}

pub struct BalanceAggregator<'a> {
    source: &'a dyn SubLedgerSource,
    page_size: u32,
}

impl<'a> BalanceAggregator<'a> {
    pub fn new(source: &'a dyn SubLedgerSource) -> Self {
        Self {
            source,
            page_size: MAX_PAGE_SIZE,
        }
    }

    /// Page size for the yield sources, clamped to what the exchange allows.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        self
    }

    /// Per-asset totals across all sub-ledgers, sorted by asset code.
    ///
    /// A failing sub-ledger contributes nothing instead of failing the whole
    /// aggregation.
    pub async fn get_all_balances(&self) -> Vec<AssetAmount> {
        self.snapshot().await.balances
    }

    /// Same totals as [`Self::get_all_balances`], with the failed sub-ledgers
    /// counted for callers that must not act on an empty view.
    #[instrument(skip(self))]
    pub async fn snapshot(&self) -> BalanceSnapshot {
        let (spot, flexible, locked) = futures::join!(
            self.spot(),
            self.paged("flexible", |page, size| self.source.flexible_positions(page, size)),
            self.paged("locked", |page, size| self.source.locked_positions(page, size)),
        );

        let failed_sources = [&spot, &flexible, &locked]
            .iter()
            .filter(|rows| rows.is_none())
            .count();
        let mut merged: BTreeMap<String, f64> = BTreeMap::new();
        for entry in spot
            .into_iter()
            .flatten()
            .chain(flexible.into_iter().flatten())
            .chain(locked.into_iter().flatten())
        {
            *merged.entry(entry.asset).or_insert(0.0) += entry.amount;
        }
        let balances = merged
            .into_iter()
            .map(|(asset, amount)| AssetAmount {
                asset,
                amount: round_money(amount),
            })
            .collect();

        BalanceSnapshot {
            balances,
            failed_sources,
        }
    }

    async fn spot(&self) -> Option<Vec<AssetAmount>> {
        match self.source.spot_balances().await {
            Ok(rows) => Some(
                rows.into_iter()
                    .filter(|b| b.amount > 0.0 && !b.asset.starts_with(YIELD_WRAPPED_PREFIX))
                    .collect(),
            ),
            Err(e) => {
                warn!("Spot balances unavailable: {e}");
                None
            }
        }
    }

    async fn paged<F, Fut>(&self, ledger: &str, fetch: F) -> Option<Vec<AssetAmount>>
    where
        F: Fn(u32, u32) -> Fut,
        Fut: std::future::Future<Output = Result<Vec<AssetAmount>>>,
    {
        let mut rows = Vec::new();
        let mut page = 1;
        loop {
            match fetch(page, self.page_size).await {
                Ok(batch) => {
                    let count = batch.len();
                    debug!(ledger, page, count, "Fetched position page");
                    rows.extend(batch.into_iter().filter(|b| b.amount > 0.0));
                    if count < self.page_size as usize {
                        break;
                    }
                    if page >= MAX_PAGES {
                        warn!(ledger, page, "Stopping pagination at page limit");
                        break;
                    }
                    page += 1;
                }
                Err(e) => {
                    warn!(ledger, page, "Positions unavailable: {e}");
                    return None;
                }
            }
        }
        Some(rows)
    }
}

/// Values each balance in the settlement currency and attaches the running
/// totals recorded in the registers.
pub async fn value_balances(
    balances: &[AssetAmount],
    session: &RateSession,
    registers: &RegisterBook,
    usd_total_register: &str,
    fiat_total_register: &str,
) -> Result<BalanceReport> {
    let mut valued = Vec::with_capacity(balances.len());
    for balance in balances {
        let usd_value = session.try_convert(balance.amount, &balance.asset).await;
        if usd_value.is_none() {
            warn!(asset = %balance.asset, "Balance left out of the valued total");
        }
        valued.push(ValuedBalance {
            asset: balance.asset.clone(),
            amount: balance.amount,
            usd_value,
        });
    }
    let valued_total = round_money(valued.iter().filter_map(|b| b.usd_value).sum());

    Ok(BalanceReport {
        balances: valued,
        valued_total,
        usd_total: registers.get(usd_total_register).await?,
        fiat_total: registers.get(fiat_total_register).await?,
    })
}

//! Redistribution of capital when a new holding joins the portfolio.

use super::error::{ServiceResult, ensure_finite};
use super::models::Asset;
use super::rates::round_money;
use super::registers::RegisterBook;
use super::store::Collection;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RebalancePlan {
    /// Amount added to every existing holding; `None` when there were none.
    pub adjustment: Option<f64>,
    /// New allocation per existing holding id.
    pub allocations: Vec<(String, f64)>,
    /// Allocation of the newly registered holding.
    pub seed: f64,
}

impl RebalancePlan {
    pub fn total(&self) -> f64 {
        round_money(self.allocations.iter().map(|(_, a)| a).sum::<f64>() + self.seed)
    }
}

/// Computes how `current_balance` is split once a holding seeded with
/// `seed_capital` is added next to `existing`.
///
/// The adjustment may be negative when the balance does not cover the seed.
pub fn plan(existing: &[Asset], current_balance: f64, seed_capital: f64) -> RebalancePlan {
    if existing.is_empty() {
        return RebalancePlan {
            adjustment: None,
            allocations: Vec::new(),
            seed: seed_capital,
        };
    }

    let allocated: f64 = existing.iter().map(|a| a.capital_allocation.amount()).sum();
    let adjustment = round_money(((current_balance - allocated) - seed_capital) / existing.len() as f64);
    RebalancePlan {
        adjustment: Some(adjustment),
        allocations: existing
            .iter()
            .map(|a| (a.id.clone(), round_money(a.capital_allocation.amount() + adjustment)))
            .collect(),
        seed: seed_capital,
    }
}

pub struct Rebalancer {
    assets: Arc<dyn Collection<Asset>>,
    registers: RegisterBook,
    seed_capital: f64,
    balance_register: String,
}

impl Rebalancer {
    pub fn new(
        assets: Arc<dyn Collection<Asset>>,
        registers: RegisterBook,
        seed_capital: f64,
        balance_register: &str,
    ) -> Self {
        Self {
            assets,
            registers,
            seed_capital,
            balance_register: balance_register.to_string(),
        }
    }

    pub fn seed_capital(&self) -> f64 {
        self.seed_capital
    }

    /// Spreads the unallocated balance over every non-fiat holding other than
    /// `new_asset_id` and records the observed balance.
    pub async fn rebalance(&self, new_asset_id: &str, current_balance: f64) -> ServiceResult<RebalancePlan> {
        let current_balance = ensure_finite("current balance", current_balance)?;
        let existing = self
            .assets
            .find(&|a: &Asset| !a.is_fiat() && a.id != new_asset_id)
            .await?;

        let plan = plan(&existing, current_balance, self.seed_capital);
        if let Some(adjustment) = plan.adjustment {
            for asset in &existing {
                let updated = self
                    .assets
                    .update(&asset.id, &|a| a.capital_allocation.adjust(adjustment), None)
                    .await?;
                if updated.is_none() {
                    warn!(asset = %asset.symbol, "Holding disappeared during rebalance");
                }
            }
            info!(adjustment, holdings = existing.len(), "Rebalanced capital allocations");
        }

        self.registers
            .set(&self.balance_register, current_balance)
            .await?;
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::{AssetType, CapitalAllocation};
    use crate::store::memory::MemoryCollection;

    fn holding(id: &str, asset_type: AssetType, allocation: CapitalAllocation) -> Asset {
        Asset {
            id: id.to_string(),
            symbol: format!("{}USDT", id.to_uppercase()),
            exchange_id: "binance".to_string(),
            asset_type,
            capital_allocation: allocation,
            max_price_window: None,
            min_price_window: None,
            trend_estimate: None,
        }
    }

    #[test]
    fn test_plan_spreads_unallocated_balance() {
        let existing = vec![
            holding("btc", AssetType::Crypto, CapitalAllocation::Scalar(50.0)),
            holding("eth", AssetType::Crypto, CapitalAllocation::Scalar(30.0)),
        ];

        let plan = plan(&existing, 500.0, 200.0);
        assert_eq!(plan.adjustment, Some(110.0));
        assert_eq!(
            plan.allocations,
            vec![("btc".to_string(), 160.0), ("eth".to_string(), 140.0)]
        );
        assert_eq!(plan.seed, 200.0);
        assert_eq!(plan.total(), 500.0);
    }

    #[test]
    fn test_plan_without_holdings_only_seeds() {
        let plan = plan(&[], 500.0, 200.0);
        assert_eq!(plan.adjustment, None);
        assert!(plan.allocations.is_empty());
        assert_eq!(plan.seed, 200.0);
    }

    #[test]
    fn test_plan_can_shrink_allocations() {
        let existing = vec![holding("btc", AssetType::Crypto, CapitalAllocation::Scalar(100.0))];
        let plan = plan(&existing, 150.0, 200.0);
        assert_eq!(plan.adjustment, Some(-150.0));
        assert_eq!(plan.allocations[0].1, -50.0);
    }

    #[tokio::test]
    async fn test_rebalance_updates_holdings_and_register() {
        let assets: Arc<dyn Collection<Asset>> = Arc::new(MemoryCollection::new("assets"));
        for asset in [
            holding("btc", AssetType::Crypto, CapitalAllocation::Scalar(50.0)),
            holding("eth", AssetType::Stock, CapitalAllocation::structured("USD", 30.0)),
            holding("eur", AssetType::Fiat, CapitalAllocation::Scalar(1000.0)),
            holding("sol", AssetType::Crypto, CapitalAllocation::Scalar(200.0)),
        ] {
            assets.insert(asset).await.unwrap();
        }
        let registers = RegisterBook::new(Arc::new(MemoryCollection::new("registers")));
        let rebalancer = Rebalancer::new(Arc::clone(&assets), registers.clone(), 200.0, "current_balance");

        let plan = rebalancer.rebalance("sol", 500.0).await.unwrap();
        assert_eq!(plan.adjustment, Some(110.0));

        let amount = |id: &'static str| {
            let assets = Arc::clone(&assets);
            async move {
                assets
                    .find_by_id(id)
                    .await
                    .unwrap()
                    .unwrap()
                    .capital_allocation
                    .amount()
            }
        };
        assert_eq!(amount("btc").await, 160.0);
        assert_eq!(amount("eth").await, 140.0);
        // Fiat and the new holding are left alone.
        assert_eq!(amount("eur").await, 1000.0);
        assert_eq!(amount("sol").await, 200.0);
        assert_eq!(registers.get("current_balance").await.unwrap(), Some(500.0));
    }

    #[tokio::test]
    async fn test_rebalance_rejects_non_finite_balance() {
        let assets: Arc<dyn Collection<Asset>> = Arc::new(MemoryCollection::new("assets"));
        let registers = RegisterBook::new(Arc::new(MemoryCollection::new("registers")));
        let rebalancer = Rebalancer::new(assets, registers.clone(), 200.0, "current_balance");

        assert!(rebalancer.rebalance("new", f64::NAN).await.is_err());
        assert_eq!(registers.get("current_balance").await.unwrap(), None);
    }
}

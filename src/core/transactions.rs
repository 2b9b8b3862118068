//! Opening and closing positions.

use super::clock::Clock;
use super::error::{ServiceError, ServiceResult, ensure_finite};
use super::locks::KeyedLocks;
use super::models::{Asset, Side, Transaction, TransactionStatus};
use super::rates::{RateResolver, round_money};
use super::registers::RegisterBook;
use super::store::Collection;
use crate::store::Database;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone)]
pub struct Fee {
    pub amount: f64,
    pub currency: String,
}

impl Fee {
    pub fn new(amount: f64, currency: &str) -> Self {
        Self {
            amount,
            currency: currency.to_string(),
        }
    }
}

impl FromStr for Fee {
    type Err = anyhow::Error;

    /// Parses `AMOUNT:CURRENCY`, for example `0.001:BNB`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (amount, currency) = s
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("Invalid fee '{}', expected AMOUNT:CURRENCY", s))?;
        let amount = amount
            .trim()
            .parse::<f64>()
            .map_err(|e| anyhow::anyhow!("Invalid fee amount '{}': {}", amount, e))?;
        Ok(Fee::new(amount, &currency.trim().to_uppercase()))
    }
}

#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub asset_id: String,
    pub side: Side,
    pub price: f64,
    pub amount: f64,
    /// Fees may be charged in several currencies for one fill.
    pub fees: Vec<Fee>,
}

#[derive(Debug, Clone)]
pub struct CloseRequest {
    pub price: f64,
    pub fees: Vec<Fee>,
}

fn ensure_positive(field: &str, value: f64) -> ServiceResult<f64> {
    let value = ensure_finite(field, value)?;
    if value <= 0.0 {
        return Err(ServiceError::InvalidInput(format!("{field} must be positive")));
    }
    Ok(value)
}

fn validate_fees(fees: &[Fee]) -> ServiceResult<()> {
    for fee in fees {
        if ensure_finite("fee", fee.amount)? < 0.0 {
            return Err(ServiceError::InvalidInput("fee must not be negative".to_string()));
        }
        if fee.currency.trim().is_empty() {
            return Err(ServiceError::InvalidInput("fee currency must not be empty".to_string()));
        }
    }
    Ok(())
}

/// Profit of a round trip in percent of the opening price.
pub fn profit_percent(side: Side, open_price: f64, close_price: f64) -> f64 {
    match side {
        Side::Long => (close_price - open_price) / open_price * 100.0,
        Side::Short => (open_price - close_price) / open_price * 100.0,
    }
}

/// Net profit in the settlement currency after both fees.
pub fn profit_total(side: Side, open_value: f64, close_value: f64, open_fee: f64, close_fee: f64) -> f64 {
    let gross = match side {
        Side::Long => close_value - open_value,
        Side::Short => open_value - close_value,
    };
    round_money(gross - open_fee - close_fee)
}

pub struct TransactionBook {
    transactions: Arc<dyn Collection<Transaction>>,
    assets: Arc<dyn Collection<Asset>>,
    registers: RegisterBook,
    rates: Arc<RateResolver>,
    clock: Arc<dyn Clock>,
    usd_total_register: String,
    locks: KeyedLocks,
}

impl TransactionBook {
    pub fn new(
        db: &Database,
        registers: RegisterBook,
        rates: Arc<RateResolver>,
        clock: Arc<dyn Clock>,
        usd_total_register: &str,
    ) -> Self {
        Self {
            transactions: Arc::clone(&db.transactions),
            assets: Arc::clone(&db.assets),
            registers,
            rates,
            clock,
            usd_total_register: usd_total_register.to_string(),
            locks: KeyedLocks::new(),
        }
    }

    async fn fee_total(&self, fees: &[Fee]) -> f64 {
        let session = self.rates.session();
        let mut total = 0.0;
        for fee in fees {
            total += session.convert(fee.amount, &fee.currency).await;
        }
        round_money(total)
    }

    #[instrument(skip(self, request), fields(asset = %request.asset_id))]
    pub async fn open(&self, request: OpenRequest) -> ServiceResult<Transaction> {
        let price = ensure_positive("price", request.price)?;
        let amount = ensure_positive("amount", request.amount)?;
        validate_fees(&request.fees)?;
        if self.assets.find_by_id(&request.asset_id).await?.is_none() {
            return Err(ServiceError::NotFound(format!("Asset {}", request.asset_id)));
        }

        let transaction = Transaction {
            id: uuid::Uuid::new_v4().to_string(),
            asset_id: request.asset_id,
            side: request.side,
            status: TransactionStatus::Open,
            open_price: price,
            amount,
            open_value_fiat: round_money(price * amount),
            open_fee: self.fee_total(&request.fees).await,
            opened_at: self.clock.now(),
            close_price: None,
            close_value_fiat: None,
            close_fee: None,
            profit_percent: None,
            profit_total_fiat: None,
            closed_at: None,
        };
        let transaction = self.transactions.insert(transaction).await?;
        info!(id = %transaction.id, value = transaction.open_value_fiat, "Opened transaction");
        Ok(transaction)
    }

    /// Closes an open transaction and books its profit.
    ///
    /// A closed transaction is never modified again.
    #[instrument(skip(self, request))]
    pub async fn close(&self, id: &str, request: CloseRequest) -> ServiceResult<Transaction> {
        let price = ensure_positive("price", request.price)?;
        validate_fees(&request.fees)?;

        let _guard = self.locks.lock(id).await;
        let open = self
            .transactions
            .find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Transaction {id}")))?;
        if open.status == TransactionStatus::Closed {
            return Err(ServiceError::AlreadyClosed(id.to_string()));
        }

        let close_value = round_money(price * open.amount);
        let close_fee = self.fee_total(&request.fees).await;
        let percent = profit_percent(open.side, open.open_price, price);
        let profit = profit_total(open.side, open.open_value_fiat, close_value, open.open_fee, close_fee);
        let closed_at = self.clock.now();

        let closed = self
            .transactions
            .update(
                id,
                &|t| {
                    t.status = TransactionStatus::Closed;
                    t.close_price = Some(price);
                    t.close_value_fiat = Some(close_value);
                    t.close_fee = Some(close_fee);
                    t.profit_percent = Some(percent);
                    t.profit_total_fiat = Some(profit);
                    t.closed_at = Some(closed_at);
                },
                None,
            )
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Transaction {id}")))?;

        let posted = self
            .assets
            .update(&closed.asset_id, &|a| a.capital_allocation.adjust(profit), None)
            .await?;
        if posted.is_none() {
            warn!(asset = %closed.asset_id, "Holding no longer exists, profit not allocated");
        }
        self.registers.add(&self.usd_total_register, profit).await?;

        info!(profit, percent, "Closed transaction");
        Ok(closed)
    }

    pub async fn list(&self, asset_id: Option<&str>) -> ServiceResult<Vec<Transaction>> {
        let mut transactions = match asset_id {
            Some(asset_id) => self.transactions.find(&|t: &Transaction| t.asset_id == asset_id).await?,
            None => self.transactions.all().await?,
        };
        transactions.sort_by_key(|t| t.opened_at);
        Ok(transactions)
    }
}

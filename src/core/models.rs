//! Stored documents and their invariants.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;

use super::store::Document;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    Crypto,
    Stock,
    Fiat,
}

impl Display for AssetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                AssetType::Crypto => "crypto",
                AssetType::Stock => "stock",
                AssetType::Fiat => "fiat",
            }
        )
    }
}

impl FromStr for AssetType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "crypto" => Ok(AssetType::Crypto),
            "stock" => Ok(AssetType::Stock),
            "fiat" => Ok(AssetType::Fiat),
            _ => Err(anyhow::anyhow!("Invalid asset type: {}", s)),
        }
    }
}

/// Capital recorded against a holding.
///
/// Older documents carry a bare number, newer ones a per-currency map where
/// `field` names the entry that holds the amount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CapitalAllocation {
    Scalar(f64),
    Structured {
        amounts: BTreeMap<String, f64>,
        field: String,
    },
}

impl CapitalAllocation {
    pub fn structured(field: &str, amount: f64) -> Self {
        CapitalAllocation::Structured {
            amounts: BTreeMap::from([(field.to_string(), amount)]),
            field: field.to_string(),
        }
    }

    pub fn amount(&self) -> f64 {
        match self {
            CapitalAllocation::Scalar(amount) => *amount,
            CapitalAllocation::Structured { amounts, field } => {
                amounts.get(field).copied().unwrap_or(0.0)
            }
        }
    }

    pub fn set_amount(&mut self, value: f64) {
        match self {
            CapitalAllocation::Scalar(amount) => *amount = value,
            CapitalAllocation::Structured { amounts, field } => {
                amounts.insert(field.clone(), value);
            }
        }
    }

    pub fn adjust(&mut self, delta: f64) {
        let current = self.amount();
        self.set_amount(current + delta);
    }
}

impl Default for CapitalAllocation {
    fn default() -> Self {
        CapitalAllocation::Scalar(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub id: String,
    pub symbol: String,
    pub exchange_id: String,
    pub asset_type: AssetType,
    #[serde(default)]
    pub capital_allocation: CapitalAllocation,
    pub max_price_window: Option<f64>,
    pub min_price_window: Option<f64>,
    pub trend_estimate: Option<f64>,
}

impl Asset {
    pub fn is_fiat(&self) -> bool {
        self.asset_type == AssetType::Fiat
    }
}

impl Document for Asset {
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub close_time: DateTime<Utc>,
    pub close: f64,
    pub high: Option<f64>,
    pub low: Option<f64>,
}

impl Candle {
    pub fn day(&self) -> NaiveDate {
        self.close_time.date_naive()
    }

    pub fn high_or_close(&self) -> f64 {
        self.high.unwrap_or(self.close)
    }

    pub fn low_or_close(&self) -> f64 {
        self.low.unwrap_or(self.close)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Timeframe {
    #[default]
    #[serde(rename = "1d")]
    Daily,
}

/// Daily history owned by one asset; the document id is the asset id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandleSeries {
    pub id: String,
    #[serde(default)]
    pub timeframe: Timeframe,
    pub candles: Vec<Candle>,
}

impl CandleSeries {
    pub fn empty(asset_id: &str) -> Self {
        Self {
            id: asset_id.to_string(),
            timeframe: Timeframe::Daily,
            candles: Vec::new(),
        }
    }

    pub fn last_close(&self) -> Option<DateTime<Utc>> {
        self.candles.last().map(|c| c.close_time)
    }
}

impl Document for CandleSeries {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Named scalar register holding a process-wide running total or rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub name: String,
    pub total: f64,
}

impl ConfigEntry {
    pub fn new(name: &str, total: f64) -> Self {
        Self {
            name: name.to_string(),
            total,
        }
    }
}

impl Document for ConfigEntry {
    fn id(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    pub id: String,
    pub name: String,
}

impl Document for Exchange {
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl FromStr for Side {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "long" => Ok(Side::Long),
            "short" => Ok(Side::Short),
            _ => Err(anyhow::anyhow!("Invalid transaction side: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub asset_id: String,
    pub side: Side,
    pub status: TransactionStatus,
    pub open_price: f64,
    pub amount: f64,
    pub open_value_fiat: f64,
    /// Opening fee in the settlement currency.
    pub open_fee: f64,
    pub opened_at: DateTime<Utc>,
    pub close_price: Option<f64>,
    pub close_value_fiat: Option<f64>,
    pub close_fee: Option<f64>,
    pub profit_percent: Option<f64>,
    pub profit_total_fiat: Option<f64>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Document for Transaction {
    fn id(&self) -> &str {
        &self.id
    }
}

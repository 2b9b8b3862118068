pub mod cli;
pub mod core;
pub mod providers;
pub mod store;

use crate::core::clock::{Clock, SystemClock};
use crate::core::config::AppConfig;
use crate::core::models::{AssetType, Side};
use crate::core::portfolio::Portfolio;
use crate::core::rates::RateResolver;
use crate::core::rebalance::Rebalancer;
use crate::core::registers::RegisterBook;
use crate::core::sync::{CandleSources, CandleSynchronizer};
use crate::core::transactions::{Fee, TransactionBook};
use crate::providers::binance::BinanceClient;
use crate::providers::synthetic::SyntheticRateSource;
use crate::providers::yahoo_finance::{YahooChartClient, YahooEquitySource, YahooFxSource};
use crate::store::Database;
use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, info};

/// Exchange every holding is registered against unless told otherwise.
pub const DEFAULT_EXCHANGE: &str = "binance";

pub enum AppCommand {
    Sync,
    Balances,
    Convert {
        amount: f64,
        currency: String,
    },
    Assets,
    AddAsset {
        symbol: String,
        asset_type: AssetType,
        exchange: String,
        capital: Option<f64>,
        max_price: Option<f64>,
        min_price: Option<f64>,
    },
    Open {
        symbol: String,
        side: Side,
        price: f64,
        amount: f64,
        fees: Vec<Fee>,
    },
    Close {
        id: String,
        price: f64,
        fees: Vec<Fee>,
    },
    Transactions {
        symbol: Option<String>,
    },
}

/// Services wired against one database and one set of upstream clients.
pub struct App {
    pub config: AppConfig,
    pub db: Database,
    pub binance: Arc<BinanceClient>,
    pub registers: RegisterBook,
    pub rates: Arc<RateResolver>,
    pub synchronizer: Arc<CandleSynchronizer>,
    pub portfolio: Portfolio,
    pub transactions: TransactionBook,
}

impl App {
    pub fn build(config: AppConfig, db: Database, clock: Arc<dyn Clock>) -> Result<Self> {
        let registers = RegisterBook::new(Arc::clone(&db.registers));
        let binance = Arc::new(BinanceClient::new(&config.providers.binance, &config.http)?);
        let yahoo = Arc::new(YahooChartClient::new(&config.providers.yahoo, &config.http)?);

        let rates = Arc::new(RateResolver::new(
            binance.clone(),
            registers.clone(),
            config.rates.clone(),
        ));

        let sources = CandleSources {
            crypto: binance.clone(),
            equity: Arc::new(YahooEquitySource::new(Arc::clone(&yahoo))),
            fx: Arc::new(YahooFxSource::new(yahoo)),
            synthetic: Arc::new(SyntheticRateSource::new(
                registers.clone(),
                config.rates.stablecoin_rate_registers.clone(),
            )),
        };
        let synchronizer = Arc::new(CandleSynchronizer::new(
            &db,
            sources,
            Arc::clone(&clock),
            &config.valuation,
        ));

        let rebalancer = Rebalancer::new(
            Arc::clone(&db.assets),
            registers.clone(),
            config.valuation.seed_capital,
            &config.registers.current_balance,
        );
        let portfolio = Portfolio::new(
            &db,
            binance.clone(),
            Arc::clone(&rates),
            registers.clone(),
            rebalancer,
            Arc::clone(&synchronizer),
            &config.registers.usd_total,
            &config.registers.fiat_total,
        );
        let transactions = TransactionBook::new(
            &db,
            registers.clone(),
            Arc::clone(&rates),
            clock,
            &config.registers.usd_total,
        );

        Ok(Self {
            config,
            db,
            binance,
            registers,
            rates,
            synchronizer,
            portfolio,
            transactions,
        })
    }

    pub async fn execute(&self, command: AppCommand) -> Result<()> {
        self.portfolio
            .ensure_exchange(DEFAULT_EXCHANGE, "Binance")
            .await?;

        match command {
            AppCommand::Sync => cli::sync::run(&self.synchronizer).await,
            AppCommand::Balances => cli::balances::run(self).await,
            AppCommand::Convert { amount, currency } => {
                cli::convert::run(&self.rates, amount, &currency).await
            }
            AppCommand::Assets => cli::assets::list(&self.portfolio).await,
            AppCommand::AddAsset {
                symbol,
                asset_type,
                exchange,
                capital,
                max_price,
                min_price,
            } => {
                let new = crate::core::portfolio::NewAsset {
                    symbol,
                    exchange_id: exchange,
                    asset_type,
                    capital_allocation: capital,
                    max_price_window: max_price,
                    min_price_window: min_price,
                };
                cli::assets::add(&self.portfolio, new).await
            }
            AppCommand::Open {
                symbol,
                side,
                price,
                amount,
                fees,
            } => {
                let asset = self.portfolio.find_by_symbol(&symbol).await?;
                let request = crate::core::transactions::OpenRequest {
                    asset_id: asset.id,
                    side,
                    price,
                    amount,
                    fees,
                };
                cli::transactions::open(&self.transactions, request).await
            }
            AppCommand::Close { id, price, fees } => {
                let request = crate::core::transactions::CloseRequest { price, fees };
                cli::transactions::close(&self.transactions, &id, request).await
            }
            AppCommand::Transactions { symbol } => {
                cli::transactions::list(&self.portfolio, &self.transactions, symbol.as_deref()).await
            }
        }
    }
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    info!("foliosync starting...");

    let config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    debug!(data_path = ?config.data_path, "Loaded config");

    let db = Database::open(&config.default_data_path()?)?;
    let app = App::build(config, db, Arc::new(SystemClock))?;

    let result = app.execute(command).await;
    app.db.flush()?;
    result
}

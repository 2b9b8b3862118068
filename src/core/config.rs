use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf};
use tracing::debug;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BinanceProviderConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
}

impl Default for BinanceProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.binance.com".to_string(),
            api_key: String::new(),
            api_secret: String::new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct YahooProviderConfig {
    pub base_url: String,
}

impl Default for YahooProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://query1.finance.yahoo.com".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub binance: BinanceProviderConfig,
    #[serde(default)]
    pub yahoo: YahooProviderConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ValuationConfig {
    /// Lookback window for the high/low bounds, in 365-day years.
    pub lookback_years: u32,
    /// Notional capital given to a newly registered non-fiat holding.
    pub seed_capital: f64,
    /// Computed rate pair re-evaluated on every sync.
    pub synthetic_symbol: String,
}

impl Default for ValuationConfig {
    fn default() -> Self {
        Self {
            lookback_years: 3,
            seed_capital: 200.0,
            synthetic_symbol: "USDTUSD".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct RatesConfig {
    pub settlement_currency: String,
    pub stablecoin: String,
    pub fee_token: String,
    /// Quote assets tried, in order, when pricing an arbitrary asset.
    pub quote_assets: Vec<String>,
    /// Registers holding the stablecoin's USD rate, first present wins.
    pub stablecoin_rate_registers: Vec<String>,
}

impl Default for RatesConfig {
    fn default() -> Self {
        Self {
            settlement_currency: "USD".to_string(),
            stablecoin: "USDT".to_string(),
            fee_token: "BNB".to_string(),
            quote_assets: vec![
                "USDT".to_string(),
                "USDC".to_string(),
                "FDUSD".to_string(),
                "USD".to_string(),
            ],
            stablecoin_rate_registers: vec![
                "usdt_ask".to_string(),
                "usdt_bid".to_string(),
                "usdtAsk".to_string(),
                "usdtBid".to_string(),
            ],
        }
    }
}

impl RatesConfig {
    /// Currency codes trimmed and upper-cased; register names are left as written.
    pub fn normalized(mut self) -> Self {
        fn code(s: &str) -> String {
            s.trim().to_uppercase()
        }
        self.settlement_currency = code(&self.settlement_currency);
        self.stablecoin = code(&self.stablecoin);
        self.fee_token = code(&self.fee_token);
        self.quote_assets = self.quote_assets.iter().map(|q| code(q)).collect();
        self
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct RegistersConfig {
    pub usd_total: String,
    pub fiat_total: String,
    pub current_balance: String,
}

impl Default for RegistersConfig {
    fn default() -> Self {
        Self {
            usd_total: "total_usd".to_string(),
            fiat_total: "total_fiat".to_string(),
            current_balance: "current_balance".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub retries: usize,
    pub retry_delay_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            retries: 2,
            retry_delay_ms: 500,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub valuation: ValuationConfig,
    #[serde(default)]
    pub rates: RatesConfig,
    #[serde(default)]
    pub registers: RegistersConfig,
    #[serde(default)]
    pub http: HttpConfig,
    pub data_path: Option<String>,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("dev", "foliosync", "foliosync")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn default_data_path(&self) -> Result<PathBuf> {
        if let Some(custom_path) = &self.data_path {
            return Ok(PathBuf::from(custom_path));
        }
        let proj_dirs = ProjectDirs::from("dev", "foliosync", "foliosync")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.data_dir().to_path_buf())
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let mut config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        config.rates = config.rates.normalized();
        debug!("Successfully loaded config");
        Ok(config)
    }
}

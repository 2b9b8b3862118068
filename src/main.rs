use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use foliosync::core::log::init_logging;
use foliosync::core::models::{AssetType, Side};
use foliosync::core::transactions::Fee;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

impl From<Commands> for foliosync::AppCommand {
    fn from(cmd: Commands) -> foliosync::AppCommand {
        match cmd {
            Commands::Sync => foliosync::AppCommand::Sync,
            Commands::Balances => foliosync::AppCommand::Balances,
            Commands::Convert { amount, currency } => {
                foliosync::AppCommand::Convert { amount, currency }
            }
            Commands::Assets => foliosync::AppCommand::Assets,
            Commands::AddAsset {
                symbol,
                asset_type,
                exchange,
                capital,
                max_price,
                min_price,
            } => foliosync::AppCommand::AddAsset {
                symbol,
                asset_type,
                exchange,
                capital,
                max_price,
                min_price,
            },
            Commands::Open {
                symbol,
                side,
                price,
                amount,
                fee,
            } => foliosync::AppCommand::Open {
                symbol,
                side,
                price,
                amount,
                fees: fee,
            },
            Commands::Close { id, price, fee } => foliosync::AppCommand::Close {
                id,
                price,
                fees: fee,
            },
            Commands::Transactions { symbol } => foliosync::AppCommand::Transactions { symbol },
            Commands::Setup => unreachable!("Setup command should be handled separately"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Fetch new daily candles for every registered asset
    Sync,
    /// Show exchange balances valued in the settlement currency
    Balances,
    /// Convert an amount into the settlement currency
    Convert {
        amount: f64,
        currency: String,
    },
    /// List registered assets
    Assets,
    /// Register an asset, rebalance capital and fetch its history
    AddAsset {
        symbol: String,
        /// crypto, stock or fiat
        #[arg(short = 't', long = "type", default_value = "crypto")]
        asset_type: AssetType,
        #[arg(short, long, default_value = foliosync::DEFAULT_EXCHANGE)]
        exchange: String,
        /// Initial capital, fiat holdings only
        #[arg(long)]
        capital: Option<f64>,
        #[arg(long)]
        max_price: Option<f64>,
        #[arg(long)]
        min_price: Option<f64>,
    },
    /// Open a transaction
    Open {
        symbol: String,
        /// long or short
        #[arg(short, long, default_value = "long")]
        side: Side,
        #[arg(short, long)]
        price: f64,
        #[arg(short, long)]
        amount: f64,
        /// Fee as AMOUNT:CURRENCY, may be repeated
        #[arg(short, long)]
        fee: Vec<Fee>,
    },
    /// Close an open transaction
    Close {
        id: String,
        #[arg(short, long)]
        price: f64,
        /// Fee as AMOUNT:CURRENCY, may be repeated
        #[arg(short, long)]
        fee: Vec<Fee>,
    },
    /// List transactions, optionally for one asset
    Transactions {
        #[arg(short, long)]
        symbol: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => foliosync::cli::setup::setup(),
        Some(cmd) => foliosync::run_command(cmd.into(), cli.config_path.as_deref()).await,
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}

use alphaark_core::{Currency, PositionsRequest};
use alphaark_feed::{spawn_poller, BroadcastManager};
use alphaark_okx::{OkxConfig, OkxServices, SyncSettings};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "alphaark")]
#[command(about = "OKX account and market synchronization: balances, positions, prices, live stream")]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[arg(long, env = "OKX_API_KEY", default_value = "", hide_env_values = true)]
    api_key: String,

    #[arg(long, env = "OKX_SECRET_KEY", default_value = "", hide_env_values = true)]
    secret_key: String,

    #[arg(long, env = "OKX_PASSPHRASE", default_value = "", hide_env_values = true)]
    passphrase: String,

    #[arg(long, env = "OKX_BASE_URL", default_value = alphaark_okx::config::DEFAULT_BASE_URL)]
    base_url: String,

    /// Demo-trading account
    #[arg(long, env = "OKX_IS_TEST", default_value_t = false)]
    is_test: bool,

    /// TOML file overriding sync settings (cooldowns, timeouts, retries)
    #[arg(long)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the API server and the live price stream
    Server {
        /// Bind address
        #[arg(short, long, default_value = "0.0.0.0:8080")]
        bind: String,
    },

    /// Show account balance
    Balance {
        /// Display currency (CNY, USD, USDT, BTC)
        #[arg(short, long, default_value = "USDT")]
        currency: String,
    },

    /// List open positions
    Positions {
        /// Instrument type filter (e.g. SWAP)
        #[arg(long)]
        inst_type: Option<String>,

        /// Instrument id filter (e.g. BTC-USDT-SWAP)
        #[arg(long)]
        inst_id: Option<String>,

        #[arg(short, long, default_value = "USDT")]
        currency: String,
    },

    /// Show the latest price of an instrument
    Price {
        /// Instrument id (e.g. BTC-USDT)
        symbol: String,
    },

    /// Show the current exchange-rate table
    Rates,

    /// List supported display currencies
    Currencies,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let settings = match &cli.settings {
        Some(path) => load_settings(path)?,
        None => SyncSettings::default(),
    };
    let mut config = OkxConfig::new(cli.api_key, cli.secret_key, cli.passphrase)
        .with_base_url(cli.base_url);
    config.is_test = cli.is_test;
    tracing::debug!(?config, "Loaded OKX configuration");

    let services = OkxServices::new(config, settings);

    match cli.command {
        Commands::Server { bind } => run_server(services, &bind).await?,
        Commands::Balance { currency } => {
            let currency: Currency = currency.parse()?;
            let balance = services.account.account_balance(currency).await?;

            let sep = "=".repeat(60);
            println!("\n{sep}");
            println!("  ACCOUNT BALANCE ({} {})", currency.symbol(), currency);
            println!("{sep}");
            println!("  Total Equity:    {}", balance.total_equity);
            println!("  Updated:         {}", balance.last_update_time.format("%Y-%m-%d %H:%M:%S%.3f UTC"));
            for line in &balance.details {
                println!(
                    "  {:<8} bal {:<18} avail {:<18} equity {}",
                    line.currency, line.balance, line.available, line.equity
                );
            }
            println!("{sep}\n");
        }
        Commands::Positions {
            inst_type,
            inst_id,
            currency,
        } => {
            let currency: Currency = currency.parse()?;
            let request = PositionsRequest {
                inst_type,
                inst_id,
                pos_id: None,
            };
            let positions = services.account.positions(&request, currency).await?;
            println!("{}", serde_json::to_string_pretty(&positions)?);
        }
        Commands::Price { symbol } => {
            let snapshot = services.prices.price(&symbol).await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Commands::Rates => {
            let table = services.account.exchange_rates().await?;
            println!("Exchange rates:");
            for (pair, rate) in &table.rates {
                println!("  {:<10} {}", pair, rate);
            }
        }
        Commands::Currencies => {
            println!("Supported currencies:");
            for currency in Currency::supported() {
                println!("  {:<5} {}  {}", currency.code(), currency.symbol(), currency.display_name());
            }
        }
    }

    Ok(())
}

fn load_settings(path: &Path) -> Result<SyncSettings> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings file {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("Invalid settings file {}", path.display()))
}

async fn run_server(services: OkxServices, bind: &str) -> Result<()> {
    if !services.config.has_credentials() {
        tracing::warn!(
            missing = ?services.config.missing_credentials(),
            "OKX credentials incomplete; account routes will fail"
        );
    }
    if let Err(e) = services.clock.sync().await {
        tracing::warn!(error = %e, "Initial clock sync failed");
    }

    let source = Arc::new(services.stream_source());
    let feed = BroadcastManager::spawn(source.clone());
    let poller = spawn_poller(source, feed.clone(), services.settings.stream_interval());

    let state = Arc::new(alphaark_api::AppState::new(&services, feed));
    let result = alphaark_api::start_server(state, bind).await;

    poller.stop();
    result
}

//! Enertrade Node -- energy trading between storage units and aggregators.
//!
//! Usage:
//!   enertrade-node seller                     # Sell with default config
//!   enertrade-node buyer --max-bid-price 20   # Negotiate once
//!   enertrade-node --config path.toml config  # Show effective config

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use enertrade_market::{AbandonReason, SessionOutcome};
use enertrade_node::config::NodeConfig;
use enertrade_node::{Buyer, Network, Seller, DEFAULT_LOG_FILTER};
use rust_decimal::Decimal;
use tokio::sync::broadcast;

#[derive(Parser)]
#[command(
    name = "enertrade-node",
    about = "Energy trading negotiation between storage units and aggregators"
)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "enertrade.toml")]
    config: PathBuf,

    /// Transport protocol
    #[arg(short, long, value_enum, global = true)]
    network: Option<Network>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a storage unit selling energy
    Seller(SellerArgs),
    /// Run one aggregator negotiation against a seller
    Buyer(BuyerArgs),
    /// Print the effective configuration as TOML
    Config,
}

#[derive(Args)]
struct SellerArgs {
    /// Storage unit ID
    #[arg(long)]
    id: Option<i64>,
    /// Total energy in the battery, kWh
    #[arg(short, long)]
    total: Option<Decimal>,
    /// Percentage of total energy for sale
    #[arg(short, long)]
    percentage: Option<Decimal>,
    /// Minimum selling price per kWh
    #[arg(long)]
    reserve_price: Option<Decimal>,
    /// Listen endpoint (host:port or socket path)
    #[arg(short, long)]
    endpoint: Option<String>,
}

#[derive(Args)]
struct BuyerArgs {
    /// Aggregator ID
    #[arg(long)]
    id: Option<i64>,
    /// Bid ceiling per kWh
    #[arg(long)]
    max_bid_price: Option<Decimal>,
    /// Seller endpoint (host:port or socket path)
    #[arg(short, long)]
    endpoint: Option<String>,
    /// Fixed RNG seed for reproducible bidding
    #[arg(long)]
    seed: Option<u64>,
}

impl SellerArgs {
    fn apply(self, cfg: &mut NodeConfig) {
        if let Some(id) = self.id {
            cfg.seller.device_id = id;
        }
        if let Some(total) = self.total {
            cfg.seller.energy_total = total;
        }
        if let Some(percentage) = self.percentage {
            cfg.seller.percentage_for_sale = percentage;
        }
        if let Some(reserve) = self.reserve_price {
            cfg.seller.reserve_price = reserve;
        }
        if let Some(endpoint) = self.endpoint {
            cfg.network.listen_addr = endpoint;
        }
    }
}

impl BuyerArgs {
    fn apply(self, cfg: &mut NodeConfig) {
        if let Some(id) = self.id {
            cfg.buyer.device_id = id;
        }
        if let Some(max) = self.max_bid_price {
            cfg.buyer.max_bid_price = max;
        }
        if let Some(endpoint) = self.endpoint {
            cfg.network.seller_addr = endpoint;
        }
        if let Some(seed) = self.seed {
            cfg.buyer.rng_seed = Some(seed);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .init();

    let cli = Cli::parse();
    let mut cfg = NodeConfig::load_or_default(&cli.config)?;
    if let Some(network) = cli.network {
        cfg.network.protocol = network;
    }

    match cli.command {
        Commands::Seller(args) => {
            args.apply(&mut cfg);
            cfg.validate()?;
            run_seller(cfg).await?;
        }
        Commands::Buyer(args) => {
            args.apply(&mut cfg);
            cfg.validate()?;
            run_buyer(cfg).await?;
        }
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&cfg)?);
        }
    }

    Ok(())
}

async fn run_seller(cfg: NodeConfig) -> anyhow::Result<()> {
    let seller = Seller::from_config(&cfg)?;
    let endpoint = cfg.network.listen_endpoint();
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        %endpoint,
        "starting enertrade seller"
    );

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(());
        }
    });

    seller.listen(&endpoint, shutdown_rx).await?;
    seller.log_summary().await;
    Ok(())
}

async fn run_buyer(cfg: NodeConfig) -> anyhow::Result<()> {
    let mut buyer = Buyer::from_config(&cfg);
    let endpoint = cfg.network.seller_endpoint();
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        device_id = buyer.device_id(),
        max_bid_price = %cfg.buyer.max_bid_price,
        %endpoint,
        "starting enertrade buyer"
    );

    match buyer.negotiate(&endpoint).await? {
        SessionOutcome::Confirmed(trade) => {
            println!(
                "Transaction completed: {} kWh ({}%) @ {} per kWh from seller {}",
                trade.quantity_kwh, trade.percentage, trade.price, trade.seller_id
            );
        }
        SessionOutcome::Abandoned(AbandonReason::NothingForSale) => {
            println!("Nothing to buy");
        }
        SessionOutcome::Abandoned(AbandonReason::CeilingReached {
            last_offer,
            ceiling,
        }) => {
            println!("Max bid reached: last offer {last_offer}, ceiling {ceiling}");
        }
        SessionOutcome::Abandoned(AbandonReason::OfferOutOfRange {
            energy_total,
            percentage,
        }) => {
            println!("Accepted offer out of range: {percentage}% of {energy_total} kWh");
        }
    }
    Ok(())
}

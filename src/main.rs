//! Ultimart - Escrow trade engine for a Solana NFT marketplace
//!
//! Command-line entry point for the three state-changing trade operations:
//! list, unlist, and purchase. The heavy lifting lives in the library; this
//! binary wires configuration, wallet, connection, and notifier together.

#![deny(unused_imports)]
#![deny(unused_mut)]
#![warn(unused_must_use)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use solana_sdk::native_token::LAMPORTS_PER_SOL;
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ultimart::config::Config;
use ultimart::connection::ConnectionManager;
use ultimart::endpoints;
use ultimart::engine::TradeEngine;
use ultimart::notifier::TradeStateNotifier;
use ultimart::wallet::WalletManager;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Move an asset you own into escrow and record its asking price
    List {
        /// Asset mint address
        mint: String,

        /// Asking price in SOL
        #[arg(long)]
        price_sol: f64,
    },

    /// Take your listed asset back out of escrow
    Unlist {
        /// Asset mint address
        mint: String,
    },

    /// Buy a listed asset
    Purchase {
        /// Asset mint address
        mint: String,

        /// Seller address receiving the payment
        #[arg(long)]
        seller: String,

        /// Agreed price in SOL
        #[arg(long)]
        price_sol: f64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose)?;

    info!("Loading configuration from: {}", args.config);
    let config = Config::from_file_with_env(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config))?;

    let wallet = WalletManager::from_file(&config.wallet.keypair_path)
        .context("Failed to load wallet")?;
    info!("Wallet address: {}", wallet.pubkey());

    let authority = config.market.authority_pubkey()?;

    if config.monitoring.enable_metrics {
        let metrics_port = config.monitoring.metrics_port;
        tokio::spawn(async move {
            if let Err(e) = endpoints::endpoint_server(metrics_port).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    let connection = Arc::new(ConnectionManager::new(&config.rpc));
    let notifier = if config.notifier.endpoint.is_some() {
        TradeStateNotifier::new(&config.notifier)
    } else {
        warn!("No notifier endpoint configured; metadata store will not be updated");
        TradeStateNotifier::disabled()
    };

    let engine = TradeEngine::new(
        connection,
        wallet,
        notifier,
        authority,
        config.market.fee_bps,
        Duration::from_secs(config.engine.submit_timeout_secs),
    );

    let signature = match args.command {
        Command::List { mint, price_sol } => {
            let mint = parse_pubkey(&mint, "mint")?;
            engine.list(&mint, sol_to_lamports(price_sol)?).await?
        }
        Command::Unlist { mint } => {
            let mint = parse_pubkey(&mint, "mint")?;
            engine.unlist(&mint).await?
        }
        Command::Purchase {
            mint,
            seller,
            price_sol,
        } => {
            let mint = parse_pubkey(&mint, "mint")?;
            let seller = parse_pubkey(&seller, "seller")?;
            engine
                .purchase(&mint, &seller, sol_to_lamports(price_sol)?)
                .await?
        }
    };

    println!("{signature}");
    Ok(())
}

/// Initialize logging subsystem
fn init_logging(verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        "ultimart=debug,info"
    } else {
        "ultimart=info,warn,error"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    Ok(())
}

fn parse_pubkey(value: &str, what: &str) -> Result<Pubkey> {
    Pubkey::from_str(value).with_context(|| format!("invalid {what} address: {value}"))
}

fn sol_to_lamports(sol: f64) -> Result<u64> {
    if !sol.is_finite() || sol < 0.0 {
        anyhow::bail!("price must be a non-negative number, got {sol}");
    }
    Ok((sol * LAMPORTS_PER_SOL as f64).round() as u64)
}

//! Escrow key export - migration/recovery tool
//!
//! Derives the escrow custodian for a (marketplace authority, asset mint)
//! pair and writes its secret material to a local keypair file in the
//! standard CLI JSON format. This is a bootstrap utility only; the live
//! trade path recomputes custodian keys on demand and never persists them.

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use clap::Parser;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signer::Signer;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use zeroize::Zeroize;

use ultimart::escrow::derive_escrow;

#[derive(Parser, Debug)]
#[command(author, version, about = "Export an escrow custodian keypair", long_about = None)]
struct Args {
    /// Marketplace authority address
    #[arg(long)]
    authority: String,

    /// Asset mint address
    #[arg(long)]
    mint: String,

    /// Output keypair file (refuses to overwrite)
    #[arg(long, default_value = "escrow-keypair.json")]
    out: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let authority = Pubkey::from_str(&args.authority)
        .with_context(|| format!("invalid authority address: {}", args.authority))?;
    let mint = Pubkey::from_str(&args.mint)
        .with_context(|| format!("invalid mint address: {}", args.mint))?;

    if args.out.exists() {
        anyhow::bail!(
            "refusing to overwrite existing file: {}",
            args.out.display()
        );
    }

    let custodian = derive_escrow(&authority, &mint);

    let mut secret = custodian.to_bytes().to_vec();
    let rendered = serde_json::to_string(&secret)?;
    secret.zeroize();

    std::fs::write(&args.out, rendered)
        .with_context(|| format!("failed to write {}", args.out.display()))?;

    info!(
        custodian = %custodian.pubkey(),
        path = %args.out.display(),
        "escrow keypair exported"
    );
    println!("{}", custodian.pubkey());
    Ok(())
}

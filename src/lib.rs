//! Ultimart - Escrow trade engine for a Solana NFT marketplace
//!
//! The display layer, spreadsheet-backed metadata store, and image storage
//! live elsewhere; this crate owns value custody. A listed asset is held by
//! a custodial keypair derived deterministically from the marketplace
//! authority and the asset mint, and listing state is inferred from that
//! account's balance: it holds exactly 1 unit if and only if the asset is
//! actively listed.

pub mod config;
pub mod connection;
pub mod endpoints;
pub mod engine;
pub mod escrow;
pub mod metrics;
pub mod notifier;
pub mod trade;
pub mod wallet;

// Re-export commonly used types
pub use solana_sdk::{pubkey::Pubkey, signature::Signature};

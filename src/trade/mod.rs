//! Escrow trade protocol
//!
//! List, unlist, and purchase against the escrow custodian, split into a
//! pure builder (unsigned instruction bundles with precondition checks) and
//! a submitter (two-phase sign-and-broadcast). Both talk to the chain
//! through narrow traits so the protocol is testable without an RPC
//! endpoint.

use std::time::Duration;

use async_trait::async_trait;
use solana_client::rpc_config::RpcSendTransactionConfig;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::hash::Hash;
use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::Transaction;

pub mod builder;
pub mod errors;
pub mod submitter;

pub use builder::TradeBuilder;
pub use errors::{SubmissionOutcome, TradeError};
pub use submitter::TradeSubmitter;

use crate::connection::{ConfirmOutcome, ConnectionManager};

/// The three state-changing operations of the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeKind {
    List,
    Unlist,
    Purchase,
}

impl std::fmt::Display for TradeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::List => write!(f, "list"),
            Self::Unlist => write!(f, "unlist"),
            Self::Purchase => write!(f, "purchase"),
        }
    }
}

/// An unsigned instruction bundle plus the chain checkpoint it was built
/// against. Never partial: a builder either returns the complete bundle or
/// an error.
#[derive(Debug, Clone)]
pub struct PreparedTrade {
    pub kind: TradeKind,
    pub mint: Pubkey,
    /// Fee payer and primary signer.
    pub payer: Pubkey,
    pub instructions: Vec<Instruction>,
    pub blockhash: Hash,
    /// Unlist and purchase move the asset out of custody, so the derived
    /// custodian must co-sign.
    pub needs_escrow_signature: bool,
}

/// Read-only chain state needed by the builder.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Token account balance; `None` when the account does not exist.
    async fn token_balance(&self, token_account: &Pubkey) -> Result<Option<u64>, TradeError>;

    /// Native balance in lamports.
    async fn lamports(&self, owner: &Pubkey) -> Result<u64, TradeError>;

    async fn latest_blockhash(&self) -> Result<Hash, TradeError>;
}

/// Broadcast-side chain access needed by the submitter.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn send_transaction(
        &self,
        transaction: &Transaction,
        config: RpcSendTransactionConfig,
    ) -> Result<Signature, TradeError>;

    async fn confirm(
        &self,
        signature: &Signature,
        commitment: CommitmentConfig,
        wait: Duration,
    ) -> Result<ConfirmOutcome, TradeError>;

    async fn latest_blockhash(&self) -> Result<Hash, TradeError>;
}

#[async_trait]
impl ChainReader for ConnectionManager {
    async fn token_balance(&self, token_account: &Pubkey) -> Result<Option<u64>, TradeError> {
        Ok(ConnectionManager::token_balance(self, token_account).await?)
    }

    async fn lamports(&self, owner: &Pubkey) -> Result<u64, TradeError> {
        Ok(ConnectionManager::lamports(self, owner).await?)
    }

    async fn latest_blockhash(&self) -> Result<Hash, TradeError> {
        Ok(ConnectionManager::latest_blockhash(self).await?)
    }
}

#[async_trait]
impl Broadcaster for ConnectionManager {
    async fn send_transaction(
        &self,
        transaction: &Transaction,
        config: RpcSendTransactionConfig,
    ) -> Result<Signature, TradeError> {
        Ok(ConnectionManager::send_transaction(self, transaction, config).await?)
    }

    async fn confirm(
        &self,
        signature: &Signature,
        commitment: CommitmentConfig,
        wait: Duration,
    ) -> Result<ConfirmOutcome, TradeError> {
        Ok(ConnectionManager::confirm(self, signature, commitment, wait).await?)
    }

    async fn latest_blockhash(&self) -> Result<Hash, TradeError> {
        Ok(ConnectionManager::latest_blockhash(self).await?)
    }
}

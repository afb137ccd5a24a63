//! Trade orchestration
//!
//! One engine instance owns the connection, wallet, and notifier, and runs
//! each trade operation as an independent unit of work: build the
//! instruction bundle, submit it under a wall-clock timeout, then mirror
//! the new state off-chain. There is no per-asset lock - the chain's
//! atomicity plus the builder preconditions give mutual exclusion, and a
//! losing racer simply sees `NotListed` or `InsufficientBalance`.

use std::sync::Arc;
use std::time::Duration;

use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature};
use tracing::{info, instrument, warn};

use crate::escrow::{derive_escrow, escrow_token_account};
use crate::metrics::{metrics, Timer};
use crate::notifier::{TradeStateNotifier, TradeStatus};
use crate::trade::errors::{SubmissionOutcome, TradeError};
use crate::trade::{
    Broadcaster, ChainReader, PreparedTrade, TradeBuilder, TradeKind, TradeSubmitter,
};
use crate::wallet::WalletManager;

pub struct TradeEngine<C: ChainReader + Broadcaster> {
    chain: Arc<C>,
    builder: TradeBuilder<C>,
    submitter: TradeSubmitter<C>,
    notifier: TradeStateNotifier,
    wallet: WalletManager,
    authority: Pubkey,
    submit_timeout: Duration,
}

impl<C: ChainReader + Broadcaster> TradeEngine<C> {
    pub fn new(
        chain: Arc<C>,
        wallet: WalletManager,
        notifier: TradeStateNotifier,
        authority: Pubkey,
        fee_bps: u16,
        submit_timeout: Duration,
    ) -> Self {
        Self {
            builder: TradeBuilder::new(chain.clone(), authority, fee_bps),
            submitter: TradeSubmitter::new(chain.clone()),
            chain,
            notifier,
            wallet,
            authority,
            submit_timeout,
        }
    }

    /// List the wallet's asset: move it into escrow custody and record the
    /// asking price off-chain.
    #[instrument(skip(self), fields(mint = %mint))]
    pub async fn list(&self, mint: &Pubkey, price_lamports: u64) -> Result<Signature, TradeError> {
        let seller = self.wallet.pubkey();
        let timer = Timer::new();
        let prepared = self.builder.build_list(mint, &seller, price_lamports).await?;
        timer.observe_duration(&metrics().build_latency);

        let signature = self.execute(&prepared).await?;
        self.notifier
            .notify(mint, Some(&signature), TradeStatus::Pending)
            .await;
        info!(signature = %signature, price_lamports, "asset listed");
        Ok(signature)
    }

    /// Take the wallet's asset back out of escrow custody.
    #[instrument(skip(self), fields(mint = %mint))]
    pub async fn unlist(&self, mint: &Pubkey) -> Result<Signature, TradeError> {
        let seller = self.wallet.pubkey();
        let timer = Timer::new();
        let prepared = self.builder.build_unlist(mint, &seller).await?;
        timer.observe_duration(&metrics().build_latency);

        let signature = self.execute(&prepared).await?;
        self.notifier
            .notify(mint, Some(&signature), TradeStatus::Unlisted)
            .await;
        info!(signature = %signature, "asset unlisted");
        Ok(signature)
    }

    /// Buy a listed asset: pay the seller (minus the commission split) and
    /// take the asset out of escrow.
    #[instrument(skip(self), fields(mint = %mint, seller = %seller))]
    pub async fn purchase(
        &self,
        mint: &Pubkey,
        seller: &Pubkey,
        price_lamports: u64,
    ) -> Result<Signature, TradeError> {
        let buyer = self.wallet.pubkey();
        let timer = Timer::new();
        let prepared = self
            .builder
            .build_purchase(mint, &buyer, seller, price_lamports)
            .await?;
        timer.observe_duration(&metrics().build_latency);

        let signature = self.execute(&prepared).await?;
        self.notifier
            .notify(mint, Some(&signature), TradeStatus::Sold)
            .await;
        info!(signature = %signature, price_lamports, "asset purchased");
        Ok(signature)
    }

    async fn execute(&self, prepared: &PreparedTrade) -> Result<Signature, TradeError> {
        metrics().trades_total.inc();

        let escrow: Keypair = derive_escrow(&self.authority, &prepared.mint);
        let wallet_keypair = self.wallet.keypair();
        let mut signers: Vec<&Keypair> = vec![wallet_keypair];
        if prepared.needs_escrow_signature {
            signers.push(&escrow);
        }

        let timer = Timer::new();
        let result = match tokio::time::timeout(
            self.submit_timeout,
            self.submitter.submit(prepared, &signers),
        )
        .await
        {
            Ok(result) => result,
            // Once broadcast, a timeout does not imply non-application.
            Err(_) => Err(TradeError::SubmissionFailed {
                outcome: SubmissionOutcome::Unknown,
                message: format!("submit exceeded {:?}", self.submit_timeout),
            }),
        };
        timer.observe_duration(&metrics().trade_latency);

        match result {
            Ok(signature) => {
                metrics().trades_success.inc();
                Ok(signature)
            }
            Err(e) => {
                metrics().trades_failed.inc();
                if let TradeError::SubmissionFailed {
                    outcome: SubmissionOutcome::Unknown,
                    ..
                } = &e
                {
                    self.recheck_custody(prepared).await;
                }
                self.notifier
                    .notify(&prepared.mint, None, TradeStatus::Failed)
                    .await;
                Err(e)
            }
        }
    }

    /// After an ambiguous failure, consult the chain before anyone retries:
    /// the custodian's balance says whether the operation actually landed.
    async fn recheck_custody(&self, prepared: &PreparedTrade) {
        let escrow_token = escrow_token_account(&self.authority, &prepared.mint);
        match self.chain.token_balance(&escrow_token).await {
            Ok(balance) => {
                let held = balance.unwrap_or(0);
                let held_if_applied = match prepared.kind {
                    TradeKind::List => 1,
                    TradeKind::Unlist | TradeKind::Purchase => 0,
                };
                if held == held_if_applied {
                    warn!(
                        mint = %prepared.mint,
                        kind = %prepared.kind,
                        escrow_balance = held,
                        "custody state suggests the operation was applied; do not resubmit blindly"
                    );
                } else {
                    info!(
                        mint = %prepared.mint,
                        kind = %prepared.kind,
                        escrow_balance = held,
                        "custody unchanged after ambiguous failure"
                    );
                }
            }
            Err(e) => {
                warn!(
                    mint = %prepared.mint,
                    error = %e,
                    "could not re-check custody after ambiguous failure"
                );
            }
        }
    }
}

//! Two-phase transaction submission
//!
//! A broadcast either lands durably or fails with a typed terminal error.
//! The primary phase is conservative: preflight simulation on, confirmation
//! required at `confirmed` commitment, a small internal retry bound. If the
//! network layer rejects or times out, the fallback phase refreshes the
//! checkpoint (the original may have expired) and resubmits relaxed:
//! preflight skipped, `processed` commitment, a larger retry bound.
//!
//! The two phases are explicit strategy values, not an inline retry loop,
//! so the policy is testable and swappable.

use std::sync::Arc;
use std::time::Duration;

use solana_client::rpc_config::RpcSendTransactionConfig;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::hash::Hash;
use solana_sdk::signature::{Keypair, Signature};
use solana_sdk::transaction::Transaction;
use tracing::{info, instrument, warn};

use crate::connection::ConfirmOutcome;
use crate::metrics::metrics;
use crate::trade::errors::{SubmissionOutcome, TradeError};
use crate::trade::{Broadcaster, PreparedTrade};

/// One submission strategy: send configuration plus the commitment the
/// signature must reach before the phase counts as successful.
#[derive(Debug, Clone)]
pub struct SubmitPhase {
    pub label: &'static str,
    pub skip_preflight: bool,
    pub commitment: CommitmentConfig,
    pub max_retries: usize,
    pub confirm_wait: Duration,
}

impl SubmitPhase {
    pub fn primary() -> Self {
        Self {
            label: "primary",
            skip_preflight: false,
            commitment: CommitmentConfig::confirmed(),
            max_retries: 3,
            confirm_wait: Duration::from_secs(30),
        }
    }

    pub fn fallback() -> Self {
        Self {
            label: "fallback",
            skip_preflight: true,
            commitment: CommitmentConfig::processed(),
            max_retries: 5,
            confirm_wait: Duration::from_secs(15),
        }
    }

    fn send_config(&self) -> RpcSendTransactionConfig {
        RpcSendTransactionConfig {
            skip_preflight: self.skip_preflight,
            preflight_commitment: Some(self.commitment.commitment),
            max_retries: Some(self.max_retries),
            ..RpcSendTransactionConfig::default()
        }
    }
}

/// How a phase ended when it did not produce a committed signature.
enum PhaseFailure {
    /// Stop immediately - retrying with relaxed settings would be wrong.
    Terminal(TradeError),
    /// Worth escalating to the next phase. `broadcast` records whether the
    /// network accepted the transaction before the failure.
    Transient { broadcast: bool, message: String },
}

pub struct TradeSubmitter<B: Broadcaster> {
    broadcaster: Arc<B>,
    primary: SubmitPhase,
    fallback: SubmitPhase,
}

impl<B: Broadcaster> TradeSubmitter<B> {
    pub fn new(broadcaster: Arc<B>) -> Self {
        Self {
            broadcaster,
            primary: SubmitPhase::primary(),
            fallback: SubmitPhase::fallback(),
        }
    }

    pub fn with_phases(broadcaster: Arc<B>, primary: SubmitPhase, fallback: SubmitPhase) -> Self {
        Self {
            broadcaster,
            primary,
            fallback,
        }
    }

    /// Sign and broadcast, surfacing a final signature or a terminal error.
    ///
    /// A terminal `SubmissionFailed` carries whether any broadcast was
    /// accepted: `NotApplied` is safe to retry outright, `Unknown` requires
    /// the caller to re-check custody first.
    #[instrument(skip(self, prepared, signers), fields(kind = %prepared.kind, mint = %prepared.mint))]
    pub async fn submit(
        &self,
        prepared: &PreparedTrade,
        signers: &[&Keypair],
    ) -> Result<Signature, TradeError> {
        let mut broadcast_accepted = false;

        let primary_message = match self
            .attempt(prepared, signers, &self.primary, prepared.blockhash)
            .await
        {
            Ok(signature) => return Ok(signature),
            Err(PhaseFailure::Terminal(e)) => return Err(e),
            Err(PhaseFailure::Transient { broadcast, message }) => {
                broadcast_accepted |= broadcast;
                warn!(phase = self.primary.label, reason = %message, "escalating to fallback");
                message
            }
        };

        metrics().submit_fallback_total.inc();

        // The checkpoint from the build may have expired by now.
        let blockhash = match self.broadcaster.latest_blockhash().await {
            Ok(hash) => hash,
            Err(e) => {
                return Err(TradeError::SubmissionFailed {
                    outcome: outcome_for(broadcast_accepted),
                    message: format!(
                        "primary failed ({primary_message}); checkpoint refresh failed: {e}"
                    ),
                });
            }
        };

        match self
            .attempt(prepared, signers, &self.fallback, blockhash)
            .await
        {
            Ok(signature) => Ok(signature),
            Err(PhaseFailure::Terminal(e)) => Err(e),
            Err(PhaseFailure::Transient { broadcast, message }) => {
                broadcast_accepted |= broadcast;
                Err(TradeError::SubmissionFailed {
                    outcome: outcome_for(broadcast_accepted),
                    message: format!("primary failed ({primary_message}); fallback failed ({message})"),
                })
            }
        }
    }

    async fn attempt(
        &self,
        prepared: &PreparedTrade,
        signers: &[&Keypair],
        phase: &SubmitPhase,
        blockhash: Hash,
    ) -> Result<Signature, PhaseFailure> {
        let transaction = sign_transaction(prepared, signers, blockhash)
            .map_err(PhaseFailure::Terminal)?;

        let signature = match self
            .broadcaster
            .send_transaction(&transaction, phase.send_config())
            .await
        {
            Ok(signature) => signature,
            Err(e) if e.is_retryable() => {
                return Err(PhaseFailure::Transient {
                    broadcast: false,
                    message: e.to_string(),
                });
            }
            // Preflight rejections and other non-transient failures:
            // relaxing the settings would broadcast a known-bad transaction.
            Err(e) => return Err(PhaseFailure::Terminal(e)),
        };

        info!(
            phase = phase.label,
            signature = %signature,
            commitment = ?phase.commitment.commitment,
            "transaction broadcast"
        );

        match self
            .broadcaster
            .confirm(&signature, phase.commitment, phase.confirm_wait)
            .await
        {
            Ok(ConfirmOutcome::Committed) => Ok(signature),
            // The runtime rejected it; atomicity means nothing was applied.
            Ok(ConfirmOutcome::Reverted(err)) => {
                Err(PhaseFailure::Terminal(TradeError::SubmissionFailed {
                    outcome: SubmissionOutcome::NotApplied,
                    message: format!("transaction reverted on chain: {err}"),
                }))
            }
            Ok(ConfirmOutcome::TimedOut) => Err(PhaseFailure::Transient {
                broadcast: true,
                message: format!(
                    "not observed at {:?} within {:?}",
                    phase.commitment.commitment, phase.confirm_wait
                ),
            }),
            Err(e) if e.is_retryable() => Err(PhaseFailure::Transient {
                broadcast: true,
                message: e.to_string(),
            }),
            Err(e) => Err(PhaseFailure::Terminal(e)),
        }
    }
}

fn outcome_for(broadcast_accepted: bool) -> SubmissionOutcome {
    if broadcast_accepted {
        SubmissionOutcome::Unknown
    } else {
        SubmissionOutcome::NotApplied
    }
}

fn sign_transaction(
    prepared: &PreparedTrade,
    signers: &[&Keypair],
    blockhash: Hash,
) -> Result<Transaction, TradeError> {
    let mut transaction =
        Transaction::new_with_payer(&prepared.instructions, Some(&prepared.payer));
    transaction
        .try_sign(&signers.to_vec(), blockhash)
        .map_err(|e| TradeError::Signing(e.to_string()))?;
    Ok(transaction)
}

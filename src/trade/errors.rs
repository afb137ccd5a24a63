//! Error types for the trade protocol
//!
//! The taxonomy separates caller bugs (never retried), transient transport
//! failures (retried internally up to a bound), precondition violations
//! (expected under concurrent contention, surfaced as actionable), and
//! terminal submission failures.

use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

use crate::connection::ConnectionError;

/// What a terminal submission failure means for the caller.
///
/// `NotApplied` is safe to retry as a whole operation. `Unknown` means at
/// least one broadcast was accepted and never observed at the requested
/// commitment - the caller must re-check on-chain custody before retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionOutcome {
    NotApplied,
    Unknown,
}

#[derive(Debug, Error)]
pub enum TradeError {
    /// Connection establishment exhausted its internal retry bound
    #[error("Connection unavailable after {attempts} attempts: {message}")]
    ConnectionUnavailable { attempts: u32, message: String },

    /// Seller does not hold the asset they are trying to list
    #[error("Insufficient balance: token account {token_account} holds no unit of {mint}")]
    InsufficientBalance { mint: Pubkey, token_account: Pubkey },

    /// The escrow custodian does not hold the asset
    #[error("Asset {mint} is not listed")]
    NotListed { mint: Pubkey },

    /// Buyer cannot cover price plus fee headroom
    #[error("Insufficient funds: required {required} lamports, available {available}")]
    InsufficientFunds { required: u64, available: u64 },

    /// An instruction could not be constructed
    #[error("Instruction build error: {0}")]
    InstructionBuild(String),

    /// Signing failed (wallet unavailable, signer mismatch)
    #[error("Signing failed: {0}")]
    Signing(String),

    /// Transient RPC failure inside a submission phase
    #[error("RPC error: {message}")]
    Rpc { message: String, retryable: bool },

    /// Both submission strategies exhausted
    #[error("Submission failed ({outcome:?}): {message}")]
    SubmissionFailed {
        outcome: SubmissionOutcome,
        message: String,
    },
}

impl TradeError {
    /// Whether retrying the same call might succeed.
    ///
    /// Precondition violations are never retryable - under contention they
    /// are the expected outcome, not a fault.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Rpc { retryable, .. } => *retryable,
            Self::ConnectionUnavailable { .. } => false,
            Self::InsufficientBalance { .. } => false,
            Self::NotListed { .. } => false,
            Self::InsufficientFunds { .. } => false,
            Self::InstructionBuild(_) => false,
            Self::Signing(_) => false,
            Self::SubmissionFailed { .. } => false,
        }
    }

    /// Whether the whole operation can be re-run without re-checking
    /// on-chain custody first.
    pub fn safe_to_retry(&self) -> bool {
        !matches!(
            self,
            Self::SubmissionFailed {
                outcome: SubmissionOutcome::Unknown,
                ..
            }
        )
    }

    /// Error category label for metrics.
    pub fn category(&self) -> &'static str {
        match self {
            Self::ConnectionUnavailable { .. } => "connection",
            Self::InsufficientBalance { .. } => "precondition",
            Self::NotListed { .. } => "precondition",
            Self::InsufficientFunds { .. } => "funds",
            Self::InstructionBuild(_) => "instruction",
            Self::Signing(_) => "signing",
            Self::Rpc { .. } => "rpc",
            Self::SubmissionFailed { .. } => "submission",
        }
    }
}

impl From<ConnectionError> for TradeError {
    fn from(err: ConnectionError) -> Self {
        match err {
            ConnectionError::Unavailable {
                attempts,
                last_error,
            } => Self::ConnectionUnavailable {
                attempts,
                message: last_error,
            },
            ConnectionError::Rpc { message, retryable } => Self::Rpc { message, retryable },
            // Preflight rejection means the transaction was never broadcast:
            // nothing happened, and the relaxed phase must not run it blind.
            ConnectionError::Preflight { message } => Self::SubmissionFailed {
                outcome: SubmissionOutcome::NotApplied,
                message,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precondition_errors_never_retryable() {
        let mint = Pubkey::new_unique();

        assert!(!TradeError::NotListed { mint }.is_retryable());
        assert!(!TradeError::InsufficientBalance {
            mint,
            token_account: Pubkey::new_unique(),
        }
        .is_retryable());
        assert!(!TradeError::InsufficientFunds {
            required: 100,
            available: 50,
        }
        .is_retryable());
    }

    #[test]
    fn test_rpc_retryability_follows_flag() {
        assert!(TradeError::Rpc {
            message: "timeout".into(),
            retryable: true,
        }
        .is_retryable());
        assert!(!TradeError::Rpc {
            message: "invalid param".into(),
            retryable: false,
        }
        .is_retryable());
    }

    #[test]
    fn test_safe_to_retry_distinguishes_unknown_outcome() {
        let not_applied = TradeError::SubmissionFailed {
            outcome: SubmissionOutcome::NotApplied,
            message: "both phases exhausted".into(),
        };
        let unknown = TradeError::SubmissionFailed {
            outcome: SubmissionOutcome::Unknown,
            message: "broadcast accepted, never confirmed".into(),
        };

        assert!(not_applied.safe_to_retry());
        assert!(!unknown.safe_to_retry());
        assert!(TradeError::NotListed {
            mint: Pubkey::new_unique()
        }
        .safe_to_retry());
    }

    #[test]
    fn test_preflight_rejection_maps_to_not_applied() {
        let err: TradeError = ConnectionError::Preflight {
            message: "custom program error: 0x1".into(),
        }
        .into();

        assert!(matches!(
            err,
            TradeError::SubmissionFailed {
                outcome: SubmissionOutcome::NotApplied,
                ..
            }
        ));
    }

    #[test]
    fn test_connection_exhaustion_maps_to_connection_unavailable() {
        let err: TradeError = ConnectionError::Unavailable {
            attempts: 3,
            last_error: "connrefused".into(),
        }
        .into();

        assert!(matches!(
            err,
            TradeError::ConnectionUnavailable { attempts: 3, .. }
        ));
        assert_eq!(err.category(), "connection");
    }
}

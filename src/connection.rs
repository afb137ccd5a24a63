//! Cached RPC connection management
//!
//! Owns the single mutable shared resource in the trade path: a pooled,
//! liveness-checked connection to the chain RPC endpoint. The connection is
//! cached with a validation timestamp and re-established after a freshness
//! window expires, with bounded linear-backoff retry. Establishment is
//! serialized so at most one attempt is in flight; concurrent callers wait
//! and then re-check the cache.

use std::sync::Arc;
use std::time::{Duration, Instant};

use solana_client::client_error::{ClientError, ClientErrorKind};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::RpcSendTransactionConfig;
use solana_client::rpc_request::{RpcError, RpcResponseErrorData};
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::hash::Hash;
use solana_sdk::program_pack::Pack;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::Transaction;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::config::RpcConfig;

/// How often the confirmation loop polls signature statuses.
const CONFIRM_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
    /// Establishment retries exhausted - the endpoint never answered the
    /// liveness check
    #[error("Connection unavailable after {attempts} attempts: {last_error}")]
    Unavailable { attempts: u32, last_error: String },

    /// A call on an established connection failed
    #[error("RPC error: {message}")]
    Rpc { message: String, retryable: bool },

    /// Preflight simulation rejected the transaction before broadcast
    #[error("Preflight rejected transaction: {message}")]
    Preflight { message: String },
}

impl ConnectionError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unavailable { .. } => false,
            Self::Rpc { retryable, .. } => *retryable,
            Self::Preflight { .. } => false,
        }
    }

    /// Classify a client error from the RPC layer.
    pub fn from_client_error(err: ClientError) -> Self {
        match err.kind() {
            ClientErrorKind::RpcError(RpcError::RpcResponseError {
                data: RpcResponseErrorData::SendTransactionPreflightFailure(sim),
                message,
                ..
            }) => {
                let detail = sim
                    .err
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| message.clone());
                Self::Preflight { message: detail }
            }
            ClientErrorKind::Io(_) | ClientErrorKind::Reqwest(_) => Self::Rpc {
                message: err.to_string(),
                retryable: true,
            },
            _ => Self::Rpc {
                retryable: is_transient_message(&err.to_string()),
                message: err.to_string(),
            },
        }
    }
}

fn is_transient_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("timeout")
        || lower.contains("timed out")
        || lower.contains("rate limit")
        || lower.contains("too many requests")
        || lower.contains("429")
        || lower.contains("connection")
        || lower.contains("blockhash not found")
        || lower.contains("node is unhealthy")
}

/// Outcome of waiting for a broadcast signature to reach a commitment level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// Landed and satisfied the requested commitment
    Committed,
    /// Not observed at the requested commitment before the deadline
    TimedOut,
    /// Landed but the runtime rejected it - atomicity means no effects applied
    Reverted(String),
}

struct CachedConnection {
    client: Arc<RpcClient>,
    validated_at: Instant,
}

/// TTL-cached, liveness-checked RPC connection.
///
/// One long-lived instance is injected into every component that talks to
/// the chain; there is no global connection state.
pub struct ConnectionManager {
    url: String,
    commitment: CommitmentConfig,
    request_timeout: Duration,
    freshness: Duration,
    max_attempts: u32,
    base_backoff: Duration,
    cached: RwLock<Option<CachedConnection>>,
    // Serializes establishment so only one attempt is in flight at a time.
    establish_lock: Mutex<()>,
}

impl ConnectionManager {
    pub fn new(config: &RpcConfig) -> Self {
        Self {
            url: config.url.clone(),
            commitment: CommitmentConfig::confirmed(),
            request_timeout: Duration::from_secs(config.timeout_secs),
            freshness: Duration::from_secs(config.freshness_secs),
            max_attempts: config.max_attempts,
            base_backoff: Duration::from_millis(config.backoff_ms),
            cached: RwLock::new(None),
            establish_lock: Mutex::new(()),
        }
    }

    /// Get a connection, reusing the cached one while it is fresh.
    ///
    /// After any validation failure the cache is cleared; a stale connection
    /// is never returned.
    pub async fn get(&self) -> Result<Arc<RpcClient>, ConnectionError> {
        if let Some(client) = self.fresh_cached().await {
            return Ok(client);
        }

        let _guard = self.establish_lock.lock().await;
        // Another caller may have finished establishing while we waited.
        if let Some(client) = self.fresh_cached().await {
            return Ok(client);
        }

        match self.establish().await {
            Ok(client) => {
                *self.cached.write().await = Some(CachedConnection {
                    client: client.clone(),
                    validated_at: Instant::now(),
                });
                Ok(client)
            }
            Err(e) => {
                *self.cached.write().await = None;
                Err(e)
            }
        }
    }

    /// Force the next `get()` to re-establish.
    ///
    /// Called when a previously healthy connection starts misbehaving.
    pub async fn reset(&self) {
        debug!("connection cache reset");
        *self.cached.write().await = None;
    }

    async fn fresh_cached(&self) -> Option<Arc<RpcClient>> {
        let cached = self.cached.read().await;
        cached.as_ref().and_then(|c| {
            (c.validated_at.elapsed() < self.freshness).then(|| c.client.clone())
        })
    }

    #[instrument(skip(self), fields(url = %self.url))]
    async fn establish(&self) -> Result<Arc<RpcClient>, ConnectionError> {
        let mut last_error = String::new();

        for attempt in 1..=self.max_attempts {
            let client = Arc::new(RpcClient::new_with_timeout_and_commitment(
                self.url.clone(),
                self.request_timeout,
                self.commitment,
            ));

            match client.get_version().await {
                Ok(version) => {
                    info!(
                        attempt,
                        solana_core = %version.solana_core,
                        "RPC connection established"
                    );
                    return Ok(client);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "RPC liveness check failed");
                    last_error = e.to_string();
                }
            }

            if attempt < self.max_attempts {
                // Linear backoff between establishment attempts.
                tokio::time::sleep(self.base_backoff * attempt).await;
            }
        }

        Err(ConnectionError::Unavailable {
            attempts: self.max_attempts,
            last_error,
        })
    }

    /// Balance of an SPL token account; `None` when the account does not exist.
    pub async fn token_balance(
        &self,
        token_account: &Pubkey,
    ) -> Result<Option<u64>, ConnectionError> {
        let client = self.get().await?;
        let account = client
            .get_account_with_commitment(token_account, self.commitment)
            .await
            .map_err(ConnectionError::from_client_error)?
            .value;

        match account {
            None => Ok(None),
            Some(account) => {
                let token = spl_token::state::Account::unpack(&account.data).map_err(|e| {
                    ConnectionError::Rpc {
                        message: format!("token account {token_account} undecodable: {e}"),
                        retryable: false,
                    }
                })?;
                Ok(Some(token.amount))
            }
        }
    }

    /// Native-token balance in lamports.
    pub async fn lamports(&self, owner: &Pubkey) -> Result<u64, ConnectionError> {
        let client = self.get().await?;
        client
            .get_balance(owner)
            .await
            .map_err(ConnectionError::from_client_error)
    }

    /// Fetch a fresh chain checkpoint for transaction signing.
    pub async fn latest_blockhash(&self) -> Result<Hash, ConnectionError> {
        let client = self.get().await?;
        client
            .get_latest_blockhash()
            .await
            .map_err(ConnectionError::from_client_error)
    }

    /// Broadcast a signed transaction with the given send configuration.
    pub async fn send_transaction(
        &self,
        transaction: &Transaction,
        config: RpcSendTransactionConfig,
    ) -> Result<Signature, ConnectionError> {
        let client = self.get().await?;
        client
            .send_transaction_with_config(transaction, config)
            .await
            .map_err(ConnectionError::from_client_error)
    }

    /// Poll until `signature` satisfies `commitment`, the transaction is seen
    /// to have failed, or `wait` elapses.
    pub async fn confirm(
        &self,
        signature: &Signature,
        commitment: CommitmentConfig,
        wait: Duration,
    ) -> Result<ConfirmOutcome, ConnectionError> {
        let client = self.get().await?;
        let deadline = Instant::now() + wait;

        loop {
            let statuses = client
                .get_signature_statuses(&[*signature])
                .await
                .map_err(ConnectionError::from_client_error)?;

            if let Some(Some(status)) = statuses.value.into_iter().next() {
                if let Some(err) = status.err {
                    return Ok(ConfirmOutcome::Reverted(err.to_string()));
                }
                if status.satisfies_commitment(commitment) {
                    return Ok(ConfirmOutcome::Committed);
                }
            }

            if Instant::now() >= deadline {
                return Ok(ConfirmOutcome::TimedOut);
            }
            tokio::time::sleep(CONFIRM_POLL_INTERVAL).await;
        }
    }
}

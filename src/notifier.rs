//! Trade state notification to the metadata-store mirror
//!
//! After a transaction is observed as sent, the external metadata store is
//! told the new state so off-chain views stay consistent. The chain is
//! authoritative; the mirror may lag. Notification failure is logged, never
//! propagated - repeated notifications with the same payload are an upsert
//! on the mirror side, so retrying out of band is always safe.

use std::time::Duration;

use serde::Serialize;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use tracing::{debug, warn};

use crate::config::NotifierConfig;
use crate::metrics::metrics;

/// Off-chain listing state as mirrored by the metadata store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Pending,
    Sold,
    Unlisted,
    Failed,
}

impl std::fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Sold => write!(f, "sold"),
            Self::Unlisted => write!(f, "unlisted"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Serialize)]
struct TradeStateUpdate {
    mint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    signature: Option<String>,
    status: TradeStatus,
}

pub struct TradeStateNotifier {
    client: reqwest::Client,
    endpoint: Option<String>,
}

impl TradeStateNotifier {
    pub fn new(config: &NotifierConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: config.endpoint.clone(),
        }
    }

    /// A notifier that drops every update. Used when no mirror endpoint is
    /// configured and in tests.
    pub fn disabled() -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: None,
        }
    }

    /// Best-effort state update. Never returns an error: the on-chain
    /// outcome is already settled by the time this runs.
    pub async fn notify(&self, mint: &Pubkey, signature: Option<&Signature>, status: TradeStatus) {
        let Some(endpoint) = &self.endpoint else {
            debug!(mint = %mint, status = %status, "notifier disabled, skipping update");
            return;
        };

        let payload = TradeStateUpdate {
            mint: mint.to_string(),
            signature: signature.map(|s| s.to_string()),
            status,
        };

        match self.client.post(endpoint).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                debug!(mint = %mint, status = %status, "trade state mirrored");
            }
            Ok(response) => {
                metrics().notifier_failures_total.inc();
                warn!(
                    mint = %mint,
                    status = %status,
                    http_status = %response.status(),
                    "metadata store rejected trade state update"
                );
            }
            Err(e) => {
                metrics().notifier_failures_total.inc();
                warn!(
                    mint = %mint,
                    status = %status,
                    error = %e,
                    "trade state update failed"
                );
            }
        }
    }
}

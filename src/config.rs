//! Configuration module for the marketplace trade engine
//!
//! All configuration comes from a TOML file with environment loaded via
//! dotenvy; the RPC endpoint and credentials are never hard-coded.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// RPC endpoint configuration
    pub rpc: RpcConfig,

    /// Wallet configuration
    pub wallet: WalletConfig,

    /// Marketplace parameters
    pub market: MarketConfig,

    /// Metadata store notification endpoint
    #[serde(default)]
    pub notifier: NotifierConfig,

    /// Monitoring and metrics
    #[serde(default)]
    pub monitoring: MonitoringConfig,

    /// Trade execution tuning
    #[serde(default)]
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// RPC endpoint URL (with any access credential embedded)
    pub url: String,

    /// Request timeout in seconds
    #[serde(default = "default_rpc_timeout")]
    pub timeout_secs: u64,

    /// How long a validated connection is reused without re-checking
    #[serde(default = "default_freshness")]
    pub freshness_secs: u64,

    /// Establishment attempts before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base backoff between establishment attempts (grows linearly)
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletConfig {
    /// Path to keypair file
    pub keypair_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Marketplace authority address; seeds escrow derivation and receives
    /// the commission split
    pub authority: String,

    /// Commission on purchases, in basis points
    #[serde(default = "default_fee_bps")]
    pub fee_bps: u16,
}

impl MarketConfig {
    pub fn authority_pubkey(&self) -> anyhow::Result<Pubkey> {
        Pubkey::from_str(&self.authority)
            .map_err(|e| anyhow::anyhow!("invalid market.authority '{}': {e}", self.authority))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// Metadata store endpoint; notifications are skipped when unset
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_notifier_timeout")]
    pub timeout_secs: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: default_notifier_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Enable the Prometheus metrics endpoint
    #[serde(default = "default_true")]
    pub enable_metrics: bool,

    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enable_metrics: default_true(),
            metrics_port: default_metrics_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Wall-clock bound on a whole submit, covering both phases
    #[serde(default = "default_submit_timeout")]
    pub submit_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            submit_timeout_secs: default_submit_timeout(),
        }
    }
}

// Default value functions
fn default_rpc_timeout() -> u64 {
    30
}
fn default_freshness() -> u64 {
    300
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_ms() -> u64 {
    500
}
fn default_fee_bps() -> u16 {
    250
}
fn default_notifier_timeout() -> u64 {
    10
}
fn default_metrics_port() -> u16 {
    9090
}
fn default_submit_timeout() -> u64 {
    75
}
fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variables available
    pub fn from_file_with_env(path: &str) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_file(path)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.rpc.url.is_empty() {
            anyhow::bail!("rpc.url must not be empty");
        }
        if self.rpc.max_attempts == 0 {
            anyhow::bail!("rpc.max_attempts must be at least 1");
        }
        if self.market.fee_bps > 10_000 {
            anyhow::bail!(
                "market.fee_bps must not exceed 10000, got {}",
                self.market.fee_bps
            );
        }
        self.market.authority_pubkey()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_toml() -> String {
        format!(
            r#"
            [rpc]
            url = "https://api.mainnet-beta.solana.com"

            [wallet]
            keypair_path = "wallet.json"

            [market]
            authority = "{}"
            "#,
            Pubkey::new_unique()
        )
    }

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config: Config = toml::from_str(&minimal_toml()).expect("parses");
        config.validate().expect("valid");

        assert_eq!(config.rpc.timeout_secs, 30);
        assert_eq!(config.rpc.freshness_secs, 300);
        assert_eq!(config.rpc.max_attempts, 3);
        assert_eq!(config.market.fee_bps, 250);
        assert!(config.notifier.endpoint.is_none());
        assert!(config.monitoring.enable_metrics);
        assert_eq!(config.engine.submit_timeout_secs, 75);
    }

    #[test]
    fn test_fee_bps_above_bound_rejected() {
        let toml = format!(
            r#"
            [rpc]
            url = "https://api.mainnet-beta.solana.com"

            [wallet]
            keypair_path = "wallet.json"

            [market]
            authority = "{}"
            fee_bps = 10001
            "#,
            Pubkey::new_unique()
        );
        let config: Config = toml::from_str(&toml).expect("parses");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_authority_rejected() {
        let toml = r#"
            [rpc]
            url = "https://api.mainnet-beta.solana.com"

            [wallet]
            keypair_path = "wallet.json"

            [market]
            authority = "not-a-pubkey"
        "#;
        let config: Config = toml::from_str(toml).expect("parses");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_round_trips_through_toml() {
        let config: Config = toml::from_str(&minimal_toml()).expect("parses");
        let rendered = toml::to_string(&config).expect("serializes");
        let reparsed: Config = toml::from_str(&rendered).expect("reparses");
        assert_eq!(reparsed.market.authority, config.market.authority);
        assert_eq!(reparsed.rpc.freshness_secs, config.rpc.freshness_secs);
    }
}

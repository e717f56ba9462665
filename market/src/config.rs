use alloy_primitives::Address;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;

pub const DEFAULT_IPFS_GATEWAY: &str = "https://ipfs.io/ipfs/";
pub const PLACEHOLDER_IMAGE: &str = "/placeholder.svg";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_ms: u64,
    pub max_connections: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            max_connections: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub url: String,
    pub receipt_poll_ms: u64,
    /// Ceiling on a single receipt wait; a chain-client default, not an
    /// orchestrator deadline.
    pub receipt_timeout_ms: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8545".to_string(),
            receipt_poll_ms: 1_000,
            receipt_timeout_ms: 180_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ContractsConfig {
    pub marketplace: Option<Address>,
    pub usdc: Option<Address>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    pub url: String,
    pub poll_interval_ms: u64,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8000/subgraphs/name/nft-marketplace".to_string(),
            poll_interval_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    pub gateway: String,
    pub cache_ttl_ms: u64,
    pub retries: u32,
    pub retry_backoff_ms: u64,
    pub placeholder_image: String,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            gateway: DEFAULT_IPFS_GATEWAY.to_string(),
            cache_ttl_ms: 5 * 60 * 1_000,
            retries: 2,
            retry_backoff_ms: 1_000,
            placeholder_image: PLACEHOLDER_IMAGE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    pub project_id: Option<String>,
    pub account: Option<Address>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    pub http: HttpConfig,
    pub rpc: RpcConfig,
    pub contracts: ContractsConfig,
    pub indexer: IndexerConfig,
    pub metadata: MetadataConfig,
    pub wallet: WalletConfig,
    pub enable_testnets: bool,
    pub metrics_port: Option<u16>,
}

fn parse_address(key: &str, raw: &str) -> Result<Address> {
    raw.trim()
        .parse::<Address>()
        .with_context(|| format!("{} is not an address: '{}'", key, raw))
}

fn parse_flag(raw: &str) -> bool {
    matches!(raw.trim().to_lowercase().as_str(), "1" | "true" | "yes")
}

impl MarketConfig {
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    /// Applies overrides from `lookup`, which maps a variable name to its value.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("MARKETPLACE_ADDRESS") {
            self.contracts.marketplace = Some(parse_address("MARKETPLACE_ADDRESS", &v)?);
        }
        if let Some(v) = lookup("USDC_ADDRESS") {
            self.contracts.usdc = Some(parse_address("USDC_ADDRESS", &v)?);
        }
        if let Some(v) = lookup("SUBGRAPH_URL") {
            self.indexer.url = v;
        }
        if let Some(v) = lookup("WALLETCONNECT_PROJECT_ID") {
            self.wallet.project_id = Some(v);
        }
        if let Some(v) = lookup("WALLET_ADDRESS") {
            self.wallet.account = Some(parse_address("WALLET_ADDRESS", &v)?);
        }
        if let Some(v) = lookup("RPC_URL") {
            self.rpc.url = v;
        }
        if let Some(v) = lookup("ENABLE_TESTNETS") {
            self.enable_testnets = parse_flag(&v);
        }
        if let Some(v) = lookup("METRICS_PORT") {
            let port = v
                .trim()
                .parse::<u16>()
                .with_context(|| format!("METRICS_PORT is not a port: '{}'", v))?;
            self.metrics_port = Some(port);
        }
        Ok(())
    }

    pub fn marketplace(&self) -> Result<Address> {
        self.contracts
            .marketplace
            .ok_or_else(|| anyhow!("marketplace address not configured (MARKETPLACE_ADDRESS)"))
    }

    pub fn usdc(&self) -> Result<Address> {
        self.contracts
            .usdc
            .ok_or_else(|| anyhow!("stablecoin address not configured (USDC_ADDRESS)"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_refresh_and_cache_policy() {
        let cfg = MarketConfig::default();
        assert_eq!(cfg.indexer.poll_interval_ms, 10_000);
        assert_eq!(cfg.metadata.cache_ttl_ms, 300_000);
        assert_eq!(cfg.metadata.retries, 2);
        assert!(!cfg.enable_testnets);
        assert!(cfg.marketplace().is_err());
    }

    #[test]
    fn overrides_replace_file_values() {
        let vars: HashMap<&str, &str> = [
            ("MARKETPLACE_ADDRESS", "0x1111111111111111111111111111111111111111"),
            ("USDC_ADDRESS", "0x2222222222222222222222222222222222222222"),
            ("SUBGRAPH_URL", "https://indexer.example/graphql"),
            ("ENABLE_TESTNETS", "true"),
            ("METRICS_PORT", "9100"),
        ]
        .into_iter()
        .collect();
        let mut cfg = MarketConfig::default();
        cfg.apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(cfg.marketplace().unwrap(), Address::repeat_byte(0x11));
        assert_eq!(cfg.usdc().unwrap(), Address::repeat_byte(0x22));
        assert_eq!(cfg.indexer.url, "https://indexer.example/graphql");
        assert!(cfg.enable_testnets);
        assert_eq!(cfg.metrics_port, Some(9100));
    }

    #[test]
    fn bad_address_is_reported() {
        let mut cfg = MarketConfig::default();
        let err = cfg
            .apply_overrides(|k| (k == "USDC_ADDRESS").then(|| "not-an-address".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("USDC_ADDRESS"));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: MarketConfig = serde_json::from_str(
            r#"{"indexer": {"url": "https://x"}, "enable_testnets": true}"#,
        )
        .unwrap();
        assert_eq!(cfg.indexer.url, "https://x");
        assert_eq!(cfg.indexer.poll_interval_ms, 10_000);
        assert_eq!(cfg.rpc.receipt_poll_ms, 1_000);
        assert!(cfg.enable_testnets);
    }
}

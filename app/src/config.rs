use std::path::Path;

use anyhow::{Context, Result};
use market::MarketConfig;
use tokio::fs;
use tracing::info;

/// Reads the JSON config at `config_path` when it exists, then applies
/// environment overrides. A marketplace address is mandatory.
pub async fn load_config(config_path: &Path) -> Result<MarketConfig> {
    let mut cfg = read_config_file(config_path).await?;
    cfg.apply_env().context("apply environment overrides")?;
    cfg.marketplace()?;
    Ok(cfg)
}

async fn read_config_file(config_path: &Path) -> Result<MarketConfig> {
    if !fs::try_exists(config_path).await.unwrap_or(false) {
        info!(target: "app", path = %config_path.display(), "no config file; using defaults and environment");
        return Ok(MarketConfig::default());
    }
    let raw = fs::read(config_path)
        .await
        .with_context(|| format!("read config file: {}", config_path.display()))?;
    serde_json::from_slice(&raw).context("parse config json")
}

/// Writes the effective configuration next to `path` and swaps it in.
pub async fn write_config(path: &Path, cfg: &MarketConfig) -> Result<()> {
    let mut json = serde_json::to_vec_pretty(cfg).context("serialize config")?;
    json.push(b'\n');
    let tmp_path = temp_path(path);
    fs::write(&tmp_path, &json)
        .await
        .with_context(|| format!("write temp config: {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("replace config: {}", path.display()))?;
    Ok(())
}

fn temp_path(path: &Path) -> std::path::PathBuf {
    let mut os_string = path.as_os_str().to_os_string();
    os_string.push(".tmp");
    os_string.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Address;

    fn scratch(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("marketplace-{}-{}.json", name, std::process::id()))
    }

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let cfg = read_config_file(&scratch("absent")).await.unwrap();
        assert_eq!(cfg.indexer.poll_interval_ms, 10_000);
    }

    #[tokio::test]
    async fn written_config_reads_back() {
        let path = scratch("roundtrip");
        let mut cfg = MarketConfig::default();
        cfg.contracts.marketplace = Some(Address::repeat_byte(0x99));
        cfg.metadata.retries = 4;
        write_config(&path, &cfg).await.unwrap();
        let back = read_config_file(&path).await.unwrap();
        assert_eq!(back.contracts.marketplace, Some(Address::repeat_byte(0x99)));
        assert_eq!(back.metadata.retries, 4);
        let _ = fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn malformed_json_is_an_error() {
        let path = scratch("bad");
        fs::write(&path, b"{not json").await.unwrap();
        assert!(read_config_file(&path).await.is_err());
        let _ = fs::remove_file(&path).await;
    }
}

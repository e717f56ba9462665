//! Token metadata resolution: tokenURI, gateway rewrite, fetch, cache, fallback.

use crate::config::MetadataConfig;
use crate::http_pool::HttpPool;
use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use dashmap::DashMap;
use market_core::{
    DisplayMetadata, MarketError, MetadataSource, Metrics, NftMetadata, TokenUriSource,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const IPFS_SCHEME: &str = "ipfs://";

/// Rewrites `ipfs://` URIs onto an HTTP gateway; anything else passes through.
pub fn normalize_uri(uri: &str, gateway: &str) -> String {
    match uri.strip_prefix(IPFS_SCHEME) {
        Some(rest) => format!("{}/{}", gateway.trim_end_matches('/'), rest),
        None => uri.to_string(),
    }
}

struct CachedDoc {
    doc: NftMetadata,
    fetched_at: Instant,
}

pub struct MetadataResolver<U: TokenUriSource, M: MetadataSource> {
    uris: Arc<U>,
    docs: Arc<M>,
    cache: DashMap<(Address, U256), CachedDoc>,
    cfg: MetadataConfig,
    metrics: Arc<Metrics>,
}

impl<U: TokenUriSource, M: MetadataSource> MetadataResolver<U, M> {
    pub fn new(uris: Arc<U>, docs: Arc<M>, cfg: MetadataConfig, metrics: Arc<Metrics>) -> Self {
        Self {
            uris,
            docs,
            cache: DashMap::new(),
            cfg,
            metrics,
        }
    }

    fn ttl(&self) -> Duration {
        Duration::from_millis(self.cfg.cache_ttl_ms)
    }

    fn cached(&self, key: &(Address, U256)) -> Option<NftMetadata> {
        let hit = self.cache.get(key)?;
        if hit.fetched_at.elapsed() < self.ttl() {
            return Some(hit.doc.clone());
        }
        drop(hit);
        self.cache.remove(key);
        None
    }

    async fn fetch_once(&self, nft: Address, token_id: U256) -> Result<NftMetadata, MarketError> {
        let uri = self.uris.token_uri(nft, token_id).await?;
        let url = normalize_uri(&uri, &self.cfg.gateway);
        let mut doc = self.docs.fetch(&url).await?;
        doc.image = normalize_uri(&doc.image, &self.cfg.gateway);
        Ok(doc)
    }

    /// Descriptor for the token, from cache when fresh. Failed lookups are
    /// retried `retries` times and never cached.
    pub async fn try_resolve(
        &self,
        nft: Address,
        token_id: U256,
    ) -> Result<NftMetadata, MarketError> {
        let key = (nft, token_id);
        if let Some(doc) = self.cached(&key) {
            return Ok(doc);
        }
        let attempts = self.cfg.retries + 1;
        let mut last_err = None;
        for attempt in 1..=attempts {
            match self.fetch_once(nft, token_id).await {
                Ok(doc) => {
                    debug!(target: "metadata", nft = %nft, token_id = %token_id, attempt, "resolved");
                    let ttl = self.ttl();
                    self.cache.retain(|_, c| c.fetched_at.elapsed() < ttl);
                    self.cache.insert(
                        key,
                        CachedDoc {
                            doc: doc.clone(),
                            fetched_at: Instant::now(),
                        },
                    );
                    return Ok(doc);
                }
                Err(err) => {
                    warn!(target: "metadata", nft = %nft, token_id = %token_id, attempt, error = %err, "lookup failed");
                    last_err = Some(err);
                    if attempt < attempts {
                        let backoff = self.cfg.retry_backoff_ms * u64::from(attempt);
                        tokio::time::sleep(Duration::from_millis(backoff)).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| MarketError::DataFetch("metadata lookup failed".into())))
    }

    /// What a card shows. Never fails; unresolved tokens get placeholders.
    pub async fn resolve(&self, nft: Address, token_id: U256) -> DisplayMetadata {
        match self.try_resolve(nft, token_id).await {
            Ok(doc) => self.display(token_id, doc),
            Err(_) => {
                self.metrics.metadata_failures.inc();
                self.fallback(token_id)
            }
        }
    }

    fn display(&self, token_id: U256, doc: NftMetadata) -> DisplayMetadata {
        let fallback = self.fallback(token_id);
        DisplayMetadata {
            name: if doc.name.is_empty() { fallback.name } else { doc.name },
            image: if doc.image.is_empty() { fallback.image } else { doc.image },
            description: Some(doc.description).filter(|d| !d.is_empty()),
            resolved: true,
        }
    }

    fn fallback(&self, token_id: U256) -> DisplayMetadata {
        DisplayMetadata {
            name: format!("NFT #{}", token_id),
            image: self.cfg.placeholder_image.clone(),
            description: None,
            resolved: false,
        }
    }
}

/// Fetches descriptor documents over HTTP.
pub struct HttpMetadataFetcher {
    pool: HttpPool,
}

impl HttpMetadataFetcher {
    pub fn new(pool: HttpPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MetadataSource for HttpMetadataFetcher {
    async fn fetch(&self, url: &str) -> Result<NftMetadata, MarketError> {
        let resp = self
            .pool
            .get(url, None)
            .await
            .map_err(|e| MarketError::DataFetch(format!("GET {}: {:#}", url, e)))?;
        if !resp.is_success() {
            return Err(MarketError::DataFetch(format!(
                "GET {}: http {}",
                url, resp.status
            )));
        }
        let js = resp
            .json
            .ok_or_else(|| MarketError::DataFetch(format!("GET {}: not json", url)))?;
        serde_json::from_value(js).map_err(MarketError::data_fetch)
    }
}

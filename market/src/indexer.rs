//! Listing index: GraphQL client over the subgraph and the polled projection.

use crate::http_pool::HttpPool;
use alloy_primitives::{hex, Address, U256};
use async_trait::async_trait;
use market_core::{
    parse_raw_amount, Listing, ListingSource, ListingStatus, MarketError, Metrics,
};
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const ACTIVE_ITEMS_QUERY: &str = r#"query GetActiveItems {
  activeItems(
    where: { buyer: "0x0000000000000000000000000000000000000000" }
    orderBy: id
    orderDirection: desc
  ) {
    id
    buyer
    seller
    nftAddress
    tokenId
    price
    paymentToken
  }
}"#;

pub const ACTIVE_ITEM_QUERY: &str = r#"query GetActiveItem($id: ID!) {
  activeItem(id: $id) {
    id
    buyer
    seller
    nftAddress
    tokenId
    price
    paymentToken
  }
}"#;

/// Indexer entity id: token id in lower-case hex without prefix, followed by
/// the lower-cased `0x` collection address.
pub fn listing_key(nft: Address, token_id: U256) -> String {
    format!("{:x}{}", token_id, hex::encode_prefixed(nft.as_slice()))
}

fn field<'a>(item: &'a Value, name: &str) -> Result<&'a str, MarketError> {
    item.get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| MarketError::DataFetch(format!("activeItem missing '{}'", name)))
}

fn address_field(item: &Value, name: &str) -> Result<Address, MarketError> {
    field(item, name)?
        .parse::<Address>()
        .map_err(|e| MarketError::DataFetch(format!("activeItem '{}': {}", name, e)))
}

fn amount_field(item: &Value, name: &str) -> Result<U256, MarketError> {
    parse_raw_amount(field(item, name)?)
        .map_err(|e| MarketError::DataFetch(format!("activeItem '{}': {}", name, e)))
}

pub fn parse_item(item: &Value) -> Result<Listing, MarketError> {
    let buyer = match item.get("buyer").and_then(|v| v.as_str()) {
        Some(b) if !b.is_empty() => Some(
            b.parse::<Address>()
                .map_err(|e| MarketError::DataFetch(format!("activeItem 'buyer': {}", e)))?,
        ),
        _ => None,
    };
    Ok(Listing {
        id: field(item, "id")?.to_string(),
        seller: address_field(item, "seller")?,
        nft_address: address_field(item, "nftAddress")?,
        token_id: amount_field(item, "tokenId")?,
        price: amount_field(item, "price")?,
        payment_token: address_field(item, "paymentToken")?,
        buyer,
    })
}

/// Keeps available listings only, newest id first.
pub fn active_only(mut items: Vec<Listing>) -> Vec<Listing> {
    items.retain(|l| l.status() == ListingStatus::Available);
    items.sort_by(|a, b| b.id.cmp(&a.id));
    items
}

/// Case-insensitive substring match on token id, collection or seller.
/// An empty query keeps everything.
pub fn search_listings(listings: &[Listing], query: &str) -> Vec<Listing> {
    let q = query.trim().to_lowercase();
    if q.is_empty() {
        return listings.to_vec();
    }
    listings
        .iter()
        .filter(|l| {
            l.token_id.to_string().contains(&q)
                || hex::encode_prefixed(l.nft_address.as_slice()).contains(&q)
                || hex::encode_prefixed(l.seller.as_slice()).contains(&q)
        })
        .cloned()
        .collect()
}

fn graphql_data(js: Value) -> Result<Value, MarketError> {
    if let Some(errs) = js.get("errors").and_then(|e| e.as_array()) {
        if !errs.is_empty() {
            let msg = errs
                .iter()
                .filter_map(|e| e.get("message").and_then(|m| m.as_str()))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(MarketError::DataFetch(format!("graphql: {}", msg)));
        }
    }
    js.get("data")
        .cloned()
        .ok_or_else(|| MarketError::DataFetch("graphql response without data".into()))
}

pub fn parse_active_items(js: Value) -> Result<Vec<Listing>, MarketError> {
    let data = graphql_data(js)?;
    let items = data
        .get("activeItems")
        .and_then(|v| v.as_array())
        .ok_or_else(|| MarketError::DataFetch("graphql response without activeItems".into()))?;
    let listings = items.iter().map(parse_item).collect::<Result<Vec<_>, _>>()?;
    Ok(active_only(listings))
}

pub fn parse_active_item(js: Value) -> Result<Option<Listing>, MarketError> {
    let data = graphql_data(js)?;
    match data.get("activeItem") {
        None | Some(Value::Null) => Ok(None),
        Some(item) => parse_item(item).map(Some),
    }
}

pub struct ListingIndexClient {
    pool: HttpPool,
}

impl ListingIndexClient {
    pub fn new(pool: HttpPool) -> Self {
        Self { pool }
    }

    async fn query(&self, query: &str, variables: Value) -> Result<Value, MarketError> {
        let body = json!({ "query": query, "variables": variables });
        let resp = self
            .pool
            .post("", None, Some(&body))
            .await
            .map_err(|e| MarketError::DataFetch(format!("indexer: {:#}", e)))?;
        if !resp.is_success() {
            return Err(MarketError::DataFetch(format!(
                "indexer http {}: {}",
                resp.status,
                resp.text.unwrap_or_default()
            )));
        }
        resp.json
            .ok_or_else(|| MarketError::DataFetch("indexer returned non-json body".into()))
    }

    pub async fn list_active(&self) -> Result<Vec<Listing>, MarketError> {
        let js = self.query(ACTIVE_ITEMS_QUERY, json!({})).await?;
        let items = parse_active_items(js)?;
        debug!(target: "indexer", count = items.len(), "active items");
        Ok(items)
    }

    pub async fn get_one(&self, nft: Address, token_id: U256) -> Result<Option<Listing>, MarketError> {
        self.active_item(&listing_key(nft, token_id)).await
    }
}

#[async_trait]
impl ListingSource for ListingIndexClient {
    async fn active_items(&self) -> Result<Vec<Listing>, MarketError> {
        self.list_active().await
    }

    async fn active_item(&self, id: &str) -> Result<Option<Listing>, MarketError> {
        let js = self.query(ACTIVE_ITEM_QUERY, json!({ "id": id })).await?;
        parse_active_item(js)
    }
}

/// Last good listing projection, refreshed by polling. Each successful poll
/// replaces the whole snapshot; a failed one keeps it.
pub struct ListingFeed<S: ListingSource> {
    source: Arc<S>,
    snapshot: RwLock<Arc<Vec<Listing>>>,
    refreshed_at: RwLock<Option<Instant>>,
    metrics: Arc<Metrics>,
}

impl<S: ListingSource + 'static> ListingFeed<S> {
    pub fn new(source: Arc<S>, metrics: Arc<Metrics>) -> Self {
        Self {
            source,
            snapshot: RwLock::new(Arc::new(Vec::new())),
            refreshed_at: RwLock::new(None),
            metrics,
        }
    }

    pub fn snapshot(&self) -> Arc<Vec<Listing>> {
        self.snapshot.read().clone()
    }

    pub fn refreshed_at(&self) -> Option<Instant> {
        *self.refreshed_at.read()
    }

    pub fn search(&self, query: &str) -> Vec<Listing> {
        search_listings(&self.snapshot.read(), query)
    }

    pub fn get(&self, nft: Address, token_id: U256) -> Option<Listing> {
        let key = listing_key(nft, token_id);
        self.snapshot.read().iter().find(|l| l.id == key).cloned()
    }

    pub async fn poll_once(&self) -> Result<usize, MarketError> {
        self.metrics.index_polls.inc();
        match self.source.active_items().await {
            Ok(items) => {
                let items = active_only(items);
                let n = items.len();
                *self.snapshot.write() = Arc::new(items);
                *self.refreshed_at.write() = Some(Instant::now());
                Ok(n)
            }
            Err(err) => {
                self.metrics.index_poll_failures.inc();
                warn!(target: "indexer", error = %err, "poll failed; keeping previous listings");
                Err(err)
            }
        }
    }

    /// Polls until `shutdown` flips to true or its sender is dropped.
    pub fn spawn(
        self: Arc<Self>,
        every: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(target: "indexer", interval_ms = every.as_millis() as u64, "listing poller started");
            let mut iv = tokio::time::interval(every);
            iv.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = iv.tick() => {
                        let _ = self.poll_once().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!(target: "indexer", "listing poller stopped");
        })
    }
}

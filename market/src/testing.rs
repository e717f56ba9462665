//! In-memory fakes for the core ports.

use alloy_primitives::{Address, Bytes, TxHash, U256};
use async_trait::async_trait;
use market_core::*;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

fn selector_of(data: &[u8]) -> [u8; 4] {
    let mut sel = [0u8; 4];
    if data.len() >= 4 {
        sel.copy_from_slice(&data[..4]);
    }
    sel
}

/// Wallet that records every request. Failures and reverts are keyed by
/// call selector.
pub struct MockWallet {
    session: Session,
    sent: Mutex<Vec<TxRequest>>,
    send_errors: Mutex<HashMap<[u8; 4], MarketError>>,
    reverts: Mutex<HashSet<[u8; 4]>>,
    mined: Mutex<HashMap<TxHash, [u8; 4]>>,
    receipt_gate: Mutex<Option<Arc<Notify>>>,
}

impl MockWallet {
    pub fn new(account: Address, chain_id: u64) -> Self {
        Self {
            session: Session { account, chain_id },
            sent: Mutex::new(Vec::new()),
            send_errors: Mutex::new(HashMap::new()),
            reverts: Mutex::new(HashSet::new()),
            mined: Mutex::new(HashMap::new()),
            receipt_gate: Mutex::new(None),
        }
    }

    pub fn fail_send(&self, selector: [u8; 4], err: MarketError) {
        self.send_errors.lock().insert(selector, err);
    }

    pub fn revert(&self, selector: [u8; 4]) {
        self.reverts.lock().insert(selector);
    }

    /// Receipt waits block until the returned handle is notified.
    pub fn hold_receipts(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.receipt_gate.lock() = Some(Arc::clone(&gate));
        gate
    }

    pub fn sent(&self) -> Vec<TxRequest> {
        self.sent.lock().clone()
    }

    pub fn sent_selectors(&self) -> Vec<[u8; 4]> {
        self.sent.lock().iter().map(|tx| selector_of(&tx.data)).collect()
    }
}

#[async_trait]
impl Wallet for MockWallet {
    fn session(&self) -> Session {
        self.session
    }

    async fn send_transaction(&self, tx: &TxRequest) -> Result<TxHash, MarketError> {
        let sel = selector_of(&tx.data);
        if let Some(err) = self.send_errors.lock().get(&sel) {
            return Err(err.clone());
        }
        let mut sent = self.sent.lock();
        sent.push(tx.clone());
        let hash = TxHash::with_last_byte(sent.len() as u8);
        self.mined.lock().insert(hash, sel);
        Ok(hash)
    }

    async fn wait_for_receipt(&self, hash: TxHash) -> Result<TxReceipt, MarketError> {
        let gate = self.receipt_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let sel = self
            .mined
            .lock()
            .get(&hash)
            .copied()
            .ok_or_else(|| MarketError::Confirmation {
                hash,
                reason: "unknown transaction".into(),
            })?;
        Ok(TxReceipt {
            hash,
            block_number: Some(1),
            success: !self.reverts.lock().contains(&sel),
            gas_used: Some(21_000),
        })
    }
}

/// Chain reader answering `eth_call` by (contract, selector).
#[derive(Default)]
pub struct MockReader {
    answers: Mutex<HashMap<(Address, [u8; 4]), Vec<u8>>>,
    balances: Mutex<HashMap<Address, U256>>,
    calls: AtomicUsize,
    fail: AtomicBool,
}

impl MockReader {
    pub fn answer(&self, to: Address, selector: [u8; 4], ret: Vec<u8>) {
        self.answers.lock().insert((to, selector), ret);
    }

    pub fn set_native_balance(&self, account: Address, balance: U256) {
        self.balances.lock().insert(account, balance);
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainReader for MockReader {
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, MarketError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(MarketError::DataFetch("reader offline".into()));
        }
        self.answers
            .lock()
            .get(&(to, selector_of(&data)))
            .cloned()
            .map(Bytes::from)
            .ok_or_else(|| MarketError::DataFetch(format!("no answer for call to {}", to)))
    }

    async fn native_balance(&self, account: Address) -> Result<U256, MarketError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(MarketError::DataFetch("reader offline".into()));
        }
        Ok(self
            .balances
            .lock()
            .get(&account)
            .copied()
            .unwrap_or(U256::ZERO))
    }
}

#[derive(Default)]
pub struct MockListingSource {
    items: Mutex<Vec<Listing>>,
    fail: AtomicBool,
    polls: AtomicUsize,
}

impl MockListingSource {
    pub fn set_items(&self, items: Vec<Listing>) {
        *self.items.lock() = items;
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ListingSource for MockListingSource {
    async fn active_items(&self) -> Result<Vec<Listing>, MarketError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(MarketError::DataFetch("indexer unavailable".into()));
        }
        Ok(self.items.lock().clone())
    }

    async fn active_item(&self, id: &str) -> Result<Option<Listing>, MarketError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(MarketError::DataFetch("indexer unavailable".into()));
        }
        Ok(self.items.lock().iter().find(|l| l.id == id).cloned())
    }
}

/// Metadata documents by URL; a URL can be made to fail a number of times
/// before it succeeds.
#[derive(Default)]
pub struct MockMetadataSource {
    docs: Mutex<HashMap<String, NftMetadata>>,
    failures_left: Mutex<HashMap<String, usize>>,
    fetches: Mutex<Vec<String>>,
}

impl MockMetadataSource {
    pub fn insert(&self, url: &str, doc: NftMetadata) {
        self.docs.lock().insert(url.to_string(), doc);
    }

    pub fn fail_times(&self, url: &str, times: usize) {
        self.failures_left.lock().insert(url.to_string(), times);
    }

    pub fn fetches(&self) -> Vec<String> {
        self.fetches.lock().clone()
    }
}

#[async_trait]
impl MetadataSource for MockMetadataSource {
    async fn fetch(&self, url: &str) -> Result<NftMetadata, MarketError> {
        self.fetches.lock().push(url.to_string());
        {
            let mut left = self.failures_left.lock();
            if let Some(n) = left.get_mut(url) {
                if *n > 0 {
                    *n -= 1;
                    return Err(MarketError::DataFetch(format!("{} unavailable", url)));
                }
            }
        }
        self.docs
            .lock()
            .get(url)
            .cloned()
            .ok_or_else(|| MarketError::DataFetch(format!("404 {}", url)))
    }
}

#[derive(Default)]
pub struct MockTokenUris {
    uris: Mutex<HashMap<(Address, U256), String>>,
}

impl MockTokenUris {
    pub fn insert(&self, nft: Address, token_id: U256, uri: &str) {
        self.uris.lock().insert((nft, token_id), uri.to_string());
    }
}

#[async_trait]
impl TokenUriSource for MockTokenUris {
    async fn token_uri(&self, nft: Address, token_id: U256) -> Result<String, MarketError> {
        self.uris
            .lock()
            .get(&(nft, token_id))
            .cloned()
            .ok_or_else(|| MarketError::DataFetch(format!("tokenURI reverted for #{}", token_id)))
    }
}

pub fn listing(id: &str, price: u64, payment_token: Address, buyer: Option<Address>) -> Listing {
    Listing {
        id: id.to_string(),
        seller: Address::repeat_byte(0x11),
        nft_address: Address::repeat_byte(0x22),
        token_id: U256::from(1u8),
        price: U256::from(price),
        payment_token,
        buyer,
    }
}

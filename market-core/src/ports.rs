use crate::error::MarketError;
use crate::model::*;
use alloy_primitives::{Address, Bytes, TxHash, U256};
use async_trait::async_trait;
use std::sync::Arc;

/// The connected wallet. Signs and submits writes; nothing else may.
#[async_trait]
pub trait Wallet: Send + Sync {
    fn session(&self) -> Session;

    /// Resolves once the wallet has signed and the node returned a hash.
    async fn send_transaction(&self, tx: &TxRequest) -> Result<TxHash, MarketError>;

    /// Resolves once the transaction is included; reverts come back as a
    /// receipt with `success == false`.
    async fn wait_for_receipt(&self, hash: TxHash) -> Result<TxReceipt, MarketError>;
}

/// Read-only chain access.
#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, MarketError>;
    async fn native_balance(&self, account: Address) -> Result<U256, MarketError>;
}

/// Indexed listing data.
#[async_trait]
pub trait ListingSource: Send + Sync {
    async fn active_items(&self) -> Result<Vec<Listing>, MarketError>;
    async fn active_item(&self, id: &str) -> Result<Option<Listing>, MarketError>;
}

/// Fetches an off-chain metadata document from an already-resolved URL.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<NftMetadata, MarketError>;
}

/// Token URI lookup for a collection.
#[async_trait]
pub trait TokenUriSource: Send + Sync {
    async fn token_uri(&self, nft: Address, token_id: U256) -> Result<String, MarketError>;
}

/// User-visible notifications.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

impl<T: Notifier + ?Sized> Notifier for Arc<T> {
    fn notify(&self, notice: Notice) {
        (**self).notify(notice)
    }
}

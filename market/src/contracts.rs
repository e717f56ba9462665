//! Typed read access to the marketplace, ERC-20 and ERC-721 contracts.

use crate::abi::{IERC20, IERC721, INftMarketplace};
use alloy_primitives::{Address, U256};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use market_core::{ChainReader, MarketError, TokenUriSource};
use std::sync::Arc;

async fn read<R, C>(reader: &R, to: Address, call: C) -> Result<C::Return, MarketError>
where
    R: ChainReader + ?Sized,
    C: SolCall + Send,
{
    let out = reader.call(to, call.abi_encode().into()).await?;
    C::abi_decode_returns(&out, true)
        .map_err(|e| MarketError::DataFetch(format!("decode {} from {}: {}", C::SIGNATURE, to, e)))
}

/// On-chain view of a listing. A zero price means not listed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnchainListing {
    pub price: U256,
    pub seller: Address,
    pub payment_token: Address,
}

impl OnchainListing {
    pub fn is_listed(&self) -> bool {
        !self.price.is_zero()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    pub is_supported: bool,
    pub decimals: u8,
    pub symbol: String,
}

pub struct MarketplaceContract<R: ChainReader> {
    reader: Arc<R>,
    address: Address,
}

impl<R: ChainReader> MarketplaceContract<R> {
    pub fn new(reader: Arc<R>, address: Address) -> Self {
        Self { reader, address }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub async fn get_listing(
        &self,
        nft: Address,
        token_id: U256,
    ) -> Result<OnchainListing, MarketError> {
        let call = INftMarketplace::getListingCall {
            nftAddress: nft,
            tokenId: token_id,
        };
        let l = read(&*self.reader, self.address, call).await?.listing;
        Ok(OnchainListing {
            price: l.price,
            seller: l.seller,
            payment_token: l.paymentToken,
        })
    }

    pub async fn listing_price_in_token(
        &self,
        nft: Address,
        token_id: U256,
        target_token: Address,
    ) -> Result<U256, MarketError> {
        let call = INftMarketplace::getListingPriceInTokenCall {
            nftAddress: nft,
            tokenId: token_id,
            targetToken: target_token,
        };
        Ok(read(&*self.reader, self.address, call).await?.price)
    }

    pub async fn proceeds(&self, seller: Address, token: Address) -> Result<U256, MarketError> {
        let call = INftMarketplace::getProceedsCall { seller, token };
        Ok(read(&*self.reader, self.address, call).await?.amount)
    }

    pub async fn is_token_supported(&self, token: Address) -> Result<bool, MarketError> {
        let call = INftMarketplace::isTokenSupportedPublicCall { token };
        Ok(read(&*self.reader, self.address, call).await?.supported)
    }

    pub async fn token_info(&self, token: Address) -> Result<TokenInfo, MarketError> {
        let call = INftMarketplace::getTokenInfoCall { token };
        let info = read(&*self.reader, self.address, call).await?.info;
        Ok(TokenInfo {
            is_supported: info.isSupported,
            decimals: info.decimals,
            symbol: info.symbol,
        })
    }

    pub async fn owner(&self) -> Result<Address, MarketError> {
        Ok(read(&*self.reader, self.address, INftMarketplace::getOwnerCall {})
            .await?
            .owner)
    }

    pub async fn native_token(&self) -> Result<Address, MarketError> {
        Ok(read(&*self.reader, self.address, INftMarketplace::NATIVE_TOKENCall {})
            .await?
            .token)
    }
}

pub struct Erc20<R: ChainReader> {
    reader: Arc<R>,
}

impl<R: ChainReader> Erc20<R> {
    pub fn new(reader: Arc<R>) -> Self {
        Self { reader }
    }

    pub async fn balance_of(&self, token: Address, account: Address) -> Result<U256, MarketError> {
        let call = IERC20::balanceOfCall { account };
        Ok(read(&*self.reader, token, call).await?.balance)
    }

    pub async fn decimals(&self, token: Address) -> Result<u8, MarketError> {
        Ok(read(&*self.reader, token, IERC20::decimalsCall {})
            .await?
            .decimals)
    }

    pub async fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, MarketError> {
        let call = IERC20::allowanceCall { owner, spender };
        Ok(read(&*self.reader, token, call).await?.remaining)
    }
}

pub struct Erc721<R: ChainReader> {
    reader: Arc<R>,
}

impl<R: ChainReader> Erc721<R> {
    pub fn new(reader: Arc<R>) -> Self {
        Self { reader }
    }

    pub async fn owner_of(&self, nft: Address, token_id: U256) -> Result<Address, MarketError> {
        let call = IERC721::ownerOfCall { tokenId: token_id };
        Ok(read(&*self.reader, nft, call).await?.owner)
    }
}

#[async_trait]
impl<R: ChainReader> TokenUriSource for Erc721<R> {
    async fn token_uri(&self, nft: Address, token_id: U256) -> Result<String, MarketError> {
        let call = IERC721::tokenURICall { tokenId: token_id };
        Ok(read(&*self.reader, nft, call).await?.uri)
    }
}

//! User actions over the marketplace. Each action checks its preconditions,
//! runs, and reports the outcome as a notice as well as a result.

use std::sync::Arc;

use alloy_primitives::{Address, U256};
use market::{
    explorer_tx_url, listing_key, ApprovalSaga, BalanceOracle, Erc20, Erc721, FormattedBalance,
    ListingFeed, ListingForm, ListingIntent, MarketConfig, MarketplaceContract, MetadataResolver,
    SagaOutcome, TxOrchestrator,
};
use market_core::{
    format_units, Affordability, ChainReader, DisplayMetadata, Listing, ListingSource,
    ListingStatus, MarketError, MetadataSource, Metrics, Notice, Notifier, PaymentToken, Session,
    TokenSymbol, TxOutcome, Wallet,
};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Balances {
    pub native: Option<FormattedBalance>,
    pub usdc: Option<FormattedBalance>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proceeds {
    pub symbol: TokenSymbol,
    pub amount: U256,
    pub formatted: String,
}

pub struct Marketplace<W: Wallet, R: ChainReader, S: ListingSource, M: MetadataSource> {
    session: Session,
    usdc: Option<Address>,
    orch: Arc<TxOrchestrator<W, R>>,
    saga: ApprovalSaga<W, R>,
    oracle: BalanceOracle<R>,
    contract: MarketplaceContract<R>,
    erc20: Erc20<R>,
    source: Arc<S>,
    feed: Arc<ListingFeed<S>>,
    metadata: MetadataResolver<Erc721<R>, M>,
    notifier: Arc<dyn Notifier>,
}

impl<W, R, S, M> Marketplace<W, R, S, M>
where
    W: Wallet + 'static,
    R: ChainReader + 'static,
    S: ListingSource + 'static,
    M: MetadataSource + 'static,
{
    pub fn new(
        cfg: &MarketConfig,
        wallet: Arc<W>,
        reader: Arc<R>,
        source: Arc<S>,
        docs: Arc<M>,
        notifier: Arc<dyn Notifier>,
        metrics: Arc<Metrics>,
    ) -> anyhow::Result<Self> {
        let marketplace = cfg.marketplace()?;
        let session = wallet.session();
        let orch = Arc::new(TxOrchestrator::new(
            wallet,
            Arc::clone(&reader),
            marketplace,
            Arc::clone(&metrics),
        ));
        Ok(Self {
            session,
            usdc: cfg.contracts.usdc,
            saga: ApprovalSaga::new(Arc::clone(&orch)),
            orch,
            oracle: BalanceOracle::new(Arc::clone(&reader), session),
            contract: MarketplaceContract::new(Arc::clone(&reader), marketplace),
            erc20: Erc20::new(Arc::clone(&reader)),
            feed: Arc::new(ListingFeed::new(Arc::clone(&source), Arc::clone(&metrics))),
            source,
            metadata: MetadataResolver::new(
                Arc::new(Erc721::new(reader)),
                docs,
                cfg.metadata.clone(),
                metrics,
            ),
            notifier,
        })
    }

    pub fn session(&self) -> Session {
        self.session
    }

    pub fn orchestrator(&self) -> &Arc<TxOrchestrator<W, R>> {
        &self.orch
    }

    pub fn feed(&self) -> &Arc<ListingFeed<S>> {
        &self.feed
    }

    fn payment_token(&self, symbol: TokenSymbol) -> Result<PaymentToken, MarketError> {
        match symbol {
            TokenSymbol::Eth => Ok(PaymentToken::Native),
            TokenSymbol::Usdc => self
                .usdc
                .map(|addr| symbol.payment_token(addr))
                .ok_or_else(|| MarketError::validation("USDC is not configured")),
        }
    }

    fn tx_notice(&self, title: &str, message: &str, outcome: &TxOutcome) -> Notice {
        let hash = outcome.hash();
        Notice::success(title, message).with_tx(hash, explorer_tx_url(self.session.chain_id, hash))
    }

    /// Logs and reports a failed action. Wallet rejections are informational.
    fn report<T>(&self, title: &str, res: Result<T, MarketError>) -> Result<T, MarketError> {
        if let Err(err) = &res {
            let notice = match err {
                MarketError::UserRejection(_) => {
                    Notice::info("Transaction Rejected", "You rejected the request in your wallet.")
                }
                MarketError::Confirmation { hash, reason } => Notice::error(title, reason.clone())
                    .with_tx(*hash, explorer_tx_url(self.session.chain_id, *hash)),
                other => Notice::error(title, other.to_string()),
            };
            warn!(target: "app", action = title, kind = err.kind(), error = %err, "action failed");
            self.notifier.notify(notice);
        }
        res
    }

    // reads

    pub async fn refresh_listings(&self) -> Result<Arc<Vec<Listing>>, MarketError> {
        self.feed.poll_once().await?;
        Ok(self.feed.snapshot())
    }

    pub fn listings(&self) -> Arc<Vec<Listing>> {
        self.feed.snapshot()
    }

    /// Current listings whose token id, collection or seller contains `query`.
    pub fn search(&self, query: &str) -> Vec<Listing> {
        self.feed.search(query)
    }

    pub async fn listing(&self, nft: Address, token_id: U256) -> Result<Option<Listing>, MarketError> {
        self.source.active_item(&listing_key(nft, token_id)).await
    }

    pub async fn metadata(&self, nft: Address, token_id: U256) -> DisplayMetadata {
        self.metadata.resolve(nft, token_id).await
    }

    pub fn affordability(&self, listing: &Listing) -> Result<Affordability, MarketError> {
        let token = listing.payment();
        self.oracle
            .affordability(&listing.price.to_string(), token.address(), token.is_native())
    }

    pub async fn balances(&self) -> Result<Balances, MarketError> {
        let tokens: Vec<Address> = self.usdc.into_iter().collect();
        self.oracle.refresh(&tokens).await?;
        Ok(Balances {
            native: self.oracle.native_balance(),
            usdc: self.usdc.and_then(|u| self.oracle.token_balance(u)),
        })
    }

    /// Display decimals for `token`, read from the token when it is an ERC-20.
    pub async fn token_decimals(&self, token: PaymentToken) -> u8 {
        let read = match token {
            PaymentToken::Native => None,
            PaymentToken::Erc20(addr) => self.erc20.decimals(addr).await.ok(),
        };
        token.display_decimals(read)
    }

    pub async fn proceeds(&self, symbol: TokenSymbol) -> Result<Proceeds, MarketError> {
        let token = self.payment_token(symbol)?;
        let amount = self
            .contract
            .proceeds(self.session.account, token.address())
            .await?;
        let decimals = self.token_decimals(token).await;
        Ok(Proceeds {
            symbol,
            amount,
            formatted: format_units(amount, decimals),
        })
    }

    // actions

    async fn buy_inner(&self, nft: Address, token_id: U256) -> Result<SagaOutcome, MarketError> {
        let listing = self
            .listing(nft, token_id)
            .await?
            .filter(|l| l.status() == ListingStatus::Available)
            .ok_or_else(|| MarketError::validation("This NFT is not listed for sale."))?;
        if listing.is_owned_by(self.session.account) {
            return Err(MarketError::validation("You cannot buy your own NFT."));
        }
        let token = listing.payment();
        let price = listing.price.to_string();
        let check = self
            .oracle
            .check(&price, token.address(), token.is_native())
            .await?;
        if !check.can_afford {
            return Err(MarketError::validation(format!(
                "Insufficient balance: you need {} more {}.",
                check.shortfall,
                TokenSymbol::for_token(token)
            )));
        }
        self.saga.buy_listing(&listing).await
    }

    pub async fn buy(&self, nft: Address, token_id: U256) -> Result<SagaOutcome, MarketError> {
        let res = self.buy_inner(nft, token_id).await;
        if let Ok(out) = &res {
            info!(target: "app", nft = %nft, token_id = %token_id, hash = %out.action.hash(), "purchased");
            self.notifier.notify(self.tx_notice(
                "Purchase Successful",
                "You have successfully purchased the NFT!",
                &out.action,
            ));
        }
        self.report("Purchase Failed", res)
    }

    async fn validate(&self, form: &ListingForm) -> Result<(ListingIntent, PaymentToken), MarketError> {
        let usdc_decimals = match self.usdc {
            Some(addr) => self.erc20.decimals(addr).await.ok(),
            None => None,
        };
        let intent = form.validate(usdc_decimals)?;
        let token = self.payment_token(intent.symbol)?;
        Ok((intent, token))
    }

    async fn list_inner(&self, form: &ListingForm, approve: bool) -> Result<TxOutcome, MarketError> {
        let (intent, token) = self.validate(form).await?;
        if approve {
            self.saga
                .list_with_approval(intent.nft, intent.token_id, &intent.price, token)
                .await
                .map(|o| o.action)
        } else {
            self.orch
                .list(intent.nft, intent.token_id, &intent.price, token)
                .await
        }
    }

    /// Lists a token. With `approve`, the marketplace is approved for the
    /// token first, in the same action.
    pub async fn list(&self, form: &ListingForm, approve: bool) -> Result<TxOutcome, MarketError> {
        let res = self.list_inner(form, approve).await;
        if let Ok(out) = &res {
            self.notifier.notify(self.tx_notice(
                "NFT Listed",
                "Your NFT has been successfully listed on the marketplace.",
                out,
            ));
        }
        self.report("Error Listing NFT", res)
    }

    pub async fn approve_nft(&self, nft: Address, token_id: U256) -> Result<TxOutcome, MarketError> {
        let res = self.orch.approve_nft(nft, token_id).await;
        if let Ok(out) = &res {
            self.notifier.notify(self.tx_notice(
                "NFT Approved",
                "The marketplace can now transfer your NFT when it sells.",
                out,
            ));
        }
        self.report("Approval Failed", res)
    }

    async fn update_inner(&self, form: &ListingForm) -> Result<TxOutcome, MarketError> {
        let (intent, token) = self.validate(form).await?;
        self.orch
            .update_listing(intent.nft, intent.token_id, &intent.price, token)
            .await
    }

    pub async fn update(&self, form: &ListingForm) -> Result<TxOutcome, MarketError> {
        let res = self.update_inner(form).await;
        if let Ok(out) = &res {
            self.notifier.notify(self.tx_notice(
                "Listing Updated",
                "Your NFT listing has been updated successfully.",
                out,
            ));
        }
        self.report("Update Failed", res)
    }

    pub async fn cancel(&self, nft: Address, token_id: U256) -> Result<TxOutcome, MarketError> {
        let res = self.orch.cancel_listing(nft, token_id).await;
        if let Ok(out) = &res {
            self.notifier.notify(self.tx_notice(
                "Listing Cancelled",
                "Your NFT listing has been cancelled.",
                out,
            ));
        }
        self.report("Cancellation Failed", res)
    }

    async fn withdraw_inner(&self, symbol: TokenSymbol) -> Result<TxOutcome, MarketError> {
        let proceeds = self.proceeds(symbol).await?;
        if proceeds.amount.is_zero() {
            return Err(MarketError::validation(format!(
                "You have no {} proceeds to withdraw.",
                symbol
            )));
        }
        self.orch
            .withdraw_proceeds(self.payment_token(symbol)?)
            .await
    }

    pub async fn withdraw(&self, symbol: TokenSymbol) -> Result<TxOutcome, MarketError> {
        let res = self.withdraw_inner(symbol).await;
        if let Ok(out) = &res {
            self.notifier.notify(self.tx_notice(
                "Withdrawal Successful",
                "Your proceeds have been withdrawn to your wallet.",
                out,
            ));
        }
        let title = match &res {
            Err(MarketError::Validation(_)) => "No Proceeds Available",
            _ => "Withdrawal Failed",
        };
        self.report(title, res)
    }
}

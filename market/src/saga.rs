//! Approve-then-act flows. The dependent write is only submitted once the
//! approval has confirmed, and both run under a single action.

use crate::orchestrator::{approve_erc20_tx, approve_nft_tx, buy_tx, list_tx, TxOrchestrator};
use alloy_primitives::{Address, U256};
use market_core::{ChainReader, Listing, MarketError, PaymentToken, TxKind, TxOutcome, Wallet};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaPhase {
    Idle,
    PendingApproval,
    PendingAction,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SagaOutcome {
    /// `None` when the flow needed no approval.
    pub approval: Option<TxOutcome>,
    pub action: TxOutcome,
}

pub struct ApprovalSaga<W: Wallet, R: ChainReader> {
    orch: Arc<TxOrchestrator<W, R>>,
    phase: watch::Sender<SagaPhase>,
}

impl<W: Wallet, R: ChainReader> ApprovalSaga<W, R> {
    pub fn new(orch: Arc<TxOrchestrator<W, R>>) -> Self {
        let (phase, _) = watch::channel(SagaPhase::Idle);
        Self { orch, phase }
    }

    pub fn phase(&self) -> SagaPhase {
        *self.phase.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SagaPhase> {
        self.phase.subscribe()
    }

    fn enter(&self, phase: SagaPhase) {
        self.phase.send_replace(phase);
    }

    fn settle<T>(&self, res: Result<T, MarketError>) -> Result<T, MarketError> {
        self.enter(if res.is_ok() {
            SagaPhase::Done
        } else {
            SagaPhase::Failed
        });
        res
    }

    /// Buys an indexed listing. Native listings are a single `buyItem`;
    /// ERC-20 listings first approve the marketplace for the price.
    pub async fn buy_listing(&self, listing: &Listing) -> Result<SagaOutcome, MarketError> {
        let token = listing.payment();
        let guard = self.orch.begin_action()?;
        let market = self.orch.marketplace();

        let approval = match token {
            PaymentToken::Native => None,
            PaymentToken::Erc20(addr) => {
                self.enter(SagaPhase::PendingApproval);
                info!(target: "saga", action = %guard.id(), token = %addr, amount = %listing.price, "approving payment token");
                let tx = approve_erc20_tx(addr, market, listing.price);
                Some(self.settle_step(self.orch.submit(&guard, TxKind::Approve, tx).await)?)
            }
        };

        self.enter(SagaPhase::PendingAction);
        let tx = buy_tx(market, listing.nft_address, listing.token_id, token, listing.price);
        let action = self.settle(self.orch.submit(&guard, TxKind::Buy, tx).await)?;
        Ok(SagaOutcome { approval, action })
    }

    /// Approves the marketplace for the token, then lists it.
    pub async fn list_with_approval(
        &self,
        nft: Address,
        token_id: U256,
        price: &str,
        token: PaymentToken,
    ) -> Result<SagaOutcome, MarketError> {
        let units = self.orch.price_units(price, token).await?;
        let guard = self.orch.begin_action()?;
        let market = self.orch.marketplace();

        self.enter(SagaPhase::PendingApproval);
        info!(target: "saga", action = %guard.id(), nft = %nft, token_id = %token_id, "approving marketplace for token");
        let approval = self.settle_step(
            self.orch
                .submit(&guard, TxKind::Approve, approve_nft_tx(nft, market, token_id))
                .await,
        )?;

        self.enter(SagaPhase::PendingAction);
        let tx = list_tx(market, nft, token_id, units, token);
        let action = self.settle(self.orch.submit(&guard, TxKind::List, tx).await)?;
        Ok(SagaOutcome {
            approval: Some(approval),
            action,
        })
    }

    /// Marks the saga failed on error; leaves the phase alone otherwise.
    fn settle_step<T>(&self, res: Result<T, MarketError>) -> Result<T, MarketError> {
        if res.is_err() {
            self.enter(SagaPhase::Failed);
        }
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{IERC20, IERC721, INftMarketplace};
    use crate::testing::{listing, MockReader, MockWallet};
    use alloy_sol_types::SolCall;
    use market_core::{Metrics, NATIVE_TOKEN};

    fn usdc() -> Address {
        Address::repeat_byte(0x44)
    }

    fn saga() -> (Arc<MockWallet>, ApprovalSaga<MockWallet, MockReader>) {
        let wallet = Arc::new(MockWallet::new(Address::repeat_byte(0x01), 1));
        let orch = TxOrchestrator::new(
            Arc::clone(&wallet),
            Arc::new(MockReader::default()),
            Address::repeat_byte(0x99),
            Metrics::unregistered(),
        );
        (wallet, ApprovalSaga::new(Arc::new(orch)))
    }

    #[tokio::test]
    async fn erc20_buy_approves_price_first() {
        let (wallet, saga) = saga();
        let l = listing("1", 5_000_000, usdc(), None);
        let out = saga.buy_listing(&l).await.unwrap();
        assert!(out.approval.is_some());
        assert_eq!(
            wallet.sent_selectors(),
            vec![IERC20::approveCall::SELECTOR, INftMarketplace::buyItemCall::SELECTOR]
        );
        let approve = IERC20::approveCall::abi_decode(&wallet.sent()[0].data, true).unwrap();
        assert_eq!(approve.amount, U256::from(5_000_000u64));
        assert_eq!(wallet.sent()[1].value, U256::ZERO);
        assert_eq!(saga.phase(), SagaPhase::Done);
    }

    #[tokio::test]
    async fn native_buy_skips_approval() {
        let (wallet, saga) = saga();
        let l = listing("1", 1_000_000, NATIVE_TOKEN, None);
        let out = saga.buy_listing(&l).await.unwrap();
        assert!(out.approval.is_none());
        assert_eq!(wallet.sent().len(), 1);
        assert_eq!(wallet.sent()[0].value, U256::from(1_000_000u64));
    }

    #[tokio::test]
    async fn failed_approval_never_buys() {
        let (wallet, saga) = saga();
        wallet.revert(IERC20::approveCall::SELECTOR);
        let l = listing("1", 5_000_000, usdc(), None);
        let err = saga.buy_listing(&l).await.unwrap_err();
        assert_eq!(err.kind(), "confirmation");
        assert_eq!(wallet.sent_selectors(), vec![IERC20::approveCall::SELECTOR]);
        assert_eq!(saga.phase(), SagaPhase::Failed);
    }

    #[tokio::test]
    async fn rejected_approval_never_buys() {
        let (wallet, saga) = saga();
        wallet.fail_send(
            IERC20::approveCall::SELECTOR,
            MarketError::UserRejection("denied".into()),
        );
        let l = listing("1", 5_000_000, usdc(), None);
        assert!(saga.buy_listing(&l).await.unwrap_err().is_user_rejection());
        assert!(wallet.sent().is_empty());
    }

    #[tokio::test]
    async fn listing_approves_nft_then_lists() {
        let (wallet, saga) = saga();
        let out = saga
            .list_with_approval(Address::repeat_byte(0x22), U256::from(8u8), "0.5", PaymentToken::Native)
            .await
            .unwrap();
        assert_eq!(out.action.kind, TxKind::List);
        assert_eq!(
            wallet.sent_selectors(),
            vec![IERC721::approveCall::SELECTOR, INftMarketplace::listItemCall::SELECTOR]
        );
        let list = INftMarketplace::listItemCall::abi_decode(&wallet.sent()[1].data, true).unwrap();
        assert_eq!(list.price, U256::from(500_000_000_000_000_000u128));
    }
}

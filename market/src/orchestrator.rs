//! Transaction orchestrator: builds marketplace writes, hands them to the
//! wallet and follows each one to its receipt.

use crate::abi::{IERC20, IERC721, INftMarketplace};
use crate::contracts::Erc20;
use alloy_primitives::{Address, TxHash, U256};
use alloy_sol_types::SolCall;
use market_core::{
    parse_units, ChainReader, MarketError, Metrics, PaymentToken, PendingTransaction, TxKind,
    TxOutcome, TxRequest, TxState, Wallet, BUY_GAS_LIMIT, NATIVE_DECIMALS,
};
use prometheus::IntGauge;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub fn list_tx(
    marketplace: Address,
    nft: Address,
    token_id: U256,
    price: U256,
    token: PaymentToken,
) -> TxRequest {
    let call = INftMarketplace::listItemCall {
        nftAddress: nft,
        tokenId: token_id,
        price,
        paymentToken: token.address(),
    };
    TxRequest::new(marketplace, call.abi_encode())
}

/// `buyItem` carries the price as value only for native payments.
pub fn buy_tx(
    marketplace: Address,
    nft: Address,
    token_id: U256,
    token: PaymentToken,
    price: U256,
) -> TxRequest {
    let call = INftMarketplace::buyItemCall {
        nftAddress: nft,
        tokenId: token_id,
        paymentToken: token.address(),
    };
    let value = if token.is_native() { price } else { U256::ZERO };
    TxRequest::new(marketplace, call.abi_encode())
        .with_value(value)
        .with_gas_limit(BUY_GAS_LIMIT)
}

pub fn update_tx(
    marketplace: Address,
    nft: Address,
    token_id: U256,
    new_price: U256,
    token: PaymentToken,
) -> TxRequest {
    let call = INftMarketplace::updateListingCall {
        nftAddress: nft,
        tokenId: token_id,
        newPrice: new_price,
        paymentToken: token.address(),
    };
    TxRequest::new(marketplace, call.abi_encode())
}

pub fn cancel_tx(marketplace: Address, nft: Address, token_id: U256) -> TxRequest {
    let call = INftMarketplace::cancelListingCall {
        nftAddress: nft,
        tokenId: token_id,
    };
    TxRequest::new(marketplace, call.abi_encode())
}

pub fn withdraw_tx(marketplace: Address, token: PaymentToken) -> TxRequest {
    let call = INftMarketplace::withdrawProceedsCall {
        paymentToken: token.address(),
    };
    TxRequest::new(marketplace, call.abi_encode())
}

pub fn approve_erc20_tx(token: Address, spender: Address, amount: U256) -> TxRequest {
    let call = IERC20::approveCall { spender, amount };
    TxRequest::new(token, call.abi_encode())
}

pub fn approve_nft_tx(nft: Address, operator: Address, token_id: U256) -> TxRequest {
    let call = IERC721::approveCall {
        to: operator,
        tokenId: token_id,
    };
    TxRequest::new(nft, call.abi_encode())
}

/// Exclusive hold on the orchestrator for one user action. Every write of
/// the action is submitted under it; dropping it frees the orchestrator.
pub struct ActionGuard<'a> {
    id: Uuid,
    busy: &'a AtomicBool,
    state: &'a watch::Sender<Option<PendingTransaction>>,
}

impl ActionGuard<'_> {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Drop for ActionGuard<'_> {
    fn drop(&mut self) {
        // clear the non-terminal state of an abandoned action
        self.state.send_if_modified(|cur| match cur {
            Some(p) if !p.state.is_terminal() => {
                *cur = None;
                true
            }
            _ => false,
        });
        self.busy.store(false, Ordering::Release);
        debug!(target: "orchestrator", action = %self.id, "action released");
    }
}

/// Holds the in-flight gauge up for as long as a write is outstanding,
/// including when the waiting future is dropped.
struct Inflight<'a>(&'a IntGauge);

impl<'a> Inflight<'a> {
    fn hold(gauge: &'a IntGauge) -> Self {
        gauge.inc();
        Self(gauge)
    }
}

impl Drop for Inflight<'_> {
    fn drop(&mut self) {
        self.0.dec();
    }
}

pub struct TxOrchestrator<W: Wallet, R: ChainReader> {
    wallet: Arc<W>,
    erc20: Erc20<R>,
    marketplace: Address,
    busy: AtomicBool,
    state: watch::Sender<Option<PendingTransaction>>,
    metrics: Arc<Metrics>,
}

impl<W: Wallet, R: ChainReader> TxOrchestrator<W, R> {
    pub fn new(wallet: Arc<W>, reader: Arc<R>, marketplace: Address, metrics: Arc<Metrics>) -> Self {
        let (state, _) = watch::channel(None);
        Self {
            wallet,
            erc20: Erc20::new(reader),
            marketplace,
            busy: AtomicBool::new(false),
            state,
            metrics,
        }
    }

    pub fn marketplace(&self) -> Address {
        self.marketplace
    }

    pub fn wallet(&self) -> &Arc<W> {
        &self.wallet
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<PendingTransaction>> {
        self.state.subscribe()
    }

    /// Latest write of the current or last action; `None` when idle.
    pub fn current(&self) -> Option<PendingTransaction> {
        self.state.borrow().clone()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn begin_action(&self) -> Result<ActionGuard<'_>, MarketError> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!(target: "orchestrator", "action refused: another transaction is in progress");
            return Err(MarketError::Busy);
        }
        self.state.send_replace(None);
        let id = Uuid::new_v4();
        debug!(target: "orchestrator", action = %id, "action started");
        Ok(ActionGuard {
            id,
            busy: &self.busy,
            state: &self.state,
        })
    }

    fn publish(&self, hash: TxHash, kind: TxKind, state: TxState) {
        self.state
            .send_replace(Some(PendingTransaction { hash, kind, state }));
    }

    /// Sends one write and waits for its receipt. Resolves only once the
    /// transaction is included and succeeded.
    pub async fn submit(
        &self,
        guard: &ActionGuard<'_>,
        kind: TxKind,
        tx: TxRequest,
    ) -> Result<TxOutcome, MarketError> {
        let label = kind.to_string();
        let _inflight = Inflight::hold(&self.metrics.inflight_tx);
        self.submit_inner(guard, kind, &label, tx).await
    }

    async fn submit_inner(
        &self,
        guard: &ActionGuard<'_>,
        kind: TxKind,
        label: &str,
        tx: TxRequest,
    ) -> Result<TxOutcome, MarketError> {
        let hash = match self.wallet.send_transaction(&tx).await {
            Ok(h) => h,
            Err(err) => {
                if err.is_user_rejection() {
                    self.metrics.tx_rejected.inc();
                    info!(target: "orchestrator", action = %guard.id, kind = %kind, "rejected in wallet");
                } else {
                    self.metrics.tx_failed.with_label_values(&[label]).inc();
                    warn!(target: "orchestrator", action = %guard.id, kind = %kind, error = %err, "submission failed");
                }
                return Err(err);
            }
        };
        self.metrics.tx_submitted.with_label_values(&[label]).inc();
        self.publish(hash, kind, TxState::Submitted);
        info!(target: "orchestrator", action = %guard.id, kind = %kind, hash = %hash, to = %tx.to, value = %tx.value, "submitted");

        self.publish(hash, kind, TxState::Confirming);
        let receipt = match self.wallet.wait_for_receipt(hash).await {
            Ok(r) => r,
            Err(err) => {
                self.publish(hash, kind, TxState::Failed);
                self.metrics.tx_failed.with_label_values(&[label]).inc();
                warn!(target: "orchestrator", action = %guard.id, kind = %kind, hash = %hash, error = %err, "confirmation failed");
                return Err(match err {
                    MarketError::Confirmation { .. } => err,
                    other => MarketError::Confirmation {
                        hash,
                        reason: other.to_string(),
                    },
                });
            }
        };
        if !receipt.success {
            self.publish(hash, kind, TxState::Failed);
            self.metrics.tx_failed.with_label_values(&[label]).inc();
            warn!(target: "orchestrator", action = %guard.id, kind = %kind, hash = %hash, block = ?receipt.block_number, "reverted");
            return Err(MarketError::Confirmation {
                hash,
                reason: "transaction reverted".into(),
            });
        }
        self.publish(hash, kind, TxState::Confirmed);
        self.metrics.tx_confirmed.with_label_values(&[label]).inc();
        info!(target: "orchestrator", action = %guard.id, kind = %kind, hash = %hash, block = ?receipt.block_number, "confirmed");
        Ok(TxOutcome { kind, receipt })
    }

    async fn single(&self, kind: TxKind, tx: TxRequest) -> Result<TxOutcome, MarketError> {
        let guard = self.begin_action()?;
        self.submit(&guard, kind, tx).await
    }

    /// Decimal price to smallest units: 18 decimals native, the token's own
    /// `decimals()` otherwise (6 when unreadable). Zero is refused.
    pub async fn price_units(&self, price: &str, token: PaymentToken) -> Result<U256, MarketError> {
        let decimals = match token {
            PaymentToken::Native => NATIVE_DECIMALS,
            PaymentToken::Erc20(addr) => {
                let read = match self.erc20.decimals(addr).await {
                    Ok(d) => Some(d),
                    Err(err) => {
                        warn!(target: "orchestrator", token = %addr, error = %err, "decimals() unavailable");
                        None
                    }
                };
                token.display_decimals(read)
            }
        };
        let units = parse_units(price, decimals)?;
        if units.is_zero() {
            return Err(MarketError::validation("price must be greater than zero"));
        }
        Ok(units)
    }

    pub async fn list(
        &self,
        nft: Address,
        token_id: U256,
        price: &str,
        token: PaymentToken,
    ) -> Result<TxOutcome, MarketError> {
        let units = self.price_units(price, token).await?;
        self.single(TxKind::List, list_tx(self.marketplace, nft, token_id, units, token))
            .await
    }

    /// `price` is in smallest units. Affordability is the caller's check.
    pub async fn buy(
        &self,
        nft: Address,
        token_id: U256,
        token: PaymentToken,
        price: U256,
    ) -> Result<TxOutcome, MarketError> {
        self.single(TxKind::Buy, buy_tx(self.marketplace, nft, token_id, token, price))
            .await
    }

    /// Sets the marketplace allowance to exactly `amount`.
    pub async fn approve_erc20(&self, token: Address, amount: U256) -> Result<TxOutcome, MarketError> {
        self.single(TxKind::Approve, approve_erc20_tx(token, self.marketplace, amount))
            .await
    }

    pub async fn approve_nft(&self, nft: Address, token_id: U256) -> Result<TxOutcome, MarketError> {
        self.single(TxKind::Approve, approve_nft_tx(nft, self.marketplace, token_id))
            .await
    }

    pub async fn update_listing(
        &self,
        nft: Address,
        token_id: U256,
        new_price: &str,
        token: PaymentToken,
    ) -> Result<TxOutcome, MarketError> {
        let units = self.price_units(new_price, token).await?;
        self.single(TxKind::Update, update_tx(self.marketplace, nft, token_id, units, token))
            .await
    }

    pub async fn cancel_listing(&self, nft: Address, token_id: U256) -> Result<TxOutcome, MarketError> {
        self.single(TxKind::Cancel, cancel_tx(self.marketplace, nft, token_id))
            .await
    }

    /// Zero proceeds are the caller's check.
    pub async fn withdraw_proceeds(&self, token: PaymentToken) -> Result<TxOutcome, MarketError> {
        self.single(TxKind::Withdraw, withdraw_tx(self.marketplace, token))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockReader, MockWallet};
    use market_core::NATIVE_TOKEN;
    use std::time::Duration;

    fn market() -> Address {
        Address::repeat_byte(0x99)
    }

    fn nft() -> Address {
        Address::repeat_byte(0x22)
    }

    fn usdc() -> Address {
        Address::repeat_byte(0x44)
    }

    fn setup() -> (Arc<MockWallet>, Arc<MockReader>, TxOrchestrator<MockWallet, MockReader>) {
        let wallet = Arc::new(MockWallet::new(Address::repeat_byte(0x01), 11155111));
        let reader = Arc::new(MockReader::default());
        let orch = TxOrchestrator::new(
            Arc::clone(&wallet),
            Arc::clone(&reader),
            market(),
            Metrics::unregistered(),
        );
        (wallet, reader, orch)
    }

    #[tokio::test]
    async fn native_buy_attaches_price() {
        let (wallet, _, orch) = setup();
        let out = orch
            .buy(nft(), U256::from(1u8), PaymentToken::Native, U256::from(1_000_000u64))
            .await
            .unwrap();
        assert_eq!(out.kind, TxKind::Buy);
        let sent = wallet.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, market());
        assert_eq!(sent[0].value, U256::from(1_000_000u64));
        assert_eq!(sent[0].gas_limit, Some(BUY_GAS_LIMIT));
        let call = INftMarketplace::buyItemCall::abi_decode(&sent[0].data, true).unwrap();
        assert_eq!(call.paymentToken, NATIVE_TOKEN);
        assert_eq!(orch.current().unwrap().state, TxState::Confirmed);
        assert!(!orch.is_busy());
    }

    #[tokio::test]
    async fn erc20_buy_attaches_no_value() {
        let (wallet, _, orch) = setup();
        orch.buy(nft(), U256::from(1u8), PaymentToken::Erc20(usdc()), U256::from(5_000_000u64))
            .await
            .unwrap();
        let sent = wallet.sent();
        assert_eq!(sent[0].value, U256::ZERO);
        let call = INftMarketplace::buyItemCall::abi_decode(&sent[0].data, true).unwrap();
        assert_eq!(call.paymentToken, usdc());
    }

    #[tokio::test]
    async fn list_converts_price_with_token_decimals() {
        let (wallet, reader, orch) = setup();
        reader.answer(usdc(), IERC20::decimalsCall::SELECTOR, <alloy_sol_types::sol_data::Uint<8> as alloy_sol_types::SolType>::abi_encode(&6u8));
        orch.list(nft(), U256::from(3u8), "12.5", PaymentToken::Erc20(usdc()))
            .await
            .unwrap();
        orch.list(nft(), U256::from(4u8), "0.1", PaymentToken::Native)
            .await
            .unwrap();
        let sent = wallet.sent();
        let usdc_call = INftMarketplace::listItemCall::abi_decode(&sent[0].data, true).unwrap();
        assert_eq!(usdc_call.price, U256::from(12_500_000u64));
        let eth_call = INftMarketplace::listItemCall::abi_decode(&sent[1].data, true).unwrap();
        assert_eq!(eth_call.price, U256::from(100_000_000_000_000_000u128));
        assert_eq!(eth_call.paymentToken, NATIVE_TOKEN);
    }

    #[tokio::test]
    async fn invalid_price_never_reaches_wallet() {
        let (wallet, _, orch) = setup();
        let err = orch
            .update_listing(nft(), U256::from(1u8), "0", PaymentToken::Native)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert!(orch
            .list(nft(), U256::from(1u8), "abc", PaymentToken::Native)
            .await
            .is_err());
        assert!(wallet.sent().is_empty());
    }

    #[tokio::test]
    async fn rejection_is_classified_and_releases() {
        let (wallet, _, orch) = setup();
        wallet.fail_send(
            INftMarketplace::cancelListingCall::SELECTOR,
            MarketError::UserRejection("User rejected the request.".into()),
        );
        let err = orch.cancel_listing(nft(), U256::from(1u8)).await.unwrap_err();
        assert!(err.is_user_rejection());
        assert!(!orch.is_busy());
        assert!(orch.current().is_none());
    }

    #[tokio::test]
    async fn revert_is_a_confirmation_error() {
        let (wallet, _, orch) = setup();
        wallet.revert(INftMarketplace::withdrawProceedsCall::SELECTOR);
        let err = orch
            .withdraw_proceeds(PaymentToken::Native)
            .await
            .unwrap_err();
        match err {
            MarketError::Confirmation { hash, .. } => {
                assert_eq!(orch.current().unwrap().hash, hash);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(orch.current().unwrap().state, TxState::Failed);
        assert!(!orch.is_busy());
    }

    #[tokio::test]
    async fn second_action_while_confirming_is_busy() {
        let (wallet, _, orch) = setup();
        let gate = wallet.hold_receipts();
        let orch = Arc::new(orch);
        let mut states = orch.subscribe();
        let first = {
            let orch = Arc::clone(&orch);
            tokio::spawn(async move { orch.cancel_listing(nft(), U256::from(1u8)).await })
        };
        states
            .wait_for(|s| matches!(s, Some(p) if p.state == TxState::Confirming))
            .await
            .unwrap();
        let err = orch
            .approve_nft(nft(), U256::from(2u8))
            .await
            .unwrap_err();
        assert_eq!(err, MarketError::Busy);
        gate.notify_one();
        first.await.unwrap().unwrap();
        assert_eq!(wallet.sent().len(), 1);
        gate.notify_one();
        assert!(orch.approve_nft(nft(), U256::from(2u8)).await.is_ok());
    }

    #[tokio::test]
    async fn dropped_wait_releases_gauge_and_action() {
        let (wallet, _, orch) = setup();
        let _gate = wallet.hold_receipts();
        let res = tokio::time::timeout(
            Duration::from_millis(30),
            orch.cancel_listing(nft(), U256::from(1u8)),
        )
        .await;
        assert!(res.is_err());
        assert_eq!(wallet.sent().len(), 1);
        assert_eq!(orch.metrics.inflight_tx.get(), 0);
        assert!(!orch.is_busy());
        assert!(orch.current().is_none());
    }

    #[test]
    fn approvals_target_the_marketplace() {
        let tx = approve_erc20_tx(usdc(), market(), U256::from(7u8));
        assert_eq!(tx.to, usdc());
        let call = IERC20::approveCall::abi_decode(&tx.data, true).unwrap();
        assert_eq!(call.spender, market());
        assert_eq!(call.amount, U256::from(7u8));

        let tx = approve_nft_tx(nft(), market(), U256::from(9u8));
        let call = IERC721::approveCall::abi_decode(&tx.data, true).unwrap();
        assert_eq!(tx.to, nft());
        assert_eq!(call.to, market());
        assert_eq!(call.tokenId, U256::from(9u8));
    }
}

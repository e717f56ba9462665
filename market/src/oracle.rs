//! Balance oracle: the connected account's native and ERC-20 balances and
//! the affordability decision built on them.

use crate::contracts::Erc20;
use alloy_primitives::{Address, U256};
use futures::future::join_all;
use market_core::{
    format_units, parse_raw_amount, Affordability, AffordabilityCheck, ChainReader, MarketError,
    PaymentToken, Session, NATIVE_DECIMALS,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TokenBalance {
    balance: U256,
    /// `None` when the token's `decimals()` read failed.
    decimals: Option<u8>,
}

#[derive(Debug, Clone, Default)]
struct Snapshot {
    native: Option<U256>,
    tokens: HashMap<Address, TokenBalance>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedBalance {
    pub balance: U256,
    pub decimals: u8,
    pub formatted: String,
}

impl FormattedBalance {
    fn new(balance: U256, decimals: u8) -> Self {
        Self {
            balance,
            decimals,
            formatted: format_units(balance, decimals),
        }
    }
}

pub struct BalanceOracle<R: ChainReader> {
    reader: Arc<R>,
    erc20: Erc20<R>,
    session: Session,
    snapshot: RwLock<Snapshot>,
}

impl<R: ChainReader> BalanceOracle<R> {
    pub fn new(reader: Arc<R>, session: Session) -> Self {
        Self {
            erc20: Erc20::new(Arc::clone(&reader)),
            reader,
            session,
            snapshot: RwLock::new(Snapshot::default()),
        }
    }

    pub fn session(&self) -> Session {
        self.session
    }

    async fn read_token(&self, token: Address) -> Result<TokenBalance, MarketError> {
        let (balance, decimals) = tokio::join!(
            self.erc20.balance_of(token, self.session.account),
            self.erc20.decimals(token)
        );
        let decimals = match decimals {
            Ok(d) => Some(d),
            Err(err) => {
                warn!(target: "oracle", token = %token, error = %err, "decimals() unavailable");
                None
            }
        };
        Ok(TokenBalance {
            balance: balance?,
            decimals,
        })
    }

    /// Reads the native balance and every token's balance and decimals
    /// concurrently. Reads that succeed are kept even when others fail; the
    /// first failure is returned.
    pub async fn refresh(&self, tokens: &[Address]) -> Result<(), MarketError> {
        let account = self.session.account;
        let (native, token_results) = tokio::join!(
            self.reader.native_balance(account),
            join_all(tokens.iter().map(|t| self.read_token(*t)))
        );
        let mut first_err = None;
        let mut snap = self.snapshot.write();
        match native {
            Ok(b) => snap.native = Some(b),
            Err(err) => first_err = Some(err),
        }
        for (token, res) in tokens.iter().zip(token_results) {
            match res {
                Ok(tb) => {
                    snap.tokens.insert(*token, tb);
                }
                Err(err) => {
                    if first_err.is_none() {
                        first_err = Some(err);
                    }
                }
            }
        }
        drop(snap);
        match first_err {
            Some(err) => {
                warn!(target: "oracle", account = %account, error = %err, "balance refresh incomplete");
                Err(err)
            }
            None => {
                debug!(target: "oracle", account = %account, tokens = tokens.len(), "balances refreshed");
                Ok(())
            }
        }
    }

    /// Decision against the current snapshot. `price` is a smallest-unit
    /// integer string. Undecided until the relevant balance has loaded.
    pub fn affordability(
        &self,
        price: &str,
        token: Address,
        is_native: bool,
    ) -> Result<Affordability, MarketError> {
        let price = parse_raw_amount(price)?;
        let snap = self.snapshot.read();
        let decided = if is_native {
            snap.native
                .map(|b| AffordabilityCheck::evaluate(b, price, NATIVE_DECIMALS))
        } else {
            snap.tokens.get(&token).map(|tb| {
                let decimals = PaymentToken::Erc20(token).display_decimals(tb.decimals);
                AffordabilityCheck::evaluate(tb.balance, price, decimals)
            })
        };
        Ok(match decided {
            Some(check) => Affordability::Decided(check),
            None => Affordability::Undecided,
        })
    }

    /// Refreshes the balance the payment needs, then decides.
    pub async fn check(
        &self,
        price: &str,
        token: Address,
        is_native: bool,
    ) -> Result<AffordabilityCheck, MarketError> {
        let tokens: &[Address] = if is_native { &[] } else { std::slice::from_ref(&token) };
        self.refresh(tokens).await?;
        match self.affordability(price, token, is_native)? {
            Affordability::Decided(check) => Ok(check),
            Affordability::Undecided => Err(MarketError::DataFetch(format!(
                "balance for {} not available",
                token
            ))),
        }
    }

    pub fn native_balance(&self) -> Option<FormattedBalance> {
        self.snapshot
            .read()
            .native
            .map(|b| FormattedBalance::new(b, NATIVE_DECIMALS))
    }

    pub fn token_balance(&self, token: Address) -> Option<FormattedBalance> {
        self.snapshot.read().tokens.get(&token).map(|tb| {
            FormattedBalance::new(
                tb.balance,
                PaymentToken::Erc20(token).display_decimals(tb.decimals),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::IERC20;
    use crate::testing::MockReader;
    use alloy_sol_types::{SolCall, SolValue};

    fn usdc() -> Address {
        Address::repeat_byte(0x44)
    }

    fn session() -> Session {
        Session {
            account: Address::repeat_byte(0x01),
            chain_id: 11155111,
        }
    }

    fn reader_with_usdc(balance: u64) -> Arc<MockReader> {
        let reader = Arc::new(MockReader::default());
        reader.answer(usdc(), IERC20::balanceOfCall::SELECTOR, U256::from(balance).abi_encode());
        reader.answer(usdc(), IERC20::decimalsCall::SELECTOR, <alloy_sol_types::sol_data::Uint<8> as alloy_sol_types::SolType>::abi_encode(&6u8));
        reader
    }

    #[tokio::test]
    async fn undecided_until_loaded() {
        let oracle = BalanceOracle::new(reader_with_usdc(2_000_000), session());
        assert_eq!(
            oracle.affordability("5000000", usdc(), false).unwrap(),
            Affordability::Undecided
        );
        assert_eq!(
            oracle.affordability("1", Address::ZERO, true).unwrap().can_afford(),
            None
        );
    }

    #[tokio::test]
    async fn usdc_shortfall_in_display_units() {
        let oracle = BalanceOracle::new(reader_with_usdc(2_000_000), session());
        let check = oracle.check("5000000", usdc(), false).await.unwrap();
        assert!(!check.can_afford);
        assert_eq!(check.formatted_balance, "2.0");
        assert_eq!(check.shortfall, "3.0");
        assert_eq!(oracle.token_balance(usdc()).unwrap().formatted, "2.0");
    }

    #[tokio::test]
    async fn native_balance_covers_price() {
        let reader = Arc::new(MockReader::default());
        reader.set_native_balance(session().account, U256::from(10u64).pow(U256::from(18u8)));
        let oracle = BalanceOracle::new(reader, session());
        let check = oracle.check("1000000", Address::ZERO, true).await.unwrap();
        assert!(check.can_afford);
        assert_eq!(check.shortfall, "0");
        assert_eq!(oracle.native_balance().unwrap().formatted, "1.0");
    }

    #[tokio::test]
    async fn missing_decimals_default_to_six() {
        let reader = Arc::new(MockReader::default());
        reader.answer(usdc(), IERC20::balanceOfCall::SELECTOR, U256::from(1_500_000u64).abi_encode());
        let oracle = BalanceOracle::new(reader, session());
        oracle.refresh(&[usdc()]).await.unwrap();
        assert_eq!(oracle.token_balance(usdc()).unwrap().decimals, 6);
        assert_eq!(oracle.token_balance(usdc()).unwrap().formatted, "1.5");
    }

    #[tokio::test]
    async fn failed_refresh_stays_undecided() {
        let reader = reader_with_usdc(1);
        reader.set_failing(true);
        let oracle = BalanceOracle::new(reader, session());
        assert!(oracle.check("1", usdc(), false).await.is_err());
        assert_eq!(
            oracle.affordability("1", usdc(), false).unwrap(),
            Affordability::Undecided
        );
        assert!(oracle.affordability("abc", usdc(), false).is_err());
    }
}

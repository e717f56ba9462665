use crate::units::format_units;
use alloy_primitives::{address, Address, Bytes, TxHash, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Sentinel used by the marketplace for native ETH payments, and by the
/// indexer as the "unsold" buyer marker.
pub const NATIVE_TOKEN: Address = Address::ZERO;

/// Buyer value the indexer writes for cancelled listings.
pub const DEAD_ADDRESS: Address = address!("000000000000000000000000000000000000dEaD");

pub const NATIVE_DECIMALS: u8 = 18;
pub const DEFAULT_TOKEN_DECIMALS: u8 = 6;

/// Gas budget attached to every `buyItem` call.
pub const BUY_GAS_LIMIT: u64 = 3_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentToken {
    Native,
    Erc20(Address),
}

impl PaymentToken {
    pub fn from_address(addr: Address) -> Self {
        if addr == NATIVE_TOKEN {
            PaymentToken::Native
        } else {
            PaymentToken::Erc20(addr)
        }
    }

    pub fn address(&self) -> Address {
        match self {
            PaymentToken::Native => NATIVE_TOKEN,
            PaymentToken::Erc20(addr) => *addr,
        }
    }

    pub fn is_native(&self) -> bool {
        matches!(self, PaymentToken::Native)
    }

    /// 18 for native; the token's own decimals otherwise, 6 when unknown.
    pub fn display_decimals(&self, erc20_decimals: Option<u8>) -> u8 {
        match self {
            PaymentToken::Native => NATIVE_DECIMALS,
            PaymentToken::Erc20(_) => erc20_decimals.unwrap_or(DEFAULT_TOKEN_DECIMALS),
        }
    }
}

impl From<Address> for PaymentToken {
    fn from(addr: Address) -> Self {
        Self::from_address(addr)
    }
}

/// The two payment choices offered to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TokenSymbol {
    Eth,
    Usdc,
}

impl TokenSymbol {
    pub fn payment_token(&self, usdc: Address) -> PaymentToken {
        match self {
            TokenSymbol::Eth => PaymentToken::Native,
            TokenSymbol::Usdc => PaymentToken::Erc20(usdc),
        }
    }

    pub fn for_token(token: PaymentToken) -> Self {
        if token.is_native() {
            TokenSymbol::Eth
        } else {
            TokenSymbol::Usdc
        }
    }
}

impl fmt::Display for TokenSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenSymbol::Eth => f.write_str("ETH"),
            TokenSymbol::Usdc => f.write_str("USDC"),
        }
    }
}

impl FromStr for TokenSymbol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "ETH" => Ok(TokenSymbol::Eth),
            "USDC" => Ok(TokenSymbol::Usdc),
            other => Err(format!("unsupported payment token '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingStatus {
    Available,
    Cancelled,
    Sold,
}

impl ListingStatus {
    pub fn from_buyer(buyer: Option<Address>) -> Self {
        match buyer {
            None => ListingStatus::Available,
            Some(b) if b == NATIVE_TOKEN => ListingStatus::Available,
            Some(b) if b == DEAD_ADDRESS => ListingStatus::Cancelled,
            Some(_) => ListingStatus::Sold,
        }
    }
}

/// Read-only projection of an indexed listing. Prices stay in smallest units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    pub id: String,
    pub seller: Address,
    pub nft_address: Address,
    pub token_id: U256,
    pub price: U256,
    pub payment_token: Address,
    pub buyer: Option<Address>,
}

impl Listing {
    pub fn status(&self) -> ListingStatus {
        ListingStatus::from_buyer(self.buyer)
    }

    pub fn payment(&self) -> PaymentToken {
        PaymentToken::from_address(self.payment_token)
    }

    pub fn is_owned_by(&self, account: Address) -> bool {
        self.seller == account
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxKind {
    Approve,
    List,
    Buy,
    Update,
    Cancel,
    Withdraw,
}

impl fmt::Display for TxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TxKind::Approve => "approve",
            TxKind::List => "list",
            TxKind::Buy => "buy",
            TxKind::Update => "update",
            TxKind::Cancel => "cancel",
            TxKind::Withdraw => "withdraw",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxState {
    Submitted,
    Confirming,
    Confirmed,
    Failed,
}

impl TxState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TxState::Confirmed | TxState::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTransaction {
    pub hash: TxHash,
    pub kind: TxKind,
    pub state: TxState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRequest {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
    pub gas_limit: Option<u64>,
}

impl TxRequest {
    pub fn new(to: Address, data: impl Into<Bytes>) -> Self {
        Self {
            to,
            data: data.into(),
            value: U256::ZERO,
            gas_limit: None,
        }
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = Some(gas_limit);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub hash: TxHash,
    pub block_number: Option<u64>,
    pub success: bool,
    pub gas_used: Option<u64>,
}

/// Result of a confirmed write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutcome {
    pub kind: TxKind,
    pub receipt: TxReceipt,
}

impl TxOutcome {
    pub fn hash(&self) -> TxHash {
        self.receipt.hash
    }
}

/// The connected account. Passed explicitly to everything that needs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub account: Address,
    pub chain_id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NftAttribute {
    pub trait_type: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct NftMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub attributes: Option<Vec<NftAttribute>>,
}

/// What a card renders: the descriptor when it resolved, placeholders otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayMetadata {
    pub name: String,
    pub image: String,
    pub description: Option<String>,
    pub resolved: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AffordabilityCheck {
    pub balance: U256,
    pub price: U256,
    pub decimals: u8,
    pub can_afford: bool,
    pub formatted_balance: String,
    pub shortfall: String,
}

impl AffordabilityCheck {
    pub fn evaluate(balance: U256, price: U256, decimals: u8) -> Self {
        let can_afford = balance >= price;
        let shortfall = if can_afford {
            "0".to_string()
        } else {
            format_units(price - balance, decimals)
        };
        Self {
            balance,
            price,
            decimals,
            can_afford,
            formatted_balance: format_units(balance, decimals),
            shortfall,
        }
    }
}

/// Affordability while balances may still be loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Affordability {
    Undecided,
    Decided(AffordabilityCheck),
}

impl Affordability {
    pub fn can_afford(&self) -> Option<bool> {
        match self {
            Affordability::Undecided => None,
            Affordability::Decided(check) => Some(check.can_afford),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Success,
    Error,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: String,
    pub message: String,
    pub tx_hash: Option<TxHash>,
    pub explorer_url: Option<String>,
}

impl Notice {
    pub fn success(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Success, title, message)
    }

    pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Error, title, message)
    }

    pub fn info(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Info, title, message)
    }

    pub fn with_tx(mut self, hash: TxHash, explorer_url: Option<String>) -> Self {
        self.tx_hash = Some(hash);
        self.explorer_url = explorer_url;
        self
    }

    fn new(level: NoticeLevel, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            title: title.into(),
            message: message.into(),
            tx_hash: None,
            explorer_url: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing_with_buyer(buyer: Option<Address>) -> Listing {
        Listing {
            id: "1".into(),
            seller: Address::repeat_byte(0x11),
            nft_address: Address::repeat_byte(0x22),
            token_id: U256::from(1u8),
            price: U256::from(1_000_000u64),
            payment_token: NATIVE_TOKEN,
            buyer,
        }
    }

    #[test]
    fn status_follows_buyer_sentinels() {
        assert_eq!(listing_with_buyer(None).status(), ListingStatus::Available);
        assert_eq!(
            listing_with_buyer(Some(NATIVE_TOKEN)).status(),
            ListingStatus::Available
        );
        assert_eq!(
            listing_with_buyer(Some(DEAD_ADDRESS)).status(),
            ListingStatus::Cancelled
        );
        assert_eq!(
            listing_with_buyer(Some(Address::repeat_byte(0x33))).status(),
            ListingStatus::Sold
        );
    }

    #[test]
    fn dead_address_parses_regardless_of_case() {
        let lower: Address = "0x000000000000000000000000000000000000dead".parse().unwrap();
        let upper: Address = "0x000000000000000000000000000000000000DEAD".parse().unwrap();
        assert_eq!(lower, DEAD_ADDRESS);
        assert_eq!(upper, DEAD_ADDRESS);
    }

    #[test]
    fn payment_token_decimals() {
        assert_eq!(PaymentToken::Native.display_decimals(Some(6)), 18);
        let usdc = PaymentToken::Erc20(Address::repeat_byte(0x44));
        assert_eq!(usdc.display_decimals(None), 6);
        assert_eq!(usdc.display_decimals(Some(8)), 8);
        assert_eq!(PaymentToken::from_address(Address::ZERO), PaymentToken::Native);
    }

    #[test]
    fn token_symbol_maps_to_configured_stablecoin() {
        let usdc = Address::repeat_byte(0x55);
        assert_eq!("eth".parse::<TokenSymbol>().unwrap(), TokenSymbol::Eth);
        assert_eq!(
            TokenSymbol::Usdc.payment_token(usdc),
            PaymentToken::Erc20(usdc)
        );
        assert!("DAI".parse::<TokenSymbol>().is_err());
    }

    #[test]
    fn shortfall_is_zero_when_affordable() {
        let check = AffordabilityCheck::evaluate(U256::from(10u8), U256::from(10u8), 6);
        assert!(check.can_afford);
        assert_eq!(check.shortfall, "0");
    }

    #[test]
    fn shortfall_in_display_units() {
        let check =
            AffordabilityCheck::evaluate(U256::from(2_000_000u64), U256::from(5_000_000u64), 6);
        assert!(!check.can_afford);
        assert_eq!(check.formatted_balance, "2.0");
        assert_eq!(check.shortfall, "3.0");
        assert_eq!(format_units(check.price, 6), "5.0");
    }
}

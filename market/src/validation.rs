use alloy_primitives::{Address, U256};
use market_core::{parse_units, MarketError, TokenSymbol, DEFAULT_TOKEN_DECIMALS, NATIVE_DECIMALS};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const REQUIRED: &str = "This field is required";

/// Raw listing/update form input, as typed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingForm {
    pub nft_address: String,
    pub token_id: String,
    pub payment_token: String,
    pub price: String,
}

/// A form that passed validation. `price` stays a decimal string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingIntent {
    pub nft: Address,
    pub token_id: U256,
    pub symbol: TokenSymbol,
    pub price: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormErrors(pub Vec<FieldError>);

impl FormErrors {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|e| e.field == name)
            .map(|e| e.message.as_str())
    }
}

impl fmt::Display for FormErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect();
        f.write_str(&parts.join("; "))
    }
}

impl From<FormErrors> for MarketError {
    fn from(errs: FormErrors) -> Self {
        MarketError::Validation(errs.to_string())
    }
}

fn required<'a>(errs: &mut Vec<FieldError>, field: &'static str, raw: &'a str) -> Option<&'a str> {
    let v = raw.trim();
    if v.is_empty() {
        errs.push(FieldError {
            field,
            message: REQUIRED.to_string(),
        });
        return None;
    }
    Some(v)
}

impl ListingForm {
    /// `token_decimals` is the stablecoin's decimals when known; the price's
    /// precision is checked against it (or 18 for ETH).
    pub fn validate(&self, token_decimals: Option<u8>) -> Result<ListingIntent, FormErrors> {
        let mut errs = Vec::new();

        let nft = required(&mut errs, "nftAddress", &self.nft_address).and_then(|v| {
            v.parse::<Address>()
                .map_err(|_| {
                    errs.push(FieldError {
                        field: "nftAddress",
                        message: format!("'{}' is not a valid address", v),
                    })
                })
                .ok()
        });

        let token_id = required(&mut errs, "tokenId", &self.token_id).and_then(|v| {
            U256::from_str_radix(v, 10)
                .map_err(|_| {
                    errs.push(FieldError {
                        field: "tokenId",
                        message: "token id must be a non-negative integer".to_string(),
                    })
                })
                .ok()
        });

        let symbol = required(&mut errs, "paymentToken", &self.payment_token).and_then(|v| {
            v.parse::<TokenSymbol>()
                .map_err(|e| {
                    errs.push(FieldError {
                        field: "paymentToken",
                        message: e,
                    })
                })
                .ok()
        });

        let price = required(&mut errs, "price", &self.price).map(str::to_string);
        if let (Some(p), Some(sym)) = (price.as_deref(), symbol) {
            let decimals = match sym {
                TokenSymbol::Eth => NATIVE_DECIMALS,
                TokenSymbol::Usdc => token_decimals.unwrap_or(DEFAULT_TOKEN_DECIMALS),
            };
            match parse_units(p, decimals) {
                Ok(units) if units.is_zero() => errs.push(FieldError {
                    field: "price",
                    message: "price must be greater than zero".to_string(),
                }),
                Ok(_) => {}
                Err(e) => errs.push(FieldError {
                    field: "price",
                    message: e.to_string(),
                }),
            }
        }

        match (nft, token_id, symbol, price) {
            (Some(nft), Some(token_id), Some(symbol), Some(price)) if errs.is_empty() => {
                Ok(ListingIntent {
                    nft,
                    token_id,
                    symbol,
                    price,
                })
            }
            _ => Err(FormErrors(errs)),
        }
    }
}

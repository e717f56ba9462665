//! Integer smallest-unit arithmetic and its display formatting.
//!
//! Prices are compared only as `U256`. Decimal strings exist for user input
//! and for rendering, never for comparison.

use crate::error::MarketError;
use alloy_primitives::{
    utils::{self, ParseUnits},
    U256,
};

/// Digits a `U256` can always hold.
const MAX_DIGITS: usize = 77;

/// Parses a user-entered decimal amount ("0.25", "12", ".5") into smallest units.
/// Excess precision is an error rather than being truncated.
pub fn parse_units(input: &str, decimals: u8) -> Result<U256, MarketError> {
    let raw = input.trim();
    if raw.is_empty() {
        return Err(MarketError::validation("amount is required"));
    }
    if raw.starts_with('-') {
        return Err(MarketError::validation("amount must not be negative"));
    }
    let (int_part, frac_part) = raw.split_once('.').unwrap_or((raw, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(MarketError::validation(format!("invalid amount '{}'", raw)));
    }
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(int_part) || !all_digits(frac_part) {
        return Err(MarketError::validation(format!("invalid amount '{}'", raw)));
    }
    if frac_part.len() > decimals as usize {
        return Err(MarketError::validation(format!(
            "amount '{}' has more than {} decimal places",
            raw, decimals
        )));
    }
    if int_part.trim_start_matches('0').len() + decimals as usize > MAX_DIGITS {
        return Err(MarketError::validation(format!("amount '{}' is out of range", raw)));
    }

    match utils::parse_units(raw, decimals) {
        Ok(ParseUnits::U256(v)) => Ok(v),
        Ok(ParseUnits::I256(_)) => Err(MarketError::validation("amount must not be negative")),
        Err(e) => Err(MarketError::validation(format!("invalid amount '{}': {}", raw, e))),
    }
}

/// Renders smallest units with at least one fractional digit: `5000000`/6 → "5.0".
pub fn format_units(value: U256, decimals: u8) -> String {
    let full = match utils::format_units(value, decimals) {
        Ok(s) => s,
        Err(_) => return format!("{}.0", value),
    };
    match full.split_once('.') {
        Some((int_part, frac)) => {
            let frac = frac.trim_end_matches('0');
            if frac.is_empty() {
                format!("{}.0", int_part)
            } else {
                format!("{}.{}", int_part, frac)
            }
        }
        None => format!("{}.0", full),
    }
}

/// Parses a raw smallest-unit integer string as returned by the indexer.
pub fn parse_raw_amount(raw: &str) -> Result<U256, MarketError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(MarketError::validation("amount is required"));
    }
    if let Some(hex) = trimmed.strip_prefix("0x") {
        return U256::from_str_radix(hex, 16)
            .map_err(|_| MarketError::validation(format!("invalid amount '{}'", trimmed)));
    }
    U256::from_str_radix(trimmed, 10)
        .map_err(|_| MarketError::validation(format!("invalid amount '{}'", trimmed)))
}

//! Wei-denominated quantities travel through the store as decimal text so
//! that no fixed-width integer type ever truncates them.
use alloy_primitives::U256;
use eyre::{Result, eyre};

/// Render a quantity as base-10 text.
pub fn to_decimal_text(value: U256) -> String {
    value.to_string()
}

/// Parse base-10 text produced by [`to_decimal_text`] or read back from a
/// `NUMERIC` column. A fractional part made only of zeros is accepted.
pub fn from_decimal_text(text: &str) -> Result<U256> {
    let text = text.trim();
    let integral = match text.split_once('.') {
        Some((int, frac)) if frac.chars().all(|c| c == '0') => int,
        Some(_) => return Err(eyre!("quantity {text:?} is not an integer")),
        None => text,
    };
    U256::from_str_radix(integral, 10).map_err(|e| eyre!("invalid decimal quantity {text:?}: {e}"))
}

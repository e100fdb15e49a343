// Decimal amount conversion
//
// Nodes report values as decimal coin amounts ("0.00012345"). The canonical
// model stores integer base units (1 coin = 10^8 units). Conversion is exact
// decimal arithmetic; floating point is only a sanity cross-check.

use bigdecimal::BigDecimal;
use num_traits::ToPrimitive;
use std::str::FromStr;
use thiserror::Error;

/// Number of fractional digits in one coin
pub const UNIT_DECIMALS: u32 = 8;

/// Stored values must stay below 10^32 (DECIMAL(32) columns)
pub const VALUE_PRECISION_DIGITS: u32 = 32;

/// Maximum allowed drift between exact and floating-point conversion
pub const FLOAT_TOLERANCE: f64 = 32.0;

const UNITS_PER_COIN: u64 = 10u64.pow(UNIT_DECIMALS);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmountError {
    #[error("negative amount: {0}")]
    Negative(String),

    #[error("malformed amount: {0}")]
    Malformed(String),

    #[error("amount {0} is finer than one base unit")]
    TooManyDecimals(String),

    #[error("amount {0} exceeds the storable precision")]
    Overflow(String),

    #[error("amount {text} drifts from its floating-point value by {drift}")]
    Drift { text: String, drift: u128 },
}

/// Convert a non-negative decimal coin amount into base units.
pub fn to_base_units(text: &str) -> Result<u128, AmountError> {
    let text = text.trim();
    if text.starts_with('-') {
        return Err(AmountError::Negative(text.to_string()));
    }

    // plain digits around at most one point, no sign or exponent
    let (whole, fraction) = match text.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (text, None),
    };
    let plain = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
    if whole.len() + fraction.map_or(0, str::len) == 0
        || !plain(whole)
        || !fraction.is_none_or(plain)
    {
        return Err(AmountError::Malformed(text.to_string()));
    }

    let coins =
        BigDecimal::from_str(text).map_err(|_| AmountError::Malformed(text.to_string()))?;
    let units = coins * BigDecimal::from(UNITS_PER_COIN);
    if !units.is_integer() {
        return Err(AmountError::TooManyDecimals(text.to_string()));
    }

    let (digits, _) = units.with_scale(0).into_bigint_and_exponent();
    let value = digits
        .to_u128()
        .filter(|value| *value < 10u128.pow(VALUE_PRECISION_DIGITS))
        .ok_or_else(|| AmountError::Overflow(text.to_string()))?;

    if fraction.is_some() {
        check_drift(value, text)?;
    }
    Ok(value)
}

/// Signed variant, used for shielded pool balances that may be negative.
pub fn to_signed_base_units(text: &str) -> Result<i128, AmountError> {
    let text = text.trim();
    match text.strip_prefix('-') {
        Some(magnitude) => Ok(-(to_base_units(magnitude)? as i128)),
        None => Ok(to_base_units(text)? as i128),
    }
}

fn check_drift(value: u128, text: &str) -> Result<(), AmountError> {
    let naive: f64 = text
        .parse::<f64>()
        .map_err(|_| AmountError::Malformed(text.to_string()))?
        * UNITS_PER_COIN as f64;
    let drift = (value as f64 - naive).abs();
    if drift > FLOAT_TOLERANCE {
        return Err(AmountError::Drift {
            text: text.to_string(),
            drift: drift as u128,
        });
    }
    Ok(())
}

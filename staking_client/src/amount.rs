//! Conversion between display units and on-chain base units

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::error::{StakingError, StakingResult};

/// Largest decimals value whose scale factor fits in a u64
pub const MAX_DECIMALS: u8 = 19;

fn scale_factor(decimals: u8) -> StakingResult<u64> {
    10u64
        .checked_pow(decimals as u32)
        .ok_or_else(|| StakingError::InvalidAmount(format!("unsupported decimals {}", decimals)))
}

/// Convert a display amount to base units (`display * 10^decimals`).
///
/// Digits beyond `decimals` are truncated toward zero. Fails with
/// `InvalidAmount` for non-positive amounts, amounts that truncate to zero,
/// and amounts that overflow u64.
pub fn to_base_units(display: Decimal, decimals: u8) -> StakingResult<u64> {
    if display <= Decimal::ZERO {
        return Err(StakingError::InvalidAmount(format!(
            "amount must be positive, got {}",
            display
        )));
    }

    let factor = Decimal::from(scale_factor(decimals)?);
    let scaled = display
        .checked_mul(factor)
        .ok_or_else(|| StakingError::InvalidAmount(format!("{} overflows base units", display)))?
        .trunc();

    let base = scaled
        .to_u64()
        .ok_or_else(|| StakingError::InvalidAmount(format!("{} overflows base units", display)))?;

    if base == 0 {
        return Err(StakingError::InvalidAmount(format!(
            "{} is smaller than one base unit",
            display
        )));
    }

    Ok(base)
}

/// Convert base units back to an exact display amount
pub fn to_display_units(base: u64, decimals: u8) -> Decimal {
    let decimals = decimals.min(28);
    Decimal::from_i128_with_scale(base as i128, decimals as u32).normalize()
}

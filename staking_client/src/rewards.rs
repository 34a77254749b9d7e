//! Reward model: tier classification, effective APY and pending-reward accrual
//!
//! Mirrors the on-chain program's accounting for display. All reward math is
//! fixed point; APY percentages are carried as `Decimal` and converted to an
//! integer micro-percent before they touch base-unit token amounts.

use std::fmt;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::constants::{
    EMERGENCY_WITHDRAWAL_FEE_PERCENT, MAX_APY, MIN_APY, SECONDS_PER_YEAR,
    STANDARD_WITHDRAWAL_FEE_PERCENT,
};

/// Fixed-point scale applied to APY percentages in the accrual formula
const APY_MICRO: u128 = 1_000_000;

/// Reward tiers, lowest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Tier {
    #[serde(rename = "REAPER_I")]
    ReaperI,
    #[serde(rename = "REAPER_II")]
    ReaperII,
    #[serde(rename = "REAPER_III")]
    ReaperIII,
    #[serde(rename = "REAPER_IV")]
    ReaperIV,
    #[serde(rename = "REAPER_V")]
    ReaperV,
}

impl Tier {
    pub const ALL: [Tier; 5] = [
        Tier::ReaperI,
        Tier::ReaperII,
        Tier::ReaperIII,
        Tier::ReaperIV,
        Tier::ReaperV,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Tier::ReaperI => "REAPER_I",
            Tier::ReaperII => "REAPER_II",
            Tier::ReaperIII => "REAPER_III",
            Tier::ReaperIV => "REAPER_IV",
            Tier::ReaperV => "REAPER_V",
        }
    }

    /// Reward multiplier applied to the base APY
    pub fn multiplier(&self) -> Decimal {
        match self {
            Tier::ReaperI => Decimal::ONE,
            Tier::ReaperII => Decimal::new(12, 1),
            Tier::ReaperIII => Decimal::new(15, 1),
            Tier::ReaperIV => Decimal::TWO,
            Tier::ReaperV => Decimal::new(3, 0),
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ordered tier thresholds in display units
#[derive(Debug, Clone, PartialEq)]
pub struct TierTable {
    /// Sorted by ascending threshold
    entries: Vec<(Tier, Decimal)>,
}

impl TierTable {
    /// Build a table; entries are sorted by threshold so lookup order never
    /// depends on declaration order.
    pub fn new(mut entries: Vec<(Tier, Decimal)>) -> Self {
        entries.sort_by(|a, b| a.1.cmp(&b.1));
        Self { entries }
    }

    /// The deployed table: REAPER_I..V at 1k / 5k / 10k / 50k / 100k tokens
    pub fn standard() -> Self {
        Self::new(vec![
            (Tier::ReaperI, Decimal::from(1_000u64)),
            (Tier::ReaperII, Decimal::from(5_000u64)),
            (Tier::ReaperIII, Decimal::from(10_000u64)),
            (Tier::ReaperIV, Decimal::from(50_000u64)),
            (Tier::ReaperV, Decimal::from(100_000u64)),
        ])
    }

    pub fn threshold(&self, tier: Tier) -> Option<Decimal> {
        self.entries.iter().find(|(t, _)| *t == tier).map(|(_, d)| *d)
    }

    /// Highest tier whose threshold `staked` meets; below every threshold
    /// (including zero) falls back to the lowest tier.
    pub fn classify(&self, staked: Decimal) -> Tier {
        self.entries
            .iter()
            .rev()
            .find(|(_, threshold)| staked >= *threshold)
            .or_else(|| self.entries.first())
            .map(|(tier, _)| *tier)
            .unwrap_or(Tier::ReaperI)
    }
}

impl Default for TierTable {
    fn default() -> Self {
        Self::standard()
    }
}

/// Tier for a staked display amount under the deployed table
pub fn classify_tier(staked: Decimal) -> Tier {
    TierTable::standard().classify(staked)
}

/// `clamp(base_apy * multiplier, MIN_APY, MAX_APY)`
pub fn effective_apy(base_apy: Decimal, tier: Tier) -> Decimal {
    match base_apy.checked_mul(tier.multiplier()) {
        Some(apy) => apy.clamp(MIN_APY, MAX_APY),
        None if base_apy.is_sign_negative() => MIN_APY,
        None => MAX_APY,
    }
}

/// `floor(staked * apy * elapsed / SECONDS_PER_YEAR / 100)` in base units.
///
/// Clock skew (`now < last_stake_timestamp`) counts as zero elapsed time.
/// Saturates at `u64::MAX`.
pub fn pending_rewards(staked_amount: u64, last_stake_timestamp: i64, apy: Decimal, now: i64) -> u64 {
    let elapsed = now.saturating_sub(last_stake_timestamp);
    if elapsed <= 0 || staked_amount == 0 || apy <= Decimal::ZERO {
        return 0;
    }

    let apy_micro = match apy
        .checked_mul(Decimal::from(APY_MICRO as u64))
        .and_then(|scaled| scaled.trunc().to_u128())
    {
        Some(value) => value,
        None => return u64::MAX,
    };

    let denominator = SECONDS_PER_YEAR as u128 * 100 * APY_MICRO;
    let rewards = (staked_amount as u128)
        .checked_mul(apy_micro)
        .and_then(|v| v.checked_mul(elapsed as u128))
        .map(|v| v / denominator);

    match rewards {
        Some(value) => u64::try_from(value).unwrap_or(u64::MAX),
        None => u64::MAX,
    }
}

/// Penalty the program keeps on an emergency withdrawal
pub fn emergency_withdrawal_penalty(amount: u64) -> u64 {
    percent_of(amount, EMERGENCY_WITHDRAWAL_FEE_PERCENT)
}

/// Fee the program keeps on a standard withdrawal
pub fn standard_withdrawal_fee(amount: u64) -> u64 {
    percent_of(amount, STANDARD_WITHDRAWAL_FEE_PERCENT)
}

fn percent_of(amount: u64, percent: u64) -> u64 {
    ((amount as u128 * percent as u128) / 100) as u64
}

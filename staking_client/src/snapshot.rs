//! Display snapshot of one owner's staking position

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use solana_sdk::pubkey::Pubkey;

use crate::amount::to_display_units;
use crate::constants::STAKE_LOCK_PERIOD_SECS;
use crate::error::StakingError;
use crate::rewards::{effective_apy, pending_rewards, Tier, TierTable};
use crate::state::{StakingState, UserStakeInfo};

/// Client-visible staking view, rebuilt on every refresh.
///
/// Amounts are display units.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RewardSnapshot {
    #[serde(serialize_with = "serialize_pubkey")]
    pub owner: Pubkey,
    pub token_balance: Decimal,
    pub staked_amount: Decimal,
    pub pending_rewards: Decimal,
    pub tier: Tier,
    /// Effective APY in percent for `tier`
    pub current_apy: Decimal,
    /// Unix time at which the next reward interval completes; `None` with no stake
    pub next_reward_eligible_time: Option<i64>,
    pub total_staked: Decimal,
    pub paused: bool,
    pub fetched_at: DateTime<Utc>,
}

fn serialize_pubkey<S: serde::Serializer>(pubkey: &Pubkey, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&pubkey.to_string())
}

/// Raw ledger reads a snapshot is built from
#[derive(Debug, Clone)]
pub struct SnapshotInputs<'a> {
    pub owner: Pubkey,
    /// `None` when the owner has no token account yet
    pub token_balance: Option<u64>,
    /// `None` when the owner has never staked
    pub stake: Option<&'a UserStakeInfo>,
    /// `None` before the program is initialized
    pub state: Option<&'a StakingState>,
}

/// Translates ledger state into a [`RewardSnapshot`]
#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    pub decimals: u8,
    pub tiers: TierTable,
    /// Base APY used when no staking state is available
    pub base_apy: Decimal,
    /// Scale of the on-chain `current_apy` field (100 means basis points)
    pub apy_precision: u64,
}

impl SnapshotBuilder {
    /// Base APY in percent: the on-chain rate when known
    pub fn base_apy(&self, state: Option<&StakingState>) -> Decimal {
        match state {
            Some(state) if self.apy_precision > 0 => {
                Decimal::from(state.current_apy) / Decimal::from(self.apy_precision)
            }
            _ => self.base_apy,
        }
    }

    pub fn build(&self, inputs: SnapshotInputs<'_>, now: DateTime<Utc>) -> RewardSnapshot {
        let (staked_base, last_stake) = inputs
            .stake
            .map(|s| (s.staked_amount, s.last_stake_timestamp))
            .unwrap_or((0, 0));

        let staked_amount = to_display_units(staked_base, self.decimals);
        let tier = self.tiers.classify(staked_amount);
        let current_apy = effective_apy(self.base_apy(inputs.state), tier);
        let pending = pending_rewards(staked_base, last_stake, current_apy, now.timestamp());

        RewardSnapshot {
            owner: inputs.owner,
            token_balance: to_display_units(inputs.token_balance.unwrap_or(0), self.decimals),
            staked_amount,
            pending_rewards: to_display_units(pending, self.decimals),
            tier,
            current_apy,
            next_reward_eligible_time: (staked_base > 0)
                .then(|| last_stake.saturating_add(STAKE_LOCK_PERIOD_SECS)),
            total_staked: to_display_units(
                inputs.state.map(|s| s.total_staked).unwrap_or(0),
                self.decimals,
            ),
            paused: inputs.state.map(|s| s.paused).unwrap_or(false),
            fetched_at: now,
        }
    }
}

/// Result of a refresh: fresh data, or the last known data with the read error
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotView {
    Fresh(RewardSnapshot),
    Stale {
        last_known: Option<RewardSnapshot>,
        error: StakingError,
    },
}

impl SnapshotView {
    pub fn snapshot(&self) -> Option<&RewardSnapshot> {
        match self {
            SnapshotView::Fresh(snapshot) => Some(snapshot),
            SnapshotView::Stale { last_known, .. } => last_known.as_ref(),
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, SnapshotView::Stale { .. })
    }
}

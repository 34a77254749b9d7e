//! Client-side views of the staking program's accounts
//!
//! Layouts follow the program's published schema field by field. Every
//! account is stored as an 8-byte type discriminator followed by the Borsh
//! encoding of its fields.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::Serialize;
use sha2::{Digest, Sha256};
use solana_sdk::pubkey::Pubkey;

use crate::constants::ACCOUNT_DISCRIMINATOR_LEN;
use crate::error::{StakingError, StakingResult};

/// Parameters the program is initialized with
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProtocolConfig {
    pub base_apy: u64,
    pub min_stake: u64,
    pub max_stake: u64,
    pub emergency_cooldown: i64,
    pub withdrawal_limit: u64,
    pub voting_period: i64,
}

/// Global staking parameters and totals
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StakingState {
    pub authority: Pubkey,
    pub current_apy: u64,
    pub min_stake: u64,
    pub max_stake: u64,
    pub emergency_cooldown: i64,
    pub paused: bool,
    pub total_staked: u64,
}

/// One owner's stake record
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserStakeInfo {
    pub owner: Pubkey,
    pub staked_amount: u64,
    pub last_stake_timestamp: i64,
    pub rewards_claimed: u64,
}

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GovernanceState {
    pub current_apy: u64,
    pub voting_period: i64,
    pub required_quorum: u64,
    pub proposal_count: u64,
}

/// Governance change carried by a proposal
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ProposalData {
    UpdateApy { new_apy: u64 },
    UpdateWithdrawalLimit { new_limit: u64 },
    UpdateVotingPeriod { new_period: i64 },
    UpdateQuorum { new_quorum: u64 },
}

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Proposal {
    pub proposal_id: u64,
    pub author: Pubkey,
    pub creation_time: i64,
    pub end_time: i64,
    pub executed: bool,
    pub for_votes: u64,
    pub against_votes: u64,
    pub voters: Vec<Pubkey>,
    pub data: ProposalData,
}

impl Proposal {
    pub fn has_voted(&self, voter: &Pubkey) -> bool {
        self.voters.contains(voter)
    }

    pub fn is_open(&self, now: i64) -> bool {
        now < self.end_time && !self.executed
    }
}

/// Account types stored by the program
pub trait ProgramAccount: BorshSerialize + BorshDeserialize + Sized {
    /// Type name hashed into the discriminator
    const NAME: &'static str;

    /// First 8 bytes of `sha256("account:<NAME>")`
    fn discriminator() -> [u8; ACCOUNT_DISCRIMINATOR_LEN] {
        let digest = Sha256::digest(format!("account:{}", Self::NAME).as_bytes());
        let mut out = [0u8; ACCOUNT_DISCRIMINATOR_LEN];
        out.copy_from_slice(&digest[..ACCOUNT_DISCRIMINATOR_LEN]);
        out
    }

    /// Decode raw account bytes, checking the discriminator.
    ///
    /// Trailing bytes are allowed; accounts are often allocated larger than
    /// their current contents.
    fn decode(data: &[u8]) -> StakingResult<Self> {
        if data.len() < ACCOUNT_DISCRIMINATOR_LEN {
            return Err(StakingError::AccountDecode {
                account: Self::NAME,
                reason: format!("{} bytes is shorter than the discriminator", data.len()),
            });
        }

        let (prefix, mut body) = data.split_at(ACCOUNT_DISCRIMINATOR_LEN);
        if prefix != Self::discriminator() {
            return Err(StakingError::AccountDecode {
                account: Self::NAME,
                reason: "discriminator mismatch".to_string(),
            });
        }

        Self::deserialize(&mut body).map_err(|e| StakingError::AccountDecode {
            account: Self::NAME,
            reason: e.to_string(),
        })
    }

    /// Encode as the program stores it
    fn encode(&self) -> StakingResult<Vec<u8>> {
        let mut data = Self::discriminator().to_vec();
        self.serialize(&mut data).map_err(|e| StakingError::AccountDecode {
            account: Self::NAME,
            reason: e.to_string(),
        })?;
        Ok(data)
    }
}

impl ProgramAccount for StakingState {
    const NAME: &'static str = "StakingState";
}

impl ProgramAccount for UserStakeInfo {
    const NAME: &'static str = "UserStakeInfo";
}

impl ProgramAccount for GovernanceState {
    const NAME: &'static str = "GovernanceState";
}

impl ProgramAccount for Proposal {
    const NAME: &'static str = "Proposal";
}

impl StakingState {
    /// Serialized field width, excluding the discriminator
    pub const LEN: usize = 32 + 8 + 8 + 8 + 8 + 1 + 8;
}

impl UserStakeInfo {
    pub const LEN: usize = 32 + 8 + 8 + 8;
}

impl GovernanceState {
    pub const LEN: usize = 8 + 8 + 8 + 8;
}

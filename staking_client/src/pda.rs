//! Program Derived Address (PDA) utilities
//!
//! Centralized module for deriving every account address the staking program
//! uses. Derivation must agree bit-for-bit with the program's own seeds, so
//! all seed bytes live here and nowhere else.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use spl_associated_token_account::get_associated_token_address_with_program_id;

use crate::error::{StakingError, StakingResult};

/// PDA seeds for the program's accounts
pub mod seeds {
    pub const STAKING_STATE: &[u8] = b"staking_state";
    /// Prefix used when each authority runs its own staking state
    pub const AUTHORITY_STAKING: &[u8] = b"staking";
    pub const USER_STAKE: &[u8] = b"user_stake";
    pub const TREASURY_STATE: &[u8] = b"treasury_state";
    pub const GOVERNANCE_STATE: &[u8] = b"governance_state";
}

/// Where the staking-state account lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StakingTopology {
    /// One staking state per deployment: `["staking_state"]`
    Global,
    /// One staking state per authority: `["staking", authority]`
    PerAuthority(Pubkey),
}

/// Address kinds the deriver knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeedLabel {
    StakingState,
    UserStake,
    ProtocolTokenAccount,
    UserTokenAccount,
    TreasuryState,
    GovernanceState,
}

impl SeedLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeedLabel::StakingState => "staking-state",
            SeedLabel::UserStake => "user-stake",
            SeedLabel::ProtocolTokenAccount => "protocol-token-account",
            SeedLabel::UserTokenAccount => "user-token-account",
            SeedLabel::TreasuryState => "treasury-state",
            SeedLabel::GovernanceState => "governance-state",
        }
    }

    pub fn requires_owner(&self) -> bool {
        matches!(self, SeedLabel::UserStake | SeedLabel::UserTokenAccount)
    }
}

impl fmt::Display for SeedLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SeedLabel {
    type Err = StakingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "staking-state" => Ok(SeedLabel::StakingState),
            "user-stake" => Ok(SeedLabel::UserStake),
            "protocol-token-account" => Ok(SeedLabel::ProtocolTokenAccount),
            "user-token-account" => Ok(SeedLabel::UserTokenAccount),
            "treasury-state" => Ok(SeedLabel::TreasuryState),
            "governance-state" => Ok(SeedLabel::GovernanceState),
            other => Err(StakingError::Derivation(format!("unknown seed label '{}'", other))),
        }
    }
}

/// Parse a base58 address from configuration
pub fn parse_pubkey(what: &str, value: &str) -> StakingResult<Pubkey> {
    Pubkey::from_str(value.trim())
        .map_err(|e| StakingError::Derivation(format!("malformed {} '{}': {}", what, value, e)))
}

/// Deterministic address deriver for one deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressDeriver {
    program_id: Pubkey,
    mint: Pubkey,
    token_program: Pubkey,
    topology: StakingTopology,
}

impl AddressDeriver {
    pub fn new(program_id: Pubkey, mint: Pubkey, topology: StakingTopology) -> Self {
        Self {
            program_id,
            mint,
            token_program: spl_token::id(),
            topology,
        }
    }

    /// Build from configured base58 strings; a malformed id is fatal
    pub fn from_config(program_id: &str, mint: &str, topology: StakingTopology) -> StakingResult<Self> {
        let program_id = parse_pubkey("program id", program_id)?;
        let mint = parse_pubkey("mint", mint)?;
        Ok(Self::new(program_id, mint, topology))
    }

    pub fn program_id(&self) -> &Pubkey {
        &self.program_id
    }

    pub fn mint(&self) -> &Pubkey {
        &self.mint
    }

    pub fn token_program(&self) -> &Pubkey {
        &self.token_program
    }

    pub fn topology(&self) -> StakingTopology {
        self.topology
    }

    /// Derive the address for `label`. Owner-keyed labels need `owner`.
    pub fn derive(&self, label: SeedLabel, owner: Option<&Pubkey>) -> StakingResult<Pubkey> {
        match (label, owner) {
            (SeedLabel::StakingState, _) => self.staking_state_pda().map(|(address, _)| address),
            (SeedLabel::TreasuryState, _) => self.find(&[seeds::TREASURY_STATE]).map(|(a, _)| a),
            (SeedLabel::GovernanceState, _) => self.find(&[seeds::GOVERNANCE_STATE]).map(|(a, _)| a),
            (SeedLabel::ProtocolTokenAccount, _) => {
                // Owned by the staking-state PDA, i.e. off-curve
                let staking_state = self.staking_state_pda()?.0;
                Ok(self.associated_token_account(&staking_state))
            }
            (SeedLabel::UserStake, Some(owner)) => self.user_stake_pda(owner).map(|(address, _)| address),
            (SeedLabel::UserTokenAccount, Some(owner)) => Ok(self.associated_token_account(owner)),
            (label, None) => Err(StakingError::Derivation(format!("{} requires an owner", label))),
        }
    }

    /// Staking-state PDA and bump
    pub fn staking_state_pda(&self) -> StakingResult<(Pubkey, u8)> {
        match &self.topology {
            StakingTopology::Global => self.find(&[seeds::STAKING_STATE]),
            StakingTopology::PerAuthority(authority) => {
                self.find(&[seeds::AUTHORITY_STAKING, authority.as_ref()])
            }
        }
    }

    /// Per-user stake record PDA and bump
    pub fn user_stake_pda(&self, owner: &Pubkey) -> StakingResult<(Pubkey, u8)> {
        self.find(&[seeds::USER_STAKE, owner.as_ref()])
    }

    /// Associated token account of the DEATH mint for `owner`
    pub fn associated_token_account(&self, owner: &Pubkey) -> Pubkey {
        get_associated_token_address_with_program_id(owner, &self.mint, &self.token_program)
    }

    /// Every address one user's actions touch
    pub fn address_book(&self, owner: &Pubkey) -> StakingResult<AddressBook> {
        Ok(AddressBook {
            owner: *owner,
            staking_state: self.derive(SeedLabel::StakingState, None)?,
            user_stake: self.derive(SeedLabel::UserStake, Some(owner))?,
            user_token_account: self.derive(SeedLabel::UserTokenAccount, Some(owner))?,
            protocol_token_account: self.derive(SeedLabel::ProtocolTokenAccount, None)?,
            treasury_state: self.derive(SeedLabel::TreasuryState, None)?,
            governance_state: self.derive(SeedLabel::GovernanceState, None)?,
            mint: self.mint,
            token_program: self.token_program,
            program_id: self.program_id,
        })
    }

    fn find(&self, seeds: &[&[u8]]) -> StakingResult<(Pubkey, u8)> {
        Pubkey::try_find_program_address(seeds, &self.program_id).ok_or_else(|| {
            StakingError::Derivation(format!("no viable bump for program {}", self.program_id))
        })
    }
}

/// Derived addresses for one owner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressBook {
    pub owner: Pubkey,
    pub staking_state: Pubkey,
    pub user_stake: Pubkey,
    pub user_token_account: Pubkey,
    pub protocol_token_account: Pubkey,
    pub treasury_state: Pubkey,
    pub governance_state: Pubkey,
    pub mint: Pubkey,
    pub token_program: Pubkey,
    pub program_id: Pubkey,
}

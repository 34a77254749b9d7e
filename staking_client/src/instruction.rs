//! Instruction builders for the staking program
//!
//! Builders only assemble instructions. Fee payer, blockhash and signatures
//! are left to the caller, which fills them in right before submission.

use borsh::{BorshDeserialize, BorshSerialize};
use rust_decimal::Decimal;
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    system_program,
    transaction::Transaction,
};
use spl_associated_token_account::instruction::create_associated_token_account_idempotent;

use crate::amount::to_base_units;
use crate::error::{StakingError, StakingResult};
use crate::pda::{AddressBook, AddressDeriver};
use crate::state::{ProposalData, ProtocolConfig};

/// Instructions understood by the staking program.
///
/// Variant order is the wire discriminant and must not change.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub enum StakingInstruction {
    Stake { amount: u64 },
    Unstake { amount: u64 },
    ClaimRewards,
    EmergencyWithdraw { amount: u64 },
    CreateProposal { data: ProposalData },
    Vote { support: bool },
    Initialize { config: ProtocolConfig },
    ExecuteProposal,
}

impl StakingInstruction {
    pub fn name(&self) -> &'static str {
        match self {
            StakingInstruction::Stake { .. } => "stake",
            StakingInstruction::Unstake { .. } => "unstake",
            StakingInstruction::ClaimRewards => "claim_rewards",
            StakingInstruction::EmergencyWithdraw { .. } => "emergency_withdraw",
            StakingInstruction::CreateProposal { .. } => "create_proposal",
            StakingInstruction::Vote { .. } => "vote",
            StakingInstruction::Initialize { .. } => "initialize",
            StakingInstruction::ExecuteProposal => "execute_proposal",
        }
    }

    pub fn pack(&self) -> StakingResult<Vec<u8>> {
        self.try_to_vec()
            .map_err(|e| StakingError::Validation(format!("failed to encode {}: {}", self.name(), e)))
    }
}

/// Ordered instructions for one transaction plus the extra keys that must sign
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionBundle {
    pub instructions: Vec<Instruction>,
    /// Signers besides the fee payer, e.g. a fresh proposal account
    pub extra_signers: Vec<Pubkey>,
}

impl InstructionBundle {
    fn single(instruction: Instruction) -> Self {
        Self {
            instructions: vec![instruction],
            extra_signers: Vec::new(),
        }
    }

    /// Unsigned transaction with `payer` as fee payer and a default blockhash
    pub fn to_transaction(&self, payer: &Pubkey) -> Transaction {
        Transaction::new_with_payer(&self.instructions, Some(payer))
    }
}

/// Builds staking program instructions for one deployment
#[derive(Debug, Clone)]
pub struct InstructionBuilder {
    deriver: AddressDeriver,
    decimals: u8,
}

impl InstructionBuilder {
    pub fn new(deriver: AddressDeriver, decimals: u8) -> Self {
        Self { deriver, decimals }
    }

    pub fn deriver(&self) -> &AddressDeriver {
        &self.deriver
    }

    pub fn decimals(&self) -> u8 {
        self.decimals
    }

    /// Stake `amount` display units.
    ///
    /// When `protocol_account_exists` is false an idempotent create of the
    /// protocol token account is prepended, paid for by `user`.
    pub fn stake(
        &self,
        user: &Pubkey,
        amount: Decimal,
        protocol_account_exists: bool,
    ) -> StakingResult<InstructionBundle> {
        let amount = to_base_units(amount, self.decimals)?;
        let book = self.deriver.address_book(user)?;

        let mut accounts = token_transfer_accounts(&book);
        accounts.push(AccountMeta::new_readonly(system_program::id(), false));

        let instruction = self.instruction(accounts, StakingInstruction::Stake { amount })?;
        Ok(self.with_bootstrap(&book, instruction, protocol_account_exists))
    }

    /// Unstake `amount` display units
    pub fn unstake(
        &self,
        user: &Pubkey,
        amount: Decimal,
        protocol_account_exists: bool,
    ) -> StakingResult<InstructionBundle> {
        let amount = to_base_units(amount, self.decimals)?;
        let book = self.deriver.address_book(user)?;

        let instruction =
            self.instruction(token_transfer_accounts(&book), StakingInstruction::Unstake { amount })?;
        Ok(self.with_bootstrap(&book, instruction, protocol_account_exists))
    }

    pub fn claim_rewards(
        &self,
        user: &Pubkey,
        protocol_account_exists: bool,
    ) -> StakingResult<InstructionBundle> {
        let book = self.deriver.address_book(user)?;

        let instruction =
            self.instruction(token_transfer_accounts(&book), StakingInstruction::ClaimRewards)?;
        Ok(self.with_bootstrap(&book, instruction, protocol_account_exists))
    }

    /// Emergency-withdraw `amount` base units.
    ///
    /// Takes base units because the amount is the staked balance read from
    /// the ledger, not user input.
    pub fn emergency_withdraw(
        &self,
        user: &Pubkey,
        amount: u64,
        protocol_account_exists: bool,
    ) -> StakingResult<InstructionBundle> {
        if amount == 0 {
            return Err(StakingError::InvalidAmount("nothing staked to withdraw".to_string()));
        }
        let book = self.deriver.address_book(user)?;

        let instruction = self.instruction(
            token_transfer_accounts(&book),
            StakingInstruction::EmergencyWithdraw { amount },
        )?;
        Ok(self.with_bootstrap(&book, instruction, protocol_account_exists))
    }

    /// Create a governance proposal stored at the fresh account `proposal`,
    /// which must co-sign
    pub fn create_proposal(
        &self,
        author: &Pubkey,
        proposal: &Pubkey,
        data: ProposalData,
    ) -> StakingResult<InstructionBundle> {
        let book = self.deriver.address_book(author)?;

        let instruction = self.instruction(
            vec![
                AccountMeta::new(*author, true),
                AccountMeta::new(book.governance_state, false),
                AccountMeta::new(*proposal, true),
                AccountMeta::new_readonly(system_program::id(), false),
            ],
            StakingInstruction::CreateProposal { data },
        )?;

        Ok(InstructionBundle {
            instructions: vec![instruction],
            extra_signers: vec![*proposal],
        })
    }

    pub fn vote(&self, voter: &Pubkey, proposal: &Pubkey, support: bool) -> StakingResult<InstructionBundle> {
        let book = self.deriver.address_book(voter)?;

        let instruction = self.instruction(
            vec![
                AccountMeta::new(*voter, true),
                AccountMeta::new(*proposal, false),
                AccountMeta::new(book.governance_state, false),
                // Voting weight is read from the voter's stake record
                AccountMeta::new_readonly(book.user_stake, false),
            ],
            StakingInstruction::Vote { support },
        )?;

        Ok(InstructionBundle::single(instruction))
    }

    pub fn execute_proposal(&self, executor: &Pubkey, proposal: &Pubkey) -> StakingResult<InstructionBundle> {
        let book = self.deriver.address_book(executor)?;

        let instruction = self.instruction(
            vec![
                AccountMeta::new(*executor, true),
                AccountMeta::new(*proposal, false),
                AccountMeta::new(book.governance_state, false),
                AccountMeta::new(book.staking_state, false),
                AccountMeta::new(book.treasury_state, false),
            ],
            StakingInstruction::ExecuteProposal,
        )?;

        Ok(InstructionBundle::single(instruction))
    }

    /// One-time program initialization by `authority`
    pub fn initialize(&self, authority: &Pubkey, config: ProtocolConfig) -> StakingResult<InstructionBundle> {
        if config.min_stake > config.max_stake {
            return Err(StakingError::Validation(format!(
                "min_stake {} exceeds max_stake {}",
                config.min_stake, config.max_stake
            )));
        }
        let book = self.deriver.address_book(authority)?;

        let instruction = self.instruction(
            vec![
                AccountMeta::new(*authority, true),
                AccountMeta::new(book.staking_state, false),
                AccountMeta::new(book.treasury_state, false),
                AccountMeta::new(book.governance_state, false),
                AccountMeta::new_readonly(system_program::id(), false),
            ],
            StakingInstruction::Initialize { config },
        )?;

        Ok(InstructionBundle::single(instruction))
    }

    fn instruction(&self, accounts: Vec<AccountMeta>, data: StakingInstruction) -> StakingResult<Instruction> {
        Ok(Instruction {
            program_id: *self.deriver.program_id(),
            accounts,
            data: data.pack()?,
        })
    }

    fn with_bootstrap(
        &self,
        book: &AddressBook,
        instruction: Instruction,
        protocol_account_exists: bool,
    ) -> InstructionBundle {
        let mut instructions = Vec::with_capacity(2);
        if !protocol_account_exists {
            instructions.push(create_associated_token_account_idempotent(
                &book.owner,
                &book.staking_state,
                &book.mint,
                &book.token_program,
            ));
        }
        instructions.push(instruction);

        InstructionBundle {
            instructions,
            extra_signers: Vec::new(),
        }
    }
}

/// Accounts shared by every instruction that moves DEATH tokens
fn token_transfer_accounts(book: &AddressBook) -> Vec<AccountMeta> {
    vec![
        AccountMeta::new(book.owner, true),
        AccountMeta::new(book.staking_state, false),
        AccountMeta::new(book.user_stake, false),
        AccountMeta::new(book.user_token_account, false),
        AccountMeta::new(book.protocol_token_account, false),
        AccountMeta::new_readonly(book.token_program, false),
    ]
}

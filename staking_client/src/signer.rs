//! Contract for the external signing collaborator
//!
//! The client never sees key material. It hands over a transaction with fee
//! payer and blockhash already set, and expects it back carrying every
//! signature the message requires.

use async_trait::async_trait;
use solana_sdk::{pubkey::Pubkey, transaction::Transaction};
use thiserror::Error;

use crate::error::StakingError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignerError {
    #[error("Signing request declined")]
    Declined,

    #[error("No key available for required signer {0}")]
    MissingSigner(Pubkey),

    #[error("Signer failed: {0}")]
    Failed(String),
}

impl From<SignerError> for StakingError {
    fn from(err: SignerError) -> Self {
        StakingError::Signing(err.to_string())
    }
}

/// Wallet agent that signs on behalf of the connected identity
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    /// Identity that pays fees and authorizes actions
    fn pubkey(&self) -> Pubkey;

    /// Sign `transaction` for every signer it requires
    async fn sign_transaction(&self, transaction: Transaction) -> Result<Transaction, SignerError>;
}

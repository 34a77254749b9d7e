//! Typed error system for the staking client
//!
//! Every failure is classified once, where it happens, into a [`StakingError`].
//! The orchestrator stores the last one in its error slot for the UI.

use serde::Serialize;
use solana_sdk::signature::Signature;
use thiserror::Error;

/// Error categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad local input; never reaches the network
    Validation,
    /// Malformed seeds or program id; the deployment is misconfigured
    Derivation,
    /// RPC unreachable or timed out on a read
    Network,
    /// The RPC node or program rejected the transaction
    SubmissionRejected,
    /// The transaction landed with an error, or its blockhash expired unlanded
    ConfirmationFailed,
    /// The transaction may or may not have landed
    OutcomeUnknown,
    /// A mutating operation is already in flight
    Concurrency,
    /// Account bytes did not match the published layout
    Decode,
    /// The signing collaborator failed or declined
    Signing,
    /// Invalid client configuration
    Configuration,
}

impl ErrorKind {
    /// Check if the failed call may be retried without user involvement.
    ///
    /// Only reads are retryable; mutations always need an explicit user retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Network)
    }

    /// Get user-facing error message
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "Invalid input",
            ErrorKind::Derivation => "Client is misconfigured for this deployment",
            ErrorKind::Network => "Ledger unreachable, showing last known data",
            ErrorKind::SubmissionRejected => "Transaction was rejected",
            ErrorKind::ConfirmationFailed => "Transaction failed",
            ErrorKind::OutcomeUnknown => "Transaction outcome unknown, refresh to check your balance",
            ErrorKind::Concurrency => "Another operation is still in progress",
            ErrorKind::Decode => "Unexpected account data",
            ErrorKind::Signing => "Wallet did not sign the transaction",
            ErrorKind::Configuration => "Configuration error",
        }
    }
}

/// Errors produced by the staking client core
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StakingError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("No wallet connected")]
    NotConnected,

    #[error("Amount {amount} outside allowed range [{min}, {max}] (base units)")]
    OutOfBounds { amount: u64, min: u64, max: u64 },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Address derivation failed: {0}")]
    Derivation(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Submission rejected: {0}")]
    SubmissionRejected(String),

    /// The send request failed after it may have reached the node
    #[error("Submission of {signature} interrupted; outcome unknown: {reason}")]
    SubmissionInterrupted { signature: Signature, reason: String },

    #[error("Transaction {signature} failed: {reason}")]
    ConfirmationFailed { signature: Signature, reason: String },

    #[error("Confirmation of {signature} timed out; outcome unknown")]
    ConfirmationTimeout { signature: Signature },

    #[error("Stopped waiting for {signature:?}; outcome unknown")]
    ConfirmationAbandoned { signature: Option<Signature> },

    #[error("Another operation is in progress")]
    OperationInProgress,

    #[error("Failed to decode {account}: {reason}")]
    AccountDecode { account: &'static str, reason: String },

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl StakingError {
    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            StakingError::InvalidAmount(_)
            | StakingError::NotConnected
            | StakingError::OutOfBounds { .. }
            | StakingError::Validation(_) => ErrorKind::Validation,
            StakingError::Derivation(_) => ErrorKind::Derivation,
            StakingError::Network(_) => ErrorKind::Network,
            StakingError::SubmissionRejected(_) => ErrorKind::SubmissionRejected,
            StakingError::ConfirmationFailed { .. } => ErrorKind::ConfirmationFailed,
            StakingError::SubmissionInterrupted { .. }
            | StakingError::ConfirmationTimeout { .. }
            | StakingError::ConfirmationAbandoned { .. } => ErrorKind::OutcomeUnknown,
            StakingError::OperationInProgress => ErrorKind::Concurrency,
            StakingError::AccountDecode { .. } => ErrorKind::Decode,
            StakingError::Signing(_) => ErrorKind::Signing,
            StakingError::Configuration(_) => ErrorKind::Configuration,
        }
    }

    /// True when the transaction may still land and state must be re-read
    pub fn is_outcome_unknown(&self) -> bool {
        self.kind() == ErrorKind::OutcomeUnknown
    }
}

pub type StakingResult<T> = Result<T, StakingError>;

//! Client core for the DEATH token staking program
//!
//! Derives program addresses, builds staking instructions, mirrors the
//! program's reward model for display and drives each mutation through a
//! submit/confirm life cycle against a ledger gateway.

pub mod amount;
pub mod client;
pub mod config;
pub mod constants;
pub mod error;
pub mod gateway;
pub mod instruction;
pub mod logging;
pub mod pda;
pub mod rewards;
pub mod session;
pub mod signer;
pub mod snapshot;
pub mod state;

pub use client::{Clock, ClientOptions, InitializationOutcome, SessionPhase, StakingClient, SystemClock};
pub use config::{ClientConfig, ConfigError};
pub use error::{ErrorKind, StakingError, StakingResult};
pub use gateway::{ConfirmationOutcome, LedgerGateway, RpcLedgerGateway};
pub use pda::{AddressDeriver, SeedLabel, StakingTopology};
pub use rewards::Tier;
pub use session::{ConnectionEvent, Subscription, WalletSession};
pub use signer::{SignerError, TransactionSigner};
pub use snapshot::{RewardSnapshot, SnapshotView};

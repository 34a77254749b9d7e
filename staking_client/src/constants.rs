//! Deployment constants for the DEATH staking protocol.
//!
//! Values mirror the on-chain program's deployment. They are used for display
//! and for pre-flight validation only; the program remains authoritative.

use rust_decimal::Decimal;

/// Default on-chain program id of the staking program
pub const DEFAULT_PROGRAM_ID: &str = "EMmqYXyEiJuBqSQFkpsXJLPPZVj6LbiaThEyMNgrYzXD";

/// Default DEATH token mint
pub const DEFAULT_MINT: &str = "FXe6Wq53sNFHQkibdQQmFQQAe6jET4kfrJskdvjJvF8N";

/// Default RPC endpoint
pub const DEFAULT_RPC_URL: &str = "https://api.devnet.solana.com";

/// Decimals of the DEATH mint
pub const DEFAULT_TOKEN_DECIMALS: u8 = 9;

/// Number of seconds in a year (365 days)
pub const SECONDS_PER_YEAR: u64 = 365 * 24 * 60 * 60;

/// Stake lock / reward interval in seconds (24 hours)
pub const STAKE_LOCK_PERIOD_SECS: i64 = 24 * 60 * 60;

/// Cooldown between emergency withdrawals in seconds (3 days)
pub const EMERGENCY_WITHDRAWAL_COOLDOWN_SECS: i64 = 3 * 24 * 60 * 60;

/// Default confirmation poll upper bound in seconds
pub const DEFAULT_CONFIRMATION_TIMEOUT_SECS: u64 = 60;
/// Upper bound on waiting for one confirmation
pub const MAX_CONFIRMATION_TIMEOUT_SECS: u64 = 3_600;

/// Default confirmation poll interval in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// Base APY in percent (66.6%)
pub const BASE_APY: Decimal = Decimal::from_parts(666, 0, 0, false, 1);

/// Lower clamp for any displayed APY, in percent
pub const MIN_APY: Decimal = Decimal::from_parts(5, 0, 0, false, 0);

/// Upper clamp for any displayed APY, in percent
pub const MAX_APY: Decimal = Decimal::from_parts(24309, 0, 0, false, 0);

/// On-chain `current_apy` is stored as percent scaled by this factor (basis points)
pub const DEFAULT_APY_PRECISION: u64 = 100;

/// Emergency withdrawal penalty in percent
pub const EMERGENCY_WITHDRAWAL_FEE_PERCENT: u64 = 10;

/// Standard withdrawal fee in percent
pub const STANDARD_WITHDRAWAL_FEE_PERCENT: u64 = 1;

/// Size of the account-type discriminator that prefixes every program account
pub const ACCOUNT_DISCRIMINATOR_LEN: usize = 8;

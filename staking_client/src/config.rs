//! Environment configuration with validation

use std::env;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use solana_sdk::commitment_config::CommitmentConfig;

use crate::amount::MAX_DECIMALS;
use crate::client::ClientOptions;
use crate::constants::{
    BASE_APY, DEFAULT_APY_PRECISION, DEFAULT_CONFIRMATION_TIMEOUT_SECS, DEFAULT_MINT,
    DEFAULT_POLL_INTERVAL_MS, DEFAULT_PROGRAM_ID, DEFAULT_RPC_URL, DEFAULT_TOKEN_DECIMALS,
    MAX_APY, MAX_CONFIRMATION_TIMEOUT_SECS,
};
use crate::error::StakingError;
use crate::gateway::RpcGatewayConfig;
use crate::pda::{parse_pubkey, AddressDeriver, StakingTopology};
use crate::rewards::TierTable;

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Ledger RPC configuration
    pub solana: SolanaConfig,

    /// Deployment addresses
    pub program: ProgramConfig,

    pub rewards: RewardConfig,

    pub confirmation: ConfirmationConfig,

    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolanaConfig {
    pub rpc_url: String,
    pub commitment: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramConfig {
    pub program_id: String,
    pub mint: String,
    pub token_decimals: u8,
    /// Set for deployments with one staking state per authority
    pub authority: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardConfig {
    /// Percent, used until the on-chain rate has been read
    pub base_apy: Decimal,
    /// Scale of the on-chain `current_apy` field
    pub apy_precision: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationConfig {
    pub timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            solana: SolanaConfig {
                rpc_url: DEFAULT_RPC_URL.to_string(),
                commitment: "confirmed".to_string(),
                request_timeout_secs: 30,
            },
            program: ProgramConfig {
                program_id: DEFAULT_PROGRAM_ID.to_string(),
                mint: DEFAULT_MINT.to_string(),
                token_decimals: DEFAULT_TOKEN_DECIMALS,
                authority: None,
            },
            rewards: RewardConfig {
                base_apy: BASE_APY,
                apy_precision: DEFAULT_APY_PRECISION,
            },
            confirmation: ConfirmationConfig {
                timeout_secs: DEFAULT_CONFIRMATION_TIMEOUT_SECS,
                poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            },
            log_level: "info".to_string(),
        }
    }
}

fn parse<T: FromStr>(name: &str, value: Option<String>, default: T) -> Result<T, ConfigError> {
    match value {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name: name.to_string(), value: raw }),
        None => Ok(default),
    }
}

impl ClientConfig {
    /// Load configuration from the environment, after reading `.env` if present
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        Ok(ClientConfig {
            solana: SolanaConfig {
                rpc_url: lookup("SOLANA_RPC_URL").unwrap_or(defaults.solana.rpc_url),
                commitment: lookup("SOLANA_COMMITMENT").unwrap_or(defaults.solana.commitment),
                request_timeout_secs: parse(
                    "RPC_TIMEOUT_SECS",
                    lookup("RPC_TIMEOUT_SECS"),
                    defaults.solana.request_timeout_secs,
                )?,
            },

            program: ProgramConfig {
                program_id: lookup("STAKING_PROGRAM_ID").unwrap_or(defaults.program.program_id),
                mint: lookup("DEATH_MINT").unwrap_or(defaults.program.mint),
                token_decimals: parse(
                    "TOKEN_DECIMALS",
                    lookup("TOKEN_DECIMALS"),
                    defaults.program.token_decimals,
                )?,
                authority: lookup("STAKING_AUTHORITY").filter(|value| !value.trim().is_empty()),
            },

            rewards: RewardConfig {
                base_apy: parse("BASE_APY", lookup("BASE_APY"), defaults.rewards.base_apy)?,
                apy_precision: parse(
                    "APY_PRECISION",
                    lookup("APY_PRECISION"),
                    defaults.rewards.apy_precision,
                )?,
            },

            confirmation: ConfirmationConfig {
                timeout_secs: parse(
                    "CONFIRMATION_TIMEOUT_SECS",
                    lookup("CONFIRMATION_TIMEOUT_SECS"),
                    defaults.confirmation.timeout_secs,
                )?,
                poll_interval_ms: parse(
                    "POLL_INTERVAL_MS",
                    lookup("POLL_INTERVAL_MS"),
                    defaults.confirmation.poll_interval_ms,
                )?,
            },

            log_level: lookup("LOG_LEVEL").unwrap_or(defaults.log_level),
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.solana.rpc_url.is_empty() {
            return Err(ConfigError::MissingRequired("SOLANA_RPC_URL".to_string()));
        }
        self.commitment()?;

        if self.solana.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig("RPC timeout must be greater than 0".to_string()));
        }

        // Malformed ids are fatal for every derived address
        self.deriver()?;

        if self.program.token_decimals > MAX_DECIMALS {
            return Err(ConfigError::InvalidConfig(format!(
                "token decimals must be at most {}",
                MAX_DECIMALS
            )));
        }

        if self.rewards.base_apy <= Decimal::ZERO || self.rewards.base_apy > MAX_APY {
            return Err(ConfigError::InvalidConfig(format!(
                "base APY must be in (0, {}]",
                MAX_APY
            )));
        }
        if self.rewards.apy_precision == 0 {
            return Err(ConfigError::InvalidConfig("APY precision must be greater than 0".to_string()));
        }

        if self.confirmation.timeout_secs == 0 || self.confirmation.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "Confirmation timeout and poll interval must be greater than 0".to_string(),
            ));
        }
        if self.confirmation.timeout_secs > MAX_CONFIRMATION_TIMEOUT_SECS {
            return Err(ConfigError::InvalidConfig(format!(
                "Confirmation timeout must be at most {} seconds",
                MAX_CONFIRMATION_TIMEOUT_SECS
            )));
        }
        if Duration::from_millis(self.confirmation.poll_interval_ms)
            >= Duration::from_secs(self.confirmation.timeout_secs)
        {
            return Err(ConfigError::InvalidConfig(
                "Poll interval must be shorter than the confirmation timeout".to_string(),
            ));
        }

        Ok(())
    }

    pub fn commitment(&self) -> Result<CommitmentConfig, ConfigError> {
        CommitmentConfig::from_str(&self.solana.commitment).map_err(|_| ConfigError::InvalidValue {
            name: "SOLANA_COMMITMENT".to_string(),
            value: self.solana.commitment.clone(),
        })
    }

    pub fn topology(&self) -> Result<StakingTopology, ConfigError> {
        match &self.program.authority {
            Some(authority) => parse_pubkey("staking authority", authority)
                .map(StakingTopology::PerAuthority)
                .map_err(|e| ConfigError::InvalidConfig(e.to_string())),
            None => Ok(StakingTopology::Global),
        }
    }

    pub fn deriver(&self) -> Result<AddressDeriver, ConfigError> {
        AddressDeriver::from_config(&self.program.program_id, &self.program.mint, self.topology()?)
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))
    }

    pub fn gateway_config(&self) -> Result<RpcGatewayConfig, ConfigError> {
        Ok(RpcGatewayConfig {
            rpc_url: self.solana.rpc_url.clone(),
            commitment: self.commitment()?,
            request_timeout: Duration::from_secs(self.solana.request_timeout_secs),
            poll_interval: Duration::from_millis(self.confirmation.poll_interval_ms),
        })
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            decimals: self.program.token_decimals,
            base_apy: self.rewards.base_apy,
            apy_precision: self.rewards.apy_precision,
            tiers: TierTable::standard(),
            confirmation_timeout: Duration::from_secs(self.confirmation.timeout_secs),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid value '{value}' for {name}")]
    InvalidValue { name: String, value: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<ConfigError> for StakingError {
    fn from(err: ConfigError) -> Self {
        StakingError::Configuration(err.to_string())
    }
}

/// Create example .env file
pub fn create_env_example() -> String {
    format!(
        r#"# Ledger RPC
SOLANA_RPC_URL={rpc_url}
SOLANA_COMMITMENT=confirmed
RPC_TIMEOUT_SECS=30

# Deployment
STAKING_PROGRAM_ID={program_id}
DEATH_MINT={mint}
TOKEN_DECIMALS={decimals}
# Uncomment for deployments with one staking state per authority
# STAKING_AUTHORITY=<base58 authority>

# Rewards (display only; the program is authoritative)
BASE_APY=66.6
APY_PRECISION={apy_precision}

# Confirmation
CONFIRMATION_TIMEOUT_SECS={timeout}
POLL_INTERVAL_MS={poll}

LOG_LEVEL=info
"#,
        rpc_url = DEFAULT_RPC_URL,
        program_id = DEFAULT_PROGRAM_ID,
        mint = DEFAULT_MINT,
        decimals = DEFAULT_TOKEN_DECIMALS,
        apy_precision = DEFAULT_APY_PRECISION,
        timeout = DEFAULT_CONFIRMATION_TIMEOUT_SECS,
        poll = DEFAULT_POLL_INTERVAL_MS,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_vars(vars: &[(&str, &str)]) -> Result<ClientConfig, ConfigError> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        ClientConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = from_vars(&[]).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.topology().unwrap(), StakingTopology::Global);
        assert_eq!(config.client_options().decimals, 9);
    }

    #[test]
    fn test_overrides() {
        let authority = solana_sdk::pubkey::Pubkey::new_unique();
        let config = from_vars(&[
            ("SOLANA_COMMITMENT", "finalized"),
            ("BASE_APY", "42.5"),
            ("STAKING_AUTHORITY", &authority.to_string()),
            ("CONFIRMATION_TIMEOUT_SECS", "90"),
        ])
        .unwrap();

        assert!(config.validate().is_ok());
        assert_eq!(config.commitment().unwrap(), CommitmentConfig::finalized());
        assert_eq!(config.rewards.base_apy, Decimal::new(425, 1));
        assert_eq!(config.topology().unwrap(), StakingTopology::PerAuthority(authority));
        assert_eq!(config.client_options().confirmation_timeout, Duration::from_secs(90));
    }

    #[test]
    fn test_unparseable_value() {
        let result = from_vars(&[("TOKEN_DECIMALS", "nine")]);
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_config_validation() {
        let mut config = ClientConfig::default();
        assert!(config.validate().is_ok());

        config.program.program_id = "not-a-program".to_string();
        assert!(config.validate().is_err());

        let mut config = ClientConfig::default();
        config.solana.commitment = "eventually".to_string();
        assert!(config.validate().is_err());

        let mut config = ClientConfig::default();
        config.program.token_decimals = 20;
        assert!(config.validate().is_err());

        let mut config = ClientConfig::default();
        config.confirmation.poll_interval_ms = 60_000;
        assert!(config.validate().is_err());

        let mut config = ClientConfig::default();
        config.rewards.base_apy = Decimal::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_huge_confirmation_timeout() {
        let timeout = u64::MAX.to_string();
        let config = ClientConfig::from_lookup(|name| match name {
            "CONFIRMATION_TIMEOUT_SECS" => Some(timeout.clone()),
            _ => None,
        })
        .unwrap();

        assert_eq!(config.confirmation.timeout_secs, u64::MAX);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidConfig(_))));

        let mut config = config;
        config.confirmation.timeout_secs = MAX_CONFIRMATION_TIMEOUT_SECS;
        config.confirmation.poll_interval_ms = u64::MAX;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_env_example_parses() {
        let example = create_env_example();
        let vars: HashMap<String, String> = example
            .lines()
            .filter(|line| !line.starts_with('#') && line.contains('='))
            .filter_map(|line| line.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let config = ClientConfig::from_lookup(|name| vars.get(name).cloned()).unwrap();
        assert!(config.validate().is_ok());
    }
}

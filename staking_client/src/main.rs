//! `death-staking`: command-line front end for the staking client core

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use clap::{crate_version, Arg, ArgMatches, Command};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use solana_sdk::{
    pubkey::Pubkey,
    signature::{read_keypair_file, Keypair, Signer},
    transaction::Transaction,
};
use tracing::info;

use death_staking_client::{
    amount::{to_base_units, to_display_units},
    constants::EMERGENCY_WITHDRAWAL_COOLDOWN_SECS,
    logging,
    rewards::emergency_withdrawal_penalty,
    state::ProtocolConfig,
    ClientConfig, InitializationOutcome, RpcLedgerGateway, SignerError, SnapshotView,
    StakingClient, TransactionSigner, WalletSession,
};

/// Signs with a keypair loaded from a local file
struct KeypairFileSigner {
    keypair: Keypair,
}

impl KeypairFileSigner {
    fn load(path: &PathBuf) -> Result<Self> {
        let keypair = read_keypair_file(path)
            .map_err(|e| anyhow!("failed to read keypair {}: {}", path.display(), e))?;
        Ok(Self { keypair })
    }
}

#[async_trait]
impl TransactionSigner for KeypairFileSigner {
    fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    async fn sign_transaction(&self, mut transaction: Transaction) -> Result<Transaction, SignerError> {
        let blockhash = transaction.message.recent_blockhash;
        transaction
            .try_sign(&[&self.keypair], blockhash)
            .map_err(|e| SignerError::Failed(e.to_string()))?;
        Ok(transaction)
    }
}

fn amount_arg() -> Arg<'static> {
    Arg::new("amount")
        .long("amount")
        .value_name("DEATH")
        .takes_value(true)
        .required(true)
        .help("Amount in display units")
}

fn optional_amount_arg(name: &'static str, default: &'static str, help: &'static str) -> Arg<'static> {
    Arg::new(name)
        .long(name)
        .value_name("DEATH")
        .takes_value(true)
        .default_value(default)
        .help(help)
}

fn cli() -> Command<'static> {
    Command::new("death-staking")
        .version(crate_version!())
        .about("Stake DEATH and manage REAPER tier rewards")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("keypair")
                .long("keypair")
                .short('k')
                .value_name("PATH")
                .takes_value(true)
                .global(true)
                .help("Wallet keypair file [default: ~/.config/solana/id.json]"),
        )
        .arg(
            Arg::new("url")
                .long("url")
                .short('u')
                .value_name("URL")
                .takes_value(true)
                .global(true)
                .help("Ledger RPC URL, overrides SOLANA_RPC_URL"),
        )
        .subcommand(Command::new("snapshot").about("Show the wallet's staking position"))
        .subcommand(Command::new("stake").about("Stake DEATH").arg(amount_arg()))
        .subcommand(Command::new("unstake").about("Unstake DEATH").arg(amount_arg()))
        .subcommand(Command::new("claim").about("Claim pending rewards"))
        .subcommand(
            Command::new("emergency-withdraw")
                .about("Withdraw the whole stake now, forfeiting rewards and paying a penalty")
                .arg(
                    Arg::new("yes")
                        .long("yes")
                        .help("Skip the penalty confirmation"),
                ),
        )
        .subcommand(
            Command::new("init")
                .about("Initialize the staking program (authority only)")
                .arg(optional_amount_arg("min-stake", "100", "Minimum stake"))
                .arg(optional_amount_arg("max-stake", "1000000", "Maximum stake"))
                .arg(optional_amount_arg("withdrawal-limit", "100000", "Withdrawal limit"))
                .arg(
                    Arg::new("voting-period")
                        .long("voting-period")
                        .value_name("SECONDS")
                        .takes_value(true)
                        .default_value("604800")
                        .help("Governance voting period"),
                ),
        )
        .subcommand(
            Command::new("vote")
                .about("Vote on a governance proposal")
                .arg(
                    Arg::new("proposal")
                        .long("proposal")
                        .value_name("ADDRESS")
                        .takes_value(true)
                        .required(true)
                        .help("Proposal account"),
                )
                .arg(Arg::new("against").long("against").help("Vote against instead of for")),
        )
}

fn value<T: FromStr>(matches: &ArgMatches, name: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    let raw = matches
        .get_one::<String>(name)
        .ok_or_else(|| anyhow!("missing --{}", name))?;
    raw.parse::<T>()
        .map_err(|e| anyhow!("invalid --{} '{}': {}", name, raw, e))
}

fn keypair_path(matches: &ArgMatches) -> Result<PathBuf> {
    if let Some(path) = matches.get_one::<String>("keypair") {
        return Ok(PathBuf::from(path));
    }
    let home = std::env::var("HOME").context("HOME is not set; pass --keypair")?;
    Ok(PathBuf::from(home).join(".config/solana/id.json"))
}

fn print_view(view: &SnapshotView) -> Result<()> {
    match view {
        SnapshotView::Fresh(snapshot) => println!("{}", serde_json::to_string_pretty(snapshot)?),
        SnapshotView::Stale { last_known, error } => {
            eprintln!("warning: {} ({})", error.kind().user_message(), error);
            if let Some(snapshot) = last_known {
                println!("{}", serde_json::to_string_pretty(snapshot)?);
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    let mut config = ClientConfig::from_env()?;
    if let Some(url) = matches.get_one::<String>("url") {
        config.solana.rpc_url = url.clone();
    }
    config.validate()?;
    logging::init(&config.log_level);

    let signer = Arc::new(KeypairFileSigner::load(&keypair_path(&matches)?)?);
    let wallet = signer.pubkey();
    let session = Arc::new(WalletSession::connected(wallet));
    let gateway = Arc::new(RpcLedgerGateway::new(config.gateway_config()?));
    let client = StakingClient::new(
        config.deriver()?,
        config.client_options(),
        gateway,
        signer,
        session,
    );
    let decimals = config.program.token_decimals;

    info!(%wallet, "Using wallet");

    match matches.subcommand() {
        Some(("snapshot", _)) => print_view(&client.refresh_state().await)?,
        Some(("stake", sub)) => {
            // Primes the cached min/max bounds and staked amount
            client.refresh_state().await;
            let signature = client.stake(value::<Decimal>(sub, "amount")?).await?;
            println!("Staked: {}", signature);
        }
        Some(("unstake", sub)) => {
            client.refresh_state().await;
            let signature = client.unstake(value::<Decimal>(sub, "amount")?).await?;
            println!("Unstaked: {}", signature);
        }
        Some(("claim", _)) => {
            let signature = client.claim_rewards().await?;
            println!("Claimed: {}", signature);
        }
        Some(("emergency-withdraw", sub)) => {
            let view = client.refresh_state().await;
            let staked = view.snapshot().map(|s| s.staked_amount).unwrap_or_default();
            let penalty = to_base_units(staked, decimals)
                .map(emergency_withdrawal_penalty)
                .unwrap_or(0);
            println!(
                "Withdrawing {} DEATH. Pending rewards are forfeited and about {} DEATH is kept as penalty.",
                staked,
                to_display_units(penalty, decimals)
            );
            if !sub.is_present("yes") {
                bail!("re-run with --yes to confirm");
            }
            let signature = client.emergency_withdraw().await?;
            println!("Withdrawn: {}", signature);
        }
        Some(("init", sub)) => {
            let protocol = ProtocolConfig {
                base_apy: (config.rewards.base_apy * Decimal::from(config.rewards.apy_precision))
                    .trunc()
                    .to_u64()
                    .ok_or_else(|| anyhow!("base APY out of range"))?,
                min_stake: to_base_units(value(sub, "min-stake")?, decimals)?,
                max_stake: to_base_units(value(sub, "max-stake")?, decimals)?,
                emergency_cooldown: EMERGENCY_WITHDRAWAL_COOLDOWN_SECS,
                withdrawal_limit: to_base_units(value(sub, "withdrawal-limit")?, decimals)?,
                voting_period: value(sub, "voting-period")?,
            };
            match client.ensure_initialized(protocol).await? {
                InitializationOutcome::AlreadyInitialized => println!("Already initialized"),
                InitializationOutcome::Initialized(signature) => println!("Initialized: {}", signature),
            }
        }
        Some(("vote", sub)) => {
            let proposal: Pubkey = value(sub, "proposal")?;
            let support = !sub.is_present("against");
            let signature = client.vote(proposal, support).await?;
            println!("Voted: {}", signature);
        }
        _ => unreachable!("clap requires a subcommand"),
    }

    Ok(())
}

//! Shared fixtures: an in-memory ledger gateway and keypair signer
#![allow(dead_code)]

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use solana_sdk::{
    hash::Hash,
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
    transaction::Transaction,
};
use tokio::sync::Notify;

use death_staking_client::{
    constants::{DEFAULT_MINT, DEFAULT_PROGRAM_ID},
    pda::AddressBook,
    state::{ProgramAccount, StakingState, UserStakeInfo},
    AddressDeriver, ClientOptions, Clock, ConfirmationOutcome, LedgerGateway, SignerError,
    StakingClient, StakingError, StakingResult, StakingTopology, TransactionSigner, WalletSession,
};

pub const NOW: i64 = 1_700_000_000;
pub const LAST_VALID_BLOCK_HEIGHT: u64 = 1_000;

pub fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

/// Display units to base units at 9 decimals
pub fn tokens(amount: u64) -> u64 {
    amount * 1_000_000_000
}

pub struct FixedClock(pub i64);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.0, 0).unwrap()
    }
}

/// In-memory ledger with scripted submission and confirmation
pub struct MockGateway {
    accounts: Mutex<HashMap<Pubkey, Vec<u8>>>,
    balances: Mutex<HashMap<Pubkey, u64>>,
    /// Account writes applied once a submitted transaction lands
    landing: Mutex<Vec<(Pubkey, Vec<u8>)>>,
    submitted: Mutex<Vec<Transaction>>,
    submit_error: Mutex<Option<StakingError>>,
    confirm_outcome: Mutex<ConfirmationOutcome>,
    confirm_gate: Mutex<Option<Arc<Notify>>>,
    /// One read of this address captures its data, then waits on the gate
    read_gate: Mutex<Option<(Pubkey, Arc<Notify>)>>,
    read_parked: AtomicBool,
    fail_reads: AtomicBool,
    fail_reads_on_confirm: AtomicBool,
    calls: AtomicUsize,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            accounts: Mutex::new(HashMap::new()),
            balances: Mutex::new(HashMap::new()),
            landing: Mutex::new(Vec::new()),
            submitted: Mutex::new(Vec::new()),
            submit_error: Mutex::new(None),
            confirm_outcome: Mutex::new(ConfirmationOutcome::Confirmed),
            confirm_gate: Mutex::new(None),
            read_gate: Mutex::new(None),
            read_parked: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            fail_reads_on_confirm: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    /// Total number of gateway calls, reads included
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn submitted(&self) -> Vec<Transaction> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn set_account(&self, address: Pubkey, data: Vec<u8>) {
        self.accounts.lock().unwrap().insert(address, data);
    }

    pub fn set_balance(&self, address: Pubkey, amount: u64) {
        self.balances.lock().unwrap().insert(address, amount);
    }

    pub fn land_on_confirm(&self, address: Pubkey, data: Vec<u8>) {
        self.landing.lock().unwrap().push((address, data));
    }

    pub fn reject_submissions(&self, error: StakingError) {
        *self.submit_error.lock().unwrap() = Some(error);
    }

    pub fn accept_submissions(&self) {
        *self.submit_error.lock().unwrap() = None;
    }

    pub fn set_confirm_outcome(&self, outcome: ConfirmationOutcome) {
        *self.confirm_outcome.lock().unwrap() = outcome;
    }

    /// Hold every confirmation until `gate` is notified
    pub fn set_confirm_gate(&self, gate: Arc<Notify>) {
        *self.confirm_gate.lock().unwrap() = Some(gate);
    }

    /// Hold the next read of `address` until `gate` is notified; the read
    /// returns the data present when it started
    pub fn gate_next_read(&self, address: Pubkey, gate: Arc<Notify>) {
        *self.read_gate.lock().unwrap() = Some((address, gate));
    }

    /// True once a gated read is waiting
    pub fn read_parked(&self) -> bool {
        self.read_parked.load(Ordering::SeqCst)
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Start failing reads once a transaction is confirmed
    pub fn fail_reads_after_confirm(&self) {
        self.fail_reads_on_confirm.store(true, Ordering::SeqCst);
    }

    fn record_call(&self) -> StakingResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StakingError::Network("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerGateway for MockGateway {
    async fn read_account(&self, address: &Pubkey) -> StakingResult<Option<Vec<u8>>> {
        self.record_call()?;
        let data = self.accounts.lock().unwrap().get(address).cloned();

        let gate = {
            let mut read_gate = self.read_gate.lock().unwrap();
            match read_gate.as_ref() {
                Some((gated, _)) if gated == address => read_gate.take().map(|(_, gate)| gate),
                _ => None,
            }
        };
        if let Some(gate) = gate {
            self.read_parked.store(true, Ordering::SeqCst);
            gate.notified().await;
        }
        Ok(data)
    }

    async fn read_token_balance(&self, address: &Pubkey) -> StakingResult<Option<u64>> {
        self.record_call()?;
        Ok(self.balances.lock().unwrap().get(address).copied())
    }

    async fn latest_blockhash(&self) -> StakingResult<(Hash, u64)> {
        self.record_call()?;
        Ok((Hash::new_unique(), LAST_VALID_BLOCK_HEIGHT))
    }

    async fn submit(&self, transaction: &Transaction) -> StakingResult<Signature> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.submit_error.lock().unwrap().clone() {
            return Err(error);
        }
        self.submitted.lock().unwrap().push(transaction.clone());
        Ok(transaction.signatures[0])
    }

    async fn confirm(
        &self,
        _signature: &Signature,
        last_valid_block_height: u64,
        _timeout: Duration,
    ) -> ConfirmationOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(last_valid_block_height, LAST_VALID_BLOCK_HEIGHT);

        let gate = self.confirm_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let outcome = self.confirm_outcome.lock().unwrap().clone();
        // A timed-out transaction may still land
        if !matches!(outcome, ConfirmationOutcome::Failed(_)) {
            let landing: Vec<_> = self.landing.lock().unwrap().drain(..).collect();
            let mut accounts = self.accounts.lock().unwrap();
            for (address, data) in landing {
                accounts.insert(address, data);
            }
        }
        if self.fail_reads_on_confirm.load(Ordering::SeqCst) {
            self.fail_reads.store(true, Ordering::SeqCst);
        }
        outcome
    }
}

/// Signs with in-memory keypairs; the first key is the wallet
pub struct MockSigner {
    keys: Vec<Keypair>,
    decline: AtomicBool,
}

impl MockSigner {
    pub fn new(wallet: Keypair) -> Self {
        Self {
            keys: vec![wallet],
            decline: AtomicBool::new(false),
        }
    }

    pub fn with_extra_key(mut self, key: Keypair) -> Self {
        self.keys.push(key);
        self
    }

    pub fn decline(&self) {
        self.decline.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl TransactionSigner for MockSigner {
    fn pubkey(&self) -> Pubkey {
        self.keys[0].pubkey()
    }

    async fn sign_transaction(&self, mut transaction: Transaction) -> Result<Transaction, SignerError> {
        if self.decline.load(Ordering::SeqCst) {
            return Err(SignerError::Declined);
        }

        let required = transaction.message.header.num_required_signatures as usize;
        let required_keys = &transaction.message.account_keys[..required];
        let signers: Vec<&Keypair> = self
            .keys
            .iter()
            .filter(|key| required_keys.contains(&key.pubkey()))
            .collect();

        let blockhash = transaction.message.recent_blockhash;
        transaction
            .try_partial_sign(signers.as_slice(), blockhash)
            .map_err(|e| SignerError::Failed(e.to_string()))?;
        Ok(transaction)
    }
}

pub struct Fixture {
    pub client: StakingClient,
    pub gateway: Arc<MockGateway>,
    pub signer: Arc<MockSigner>,
    pub session: Arc<WalletSession>,
    pub owner: Pubkey,
    pub book: AddressBook,
}

pub fn deriver() -> AddressDeriver {
    AddressDeriver::from_config(DEFAULT_PROGRAM_ID, DEFAULT_MINT, StakingTopology::Global).unwrap()
}

pub fn fixture() -> Fixture {
    fixture_with_signer(MockSigner::new(Keypair::new()))
}

pub fn fixture_with_signer(signer: MockSigner) -> Fixture {
    let owner = signer.pubkey();
    let gateway = Arc::new(MockGateway::new());
    let signer = Arc::new(signer);
    let session = Arc::new(WalletSession::connected(owner));
    let book = deriver().address_book(&owner).unwrap();

    let client = StakingClient::new(
        deriver(),
        ClientOptions::default(),
        gateway.clone(),
        signer.clone(),
        session.clone(),
    )
    .with_clock(Arc::new(FixedClock(NOW)));

    Fixture {
        client,
        gateway,
        signer,
        session,
        owner,
        book,
    }
}

impl Fixture {
    pub fn staking_state(&self, min_stake: u64, max_stake: u64) -> StakingState {
        StakingState {
            authority: Pubkey::new_unique(),
            current_apy: 6_660,
            min_stake,
            max_stake,
            emergency_cooldown: 259_200,
            paused: false,
            total_staked: tokens(20_000),
        }
    }

    pub fn stake_info(&self, staked_amount: u64, last_stake_timestamp: i64) -> UserStakeInfo {
        UserStakeInfo {
            owner: self.owner,
            staked_amount,
            last_stake_timestamp,
            rewards_claimed: 0,
        }
    }

    pub fn seed_state(&self, state: &StakingState) {
        self.gateway.set_account(self.book.staking_state, state.encode().unwrap());
    }

    pub fn seed_stake(&self, info: &UserStakeInfo) {
        self.gateway.set_account(self.book.user_stake, info.encode().unwrap());
    }

    pub fn land_stake(&self, info: &UserStakeInfo) {
        self.gateway.land_on_confirm(self.book.user_stake, info.encode().unwrap());
    }

    /// Make the protocol token account exist so no bootstrap is needed
    pub fn seed_protocol_account(&self) {
        self.gateway.set_account(self.book.protocol_token_account, vec![0u8; 165]);
    }

    /// A deployed program with a funded wallet
    pub fn seed_deployment(&self) {
        self.seed_state(&self.staking_state(tokens(100), tokens(1_000_000)));
        self.seed_protocol_account();
        self.gateway.set_balance(self.book.user_token_account, tokens(10_000));
    }
}

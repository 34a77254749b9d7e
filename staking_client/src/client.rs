//! Staking client orchestrator
//!
//! Composes address derivation, instruction building and the ledger gateway
//! into the user-facing operations. Mutations are single-flight per client:
//!
//! ```text
//! Idle -> Submitting -> Confirming -> Idle
//!                  \            \
//!                   `-> Failed   `-> Failed
//! ```
//!
//! `Failed` is a resting phase; the next mutation may start from it. Reads
//! never touch the phase.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use solana_sdk::{pubkey::Pubkey, signature::Signature};
use tokio::sync::RwLock;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::amount::to_base_units;
use crate::constants::{BASE_APY, DEFAULT_APY_PRECISION, DEFAULT_CONFIRMATION_TIMEOUT_SECS, DEFAULT_TOKEN_DECIMALS};
use crate::error::{StakingError, StakingResult};
use crate::gateway::{ConfirmationOutcome, LedgerGateway};
use crate::instruction::{InstructionBuilder, InstructionBundle};
use crate::pda::AddressDeriver;
use crate::rewards::{effective_apy, TierTable};
use crate::session::WalletSession;
use crate::signer::TransactionSigner;
use crate::snapshot::{RewardSnapshot, SnapshotBuilder, SnapshotInputs, SnapshotView};
use crate::state::{ProgramAccount, Proposal, ProposalData, ProtocolConfig, StakingState, UserStakeInfo};

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Mutation life cycle of one client session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Submitting,
    Confirming,
    Failed,
}

impl SessionPhase {
    pub fn is_in_flight(&self) -> bool {
        matches!(self, SessionPhase::Submitting | SessionPhase::Confirming)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitializationOutcome {
    AlreadyInitialized,
    Initialized(Signature),
}

/// Tunables for [`StakingClient`]
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub decimals: u8,
    /// Fallback base APY in percent when no staking state has been read
    pub base_apy: Decimal,
    pub apy_precision: u64,
    pub tiers: TierTable,
    pub confirmation_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            decimals: DEFAULT_TOKEN_DECIMALS,
            base_apy: BASE_APY,
            apy_precision: DEFAULT_APY_PRECISION,
            tiers: TierTable::standard(),
            confirmation_timeout: Duration::from_secs(DEFAULT_CONFIRMATION_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug)]
enum Mutation {
    Stake(Decimal),
    Unstake(Decimal),
    ClaimRewards,
    EmergencyWithdraw,
    CreateProposal { data: ProposalData, proposal: Pubkey },
    Vote { proposal: Pubkey, support: bool },
    ExecuteProposal { proposal: Pubkey },
    Initialize(ProtocolConfig),
}

impl Mutation {
    fn name(&self) -> &'static str {
        match self {
            Mutation::Stake(_) => "stake",
            Mutation::Unstake(_) => "unstake",
            Mutation::ClaimRewards => "claim_rewards",
            Mutation::EmergencyWithdraw => "emergency_withdraw",
            Mutation::CreateProposal { .. } => "create_proposal",
            Mutation::Vote { .. } => "vote",
            Mutation::ExecuteProposal { .. } => "execute_proposal",
            Mutation::Initialize(_) => "initialize",
        }
    }
}

#[derive(Debug)]
struct Lifecycle {
    phase: SessionPhase,
    signature: Option<Signature>,
    last_error: Option<StakingError>,
}

fn lock(lifecycle: &Mutex<Lifecycle>) -> MutexGuard<'_, Lifecycle> {
    lifecycle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Holds the single-flight slot for one mutation.
///
/// Dropped without `succeed`/`fail` means the caller abandoned the future;
/// the outcome is then unknown.
struct FlightGuard {
    lifecycle: Arc<Mutex<Lifecycle>>,
    finished: bool,
}

impl FlightGuard {
    fn begin(lifecycle: &Arc<Mutex<Lifecycle>>) -> StakingResult<Self> {
        let mut state = lock(lifecycle);
        if state.phase.is_in_flight() {
            return Err(StakingError::OperationInProgress);
        }
        state.phase = SessionPhase::Submitting;
        state.signature = None;
        state.last_error = None;

        Ok(Self {
            lifecycle: lifecycle.clone(),
            finished: false,
        })
    }

    fn confirming(&self, signature: Signature) {
        let mut state = lock(&self.lifecycle);
        state.phase = SessionPhase::Confirming;
        state.signature = Some(signature);
    }

    fn succeed(mut self) {
        let mut state = lock(&self.lifecycle);
        state.phase = SessionPhase::Idle;
        self.finished = true;
    }

    fn fail(mut self, err: StakingError) -> StakingError {
        let mut state = lock(&self.lifecycle);
        state.phase = SessionPhase::Failed;
        state.last_error = Some(err.clone());
        self.finished = true;
        err
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut state = lock(&self.lifecycle);
        let signature = state.signature;
        warn!(?signature, "Mutation abandoned before confirmation");
        state.phase = SessionPhase::Failed;
        state.last_error = Some(StakingError::ConfirmationAbandoned { signature });
    }
}

#[derive(Debug, Default)]
struct Cache {
    snapshot: Option<RewardSnapshot>,
    state: Option<StakingState>,
    /// Staked base units last read for an owner
    staked: Option<(Pubkey, u64)>,
    /// Newest read ticket reflected in `snapshot`; reads holding an older
    /// ticket must not overwrite it
    ticket: u64,
}

/// Orchestrates staking operations for one wallet session
pub struct StakingClient {
    builder: InstructionBuilder,
    snapshots: SnapshotBuilder,
    confirmation_timeout: Duration,
    gateway: Arc<dyn LedgerGateway>,
    signer: Arc<dyn TransactionSigner>,
    session: Arc<WalletSession>,
    clock: Arc<dyn Clock>,
    lifecycle: Arc<Mutex<Lifecycle>>,
    cache: RwLock<Cache>,
    reads: AtomicU64,
}

impl fmt::Debug for StakingClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StakingClient")
            .field("program_id", self.builder.deriver().program_id())
            .field("phase", &self.phase())
            .field("session", &self.session)
            .finish()
    }
}

impl StakingClient {
    pub fn new(
        deriver: AddressDeriver,
        options: ClientOptions,
        gateway: Arc<dyn LedgerGateway>,
        signer: Arc<dyn TransactionSigner>,
        session: Arc<WalletSession>,
    ) -> Self {
        Self {
            builder: InstructionBuilder::new(deriver, options.decimals),
            snapshots: SnapshotBuilder {
                decimals: options.decimals,
                tiers: options.tiers,
                base_apy: options.base_apy,
                apy_precision: options.apy_precision,
            },
            confirmation_timeout: options.confirmation_timeout,
            gateway,
            signer,
            session,
            clock: Arc::new(SystemClock),
            lifecycle: Arc::new(Mutex::new(Lifecycle {
                phase: SessionPhase::Idle,
                signature: None,
                last_error: None,
            })),
            cache: RwLock::new(Cache::default()),
            reads: AtomicU64::new(0),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn session(&self) -> &Arc<WalletSession> {
        &self.session
    }

    pub fn deriver(&self) -> &AddressDeriver {
        self.builder.deriver()
    }

    pub fn phase(&self) -> SessionPhase {
        lock(&self.lifecycle).phase
    }

    /// Error of the most recent failed mutation, cleared when the next one starts
    pub fn last_error(&self) -> Option<StakingError> {
        lock(&self.lifecycle).last_error.clone()
    }

    /// Last successfully built snapshot of the connected owner
    pub async fn snapshot(&self) -> Option<RewardSnapshot> {
        let owner = self.session.current()?;
        self.cache
            .read()
            .await
            .snapshot
            .clone()
            .filter(|snapshot| snapshot.owner == owner)
    }

    // ---- Mutations ----

    /// Stake `amount` DEATH in display units
    pub async fn stake(&self, amount: Decimal) -> StakingResult<Signature> {
        self.run(Mutation::Stake(amount)).await
    }

    /// Unstake `amount` DEATH in display units
    pub async fn unstake(&self, amount: Decimal) -> StakingResult<Signature> {
        self.run(Mutation::Unstake(amount)).await
    }

    pub async fn claim_rewards(&self) -> StakingResult<Signature> {
        self.run(Mutation::ClaimRewards).await
    }

    /// Withdraw the whole stake immediately.
    ///
    /// The program forfeits pending rewards and keeps a penalty.
    pub async fn emergency_withdraw(&self) -> StakingResult<Signature> {
        self.run(Mutation::EmergencyWithdraw).await
    }

    /// Create a proposal stored at `proposal`, a fresh account the signer holds a key for
    pub async fn create_proposal(&self, data: ProposalData, proposal: Pubkey) -> StakingResult<Signature> {
        self.run(Mutation::CreateProposal { data, proposal }).await
    }

    pub async fn vote(&self, proposal: Pubkey, support: bool) -> StakingResult<Signature> {
        self.run(Mutation::Vote { proposal, support }).await
    }

    pub async fn execute_proposal(&self, proposal: Pubkey) -> StakingResult<Signature> {
        self.run(Mutation::ExecuteProposal { proposal }).await
    }

    /// Initialize the program unless its staking state already exists.
    ///
    /// A failed read is an error, never a reason to initialize.
    pub async fn ensure_initialized(&self, config: ProtocolConfig) -> StakingResult<InitializationOutcome> {
        if self.read_staking_state().await?.is_some() {
            debug!("Staking state already initialized");
            return Ok(InitializationOutcome::AlreadyInitialized);
        }
        self.run(Mutation::Initialize(config))
            .await
            .map(InitializationOutcome::Initialized)
    }

    // ---- Reads ----

    /// Read and cache the staking state; `None` if not initialized
    pub async fn read_staking_state(&self) -> StakingResult<Option<StakingState>> {
        let address = self.deriver().staking_state_pda()?.0;
        let state = self.read_decoded::<StakingState>(&address).await?;
        self.cache.write().await.state = state.clone();
        Ok(state)
    }

    pub async fn read_proposal(&self, proposal: &Pubkey) -> StakingResult<Option<Proposal>> {
        self.read_decoded::<Proposal>(proposal).await
    }

    /// Re-read the connected owner's position.
    ///
    /// Never blocks on, nor is blocked by, an in-flight mutation. On a failed
    /// read the last known snapshot for the same owner is returned as stale.
    pub async fn refresh_state(&self) -> SnapshotView {
        let owner = match self.session.current() {
            Some(owner) => owner,
            None => {
                return SnapshotView::Stale {
                    last_known: None,
                    error: StakingError::NotConnected,
                }
            }
        };

        match self.fetch_snapshot(&owner).await {
            Ok(snapshot) => SnapshotView::Fresh(snapshot),
            Err(error) => {
                let last_known = self
                    .cache
                    .read()
                    .await
                    .snapshot
                    .clone()
                    .filter(|snapshot| snapshot.owner == owner);
                SnapshotView::Stale { last_known, error }
            }
        }
    }

    async fn fetch_snapshot(&self, owner: &Pubkey) -> StakingResult<RewardSnapshot> {
        let book = self.deriver().address_book(owner)?;
        let ticket = self.reads.fetch_add(1, Ordering::SeqCst) + 1;

        let (state, stake, balance) = tokio::join!(
            self.read_decoded::<StakingState>(&book.staking_state),
            self.read_decoded::<UserStakeInfo>(&book.user_stake),
            self.gateway.read_token_balance(&book.user_token_account),
        );
        let (state, stake, balance) = (state?, stake?, balance?);

        let snapshot = self.snapshots.build(
            SnapshotInputs {
                owner: *owner,
                token_balance: balance,
                stake: stake.as_ref(),
                state: state.as_ref(),
            },
            self.clock.now(),
        );

        let mut cache = self.cache.write().await;
        if ticket <= cache.ticket {
            debug!(%owner, ticket, newest = cache.ticket, "Superseded read not cached");
            return Ok(snapshot);
        }
        cache.ticket = ticket;
        cache.snapshot = Some(snapshot.clone());
        cache.state = state;
        cache.staked = Some((*owner, stake.map(|s| s.staked_amount).unwrap_or(0)));

        debug!(%owner, tier = %snapshot.tier, staked = %snapshot.staked_amount, "Snapshot refreshed");
        Ok(snapshot)
    }

    async fn read_decoded<T: ProgramAccount>(&self, address: &Pubkey) -> StakingResult<Option<T>> {
        match self.gateway.read_account(address).await? {
            Some(data) => T::decode(&data).map(Some),
            None => Ok(None),
        }
    }

    // ---- Mutation pipeline ----

    async fn run(&self, mutation: Mutation) -> StakingResult<Signature> {
        let operation_id = Uuid::new_v4();
        let span = info_span!("mutation", op = %operation_id, action = mutation.name());

        async move {
            let guard = FlightGuard::begin(&self.lifecycle)?;

            match self.execute(&guard, &mutation).await {
                Ok(signature) => {
                    guard.succeed();
                    info!(%signature, "Mutation confirmed");

                    if let SnapshotView::Stale { error, .. } = self.refresh_state().await {
                        warn!(%error, "Post-confirmation refresh failed");
                    }
                    Ok(signature)
                }
                Err(err) => {
                    error!(kind = ?err.kind(), error = %err, "Mutation failed");
                    Err(guard.fail(err))
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn execute(&self, guard: &FlightGuard, mutation: &Mutation) -> StakingResult<Signature> {
        let owner = self.session.current().ok_or(StakingError::NotConnected)?;
        self.validate(&owner, mutation).await?;

        let bundle = self.prepare(&owner, mutation).await?;
        let (signature, last_valid_block_height) = self.sign_and_submit(&owner, bundle).await?;
        guard.confirming(signature);

        match self
            .gateway
            .confirm(&signature, last_valid_block_height, self.confirmation_timeout)
            .await
        {
            ConfirmationOutcome::Confirmed => {
                self.settle_cache(&owner, mutation).await;
                Ok(signature)
            }
            ConfirmationOutcome::Failed(reason) => Err(StakingError::ConfirmationFailed { signature, reason }),
            ConfirmationOutcome::TimedOut => Err(StakingError::ConfirmationTimeout { signature }),
        }
    }

    /// Apply a confirmed mutation to the cache before it is re-read.
    ///
    /// Reads started earlier can no longer overwrite the snapshot, and a
    /// claim or full withdrawal zeroes what was paid out even if the
    /// follow-up refresh fails.
    async fn settle_cache(&self, owner: &Pubkey, mutation: &Mutation) {
        let mut cache = self.cache.write().await;
        cache.ticket = self.reads.load(Ordering::SeqCst);

        let staked = match cache.staked {
            Some((cached_owner, staked)) if cached_owner == *owner => Some(staked),
            _ => None,
        };
        let withdrawn_all = match mutation {
            Mutation::EmergencyWithdraw => true,
            Mutation::Unstake(amount) => match (to_base_units(*amount, self.builder.decimals()), staked) {
                (Ok(amount), Some(staked)) => amount >= staked,
                _ => false,
            },
            _ => false,
        };
        if !withdrawn_all && !matches!(mutation, Mutation::ClaimRewards) {
            return;
        }

        let base_apy = self.snapshots.base_apy(cache.state.as_ref());
        if withdrawn_all {
            cache.staked = Some((*owner, 0));
        }
        if let Some(snapshot) = cache.snapshot.as_mut().filter(|snapshot| snapshot.owner == *owner) {
            snapshot.pending_rewards = Decimal::ZERO;
            if withdrawn_all {
                snapshot.staked_amount = Decimal::ZERO;
                snapshot.tier = self.snapshots.tiers.classify(Decimal::ZERO);
                snapshot.current_apy = effective_apy(base_apy, snapshot.tier);
                snapshot.next_reward_eligible_time = None;
            }
        }
    }

    /// Local checks that need no network access
    async fn validate(&self, owner: &Pubkey, mutation: &Mutation) -> StakingResult<()> {
        match mutation {
            Mutation::Stake(amount) => {
                let amount = to_base_units(*amount, self.builder.decimals())?;
                if let Some(state) = &self.cache.read().await.state {
                    if amount < state.min_stake || amount > state.max_stake {
                        return Err(StakingError::OutOfBounds {
                            amount,
                            min: state.min_stake,
                            max: state.max_stake,
                        });
                    }
                }
            }
            Mutation::Unstake(amount) => {
                let amount = to_base_units(*amount, self.builder.decimals())?;
                if let Some((cached_owner, staked)) = self.cache.read().await.staked {
                    if cached_owner == *owner && amount > staked {
                        return Err(StakingError::OutOfBounds { amount, min: 1, max: staked });
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn prepare(&self, owner: &Pubkey, mutation: &Mutation) -> StakingResult<InstructionBundle> {
        match mutation {
            Mutation::Stake(amount) => {
                let exists = self.protocol_account_exists().await?;
                self.builder.stake(owner, *amount, exists)
            }
            Mutation::Unstake(amount) => {
                let exists = self.protocol_account_exists().await?;
                self.builder.unstake(owner, *amount, exists)
            }
            Mutation::ClaimRewards => {
                let exists = self.protocol_account_exists().await?;
                self.builder.claim_rewards(owner, exists)
            }
            Mutation::EmergencyWithdraw => {
                let (stake_address, _) = self.deriver().user_stake_pda(owner)?;
                let staked = self
                    .read_decoded::<UserStakeInfo>(&stake_address)
                    .await?
                    .map(|stake| stake.staked_amount)
                    .unwrap_or(0);
                let exists = self.protocol_account_exists().await?;
                self.builder.emergency_withdraw(owner, staked, exists)
            }
            Mutation::CreateProposal { data, proposal } => {
                self.builder.create_proposal(owner, proposal, data.clone())
            }
            Mutation::Vote { proposal, support } => {
                let record = self.require_proposal(proposal).await?;
                if record.has_voted(owner) {
                    return Err(StakingError::Validation(format!("already voted on {}", proposal)));
                }
                if !record.is_open(self.clock.now().timestamp()) {
                    return Err(StakingError::Validation(format!("voting on {} is closed", proposal)));
                }
                self.builder.vote(owner, proposal, *support)
            }
            Mutation::ExecuteProposal { proposal } => {
                let record = self.require_proposal(proposal).await?;
                if record.executed {
                    return Err(StakingError::Validation(format!("{} already executed", proposal)));
                }
                if self.clock.now().timestamp() < record.end_time {
                    return Err(StakingError::Validation(format!("voting on {} is still open", proposal)));
                }
                self.builder.execute_proposal(owner, proposal)
            }
            Mutation::Initialize(config) => self.builder.initialize(owner, config.clone()),
        }
    }

    async fn require_proposal(&self, proposal: &Pubkey) -> StakingResult<Proposal> {
        self.read_proposal(proposal)
            .await?
            .ok_or_else(|| StakingError::Validation(format!("proposal {} not found", proposal)))
    }

    async fn protocol_account_exists(&self) -> StakingResult<bool> {
        let (state, _) = self.deriver().staking_state_pda()?;
        let address = self.deriver().associated_token_account(&state);
        Ok(self.gateway.read_account(&address).await?.is_some())
    }

    /// Set payer and blockhash as late as possible, then sign and submit.
    ///
    /// Returns the signature and the last block height the blockhash is valid for.
    async fn sign_and_submit(
        &self,
        owner: &Pubkey,
        bundle: InstructionBundle,
    ) -> StakingResult<(Signature, u64)> {
        if self.signer.pubkey() != *owner {
            return Err(StakingError::Signing(format!(
                "signer {} is not the connected wallet {}",
                self.signer.pubkey(),
                owner
            )));
        }

        let mut transaction = bundle.to_transaction(owner);
        let (blockhash, last_valid_block_height) = self.gateway.latest_blockhash().await?;
        transaction.message.recent_blockhash = blockhash;

        let signed = self.signer.sign_transaction(transaction).await?;
        if !signed.is_signed() {
            return Err(StakingError::Signing("transaction is missing signatures".to_string()));
        }

        let signature = self.gateway.submit(&signed).await?;
        Ok((signature, last_valid_block_height))
    }
}

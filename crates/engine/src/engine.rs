//! The airdrop engine: creates sessions and drives them through every stage.

use std::sync::Arc;
use std::time::Duration;

use dropwell_core::{unix_now, Lovelace, RawEntry, Session, Stage};
use dropwell_settlement::{
    required_deposit, BalanceQuery, SettlementTool, DEFAULT_FEE_BUFFER, DEFAULT_MAX_OUTPUTS_PER_TX,
    DEFAULT_MIN_PAYOUT, DEFAULT_SERVICE_FEE,
};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::distribute::distribute;
use crate::fee::{settle_fee, FeePlan};
use crate::ledger::SessionLedger;
use crate::lock::SessionLocks;
use crate::notify::{self, NotificationSink};
use crate::recipients::{self, RecipientPolicy, RecipientSet};
use crate::recovery::{self, RecoveryReport};
use crate::source::RecipientSource;
use crate::store::SessionStore;
use crate::watcher::await_deposit;
use crate::{EngineError, Result};

/// Engine tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub poll_interval_secs: u64,
    pub fee_buffer: Lovelace,
    pub service_fee: Lovelace,
    pub max_outputs_per_tx: usize,
    pub min_payout: Lovelace,
    pub address_prefix: String,
    /// Service fee destination and default drain address.
    pub treasury_address: String,
    /// Wait before re-checking the funding address for dust after the fee.
    pub settle_delay_secs: u64,
    pub public_channel: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            fee_buffer: DEFAULT_FEE_BUFFER,
            service_fee: DEFAULT_SERVICE_FEE,
            max_outputs_per_tx: DEFAULT_MAX_OUTPUTS_PER_TX,
            min_payout: DEFAULT_MIN_PAYOUT,
            address_prefix: "addr".to_string(),
            treasury_address: String::new(),
            settle_delay_secs: 60,
            public_channel: None,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_outputs_per_tx == 0 {
            return Err(EngineError::InvalidConfig(
                "max_outputs_per_tx must be positive".to_string(),
            ));
        }
        if self.treasury_address.is_empty() {
            return Err(EngineError::InvalidConfig(
                "treasury_address is not set".to_string(),
            ));
        }
        if !self.treasury_address.starts_with(&self.address_prefix) {
            return Err(EngineError::InvalidConfig(format!(
                "treasury_address must start with {:?}",
                self.address_prefix
            )));
        }
        Ok(())
    }

    pub fn recipient_policy(&self) -> RecipientPolicy {
        RecipientPolicy {
            address_prefix: self.address_prefix.clone(),
            min_payout: self.min_payout,
        }
    }
}

/// The address a session is funded at and the key that spends from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundingWallet {
    pub address: String,
    /// Reference handed to the settlement tool, e.g. a signing-key file path.
    pub signing_key: String,
}

#[derive(Debug, Clone)]
pub struct AirdropRequest {
    pub owner_id: String,
    pub entries: Vec<RawEntry>,
    pub total_budget: Lovelace,
    pub wallet: FundingWallet,
    pub drain_address: Option<String>,
    pub policy_id: Option<String>,
}

impl AirdropRequest {
    /// Build a request from a recipient source.
    pub async fn from_source(
        owner_id: impl Into<String>,
        source: &dyn RecipientSource,
        total_budget: Lovelace,
        wallet: FundingWallet,
    ) -> Result<Self> {
        Ok(Self {
            owner_id: owner_id.into(),
            entries: source.fetch().await?,
            total_budget,
            wallet,
            drain_address: None,
            policy_id: source.policy_id().map(str::to_string),
        })
    }
}

#[derive(Debug, Clone)]
pub struct CreatedSession {
    pub session: Session,
    pub recipients: RecipientSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// This run brought the session to `Completed`.
    Completed,
    /// Nothing to do.
    AlreadyCompleted,
}

pub struct Engine {
    config: EngineConfig,
    ledger: SessionLedger,
    locks: SessionLocks,
    balance: Arc<dyn BalanceQuery>,
    tool: Arc<dyn SettlementTool>,
    notifier: Arc<dyn NotificationSink>,
    poll_interval: Duration,
    settle_delay: Duration,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn SessionStore>,
        balance: Arc<dyn BalanceQuery>,
        tool: Arc<dyn SettlementTool>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Result<Self> {
        config.validate()?;
        let poll_interval = Duration::from_secs(config.poll_interval_secs);
        let settle_delay = Duration::from_secs(config.settle_delay_secs);
        Ok(Self {
            config,
            ledger: SessionLedger::new(store),
            locks: SessionLocks::new(),
            balance,
            tool,
            notifier,
            poll_interval,
            settle_delay,
        })
    }

    /// Override the watcher poll interval and post-fee settle delay.
    pub fn with_intervals(mut self, poll_interval: Duration, settle_delay: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.settle_delay = settle_delay;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &SessionLedger {
        &self.ledger
    }

    pub fn locks(&self) -> &SessionLocks {
        &self.locks
    }

    /// Validate the request, persist a new `AwaitingFunds` session, and send
    /// the owner deposit instructions. Invalid input persists nothing.
    pub async fn create_session(&self, request: AirdropRequest) -> Result<CreatedSession> {
        let prefix = &self.config.address_prefix;
        if request.owner_id.is_empty() {
            return Err(EngineError::InvalidRequest("owner id is empty".to_string()));
        }
        if !request.wallet.address.starts_with(prefix.as_str()) {
            return Err(EngineError::InvalidRequest(format!(
                "funding address must start with {:?}",
                prefix
            )));
        }
        if request.wallet.signing_key.is_empty() {
            return Err(EngineError::InvalidRequest("signing key reference is empty".to_string()));
        }
        if let Some(drain) = &request.drain_address {
            if !drain.starts_with(prefix.as_str()) {
                return Err(EngineError::InvalidRequest(format!(
                    "drain address must start with {:?}",
                    prefix
                )));
            }
        }

        let set = recipients::build(&request.entries, request.total_budget, &self.config.recipient_policy())?;
        let total_payout = set.total_payout();
        let required_amount = required_deposit(total_payout, self.config.fee_buffer, self.config.service_fee)
            .ok_or(EngineError::AmountOverflow)?;

        let now = unix_now();
        let session = Session {
            session_id: Session::id_for(&request.owner_id, now),
            owner_id: request.owner_id,
            created_at: now,
            updated_at: now,
            policy_id: request.policy_id,
            rate: set.rate,
            recipients: set.recipients.clone(),
            total_weight: set.total_weight(),
            total_payout,
            funding_address: request.wallet.address,
            signing_key: request.wallet.signing_key,
            fee_buffer: self.config.fee_buffer,
            required_amount,
            drain_address: request.drain_address,
            max_outputs_per_tx: self.config.max_outputs_per_tx,
            stage: Stage::AwaitingFunds,
            distribution_tx_ids: Vec::new(),
            unconfirmed_batch: None,
            service_fee_tx_id: None,
            drain_tx_id: None,
            last_error: None,
            last_error_kind: None,
        };
        self.ledger.create(&session)?;

        let message = notify::deposit_instructions(&session, &set, self.config.service_fee);
        self.notifier.notify_owner(&session.owner_id, &message).await;

        Ok(CreatedSession {
            session,
            recipients: set,
        })
    }

    /// Drive session `id` from its persisted stage to `Completed`.
    ///
    /// Runs for the same session are serialized. Waiting for a deposit has no
    /// timeout, so this may not return until the session is funded or cancelled.
    /// Calling this directly is how an operator retries a session whose last
    /// error blocks [`Engine::resume_recoverable`]; a distribution that may
    /// have reached the chain is still refused.
    pub async fn run(&self, id: &str) -> Result<RunOutcome> {
        let _guard = self.locks.acquire(id).await;
        let mut session = self.ledger.load(id)?;
        let started = session.stage;
        info!(session = %id, stage = %started, "running session");

        let result = self.drive(&mut session).await;
        match &result {
            Ok(RunOutcome::Completed) => {
                self.notifier
                    .notify_owner(&session.owner_id, &notify::completion_message(&session))
                    .await;
                if let Some(channel) = &self.config.public_channel {
                    self.notifier
                        .notify_public(channel, &notify::public_summary(&session))
                        .await;
                }
            }
            Ok(RunOutcome::AlreadyCompleted) => {}
            Err(EngineError::Cancelled(_)) => {
                info!(session = %id, "session cancelled");
                let reason = self
                    .ledger
                    .load(id)
                    .ok()
                    .and_then(|s| s.last_error)
                    .unwrap_or_else(|| "cancelled".to_string());
                self.notifier
                    .notify_owner(&session.owner_id, &format!("Airdrop {} was cancelled: {}", id, reason))
                    .await;
            }
            Err(e) => {
                error!(session = %id, kind = e.kind().name(), error = %e, "session stopped");
                self.notifier
                    .notify_owner(&session.owner_id, &notify::failure_message(id, &e.to_string()))
                    .await;
            }
        }
        result
    }

    async fn drive(&self, session: &mut Session) -> Result<RunOutcome> {
        let started = session.stage;
        loop {
            match session.stage {
                Stage::AwaitingFunds => {
                    await_deposit(&self.ledger, session, self.balance.as_ref(), self.poll_interval).await?;
                }
                Stage::BuildingTx | Stage::Distributing => {
                    let max_outputs = session.max_outputs_per_tx;
                    distribute(&self.ledger, session, self.tool.as_ref(), max_outputs).await?;
                }
                Stage::PayingFee => {
                    let plan = FeePlan {
                        fee_amount: self.config.service_fee,
                        fee_destination: &self.config.treasury_address,
                        settle_delay: self.settle_delay,
                    };
                    settle_fee(&self.ledger, session, self.balance.as_ref(), self.tool.as_ref(), &plan).await?;
                }
                Stage::Completed if started == Stage::Completed => {
                    return Ok(RunOutcome::AlreadyCompleted)
                }
                Stage::Completed => return Ok(RunOutcome::Completed),
                Stage::Cancelled => return Err(EngineError::Cancelled(session.session_id.clone())),
            }
        }
    }

    /// Run session `id` on its own task.
    pub fn spawn(self: &Arc<Self>, id: impl Into<String>) -> JoinHandle<Result<RunOutcome>> {
        let engine = Arc::clone(self);
        let id = id.into();
        tokio::spawn(async move { engine.run(&id).await })
    }

    /// Cancel a non-terminal session. A running executor stops at its next
    /// check; a batch already in flight finishes first.
    pub fn cancel(&self, id: &str, reason: &str) -> Result<Session> {
        self.ledger.cancel(id, reason)
    }

    pub fn analyze(&self, id: &str) -> RecoveryReport {
        recovery::analyze(self.ledger.store(), id)
    }

    /// Recovery analysis of every stored session.
    pub fn scan(&self) -> Result<Vec<RecoveryReport>> {
        let ids = self.ledger.store().list_ids()?;
        Ok(ids.iter().map(|id| self.analyze(id)).collect())
    }

    /// Spawn a run for every session that can be resumed safely and is not
    /// already running. Sessions whose last run stopped on anything but a
    /// transient error are left for an operator and logged with the reason.
    pub fn resume_recoverable(self: &Arc<Self>) -> Result<Vec<(String, JoinHandle<Result<RunOutcome>>)>> {
        let mut spawned = Vec::new();
        for report in self.scan()? {
            if report.should_resume() {
                if self.locks.is_locked(&report.session_id) {
                    continue;
                }
                info!(
                    session = %report.session_id,
                    action = %report.action,
                    risk = %report.risk,
                    "resuming session"
                );
                let handle = self.spawn(report.session_id.clone());
                spawned.push((report.session_id, handle));
            } else if report.needs_attention() {
                warn!(
                    session = %report.session_id,
                    action = %report.action,
                    risk = %report.risk,
                    blocked_by = report.blocked_by.map(|k| k.name()).unwrap_or("-"),
                    summary = %report.summary,
                    "session needs attention"
                );
            }
        }
        Ok(spawned)
    }
}

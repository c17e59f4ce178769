//! Dropwell Engine
//!
//! The airdrop settlement workflow: takes `(recipient, weight)` pairs, computes
//! a proportional payout, waits for a funding deposit, settles the payouts in
//! batched transactions through a [`SettlementTool`], collects a flat service
//! fee, drains the funding address, and survives restarts at every step.
//!
//! Stage flow: `AwaitingFunds → BuildingTx → Distributing → PayingFee → Completed`,
//! with `Cancelled` reachable from any non-terminal stage.
//!
//! [`SettlementTool`]: dropwell_settlement::SettlementTool

pub mod distribute;
pub mod engine;
pub mod fee;
pub mod ledger;
pub mod lock;
pub mod notify;
pub mod recipients;
pub mod recovery;
pub mod source;
pub mod store;
pub mod watcher;

pub use engine::{AirdropRequest, CreatedSession, Engine, EngineConfig, FundingWallet, RunOutcome};
pub use ledger::SessionLedger;
pub use lock::{SessionGuard, SessionLocks};
pub use notify::{LogNotifier, Notification, NotificationSink, RecordingNotifier};
pub use recipients::{RecipientError, RecipientPolicy, RecipientSet};
pub use recovery::{RecoveryAction, RecoveryReport, RiskLevel, SessionSummary};
pub use source::{parse_manifest, ManifestFile, RecipientSource, SourceError, StaticSource};
pub use store::{FileSessionStore, MemorySessionStore, SessionStore, StoreError};

use dropwell_core::{ErrorKind, Lovelace, Stage};
use dropwell_settlement::{BalanceError, SettlementError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid recipients: {0}")]
    Recipients(#[from] RecipientError),
    #[error("recipient source: {0}")]
    Source(#[from] SourceError),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("invalid engine config: {0}")]
    InvalidConfig(String),
    #[error("required deposit overflows")]
    AmountOverflow,
    #[error("session store: {0}")]
    Store(#[from] StoreError),
    #[error("balance check: {0}")]
    Balance(#[from] BalanceError),
    #[error("settlement failed on batch {} of {total}: {source}", .batch + 1)]
    Batch {
        batch: usize,
        total: usize,
        #[source]
        source: SettlementError,
    },
    #[error("service fee transaction failed: {0}")]
    FeeSettlement(#[source] SettlementError),
    #[error("insufficient balance for service fee: have {have}, need {need}")]
    InsufficientForFee { have: Lovelace, need: Lovelace },
    #[error("session {0} was cancelled")]
    Cancelled(String),
    #[error("session {id} needs manual intervention: {reason}")]
    ManualInterventionRequired { id: String, reason: String },
    #[error("illegal stage transition {from} -> {to}")]
    InvalidTransition { from: Stage, to: Stage },
    #[error("session {id} would be persisted in an inconsistent state: {detail}")]
    InvariantViolated { id: String, detail: String },
}

impl EngineError {
    /// Where this error sits in the workflow error taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Recipients(_)
            | Self::Source(_)
            | Self::InvalidRequest(_)
            | Self::InvalidConfig(_)
            | Self::AmountOverflow => ErrorKind::Validation,
            Self::Store(e) => e.kind(),
            Self::Balance(_) => ErrorKind::TransientInfrastructure,
            Self::Batch { .. } | Self::FeeSettlement(_) | Self::ManualInterventionRequired { .. } => {
                ErrorKind::SettlementFailure
            }
            Self::InsufficientForFee { .. } => ErrorKind::InsufficientFunds,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::InvalidTransition { .. } | Self::InvariantViolated { .. } => ErrorKind::CorruptState,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

//! Crash recovery analysis.
//!
//! Reads a persisted session and classifies whether execution can be resumed
//! automatically and at what risk. Analysis never writes anything.

use std::fmt;

use dropwell_core::{ErrorKind, Lovelace, Session, Stage};
use serde::Serialize;

use crate::store::{SessionStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    ResumeWaiting,
    RebuildFromScratch,
    RestartDistribution,
    VerifyPartialDistribution,
    ResumeFeePayment,
    NotifyOnly,
    InvestigateCancellation,
    InvestigateCorruption,
    InvestigateMissing,
}

impl RecoveryAction {
    pub fn description(&self) -> &'static str {
        match self {
            Self::ResumeWaiting => "Resume waiting for funds deposit",
            Self::RebuildFromScratch => "Resume transaction building from scratch",
            Self::RestartDistribution => "Resume distribution from beginning",
            Self::VerifyPartialDistribution => {
                "MANUAL INTERVENTION REQUIRED - Check which TXs succeeded"
            }
            Self::ResumeFeePayment => "Resume service fee payment and wallet draining",
            Self::NotifyOnly => "Airdrop already complete, send notification if needed",
            Self::InvestigateCancellation => "Airdrop was cancelled, investigate reason",
            Self::InvestigateCorruption => "ERROR - Session unrecoverable, manual investigation needed",
            Self::InvestigateMissing => "ERROR - Session record not found",
        }
    }
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    None,
    Low,
    Medium,
    High,
    Variable,
    Unknown,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Variable => "variable",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// The parts of a session an operator needs to decide what to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub owner_id: String,
    pub stage: Stage,
    pub funding_address: String,
    pub required_amount: Lovelace,
    pub recipients: usize,
    pub distribution_tx_ids: Vec<String>,
    pub service_fee_tx_id: Option<String>,
    pub drain_tx_id: Option<String>,
    pub last_error: Option<String>,
    pub last_error_kind: Option<ErrorKind>,
    pub updated_at: u64,
}

impl From<&Session> for SessionSummary {
    fn from(s: &Session) -> Self {
        Self {
            owner_id: s.owner_id.clone(),
            stage: s.stage,
            funding_address: s.funding_address.clone(),
            required_amount: s.required_amount,
            recipients: s.recipients.len(),
            distribution_tx_ids: s.distribution_tx_ids.clone(),
            service_fee_tx_id: s.service_fee_tx_id.clone(),
            drain_tx_id: s.drain_tx_id.clone(),
            last_error: s.last_error.clone(),
            last_error_kind: s.last_error_kind,
            updated_at: s.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    pub session_id: String,
    pub recoverable: bool,
    pub action: RecoveryAction,
    pub risk: RiskLevel,
    pub summary: String,
    /// Error that stopped the last run and needs someone to act on it before
    /// the session is picked up again, even though its stage is resumable.
    pub blocked_by: Option<ErrorKind>,
    /// Absent when the record could not be read.
    pub session: Option<SessionSummary>,
}

impl RecoveryReport {
    /// Whether an automatic resume should be started for this session.
    pub fn should_resume(&self) -> bool {
        self.recoverable && self.blocked_by.is_none() && self.action != RecoveryAction::NotifyOnly
    }

    /// Whether an operator has to look at this session.
    pub fn needs_attention(&self) -> bool {
        !self.recoverable || self.blocked_by.is_some()
    }
}

/// Classify a loaded session.
pub fn classify(session: &Session) -> RecoveryReport {
    let partial = session.distribution_tx_ids.len();
    let (recoverable, action, risk, summary) = match session.stage {
        Stage::AwaitingFunds => (
            true,
            RecoveryAction::ResumeWaiting,
            RiskLevel::Low,
            "Waiting for deposit; nothing has been spent".to_string(),
        ),
        Stage::BuildingTx => (
            true,
            RecoveryAction::RebuildFromScratch,
            RiskLevel::Medium,
            "Funded; no transaction has been submitted".to_string(),
        ),
        Stage::Distributing if !session.may_have_broadcast() => (
            true,
            RecoveryAction::RestartDistribution,
            RiskLevel::Medium,
            "Distribution started but no batch id was recorded".to_string(),
        ),
        Stage::Distributing => {
            let mut summary = if partial > 0 {
                format!(
                    "Partial distribution: {} batch(es) already broadcast ({})",
                    partial,
                    session.distribution_tx_ids.join(", ")
                )
            } else {
                "Partial distribution: no batch id recorded".to_string()
            };
            if let Some(batch) = session.unconfirmed_batch {
                summary.push_str(&format!("; batch {} may have been broadcast", batch + 1));
            }
            summary.push_str("; verify on-chain state before continuing");
            (false, RecoveryAction::VerifyPartialDistribution, RiskLevel::High, summary)
        }
        Stage::PayingFee => (
            true,
            RecoveryAction::ResumeFeePayment,
            RiskLevel::Low,
            match &session.service_fee_tx_id {
                Some(tx) => format!("Distribution done; service fee already paid in {}", tx),
                None => "Distribution done; service fee not yet paid".to_string(),
            },
        ),
        Stage::Completed => (
            true,
            RecoveryAction::NotifyOnly,
            RiskLevel::None,
            "Completed".to_string(),
        ),
        Stage::Cancelled => (
            false,
            RecoveryAction::InvestigateCancellation,
            RiskLevel::Variable,
            match &session.last_error {
                Some(reason) => format!("Cancelled: {}", reason),
                None => "Cancelled".to_string(),
            },
        ),
    };

    let blocked_by = match session.last_error_kind {
        Some(kind) if recoverable && !kind.is_retryable() => Some(kind),
        _ => None,
    };
    let summary = match (blocked_by, &session.last_error) {
        (Some(kind), Some(message)) => format!("{}; last run stopped ({}): {}", summary, kind.name(), message),
        (Some(kind), None) => format!("{}; last run stopped ({})", summary, kind.name()),
        (None, _) => summary,
    };

    RecoveryReport {
        session_id: session.session_id.clone(),
        recoverable,
        action,
        risk,
        summary,
        blocked_by,
        session: Some(SessionSummary::from(session)),
    }
}

/// Load and classify the session `id`. Never fails: unreadable records are
/// reported as unrecoverable.
pub fn analyze(store: &dyn SessionStore, id: &str) -> RecoveryReport {
    match store.load(id) {
        Ok(session) => classify(&session),
        Err(StoreError::NotFound(_)) => unreadable(id, RecoveryAction::InvestigateMissing, "No session record".into()),
        Err(e) => unreadable(id, RecoveryAction::InvestigateCorruption, e.to_string()),
    }
}

fn unreadable(id: &str, action: RecoveryAction, summary: String) -> RecoveryReport {
    RecoveryReport {
        session_id: id.to_string(),
        recoverable: false,
        action,
        risk: RiskLevel::Unknown,
        summary,
        blocked_by: None,
        session: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemorySessionStore;
    use dropwell_core::{PayoutRate, Recipient};

    fn session(stage: Stage, ids: &[&str]) -> Session {
        Session {
            session_id: "o_1".into(),
            owner_id: "o".into(),
            created_at: 1,
            updated_at: 1,
            policy_id: None,
            rate: PayoutRate::new(10, 1).unwrap(),
            recipients: vec![Recipient { address: "addr1a".into(), weight: 1 }],
            total_weight: 1,
            total_payout: 10,
            funding_address: "addr1fund".into(),
            signing_key: "key".into(),
            fee_buffer: 0,
            required_amount: 10,
            drain_address: None,
            max_outputs_per_tx: 120,
            stage,
            distribution_tx_ids: ids.iter().map(|s| s.to_string()).collect(),
            unconfirmed_batch: None,
            service_fee_tx_id: None,
            drain_tx_id: None,
            last_error: None,
            last_error_kind: None,
        }
    }

    #[test]
    fn test_classification_table() {
        let cases: [(Stage, &[&str], bool, RecoveryAction, RiskLevel); 7] = [
            (Stage::AwaitingFunds, &[], true, RecoveryAction::ResumeWaiting, RiskLevel::Low),
            (Stage::BuildingTx, &[], true, RecoveryAction::RebuildFromScratch, RiskLevel::Medium),
            (Stage::Distributing, &[], true, RecoveryAction::RestartDistribution, RiskLevel::Medium),
            (Stage::Distributing, &["tx0"], false, RecoveryAction::VerifyPartialDistribution, RiskLevel::High),
            (Stage::PayingFee, &["tx0"], true, RecoveryAction::ResumeFeePayment, RiskLevel::Low),
            (Stage::Completed, &["tx0"], true, RecoveryAction::NotifyOnly, RiskLevel::None),
            (Stage::Cancelled, &[], false, RecoveryAction::InvestigateCancellation, RiskLevel::Variable),
        ];
        for (stage, ids, recoverable, action, risk) in cases {
            let report = classify(&session(stage, ids));
            assert_eq!(report.recoverable, recoverable, "{}", stage);
            assert_eq!(report.action, action, "{}", stage);
            assert_eq!(report.risk, risk, "{}", stage);
            assert!(report.blocked_by.is_none(), "{}", stage);
        }
    }

    #[test]
    fn test_should_resume() {
        assert!(classify(&session(Stage::AwaitingFunds, &[])).should_resume());
        assert!(!classify(&session(Stage::Completed, &["tx0"])).should_resume());
        assert!(!classify(&session(Stage::Distributing, &["tx0"])).should_resume());
    }

    #[test]
    fn test_unretryable_error_blocks_resume() {
        let mut short = session(Stage::PayingFee, &["tx0"]);
        short.record_error(ErrorKind::InsufficientFunds, "have 5, need 20");
        let report = classify(&short);
        assert!(report.recoverable);
        assert_eq!(report.action, RecoveryAction::ResumeFeePayment);
        assert_eq!(report.blocked_by, Some(ErrorKind::InsufficientFunds));
        assert!(!report.should_resume());
        assert!(report.needs_attention());
        assert!(report.summary.contains("have 5, need 20"));

        let mut failed = session(Stage::Distributing, &[]);
        failed.record_error(ErrorKind::SettlementFailure, "build: rejected");
        let report = classify(&failed);
        assert_eq!(report.action, RecoveryAction::RestartDistribution);
        assert!(!report.should_resume());

        let mut blip = session(Stage::AwaitingFunds, &[]);
        blip.record_error(ErrorKind::TransientInfrastructure, "balance check: timeout");
        let report = classify(&blip);
        assert!(report.blocked_by.is_none());
        assert!(report.should_resume());
        assert!(!report.needs_attention());
    }

    #[test]
    fn test_unconfirmed_batch_is_partial() {
        let mut s = session(Stage::Distributing, &[]);
        s.unconfirmed_batch = Some(0);
        let report = classify(&s);
        assert!(!report.recoverable);
        assert_eq!(report.action, RecoveryAction::VerifyPartialDistribution);
        assert_eq!(report.risk, RiskLevel::High);
        assert!(report.summary.contains("batch 1 may have been broadcast"));
        assert!(report.needs_attention());
    }

    #[test]
    fn test_unreadable_records() {
        let store = MemorySessionStore::new();
        store.insert_raw("bad_1", "not json");

        let corrupt = analyze(&store, "bad_1");
        assert!(!corrupt.recoverable);
        assert_eq!(corrupt.action, RecoveryAction::InvestigateCorruption);
        assert_eq!(corrupt.risk, RiskLevel::Unknown);
        assert!(corrupt.session.is_none());

        let missing = analyze(&store, "gone_1");
        assert_eq!(missing.action, RecoveryAction::InvestigateMissing);
        assert!(!missing.recoverable);
    }

    #[test]
    fn test_partial_summary_lists_ids() {
        let report = classify(&session(Stage::Distributing, &["tx0", "tx1"]));
        assert!(report.summary.contains("2 batch(es)"));
        assert!(report.summary.contains("tx0, tx1"));
        assert_eq!(
            report.action.to_string(),
            "MANUAL INTERVENTION REQUIRED - Check which TXs succeeded"
        );
    }
}

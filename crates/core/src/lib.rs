//! Dropwell Core
//!
//! Domain types shared by every Dropwell crate: recipients, payout rates,
//! the error taxonomy, and the persisted workflow session.

pub mod session;

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use session::{Session, Stage};

/// Amount in the settlement currency's smallest unit.
pub type Lovelace = u64;

/// Smallest units per whole coin.
pub const LOVELACE_PER_ADA: Lovelace = 1_000_000;

/// Workflow error taxonomy. Every failure recorded on a session is tagged
/// with one of these so recovery analysis can reason about it later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad recipient input. Resolved before a session is ever persisted.
    Validation,
    /// Balance-query or settlement-tool blip. Retried in place by the watcher.
    TransientInfrastructure,
    /// Deposit or fee shortfall. Requires user action.
    InsufficientFunds,
    /// Build/sign/submit/id failure. Requires operator diagnosis.
    SettlementFailure,
    /// Unreadable or inconsistent session record.
    CorruptState,
    /// Explicit operator or user cancellation.
    Cancelled,
}

impl ErrorKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::TransientInfrastructure => "transient_infrastructure",
            Self::InsufficientFunds => "insufficient_funds",
            Self::SettlementFailure => "settlement_failure",
            Self::CorruptState => "corrupt_state",
            Self::Cancelled => "cancelled",
        }
    }

    /// Only transient infrastructure errors are retried without outside help.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientInfrastructure)
    }
}

/// A validated payout recipient. Immutable once attached to a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Recipient {
    pub address: String,
    pub weight: u64,
}

/// An unvalidated `(address, weight)` pair as read from a manifest or an
/// enumeration query. The weight is signed so that non-positive input can be
/// observed and rejected instead of failing to parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEntry {
    pub address: String,
    #[serde(alias = "quantity")]
    pub weight: i64,
}

impl RawEntry {
    pub fn new(address: impl Into<String>, weight: i64) -> Self {
        Self {
            address: address.into(),
            weight,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RateError {
    #[error("total weight is zero")]
    ZeroWeight,
}

/// Exact payout rate `budget / total_weight`.
///
/// Payouts are floored per recipient, so the sum over any recipient set whose
/// weights add up to `total_weight` never exceeds `budget`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutRate {
    pub budget: Lovelace,
    pub total_weight: u64,
}

impl PayoutRate {
    pub fn new(budget: Lovelace, total_weight: u64) -> Result<Self, RateError> {
        if total_weight == 0 {
            return Err(RateError::ZeroWeight);
        }
        Ok(Self {
            budget,
            total_weight,
        })
    }

    /// Payout for a recipient holding `weight` units.
    pub fn payout(&self, weight: u64) -> Lovelace {
        if self.total_weight == 0 {
            return 0;
        }
        let share = (weight as u128).saturating_mul(self.budget as u128) / (self.total_weight as u128);
        share.min(u64::MAX as u128) as u64
    }

    /// Rate per weight unit, for display only.
    pub fn per_unit(&self) -> f64 {
        if self.total_weight == 0 {
            return 0.0;
        }
        self.budget as f64 / self.total_weight as f64
    }
}

/// Current unix timestamp in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

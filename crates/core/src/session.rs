//! The persisted airdrop session and its stage machine.

use serde::{Deserialize, Serialize};

use crate::{ErrorKind, Lovelace, PayoutRate, Recipient};

/// Workflow stage. Advances strictly in declaration order; `Cancelled` is a
/// terminal alternate reachable from any non-terminal stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    AwaitingFunds,
    BuildingTx,
    Distributing,
    #[serde(rename = "paying_service_fee")]
    PayingFee,
    Completed,
    Cancelled,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AwaitingFunds => "awaiting_funds",
            Self::BuildingTx => "building_tx",
            Self::Distributing => "distributing",
            Self::PayingFee => "paying_service_fee",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// The stage that follows this one on the happy path.
    pub fn successor(&self) -> Option<Self> {
        match self {
            Self::AwaitingFunds => Some(Self::BuildingTx),
            Self::BuildingTx => Some(Self::Distributing),
            Self::Distributing => Some(Self::PayingFee),
            Self::PayingFee => Some(Self::Completed),
            Self::Completed | Self::Cancelled => None,
        }
    }

    /// Whether a persisted record in `self` may be overwritten with `next`.
    /// Staying in place is always allowed (progress within a stage).
    pub fn can_advance_to(&self, next: Stage) -> bool {
        if *self == next {
            return true;
        }
        if next == Self::Cancelled {
            return !self.is_terminal();
        }
        self.successor() == Some(next)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One complete run of the settlement workflow for one funding address and
/// recipient set. Every stage transition is persisted before it takes effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// `{owner_id}_{created_at}`.
    pub session_id: String,
    pub owner_id: String,
    pub created_at: u64,
    pub updated_at: u64,
    /// Collection the recipients were enumerated from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<String>,

    pub rate: PayoutRate,
    pub recipients: Vec<Recipient>,
    pub total_weight: u64,
    pub total_payout: Lovelace,

    pub funding_address: String,
    /// Key reference handed to the settlement tool when signing.
    pub signing_key: String,
    /// Network-fee reserve included in `required_amount`.
    pub fee_buffer: Lovelace,
    pub required_amount: Lovelace,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drain_address: Option<String>,
    /// Batch ceiling fixed at creation, so a restart partitions the payouts
    /// exactly as the first run did.
    pub max_outputs_per_tx: usize,

    pub stage: Stage,
    /// Append-only, one id per submitted batch, in submission order.
    #[serde(default)]
    pub distribution_tx_ids: Vec<String>,
    /// Batch handed to the settlement tool whose id is not recorded yet.
    /// Set before the batch is built; cleared once its id is recorded or it
    /// failed before anything could be broadcast.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unconfirmed_batch: Option<usize>,
    #[serde(default)]
    pub service_fee_tx_id: Option<String>,
    #[serde(default)]
    pub drain_tx_id: Option<String>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub last_error_kind: Option<ErrorKind>,
}

impl Session {
    pub fn id_for(owner_id: &str, created_at: u64) -> String {
        format!("{}_{}", owner_id, created_at)
    }

    /// Number of batches the recipient set splits into.
    pub fn batch_count(&self, max_outputs_per_batch: usize) -> usize {
        if max_outputs_per_batch == 0 {
            return 0;
        }
        self.recipients.len().div_ceil(max_outputs_per_batch)
    }

    /// Whether at least one settlement batch has been broadcast.
    pub fn has_distribution(&self) -> bool {
        !self.distribution_tx_ids.is_empty()
    }

    /// Whether any payout may have reached the chain: a batch id is recorded,
    /// or a batch was in the settlement tool when the last run stopped.
    pub fn may_have_broadcast(&self) -> bool {
        self.has_distribution() || self.unconfirmed_batch.is_some()
    }

    /// `(address, payout)` for every recipient, in recipient order.
    pub fn payouts(&self) -> impl Iterator<Item = (&str, Lovelace)> + '_ {
        self.recipients
            .iter()
            .map(move |r| (r.address.as_str(), self.rate.payout(r.weight)))
    }

    pub fn drain_address_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.drain_address.as_deref().unwrap_or(default)
    }

    pub fn record_error(&mut self, kind: ErrorKind, message: impl Into<String>) {
        self.last_error = Some(message.into());
        self.last_error_kind = Some(kind);
    }

    /// Structural checks that must hold for any persisted record.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.max_outputs_per_tx == 0 {
            return Err("batch ceiling is zero".to_string());
        }
        let batches = self.batch_count(self.max_outputs_per_tx);
        if self.distribution_tx_ids.len() > batches {
            return Err(format!(
                "{} distribution ids recorded for {} batches",
                self.distribution_tx_ids.len(),
                batches
            ));
        }
        if self.stage == Stage::Completed && self.distribution_tx_ids.len() != batches {
            return Err(format!(
                "completed with {} of {} batches recorded",
                self.distribution_tx_ids.len(),
                batches
            ));
        }
        if let Some(batch) = self.unconfirmed_batch {
            let stage_ok = matches!(self.stage, Stage::Distributing | Stage::Cancelled);
            if batch != self.distribution_tx_ids.len() || !stage_ok {
                return Err(format!(
                    "unconfirmed batch {} with {} ids recorded in {}",
                    batch,
                    self.distribution_tx_ids.len(),
                    self.stage
                ));
            }
        }
        if self.recipients.iter().any(|r| r.weight == 0) {
            return Err("recipient with zero weight".to_string());
        }
        Ok(())
    }
}

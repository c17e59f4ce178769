//! Recipient set builder: validates raw `(address, weight)` pairs, merges
//! duplicates, computes the payout rate, and trims dust.

use std::collections::HashMap;

use dropwell_core::{Lovelace, PayoutRate, RawEntry, Recipient};
use dropwell_settlement::DEFAULT_MIN_PAYOUT;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecipientError {
    #[error("total budget must be positive")]
    ZeroBudget,
    #[error("no eligible recipients ({dropped_invalid} invalid, {dropped_dust} below dust threshold)")]
    NoEligibleRecipients {
        dropped_invalid: usize,
        dropped_dust: usize,
    },
    #[error("total weight overflows")]
    WeightOverflow,
}

/// Filtering rules for a recipient set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientPolicy {
    /// Every destination address must start with this.
    pub address_prefix: String,
    /// Payouts below this are dust and dropped.
    pub min_payout: Lovelace,
}

impl Default for RecipientPolicy {
    fn default() -> Self {
        Self {
            address_prefix: "addr".to_string(),
            min_payout: DEFAULT_MIN_PAYOUT,
        }
    }
}

impl RecipientPolicy {
    pub fn accepts_address(&self, address: &str) -> bool {
        address.len() > self.address_prefix.len() && address.starts_with(&self.address_prefix)
    }
}

/// A filtered, dust-trimmed recipient set and the rate it pays at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientSet {
    pub recipients: Vec<Recipient>,
    pub rate: PayoutRate,
    /// Entries dropped for non-positive weight or a malformed address.
    pub dropped_invalid: usize,
    /// Entries dropped because their payout was below `min_payout`.
    pub dropped_dust: usize,
    /// Valid entries folded into an earlier entry with the same address.
    pub merged_duplicates: usize,
}

impl RecipientSet {
    pub fn total_weight(&self) -> u64 {
        self.rate.total_weight
    }

    pub fn total_payout(&self) -> Lovelace {
        self.recipients
            .iter()
            .fold(0u64, |acc, r| acc.saturating_add(self.rate.payout(r.weight)))
    }
}

/// Build a recipient set paying out `total_budget` across `raw`.
///
/// The rate is computed over the filtered set, then recomputed once more after
/// dust is dropped. Dropping dust only raises the rate, so one pass suffices.
pub fn build(
    raw: &[RawEntry],
    total_budget: Lovelace,
    policy: &RecipientPolicy,
) -> Result<RecipientSet, RecipientError> {
    if total_budget == 0 {
        return Err(RecipientError::ZeroBudget);
    }

    let mut dropped_invalid = 0;
    let mut merged_duplicates = 0;
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut valid: Vec<Recipient> = Vec::with_capacity(raw.len());

    for entry in raw {
        let address = entry.address.trim();
        if entry.weight <= 0 || !policy.accepts_address(address) {
            debug!(address, weight = entry.weight, "dropping invalid entry");
            dropped_invalid += 1;
            continue;
        }
        let weight = entry.weight as u64;
        match index.get(address) {
            Some(&i) => {
                valid[i].weight = valid[i]
                    .weight
                    .checked_add(weight)
                    .ok_or(RecipientError::WeightOverflow)?;
                merged_duplicates += 1;
            }
            None => {
                index.insert(address.to_string(), valid.len());
                valid.push(Recipient {
                    address: address.to_string(),
                    weight,
                });
            }
        }
    }

    let rate = rate_over(&valid, total_budget).ok_or(RecipientError::NoEligibleRecipients {
        dropped_invalid,
        dropped_dust: 0,
    })??;

    let before = valid.len();
    let recipients: Vec<Recipient> = valid
        .into_iter()
        .filter(|r| rate.payout(r.weight) >= policy.min_payout)
        .collect();
    let dropped_dust = before - recipients.len();

    let rate = match rate_over(&recipients, total_budget) {
        Some(rate) => rate?,
        None => {
            return Err(RecipientError::NoEligibleRecipients {
                dropped_invalid,
                dropped_dust,
            })
        }
    };

    info!(
        recipients = recipients.len(),
        dropped_invalid,
        dropped_dust,
        merged_duplicates,
        total_weight = rate.total_weight,
        rate_per_unit = rate.per_unit(),
        "recipient set built"
    );

    Ok(RecipientSet {
        recipients,
        rate,
        dropped_invalid,
        dropped_dust,
        merged_duplicates,
    })
}

/// `None` for an empty set.
fn rate_over(
    recipients: &[Recipient],
    budget: Lovelace,
) -> Option<Result<PayoutRate, RecipientError>> {
    if recipients.is_empty() {
        return None;
    }
    let total = recipients
        .iter()
        .try_fold(0u64, |acc, r| acc.checked_add(r.weight));
    Some(match total {
        Some(total) => PayoutRate::new(budget, total).map_err(|_| RecipientError::WeightOverflow),
        None => Err(RecipientError::WeightOverflow),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(min_payout: Lovelace) -> RecipientPolicy {
        RecipientPolicy {
            address_prefix: "addr".to_string(),
            min_payout,
        }
    }

    #[test]
    fn test_proportional_split() {
        let raw = vec![RawEntry::new("addrA", 3), RawEntry::new("addrB", 7)];
        let set = build(&raw, 100, &policy(1)).unwrap();

        assert_eq!(set.rate.per_unit(), 10.0);
        assert_eq!(set.recipients.len(), 2);
        assert_eq!(set.rate.payout(set.recipients[0].weight), 30);
        assert_eq!(set.rate.payout(set.recipients[1].weight), 70);
        assert_eq!(set.dropped_dust, 0);
        assert_eq!(set.total_payout(), 100);
    }

    #[test]
    fn test_dust_dropped_and_rate_recomputed() {
        let raw = vec![RawEntry::new("addrA", 1), RawEntry::new("addrB", 999)];
        let set = build(&raw, 100, &policy(1)).unwrap();

        assert_eq!(set.dropped_dust, 1);
        assert_eq!(set.dropped_invalid, 0);
        assert_eq!(set.recipients, vec![Recipient { address: "addrB".into(), weight: 999 }]);
        assert_eq!(set.rate, PayoutRate::new(100, 999).unwrap());
        assert_eq!(set.total_payout(), 100);
    }

    #[test]
    fn test_invalid_entries_counted_separately() {
        let raw = vec![
            RawEntry::new("addr1good", 5),
            RawEntry::new("stake1bad", 5),
            RawEntry::new("addr1zero", 0),
            RawEntry::new("addr1neg", -3),
            RawEntry::new("addr", 4),
        ];
        let set = build(&raw, 50, &policy(1)).unwrap();
        assert_eq!(set.dropped_invalid, 4);
        assert_eq!(set.recipients.len(), 1);
        // Rate uses the filtered weight only.
        assert_eq!(set.rate.total_weight, 5);
        assert_eq!(set.total_payout(), 50);
    }

    #[test]
    fn test_duplicates_merged() {
        let raw = vec![
            RawEntry::new("addr1a", 2),
            RawEntry::new("addr1b", 1),
            RawEntry::new(" addr1a ", 3),
        ];
        let set = build(&raw, 60, &policy(1)).unwrap();
        assert_eq!(set.merged_duplicates, 1);
        assert_eq!(set.recipients[0], Recipient { address: "addr1a".into(), weight: 5 });
        assert_eq!(set.recipients[1].address, "addr1b");
    }

    #[test]
    fn test_empty_after_filtering() {
        let raw = vec![RawEntry::new("bad", 3), RawEntry::new("addr1x", 0)];
        assert_eq!(
            build(&raw, 100, &policy(1)),
            Err(RecipientError::NoEligibleRecipients { dropped_invalid: 2, dropped_dust: 0 })
        );
    }

    #[test]
    fn test_empty_after_dust() {
        let raw = vec![RawEntry::new("addr1a", 1), RawEntry::new("addr1b", 1)];
        assert_eq!(
            build(&raw, 10, &policy(6)),
            Err(RecipientError::NoEligibleRecipients { dropped_invalid: 0, dropped_dust: 2 })
        );
    }

    #[test]
    fn test_zero_budget() {
        let raw = vec![RawEntry::new("addr1a", 1)];
        assert_eq!(build(&raw, 0, &policy(1)), Err(RecipientError::ZeroBudget));
    }

    #[test]
    fn test_weight_overflow() {
        let raw = vec![RawEntry::new("addr1a", i64::MAX), RawEntry::new("addr1b", i64::MAX), RawEntry::new("addr1c", i64::MAX)];
        assert_eq!(build(&raw, 10, &policy(0)), Err(RecipientError::WeightOverflow));
    }

    #[test]
    fn test_never_overpays_budget() {
        // Deterministic pseudo-random weights.
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        for round in 0..50 {
            let raw: Vec<RawEntry> = (0..(round % 17 + 1))
                .map(|i| {
                    seed ^= seed << 13;
                    seed ^= seed >> 7;
                    seed ^= seed << 17;
                    RawEntry::new(format!("addr1r{}", i), (seed % 10_000) as i64)
                })
                .collect();
            let budget = 1_000_000 + (seed % 900_000_000);
            if let Ok(set) = build(&raw, budget, &policy(1_000)) {
                assert!(set.total_payout() <= budget, "round {} overpaid", round);
                assert!(set
                    .recipients
                    .iter()
                    .all(|r| set.rate.payout(r.weight) >= 1_000));
            }
        }
    }
}

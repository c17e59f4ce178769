//! Deposit and batching arithmetic.
//!
//! All amounts are in lovelace (6 decimals, 1 ADA = 1_000_000).

use dropwell_core::{Lovelace, LOVELACE_PER_ADA};

use crate::tool::TxOutput;

/// Default reserve for network fees across all settlement transactions (5 ADA).
pub const DEFAULT_FEE_BUFFER: Lovelace = 5 * LOVELACE_PER_ADA;

/// Default flat service fee, paid after distribution (20 ADA).
pub const DEFAULT_SERVICE_FEE: Lovelace = 20 * LOVELACE_PER_ADA;

/// Protocol ceiling on payment outputs per transaction.
pub const DEFAULT_MAX_OUTPUTS_PER_TX: usize = 120;

/// Smallest payout worth transmitting (1 ADA).
pub const DEFAULT_MIN_PAYOUT: Lovelace = LOVELACE_PER_ADA;

/// Amount the funding address must hold before distribution starts.
///
/// Returns `None` on overflow.
pub fn required_deposit(
    total_payout: Lovelace,
    fee_buffer: Lovelace,
    service_fee: Lovelace,
) -> Option<Lovelace> {
    total_payout.checked_add(fee_buffer)?.checked_add(service_fee)
}

/// Split outputs into consecutive batches of at most `max_per_batch`.
///
/// # Panics
/// Panics if `max_per_batch` is zero.
pub fn partition(outputs: &[TxOutput], max_per_batch: usize) -> Vec<Vec<TxOutput>> {
    assert!(max_per_batch > 0, "max_per_batch must be positive");
    outputs
        .chunks(max_per_batch)
        .map(|chunk| chunk.to_vec())
        .collect()
}

/// Sum of all output amounts, saturating.
pub fn total_amount(outputs: &[TxOutput]) -> Lovelace {
    outputs
        .iter()
        .fold(0u64, |acc, o| acc.saturating_add(o.amount))
}

/// Render lovelace as a fixed six-decimal ADA string.
pub fn format_ada(lovelace: Lovelace) -> String {
    format!(
        "{}.{:06}",
        lovelace / LOVELACE_PER_ADA,
        lovelace % LOVELACE_PER_ADA
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outputs(n: usize) -> Vec<TxOutput> {
        (0..n)
            .map(|i| TxOutput::new(format!("addr1r{}", i), 1_000_000 + i as u64))
            .collect()
    }

    #[test]
    fn test_required_deposit_defaults() {
        // 100 ADA payout + 5 ADA buffer + 20 ADA fee
        let required =
            required_deposit(100 * LOVELACE_PER_ADA, DEFAULT_FEE_BUFFER, DEFAULT_SERVICE_FEE);
        assert_eq!(required, Some(125 * LOVELACE_PER_ADA));
    }

    #[test]
    fn test_required_deposit_overflow() {
        assert_eq!(required_deposit(u64::MAX, 1, 0), None);
    }

    #[test]
    fn test_partition_preserves_order() {
        let outs = outputs(250);
        let batches = partition(&outs, DEFAULT_MAX_OUTPUTS_PER_TX);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 120);
        assert_eq!(batches[1].len(), 120);
        assert_eq!(batches[2].len(), 10);
        assert_eq!(batches[2][9].address, "addr1r249");
        let flattened: Vec<_> = batches.into_iter().flatten().collect();
        assert_eq!(flattened, outs);
    }

    #[test]
    fn test_partition_exact_multiple() {
        assert_eq!(partition(&outputs(240), 120).len(), 2);
        assert!(partition(&outputs(0), 120).is_empty());
    }

    #[test]
    #[should_panic(expected = "must be positive")]
    fn test_partition_zero_batch() {
        partition(&outputs(3), 0);
    }

    #[test]
    fn test_format_ada() {
        assert_eq!(format_ada(0), "0.000000");
        assert_eq!(format_ada(1), "0.000001");
        assert_eq!(format_ada(20 * LOVELACE_PER_ADA + 500_000), "20.500000");
    }

    #[test]
    fn test_total_amount() {
        let outs = vec![TxOutput::new("addr1a", 30), TxOutput::new("addr1b", 70)];
        assert_eq!(total_amount(&outs), 100);
    }
}

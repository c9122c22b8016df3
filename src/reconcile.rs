//! Balance reconciliation over normalized transactions.
//!
//! All arithmetic is exact decimal; binary floating point is never used
//! here because cent-level drift directly causes false mismatch verdicts.
//! Verdicts are derived values: always recomputed from the current
//! transaction list, never cached, so excluding a ghost row is reflected
//! by the next call.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::NormalizedTransaction;

/// Match window: a half-cent either side is considered reconciled.
fn tolerance() -> Decimal {
    Decimal::new(1, 2) // 0.01
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationVerdict {
    /// `None` when either stated balance was unknown (the expected-unknown
    /// state, distinct from a computed mismatch).
    pub calculated_closing: Option<Decimal>,
    pub is_reconciled: bool,
    pub difference_abs: Option<Decimal>,
    pub total_credits: Decimal,
    pub total_debits: Decimal,
}

impl ReconciliationVerdict {
    /// True when balances were unknown and no verdict could be computed.
    pub fn is_unknown(&self) -> bool {
        self.calculated_closing.is_none()
    }
}

/// Reconcile a transaction list against stated opening/closing balances.
///
/// Excluded rows never participate. Sums run in `sequence_index` order;
/// addition is commutative so ordering cannot change the verdict, but the
/// deterministic order keeps repeated runs bit-identical.
pub fn reconcile(
    transactions: &[NormalizedTransaction],
    opening: Option<Decimal>,
    closing: Option<Decimal>,
) -> ReconciliationVerdict {
    let mut ordered: Vec<&NormalizedTransaction> = transactions.iter().collect();
    ordered.sort_by_key(|tx| tx.sequence_index);

    let mut total_credits = Decimal::ZERO;
    let mut total_debits = Decimal::ZERO;
    for tx in ordered.iter().filter(|tx| !tx.excluded) {
        if let Some(credit) = tx.credit {
            total_credits += credit;
        }
        if let Some(debit) = tx.debit {
            total_debits += debit;
        }
    }

    match (opening, closing) {
        (Some(open), Some(stated)) => {
            let calculated = (open + total_credits - total_debits).round_dp(2);
            let difference = (calculated - stated).abs().round_dp(2);
            ReconciliationVerdict {
                calculated_closing: Some(calculated),
                is_reconciled: difference < tolerance(),
                difference_abs: Some(difference),
                total_credits,
                total_debits,
            }
        }
        _ => ReconciliationVerdict {
            calculated_closing: None,
            is_reconciled: false,
            difference_abs: None,
            total_credits,
            total_debits,
        },
    }
}

/// Secondary per-row check: does each row's own stated running balance match
/// the cumulative sum at that point?
///
/// Order-sensitive by design; rows are walked in `sequence_index` order.
/// Returns the sequence indices of rows whose stored balance disagrees.
pub fn validate_running_balances(
    transactions: &[NormalizedTransaction],
    opening: Decimal,
) -> Vec<usize> {
    let mut ordered: Vec<&NormalizedTransaction> = transactions.iter().collect();
    ordered.sort_by_key(|tx| tx.sequence_index);

    let mut running = opening;
    let mut mismatched = Vec::new();
    for tx in ordered.iter().filter(|tx| !tx.excluded) {
        running += tx.signed_amount();
        if let Some(stated) = tx.balance {
            if (running - stated).abs().round_dp(2) >= tolerance() {
                mismatched.push(tx.sequence_index);
            }
        }
    }
    mismatched
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn tx(
        index: usize,
        debit: Option<Decimal>,
        credit: Option<Decimal>,
        balance: Option<Decimal>,
    ) -> NormalizedTransaction {
        NormalizedTransaction {
            sequence_index: index,
            iso_date: None,
            description: format!("tx {}", index),
            debit,
            credit,
            balance,
            confidence_percent: 90,
            excluded: false,
            source_page: None,
            source_bbox: None,
        }
    }

    #[test]
    fn scenario_a_reconciles_exactly() {
        let txs = vec![
            tx(0, None, Some(dec!(500.00)), None),
            tx(1, Some(dec!(200.00)), None, None),
            tx(2, Some(dec!(0.01)), None, None),
        ];
        let verdict = reconcile(&txs, Some(dec!(1000.00)), Some(dec!(1299.99)));
        assert_eq!(verdict.calculated_closing, Some(dec!(1299.99)));
        assert!(verdict.is_reconciled);
        assert_eq!(verdict.difference_abs, Some(dec!(0.00)));
    }

    #[test]
    fn scenario_b_detects_one_cent_mismatch() {
        let txs = vec![
            tx(0, None, Some(dec!(500.00)), None),
            tx(1, Some(dec!(200.00)), None, None),
            tx(2, Some(dec!(0.01)), None, None),
        ];
        let verdict = reconcile(&txs, Some(dec!(1000.00)), Some(dec!(1300.00)));
        assert!(!verdict.is_reconciled);
        assert_eq!(verdict.difference_abs, Some(dec!(0.01)));
    }

    #[test]
    fn scenario_d_null_opening_is_unknown_not_error() {
        let txs = vec![tx(0, None, Some(dec!(5.00)), None)];
        let verdict = reconcile(&txs, None, Some(dec!(5.00)));
        assert!(!verdict.is_reconciled);
        assert!(verdict.is_unknown());
        assert_eq!(verdict.calculated_closing, None);
        assert_eq!(verdict.difference_abs, None);
        assert_eq!(verdict.total_credits, dec!(5.00));
    }

    #[test]
    fn repeated_cent_additions_do_not_drift() {
        // 0.10 + 0.20 repeated: exactly the case where binary floats drift.
        let txs: Vec<_> = (0..1000)
            .map(|i| {
                if i % 2 == 0 {
                    tx(i, None, Some(dec!(0.10)), None)
                } else {
                    tx(i, None, Some(dec!(0.20)), None)
                }
            })
            .collect();
        let verdict = reconcile(&txs, Some(dec!(0.00)), Some(dec!(150.00)));
        assert_eq!(verdict.total_credits, dec!(150.00));
        assert!(verdict.is_reconciled);
    }

    #[test]
    fn reconcile_is_idempotent() {
        let txs = vec![
            tx(0, Some(dec!(19.99)), None, None),
            tx(1, None, Some(dec!(42.42)), None),
        ];
        let first = reconcile(&txs, Some(dec!(100.00)), Some(dec!(122.43)));
        let second = reconcile(&txs, Some(dec!(100.00)), Some(dec!(122.43)));
        assert_eq!(first, second);
    }

    #[test]
    fn excluding_a_row_shifts_closing_by_its_signed_amount() {
        let mut txs = vec![
            tx(0, None, Some(dec!(500.00)), None),
            tx(1, Some(dec!(200.00)), None, None),
        ];
        let before = reconcile(&txs, Some(dec!(1000.00)), Some(dec!(1300.00)));

        txs[1].excluded = true;
        let after = reconcile(&txs, Some(dec!(1000.00)), Some(dec!(1300.00)));
        assert_eq!(
            after.calculated_closing.unwrap() - before.calculated_closing.unwrap(),
            dec!(200.00)
        );

        txs[1].excluded = false;
        let restored = reconcile(&txs, Some(dec!(1000.00)), Some(dec!(1300.00)));
        assert_eq!(restored, before);
    }

    #[test]
    fn summing_order_is_immaterial() {
        let forward = vec![
            tx(0, None, Some(dec!(1.11)), None),
            tx(1, Some(dec!(2.22)), None, None),
            tx(2, None, Some(dec!(3.33)), None),
        ];
        let mut shuffled = forward.clone();
        shuffled.reverse();
        assert_eq!(
            reconcile(&forward, Some(dec!(10.00)), Some(dec!(12.22))),
            reconcile(&shuffled, Some(dec!(10.00)), Some(dec!(12.22)))
        );
    }

    #[test]
    fn running_balance_check_uses_sequence_order() {
        // Stored in reverse insertion order; sequence indices still define
        // the walk.
        let txs = vec![
            tx(1, Some(dec!(200.00)), None, Some(dec!(1290.00))),
            tx(0, None, Some(dec!(500.00)), Some(dec!(1500.00))),
        ];
        let mismatched = validate_running_balances(&txs, dec!(1000.00));
        assert_eq!(mismatched, vec![1]);
    }

    #[test]
    fn zero_transactions_reconcile_against_opening() {
        let verdict = reconcile(&[], Some(dec!(50.00)), Some(dec!(50.00)));
        assert!(verdict.is_reconciled);
        let verdict = reconcile(&[], Some(dec!(50.00)), Some(dec!(60.00)));
        assert!(!verdict.is_reconciled);
    }
}

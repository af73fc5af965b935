//! Property tests for the stock ledger.
//!
//! Whatever sequence of movements is posted, the stored history must replay
//! to the head balance, refused movements must leave no trace, and any
//! tampering with a stored entry must be caught by the chain check.

use std::sync::Arc;

use proptest::prelude::*;
use sled::open;
use tempfile::tempdir;

use sales_lifecycle::error::StockError;
use sales_lifecycle::ledger::{StockLedger, StockMovement, verify_chain};

fn movement_strategy() -> impl Strategy<Value = StockMovement> {
    prop_oneof![
        3 => (1u64..50).prop_map(StockMovement::In),
        3 => (1u64..50).prop_map(StockMovement::Out),
        1 => (1u64..20).prop_map(StockMovement::Return),
        1 => (-20i64..100).prop_map(|target| StockMovement::Adjustment { target }),
    ]
}

fn open_ledger() -> (tempfile::TempDir, StockLedger) {
    let temp_dir = tempdir().expect("temp dir");
    let db = open(temp_dir.path().join("ledger.db")).expect("sled");
    (temp_dir, StockLedger::new(Arc::new(db)))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: the head balance equals the running sum of accepted
    /// deltas, and without backorders it never goes below zero through an
    /// OUT movement.
    #[test]
    fn prop_balance_is_the_running_sum(
        movements in prop::collection::vec(movement_strategy(), 1..40),
        allow_backorder in any::<bool>(),
    ) {
        let (_dir, ledger) = open_ledger();
        let mut expected = 0i64;
        let mut accepted = 0usize;

        for (i, movement) in movements.into_iter().enumerate() {
            match ledger.post("acme", "sku-prop", movement, &format!("cause-{i}"), allow_backorder) {
                Ok(entry) => {
                    prop_assert_eq!(entry.previous_balance, expected);
                    expected = entry.new_balance;
                    accepted += 1;
                    prop_assert_eq!(entry.seq, accepted as u64);
                }
                Err(StockError::InsufficientStock { available, requested, .. }) => {
                    prop_assert!(!allow_backorder);
                    prop_assert_eq!(available, expected);
                    prop_assert!(requested as i64 > expected);
                }
                Err(other) => prop_assert!(false, "unexpected stock error: {}", other),
            }
        }

        prop_assert_eq!(ledger.balance("sku-prop").expect("balance"), expected);
        prop_assert_eq!(ledger.verify("sku-prop").expect("verify"), expected);
        prop_assert_eq!(ledger.history("sku-prop").expect("history").len(), accepted);
    }

    /// Property: changing any stored delta breaks the chain at that entry.
    #[test]
    fn prop_tampering_is_detected(
        quantities in prop::collection::vec(1u64..30, 2..12),
        victim in any::<prop::sample::Index>(),
        skew in 1i64..5,
    ) {
        let (_dir, ledger) = open_ledger();
        for quantity in &quantities {
            ledger.post("acme", "sku-audit", StockMovement::In(*quantity), "delivery", false).expect("post");
        }

        let mut history = ledger.history("sku-audit").expect("history");
        prop_assert!(verify_chain("sku-audit", &history).is_ok());

        let at = victim.index(history.len());
        history[at].quantity_delta += skew;
        let broken = verify_chain("sku-audit", &history).expect_err("tampered chain");
        prop_assert_eq!(broken.seq, history[at].seq);
    }
}

#[test]
fn zero_quantities_are_refused() {
    let (_dir, ledger) = open_ledger();
    for movement in [StockMovement::In(0), StockMovement::Out(0), StockMovement::Return(0)] {
        let err = ledger.post("acme", "sku-zero", movement, "noop", true).unwrap_err();
        assert!(matches!(err, StockError::InvalidQuantity { .. }));
    }
    assert!(ledger.history("sku-zero").unwrap().is_empty());
}

#[test]
fn unknown_products_start_at_zero() {
    let (_dir, ledger) = open_ledger();
    assert_eq!(ledger.balance("sku-new").unwrap(), 0);
    assert_eq!(ledger.verify("sku-new").unwrap(), 0);
}

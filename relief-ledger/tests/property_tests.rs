//! Property-based tests for ledger invariants
//!
//! These tests use proptest to verify critical invariants:
//! - Reservations never exceed the allocation
//! - `spent` equals the sum of committed payments for every beneficiary
//! - Rejected attempts never move funds
//! - Aggregates agree with filtered queries
//! - Vendor approval is idempotent

use proptest::prelude::*;
use relief_ledger::{
    Config, DuplicateWindow, GroupBy, OutcomeKind, PaymentFilter, PaymentRequest, ReliefLedger,
    Reservation,
};
use rust_decimal::Decimal;

const VENDORS: [&str; 3] = ["VEN-FOOD", "VEN-WATER", "VEN-PENDING"];
const BENEFICIARIES: [&str; 3] = ["BEN-001", "BEN-002", "BEN-UNKNOWN"];

/// Strategy for generating amounts, including zero and negative ones
fn amount_strategy() -> impl Strategy<Value = Decimal> {
    (-1_000i64..60_000i64).prop_map(|cents| Decimal::new(cents, 2))
}

/// Strategy for generating positive amounts
fn positive_amount_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..50_000i64).prop_map(|cents| Decimal::new(cents, 2))
}

/// Strategy for generating payment requests across known and unknown parties
fn request_strategy() -> impl Strategy<Value = PaymentRequest> {
    (0..BENEFICIARIES.len(), 0..VENDORS.len(), amount_strategy()).prop_map(
        |(beneficiary, vendor, amount)| {
            PaymentRequest::new(BENEFICIARIES[beneficiary], VENDORS[vendor], amount)
        },
    )
}

/// Strategy for duplicate windows: never, short, forever
fn window_strategy() -> impl Strategy<Value = DuplicateWindow> {
    prop_oneof![
        Just(DuplicateWindow::Seconds(0)),
        Just(DuplicateWindow::Seconds(3600)),
        Just(DuplicateWindow::Forever),
    ]
}

/// Create test ledger with two approved vendors, one pending vendor and two
/// verified beneficiaries
fn create_test_ledger(window: DuplicateWindow) -> ReliefLedger {
    let mut config = Config::default();
    config.policy.max_single_payment = Decimal::from(500);
    config.policy.duplicate_window = window;

    let ledger = ReliefLedger::open(config).unwrap();
    ledger.approve_vendor(VENDORS[0]);
    ledger.approve_vendor(VENDORS[1]);
    ledger.register_vendor(VENDORS[2]);
    ledger
        .verify_beneficiary(BENEFICIARIES[0], Decimal::from(1000))
        .unwrap();
    ledger
        .verify_beneficiary(BENEFICIARIES[1], Decimal::from(250))
        .unwrap();
    ledger
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: Granted reservations never sum past the allocation
    #[test]
    fn prop_reservations_never_exceed_allocation(
        allocation in 1i64..100_000i64,
        amounts in prop::collection::vec(positive_amount_strategy(), 1..40),
    ) {
        let ledger = ReliefLedger::open(Config::default()).unwrap();
        let allocation = Decimal::new(allocation, 2);
        ledger.verify_beneficiary("BEN-001", allocation).unwrap();

        let mut granted = Decimal::ZERO;
        for amount in amounts {
            if let Reservation::Granted { remaining } = ledger.reserve("BEN-001", amount).unwrap() {
                granted += amount;
                prop_assert_eq!(remaining, allocation - granted);
            }
            prop_assert!(granted <= allocation);
        }

        prop_assert_eq!(ledger.remaining_balance("BEN-001").unwrap(), allocation - granted);
    }

    /// Property: Approving a vendor any number of times leaves one approved vendor
    #[test]
    fn prop_approve_vendor_idempotent(times in 1usize..10) {
        let ledger = ReliefLedger::open(Config::default()).unwrap();
        for _ in 0..times {
            ledger.approve_vendor("VEN-FOOD");
        }

        let stats = ledger.registry_stats();
        prop_assert_eq!(stats.vendors_approved, 1);
        prop_assert_eq!(stats.vendors_pending, 0);
        prop_assert!(ledger.vendor("VEN-FOOD").unwrap().approved);
    }

    /// Property: `spent` always equals committed payments, and every attempt is logged
    #[test]
    fn prop_spent_matches_committed_payments(
        window in window_strategy(),
        requests in prop::collection::vec(request_strategy(), 1..60),
    ) {
        let ledger = create_test_ledger(window);
        let attempts = requests.len();

        for request in requests {
            let before = ledger.remaining_balance(request.beneficiary_id.clone()).ok();
            let payment = ledger.validate_and_commit(request).unwrap();
            let after = ledger.remaining_balance(payment.beneficiary_id.clone()).ok();

            if payment.is_committed() {
                prop_assert!(payment.amount > Decimal::ZERO);
                prop_assert!(payment.amount <= Decimal::from(500));
            } else {
                // Rejected attempts never move funds
                prop_assert_eq!(before, after);
            }
        }

        prop_assert_eq!(ledger.log().len(), attempts);
        ledger.verify_integrity().unwrap();

        for id in &BENEFICIARIES[..2] {
            let beneficiary = ledger.beneficiary(*id).unwrap();
            let committed = ledger
                .query(PaymentFilter::all().beneficiary(*id).outcome(OutcomeKind::Committed))
                .total_amount();
            prop_assert_eq!(beneficiary.spent, committed);
            prop_assert!(beneficiary.spent <= beneficiary.allocation);
        }
    }

    /// Property: Aggregating by vendor equals summing a filtered query
    #[test]
    fn prop_aggregate_matches_query(
        requests in prop::collection::vec(request_strategy(), 1..60),
    ) {
        let ledger = create_test_ledger(DuplicateWindow::Seconds(0));
        for request in requests {
            ledger.validate_and_commit(request).unwrap();
        }

        let by_vendor = ledger.aggregate_by(GroupBy::Vendor);
        for vendor in VENDORS {
            let query = ledger.query(PaymentFilter::all().vendor(vendor));
            let committed = ledger.query(
                PaymentFilter::all().vendor(vendor).outcome(OutcomeKind::Committed),
            );

            match by_vendor.get(vendor) {
                Some(group) => {
                    prop_assert_eq!(group.payments as usize, query.iter().count());
                    prop_assert_eq!(group.committed as usize, committed.iter().count());
                    prop_assert_eq!(group.committed_amount, committed.total_amount());
                }
                None => prop_assert_eq!(query.iter().count(), 0),
            }
        }

        let totals: u64 = by_vendor.values().map(|group| group.payments).sum();
        prop_assert_eq!(totals as usize, ledger.log().len());
    }
}

//! End-to-end payment scenarios against a fully wired ledger

use chrono::{Duration, TimeZone, Utc};
use relief_ledger::{
    config::StorageConfig, storage::MemoryStore, Clock, Config, DuplicateWindow, Error,
    GroupBy, ManualClock, OutcomeKind, PaymentFilter, PaymentOutcome, PaymentRequest,
    PaymentRule, RejectionReason, ReliefLedger, RuleChain, StorageBackend,
};
use relief_ledger::rules::{PositiveAmount, ReserveFunds};
use rust_decimal::Decimal;
use std::sync::{Arc, Barrier};

fn dec(value: i64) -> Decimal {
    Decimal::from(value)
}

fn ledger() -> ReliefLedger {
    ReliefLedger::open(Config::default()).unwrap()
}

/// Ledger driven by a manual clock, so duplicate windows can be crossed
fn ledger_at(window: DuplicateWindow) -> (ReliefLedger, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::starting_at(
        Utc.with_ymd_and_hms(2024, 9, 1, 8, 0, 0).unwrap(),
    ));
    let mut config = Config::default();
    config.policy.duplicate_window = window;

    let shared: Arc<dyn Clock> = clock.clone();
    let ledger = ReliefLedger::open_with(config, shared, Arc::new(MemoryStore::new())).unwrap();
    (ledger, clock)
}

fn pay(ledger: &ReliefLedger, beneficiary: &str, vendor: &str, amount: i64) -> PaymentOutcome {
    ledger
        .validate_and_commit(PaymentRequest::new(beneficiary, vendor, dec(amount)))
        .unwrap()
        .outcome
}

#[test]
fn test_allocation_is_drawn_down_and_overdraw_rejected() {
    let ledger = ledger();
    ledger.approve_vendor("VEN-FOOD");
    ledger.approve_vendor("VEN-SHELTER");
    ledger.verify_beneficiary("BEN-001", dec(1000)).unwrap();

    assert_eq!(pay(&ledger, "BEN-001", "VEN-FOOD", 400), PaymentOutcome::Committed);
    assert_eq!(ledger.remaining_balance("BEN-001").unwrap(), dec(600));

    let outcome = pay(&ledger, "BEN-001", "VEN-SHELTER", 700);
    assert_eq!(
        outcome,
        PaymentOutcome::Rejected {
            reason: RejectionReason::InsufficientFunds {
                requested: dec(700),
                remaining: dec(600),
            }
        }
    );
    assert_eq!(ledger.remaining_balance("BEN-001").unwrap(), dec(600));
    assert_eq!(ledger.log().len(), 2);
}

#[test]
fn test_unapproved_vendor_rejected_before_funds_are_checked() {
    let ledger = ledger();
    ledger.register_vendor("VEN-PENDING");
    ledger.verify_beneficiary("BEN-001", dec(100)).unwrap();

    // The amount would also overdraw, but the vendor rule comes first
    let outcome = pay(&ledger, "BEN-001", "VEN-PENDING", 5000);
    assert_eq!(
        outcome,
        PaymentOutcome::Rejected {
            reason: RejectionReason::VendorNotApproved
        }
    );
    assert_eq!(
        pay(&ledger, "BEN-001", "VEN-NOBODY", 10),
        PaymentOutcome::Rejected {
            reason: RejectionReason::VendorNotApproved
        }
    );
    assert_eq!(ledger.remaining_balance("BEN-001").unwrap(), dec(100));
}

#[test]
fn test_rule_order_is_deterministic() {
    let ledger = ledger();
    ledger.approve_vendor("VEN-FOOD");
    ledger.verify_beneficiary("BEN-001", dec(50_000)).unwrap();
    ledger.verify_beneficiary("BEN-002", dec(10)).unwrap();
    ledger.suspend_beneficiary("BEN-002").unwrap();

    let reason = |outcome: PaymentOutcome| match outcome {
        PaymentOutcome::Rejected { reason } => reason.code(),
        PaymentOutcome::Committed => "committed",
    };

    assert_eq!(reason(pay(&ledger, "BEN-002", "VEN-FOOD", -1)), "beneficiary_not_verified");
    assert_eq!(reason(pay(&ledger, "BEN-001", "VEN-FOOD", 0)), "invalid_amount");
    assert_eq!(reason(pay(&ledger, "BEN-001", "VEN-FOOD", 20_000)), "payment_too_large");
    assert_eq!(reason(pay(&ledger, "BEN-001", "VEN-FOOD", 100)), "committed");
    // Over the ceiling and a duplicate: the ceiling is checked first
    assert_eq!(reason(pay(&ledger, "BEN-001", "VEN-FOOD", 20_000)), "payment_too_large");
    assert_eq!(reason(pay(&ledger, "BEN-001", "VEN-FOOD", 100)), "duplicate_payment");
}

#[test]
fn test_duplicate_pair_rejected_within_window() {
    let (ledger, clock) = ledger_at(DuplicateWindow::Seconds(24 * 60 * 60));
    ledger.approve_vendor("VEN-WATER");
    ledger.approve_vendor("VEN-FOOD");
    ledger.verify_beneficiary("BEN-001", dec(1000)).unwrap();

    let first = ledger
        .validate_and_commit(PaymentRequest::new("BEN-001", "VEN-WATER", dec(100)))
        .unwrap();
    assert!(first.is_committed());

    clock.advance(Duration::hours(23));

    // Different amount, same pair: still a duplicate
    assert_eq!(
        pay(&ledger, "BEN-001", "VEN-WATER", 35),
        PaymentOutcome::Rejected {
            reason: RejectionReason::DuplicatePayment {
                previous_payment: first.sequence
            }
        }
    );
    // Another vendor is fine
    assert_eq!(pay(&ledger, "BEN-001", "VEN-FOOD", 35), PaymentOutcome::Committed);
    assert_eq!(ledger.remaining_balance("BEN-001").unwrap(), dec(865));
}

#[test]
fn test_duplicate_window_expires() {
    let (ledger, clock) = ledger_at(DuplicateWindow::Seconds(3600));
    ledger.approve_vendor("VEN-WATER");
    ledger.verify_beneficiary("BEN-001", dec(1000)).unwrap();

    assert_eq!(pay(&ledger, "BEN-001", "VEN-WATER", 100), PaymentOutcome::Committed);

    clock.advance(Duration::seconds(3599));
    assert!(matches!(
        pay(&ledger, "BEN-001", "VEN-WATER", 100),
        PaymentOutcome::Rejected {
            reason: RejectionReason::DuplicatePayment { .. }
        }
    ));

    clock.advance(Duration::seconds(1));
    assert_eq!(pay(&ledger, "BEN-001", "VEN-WATER", 100), PaymentOutcome::Committed);
}

#[test]
fn test_forever_window_blocks_any_repeat() {
    let (ledger, clock) = ledger_at(DuplicateWindow::Forever);
    ledger.approve_vendor("VEN-WATER");
    ledger.verify_beneficiary("BEN-001", dec(1000)).unwrap();

    assert_eq!(pay(&ledger, "BEN-001", "VEN-WATER", 100), PaymentOutcome::Committed);
    clock.advance(Duration::days(365));
    assert!(matches!(
        pay(&ledger, "BEN-001", "VEN-WATER", 100),
        PaymentOutcome::Rejected {
            reason: RejectionReason::DuplicatePayment { .. }
        }
    ));
}

#[test]
fn test_resubmission_after_fix_commits_in_order() {
    let ledger = ledger();
    ledger.register_vendor("VEN-MEDS");
    ledger.verify_beneficiary("BEN-001", dec(500)).unwrap();

    let request = PaymentRequest::new("BEN-001", "VEN-MEDS", dec(120));
    let rejected = ledger.validate_and_commit(request.clone()).unwrap();
    assert!(!rejected.is_committed());

    ledger.approve_vendor("VEN-MEDS");
    let committed = ledger.validate_and_commit(request).unwrap();
    assert!(committed.is_committed());

    let history: Vec<_> = ledger
        .query(PaymentFilter::all().beneficiary("BEN-001"))
        .iter()
        .collect();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].outcome.kind(), OutcomeKind::Rejected);
    assert_eq!(history[1].outcome.kind(), OutcomeKind::Committed);
    assert!(history[0].sequence < history[1].sequence);
    assert_eq!(ledger.remaining_balance("BEN-001").unwrap(), dec(380));
}

#[test]
fn test_revoked_vendor_and_suspended_beneficiary() {
    let (ledger, clock) = ledger_at(DuplicateWindow::Seconds(60));
    ledger.approve_vendor("VEN-FOOD");
    ledger.verify_beneficiary("BEN-001", dec(500)).unwrap();
    assert_eq!(pay(&ledger, "BEN-001", "VEN-FOOD", 50), PaymentOutcome::Committed);
    clock.advance(Duration::minutes(5));

    ledger.revoke_vendor("VEN-FOOD").unwrap();
    assert_eq!(
        pay(&ledger, "BEN-001", "VEN-FOOD", 50),
        PaymentOutcome::Rejected {
            reason: RejectionReason::VendorNotApproved
        }
    );

    ledger.approve_vendor("VEN-FOOD");
    ledger.suspend_beneficiary("BEN-001").unwrap();
    assert_eq!(
        pay(&ledger, "BEN-001", "VEN-FOOD", 50),
        PaymentOutcome::Rejected {
            reason: RejectionReason::BeneficiaryNotVerified
        }
    );

    // Re-verification keeps what was already spent
    ledger.verify_beneficiary("BEN-001", dec(500)).unwrap();
    assert_eq!(ledger.remaining_balance("BEN-001").unwrap(), dec(450));
    assert!(matches!(
        ledger.verify_beneficiary("BEN-001", dec(10)),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(ledger.revoke_vendor("VEN-NOBODY"), Err(Error::NotFound(_))));
}

#[test]
fn test_aggregate_by_vendor_matches_query() {
    let ledger = ledger();
    for vendor in ["VEN-FOOD", "VEN-WATER", "VEN-MEDS"] {
        ledger.approve_vendor(vendor);
    }
    for (id, allocation) in [("BEN-001", 1000), ("BEN-002", 300), ("BEN-003", 50)] {
        ledger.verify_beneficiary(id, dec(allocation)).unwrap();
    }

    pay(&ledger, "BEN-001", "VEN-FOOD", 200);
    pay(&ledger, "BEN-002", "VEN-FOOD", 150);
    pay(&ledger, "BEN-003", "VEN-FOOD", 80); // insufficient
    pay(&ledger, "BEN-001", "VEN-WATER", 40);
    pay(&ledger, "BEN-002", "VEN-MEDS", 100);
    pay(&ledger, "BEN-002", "VEN-UNKNOWN", 10); // not approved

    let by_vendor = ledger.aggregate_by(GroupBy::Vendor);
    for (vendor, group) in &by_vendor {
        let committed = ledger.query(
            PaymentFilter::all()
                .vendor(vendor.as_str())
                .outcome(OutcomeKind::Committed),
        );
        assert_eq!(group.committed_amount, committed.total_amount());
    }

    assert_eq!(by_vendor["VEN-FOOD"].committed_amount, dec(350));
    assert_eq!(by_vendor["VEN-FOOD"].rejected, 1);
    assert_eq!(by_vendor["VEN-UNKNOWN"].committed, 0);

    let by_reason = ledger.aggregate_by(GroupBy::RejectionReason);
    assert_eq!(by_reason["insufficient_funds"].payments, 1);
    assert_eq!(by_reason["vendor_not_approved"].payments, 1);

    // Custom key: committed amount per beneficiary
    let per_beneficiary = ledger.aggregate(|payment| {
        payment
            .is_committed()
            .then(|| payment.beneficiary_id.to_string())
    });
    assert_eq!(per_beneficiary["BEN-002"].committed_amount, dec(250));
}

#[test]
fn test_query_time_range_and_restart() {
    let (ledger, clock) = ledger_at(DuplicateWindow::Seconds(0));
    ledger.approve_vendor("VEN-FOOD");
    ledger.verify_beneficiary("BEN-001", dec(1000)).unwrap();

    let start = clock.now();
    pay(&ledger, "BEN-001", "VEN-FOOD", 10);
    clock.advance(Duration::hours(1));
    pay(&ledger, "BEN-001", "VEN-FOOD", 20);
    clock.advance(Duration::hours(1));
    pay(&ledger, "BEN-001", "VEN-FOOD", 30);

    let window = ledger.query(
        PaymentFilter::all().between(start + Duration::minutes(30), start + Duration::hours(2)),
    );
    assert_eq!(window.total_amount(), dec(20));

    // A fresh pass sees entries appended since the last one
    let all = ledger.query(PaymentFilter::all());
    assert_eq!(all.iter().count(), 3);
    pay(&ledger, "BEN-001", "VEN-FOOD", 40);
    assert_eq!(all.iter().count(), 4);
}

#[test]
fn test_concurrent_payments_never_overdraw() {
    let ledger = Arc::new(ledger());
    ledger.verify_beneficiary("BEN-001", dec(1000)).unwrap();
    for worker in 0..8 {
        for attempt in 0..20 {
            ledger.approve_vendor(format!("VEN-{}-{}", worker, attempt).as_str());
        }
    }

    std::thread::scope(|scope| {
        for worker in 0..8 {
            let ledger = Arc::clone(&ledger);
            scope.spawn(move || {
                for attempt in 0..20 {
                    let vendor = format!("VEN-{}-{}", worker, attempt);
                    ledger
                        .validate_and_commit(PaymentRequest::new(
                            "BEN-001",
                            vendor.as_str(),
                            dec(7),
                        ))
                        .unwrap();
                }
            });
        }
    });

    let committed = ledger.query(PaymentFilter::all().outcome(OutcomeKind::Committed));
    // 142 * 7 = 994; the 143rd would overdraw
    assert_eq!(committed.iter().count(), 142);
    assert_eq!(committed.total_amount(), dec(994));
    assert_eq!(ledger.log().len(), 160);
    assert_eq!(ledger.remaining_balance("BEN-001").unwrap(), dec(6));
    ledger.verify_integrity().unwrap();
}

#[test]
fn test_concurrent_duplicate_pair_commits_once() {
    let ledger = Arc::new(ledger());
    ledger.approve_vendor("VEN-FOOD");
    ledger.verify_beneficiary("BEN-001", dec(10_000)).unwrap();

    let workers = 8;
    let barrier = Barrier::new(workers);
    let outcomes: Vec<PaymentOutcome> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                let barrier = &barrier;
                scope.spawn(move || {
                    barrier.wait();
                    pay(&ledger, "BEN-001", "VEN-FOOD", 250)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let committed = outcomes
        .iter()
        .filter(|outcome| **outcome == PaymentOutcome::Committed)
        .count();
    let duplicates = outcomes
        .iter()
        .filter(|outcome| {
            matches!(
                outcome,
                PaymentOutcome::Rejected {
                    reason: RejectionReason::DuplicatePayment { .. }
                }
            )
        })
        .count();

    assert_eq!(committed, 1);
    assert_eq!(duplicates, workers - 1);
    assert_eq!(ledger.beneficiary("BEN-001").unwrap().spent, dec(250));
    assert_eq!(ledger.log().len(), workers);
    ledger.verify_integrity().unwrap();
}

#[test]
fn test_custom_rule_chain_keeps_spent_in_step() {
    let rules: Vec<Box<dyn PaymentRule>> = vec![Box::new(PositiveAmount), Box::new(ReserveFunds)];
    let ledger = ledger().with_rules(RuleChain::new(rules).unwrap());
    ledger.verify_beneficiary("BEN-001", dec(100)).unwrap();

    // Vendor approval is not part of this chain
    assert_eq!(pay(&ledger, "BEN-001", "VEN-UNLISTED", 60), PaymentOutcome::Committed);
    assert!(matches!(
        pay(&ledger, "BEN-001", "VEN-UNLISTED", 5000),
        PaymentOutcome::Rejected {
            reason: RejectionReason::InsufficientFunds { .. }
        }
    ));

    assert_eq!(ledger.remaining_balance("BEN-001").unwrap(), dec(40));
    ledger.verify_integrity().unwrap();
}

#[test]
fn test_json_lines_store_reopen_and_replay() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.storage = StorageConfig {
        backend: StorageBackend::JsonLines,
        path: dir.path().join("payments.jsonl"),
        sync_writes: true,
    };

    {
        let ledger = ReliefLedger::open(config.clone()).unwrap();
        ledger.approve_vendor("VEN-FOOD");
        ledger.verify_beneficiary("BEN-001", dec(1000)).unwrap();
        pay(&ledger, "BEN-001", "VEN-FOOD", 400);
        pay(&ledger, "BEN-001", "VEN-FOOD", 400); // duplicate
        ledger.shutdown().unwrap();
    }

    let reopened = ReliefLedger::open(config).unwrap();
    assert_eq!(reopened.log().len(), 2);
    assert_eq!(reopened.aggregate_by(GroupBy::Outcome)["rejected"].payments, 1);

    // Spending is reported from the log before anyone is re-verified
    let dashboard = reopened.dashboard();
    assert_eq!(dashboard.total_spent, dec(400));
    assert_eq!(dashboard.total_allocated, Decimal::ZERO);

    // Registry state is rebuilt by the caller; spent comes back from the log
    reopened.approve_vendor("VEN-FOOD");
    reopened.verify_beneficiary("BEN-001", dec(1000)).unwrap();
    assert_eq!(reopened.remaining_balance("BEN-001").unwrap(), dec(600));
    reopened.verify_integrity().unwrap();

    // History still counts towards the duplicate window
    assert!(matches!(
        pay(&reopened, "BEN-001", "VEN-FOOD", 10),
        PaymentOutcome::Rejected {
            reason: RejectionReason::DuplicatePayment {
                previous_payment: 0
            }
        }
    ));
}

#[test]
fn test_tampered_store_refuses_to_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("payments.jsonl");
    let mut config = Config::default();
    config.storage.backend = StorageBackend::JsonLines;
    config.storage.path = path.clone();

    {
        let ledger = ReliefLedger::open(config.clone()).unwrap();
        ledger.approve_vendor("VEN-FOOD");
        ledger.verify_beneficiary("BEN-001", dec(1000)).unwrap();
        pay(&ledger, "BEN-001", "VEN-FOOD", 400);
        ledger.shutdown().unwrap();
    }

    let contents = std::fs::read_to_string(&path).unwrap();
    assert!(contents.contains("\"amount\":\"400\""));
    std::fs::write(&path, contents.replace("\"amount\":\"400\"", "\"amount\":\"4\"")).unwrap();

    assert!(matches!(
        ReliefLedger::open(config),
        Err(Error::InvariantViolation(_))
    ));
}

#[test]
fn test_dashboard_and_metrics_after_relief_round() {
    let ledger = ledger();
    ledger.record_donation("Red Cross", dec(2000)).unwrap();
    ledger.record_donation("Local Church", dec(500)).unwrap();
    ledger.approve_vendor("VEN-FOOD");
    ledger.approve_vendor("VEN-WATER");
    ledger.register_vendor("VEN-PENDING");
    ledger.verify_beneficiary("BEN-001", dec(1000)).unwrap();
    ledger.verify_beneficiary("BEN-002", dec(1000)).unwrap();

    ledger
        .validate_and_commit(
            PaymentRequest::new("BEN-001", "VEN-FOOD", dec(300)).with_disaster("flood-2024"),
        )
        .unwrap();
    ledger
        .validate_and_commit(
            PaymentRequest::new("BEN-001", "VEN-WATER", dec(100)).with_disaster("flood-2024"),
        )
        .unwrap();
    pay(&ledger, "BEN-002", "VEN-PENDING", 50);

    let dashboard = ledger.dashboard();
    assert_eq!(dashboard.total_raised, dec(2500));
    assert_eq!(dashboard.total_allocated, dec(2000));
    assert_eq!(dashboard.total_spent, dec(400));
    assert_eq!(dashboard.funds_remaining, dec(2100));
    assert_eq!(dashboard.unspent_allocation, dec(1600));
    assert_eq!(dashboard.allocation_efficiency, dec(80));
    assert_eq!(dashboard.beneficiaries_verified, 2);
    assert_eq!(dashboard.beneficiaries_helped, 1);
    assert_eq!(dashboard.vendors_approved, 2);
    assert_eq!(dashboard.vendor_payments, 2);
    assert_eq!(dashboard.rejected_payments, 1);
    assert_eq!(dashboard.average_payment, dec(200));
    assert_eq!(dashboard.spending_efficiency, dec(20));
    assert_eq!(dashboard.disasters["flood-2024"].committed, 2);

    let metrics = ledger.metrics();
    assert_eq!(metrics.payments_committed.get(), 2);
    assert_eq!(metrics.rejected_count("vendor_not_approved"), 1);
    let text = metrics.encode_text().unwrap();
    assert!(text.contains("relief_payments_rejected_total{reason=\"vendor_not_approved\"} 1"));
}

#[test]
fn test_toml_config_drives_policy() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("relief.toml");
    std::fs::write(
        &path,
        r#"
service_name = "relief-test"

[policy]
max_single_payment = "250"
duplicate_window = "forever"
"#,
    )
    .unwrap();

    let config = Config::from_file(&path).unwrap();
    assert_eq!(config.policy.duplicate_window, DuplicateWindow::Forever);

    let ledger = ReliefLedger::open(config).unwrap();
    ledger.approve_vendor("VEN-FOOD");
    ledger.verify_beneficiary("BEN-001", dec(1000)).unwrap();
    assert_eq!(
        pay(&ledger, "BEN-001", "VEN-FOOD", 300),
        PaymentOutcome::Rejected {
            reason: RejectionReason::PaymentTooLarge {
                amount: dec(300),
                ceiling: dec(250),
            }
        }
    );
}

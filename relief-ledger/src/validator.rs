//! Payment validator
//!
//! Runs the rule chain and appends the outcome to the event log. The
//! beneficiary's record lock is held from the first rule until the entry is
//! published, which makes the duplicate check, the reservation and the commit
//! a single atomic step per beneficiary.
//!
//! The rules themselves do no I/O. The append does: it writes to the backing
//! store, and with `storage.sync_writes` it also waits for the disk. Payments
//! for one beneficiary therefore queue behind that write. Other beneficiaries
//! still run their rules in parallel; only their appends take turns on the
//! log. Moving the write out of the lock would need a pending marker per pair
//! so that the duplicate check still sees in-flight payments.

use crate::{
    clock::Clock,
    config::PolicyConfig,
    error::Result,
    event_log::EventLog,
    metrics::Metrics,
    registry::Registry,
    rules::{RuleChain, RuleContext},
    types::{Payment, PaymentOutcome, PaymentRequest},
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Validates payment requests and records every attempt
#[derive(Debug)]
pub struct PaymentValidator {
    registry: Arc<Registry>,
    log: EventLog,
    rules: RuleChain,
    policy: PolicyConfig,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
}

impl PaymentValidator {
    /// Create a validator with the standard rule chain
    pub fn new(
        registry: Arc<Registry>,
        log: EventLog,
        policy: PolicyConfig,
        clock: Arc<dyn Clock>,
        metrics: Metrics,
    ) -> Self {
        Self {
            registry,
            log,
            rules: RuleChain::standard(),
            policy,
            clock,
            metrics,
        }
    }

    /// Replace the rule chain
    pub fn with_rules(mut self, rules: RuleChain) -> Self {
        self.rules = rules;
        self
    }

    /// Evaluate a request and append the outcome.
    ///
    /// Policy refusals come back as `Ok` with a rejected outcome. `Err` means
    /// the entry could not be stored; nothing was reserved in that case.
    pub fn validate_and_commit(&self, request: PaymentRequest) -> Result<Payment> {
        let started = Instant::now();

        let cell = self.registry.record(&request.beneficiary_id);
        let mut record = cell.as_ref().map(|cell| cell.lock());
        let now = self.clock.now();

        let verdict = {
            let mut ctx = RuleContext {
                request: &request,
                registry: &self.registry,
                log: &self.log,
                policy: &self.policy,
                now,
                record: record.as_deref_mut(),
            };
            self.rules.evaluate(&mut ctx)
        };

        let outcome = match &verdict {
            Ok(()) => PaymentOutcome::Committed,
            Err(reason) => PaymentOutcome::Rejected {
                reason: reason.clone(),
            },
        };

        let payment = match self.log.append(Payment::from_request(&request, outcome, now)) {
            Ok(payment) => payment,
            Err(err) => {
                if verdict.is_ok() {
                    if let Some(record) = record.as_deref_mut() {
                        record.spent -= request.amount;
                    }
                }
                error!(
                    beneficiary_id = %request.beneficiary_id,
                    vendor_id = %request.vendor_id,
                    amount = %request.amount,
                    error = %err,
                    "Failed to record payment"
                );
                return Err(err);
            }
        };
        drop(record);

        match payment.rejection() {
            None => {
                self.metrics.record_committed(payment.amount);
                info!(
                    sequence = payment.sequence,
                    payment_id = %payment.payment_id,
                    beneficiary_id = %payment.beneficiary_id,
                    vendor_id = %payment.vendor_id,
                    amount = %payment.amount,
                    "Payment committed"
                );
            }
            Some(reason) => {
                self.metrics.record_rejected(reason);
                warn!(
                    sequence = payment.sequence,
                    payment_id = %payment.payment_id,
                    beneficiary_id = %payment.beneficiary_id,
                    vendor_id = %payment.vendor_id,
                    amount = %payment.amount,
                    reason = reason.code(),
                    "Payment rejected: {}",
                    reason
                );
            }
        }

        self.metrics.set_log_entries(self.log.len());
        self.metrics
            .record_validation_duration(started.elapsed().as_secs_f64());

        Ok(payment)
    }
}

//! Prometheus metrics for the payment path
//!
//! Metrics live in a registry owned by each [`Metrics`] value, so several
//! ledgers (and parallel tests) never collide on global registration.
//!
//! # Metrics
//!
//! - `relief_payments_committed_total` - Committed payments
//! - `relief_payments_rejected_total{reason}` - Rejected attempts by reason code
//! - `relief_committed_amount_total` - Sum of committed amounts
//! - `relief_validation_duration_seconds` - Rule chain plus append latency
//! - `relief_event_log_entries` - Entries in the event log

use crate::error::{RejectionReason, Result};
use prometheus::{
    Counter, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Committed payments
    pub payments_committed: IntCounter,

    /// Rejected attempts, labelled by reason code
    pub payments_rejected: IntCounterVec,

    /// Sum of committed amounts
    pub committed_amount: Counter,

    /// Validation latency
    pub validation_duration: Histogram,

    /// Event log length
    pub log_entries: IntGauge,

    registry: Arc<Registry>,
}

impl fmt::Debug for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metrics")
            .field("payments_committed", &self.payments_committed.get())
            .field("committed_amount", &self.committed_amount.get())
            .field("log_entries", &self.log_entries.get())
            .finish()
    }
}

impl Metrics {
    /// Create a collector with its own registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let payments_committed = IntCounter::new(
            "relief_payments_committed_total",
            "Total number of committed payments",
        )?;
        registry.register(Box::new(payments_committed.clone()))?;

        let payments_rejected = IntCounterVec::new(
            Opts::new(
                "relief_payments_rejected_total",
                "Total number of rejected payment attempts",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(payments_rejected.clone()))?;

        let committed_amount = Counter::new(
            "relief_committed_amount_total",
            "Sum of committed payment amounts",
        )?;
        registry.register(Box::new(committed_amount.clone()))?;

        let validation_duration = Histogram::with_opts(
            HistogramOpts::new(
                "relief_validation_duration_seconds",
                "Histogram of validate-and-commit latencies",
            )
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250]),
        )?;
        registry.register(Box::new(validation_duration.clone()))?;

        let log_entries = IntGauge::new(
            "relief_event_log_entries",
            "Number of entries in the payment event log",
        )?;
        registry.register(Box::new(log_entries.clone()))?;

        Ok(Self {
            payments_committed,
            payments_rejected,
            committed_amount,
            validation_duration,
            log_entries,
            registry,
        })
    }

    /// Record a committed payment
    pub fn record_committed(&self, amount: Decimal) {
        self.payments_committed.inc();
        self.committed_amount.inc_by(amount.to_f64().unwrap_or(0.0));
    }

    /// Record a rejected attempt
    pub fn record_rejected(&self, reason: &RejectionReason) {
        self.payments_rejected
            .with_label_values(&[reason.code()])
            .inc();
    }

    /// Rejections recorded for one reason code
    pub fn rejected_count(&self, code: &str) -> u64 {
        self.payments_rejected.with_label_values(&[code]).get()
    }

    /// Record validation latency
    pub fn record_validation_duration(&self, duration_seconds: f64) {
        self.validation_duration.observe(duration_seconds);
    }

    /// Update event log length
    pub fn set_log_entries(&self, entries: usize) {
        self.log_entries.set(entries as i64);
    }

    /// Render all metrics in the Prometheus text format
    pub fn encode_text(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

//! Relief ledger context
//!
//! Wires the registry, allocation ledger, validator and event log into one
//! explicitly constructed object. There is no global state: tests and
//! embedders build as many independent ledgers as they need.
//!
//! # Example
//!
//! ```no_run
//! use relief_ledger::{Config, PaymentRequest, ReliefLedger};
//! use rust_decimal::Decimal;
//!
//! fn main() -> relief_ledger::Result<()> {
//!     let ledger = ReliefLedger::open(Config::default())?;
//!
//!     ledger.approve_vendor("VEN-WATER");
//!     ledger.verify_beneficiary("BEN-001", Decimal::from(1000))?;
//!
//!     let payment = ledger.validate_and_commit(
//!         PaymentRequest::new("BEN-001", "VEN-WATER", Decimal::from(400)),
//!     )?;
//!     assert!(payment.is_committed());
//!
//!     ledger.shutdown()
//! }
//! ```

use crate::{
    allocation::{AllocationLedger, Reservation},
    clock::{Clock, SystemClock},
    crypto::KeyPair,
    error::{Error, Result},
    event_log::{Aggregate, EventLog, GroupBy, PaymentFilter, PaymentQuery},
    funds::{Donation, FundPool},
    metrics::Metrics,
    registry::{Registry, RegistryStats},
    report::Dashboard,
    rules::RuleChain,
    storage::{open_store, PaymentStore},
    types::{Beneficiary, BeneficiaryId, Payment, PaymentRequest, Vendor, VendorId},
    validator::PaymentValidator,
    Config,
};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Relief ledger context
#[derive(Debug)]
pub struct ReliefLedger {
    config: Config,
    registry: Arc<Registry>,
    allocations: AllocationLedger,
    funds: FundPool,
    log: EventLog,
    validator: PaymentValidator,
    metrics: Metrics,
    keypair: Option<Arc<KeyPair>>,
}

impl ReliefLedger {
    /// Open with the configured store and the system clock
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let store = open_store(&config.storage)?;
        Self::open_with(config, Arc::new(SystemClock), store)
    }

    /// Open over an explicit clock and store.
    ///
    /// History in the store is replayed and checked. Spent amounts recovered
    /// from it apply to beneficiaries as they are (re-)verified.
    pub fn open_with(
        config: Config,
        clock: Arc<dyn Clock>,
        store: Arc<dyn PaymentStore>,
    ) -> Result<Self> {
        config.validate()?;

        let log = EventLog::open(store)?;
        let registry = Arc::new(Registry::new(clock.clone()));
        registry.seed_spent(log.committed_totals());

        let metrics = Metrics::new()?;
        metrics.set_log_entries(log.len());

        let funds = FundPool::new(clock.clone());
        let validator = PaymentValidator::new(
            registry.clone(),
            log.clone(),
            config.policy.clone(),
            clock,
            metrics.clone(),
        );

        info!(
            service = %config.service_name,
            backend = ?config.storage.backend,
            entries = log.len(),
            "Relief ledger opened"
        );

        Ok(Self {
            allocations: AllocationLedger::new(registry.clone()),
            funds,
            config,
            registry,
            log,
            validator,
            metrics,
            keypair: None,
        })
    }

    /// Sign every subsequent log entry with this key
    pub fn with_keypair(mut self, keypair: KeyPair) -> Self {
        let keypair = Arc::new(keypair);
        self.log.set_signer(keypair.clone());
        self.keypair = Some(keypair);
        self
    }

    /// Replace the payment rule chain
    pub fn with_rules(mut self, rules: RuleChain) -> Self {
        self.validator = self.validator.with_rules(rules);
        self
    }

    /// Public key of the signing operator, if any
    pub fn public_key(&self) -> Option<[u8; 32]> {
        self.keypair.as_ref().map(|keypair| keypair.public_key())
    }

    // Registry

    /// Record a vendor awaiting approval
    pub fn register_vendor(&self, id: impl Into<VendorId>) {
        self.registry.register_vendor(id.into());
    }

    /// Approve a vendor. Idempotent.
    pub fn approve_vendor(&self, id: impl Into<VendorId>) {
        self.registry.approve_vendor(id.into());
    }

    /// Revoke a vendor's approval
    pub fn revoke_vendor(&self, id: impl Into<VendorId>) -> Result<()> {
        self.registry.revoke_vendor(&id.into())
    }

    /// Verify a beneficiary with an allocation. A re-verification replaces
    /// the previous allocation.
    pub fn verify_beneficiary(&self, id: impl Into<BeneficiaryId>, allocation: Decimal) -> Result<()> {
        let id = id.into();
        if !self.config.policy.require_funding {
            return self.registry.verify_beneficiary(id, allocation);
        }

        self.funds.within_raised(
            || {
                let current = self
                    .registry
                    .beneficiary(&id)
                    .map_or(Decimal::ZERO, |beneficiary| beneficiary.allocation);
                (self.registry.stats().total_allocated - current).saturating_add(allocation)
            },
            || self.registry.verify_beneficiary(id.clone(), allocation),
        )
    }

    /// Suspend a beneficiary
    pub fn suspend_beneficiary(&self, id: impl Into<BeneficiaryId>) -> Result<()> {
        self.registry.suspend_beneficiary(&id.into())
    }

    /// Vendor snapshot
    pub fn vendor(&self, id: impl Into<VendorId>) -> Option<Vendor> {
        self.registry.vendor(&id.into())
    }

    /// Beneficiary snapshot
    pub fn beneficiary(&self, id: impl Into<BeneficiaryId>) -> Option<Beneficiary> {
        self.registry.beneficiary(&id.into())
    }

    /// Registry counts by role and status
    pub fn registry_stats(&self) -> RegistryStats {
        self.registry.stats()
    }

    // Allocations

    /// Allocation left to a beneficiary
    pub fn remaining_balance(&self, id: impl Into<BeneficiaryId>) -> Result<Decimal> {
        self.allocations.remaining_balance(&id.into())
    }

    /// Reserve funds outside the payment path
    pub fn reserve(&self, id: impl Into<BeneficiaryId>, amount: Decimal) -> Result<Reservation> {
        self.allocations.reserve(&id.into(), amount)
    }

    /// Increase a beneficiary's allocation
    pub fn top_up(&self, id: impl Into<BeneficiaryId>, extra: Decimal) -> Result<Decimal> {
        let id = id.into();
        if !self.config.policy.require_funding {
            return self.allocations.top_up(&id, extra);
        }

        self.funds.within_raised(
            || self.registry.stats().total_allocated.saturating_add(extra),
            || self.allocations.top_up(&id, extra),
        )
    }

    // Funds

    /// Record a donation into the fund pool. Returns the new raised total.
    pub fn record_donation(&self, donor: impl Into<String>, amount: Decimal) -> Result<Decimal> {
        self.funds.record_donation(donor, amount)
    }

    /// Total donated
    pub fn raised(&self) -> Decimal {
        self.funds.raised()
    }

    /// Donations in arrival order
    pub fn donations(&self) -> Vec<Donation> {
        self.funds.donations()
    }

    // Payments

    /// Validate a payment request and record its outcome
    pub fn validate_and_commit(&self, request: PaymentRequest) -> Result<Payment> {
        self.validator.validate_and_commit(request)
    }

    /// Lazy query over recorded payments
    pub fn query(&self, filter: PaymentFilter) -> PaymentQuery {
        self.log.query(filter)
    }

    /// Group payments by a custom key
    pub fn aggregate<K, F>(&self, key: F) -> BTreeMap<K, Aggregate>
    where
        K: Ord,
        F: Fn(&Payment) -> Option<K>,
    {
        self.log.aggregate(key)
    }

    /// Group payments by a built-in key
    pub fn aggregate_by(&self, group: GroupBy) -> BTreeMap<String, Aggregate> {
        self.log.aggregate_by(group)
    }

    /// Transparency dashboard
    pub fn dashboard(&self) -> Dashboard {
        Dashboard::compute(&self.registry, &self.log, self.funds.raised())
    }

    /// Check that every beneficiary's `spent` matches its committed payments
    /// and that the hash chain (and signatures, if signing) verifies.
    pub fn verify_integrity(&self) -> Result<()> {
        for (id, cell) in self.registry.records() {
            let record = cell.lock();
            let committed = self.log.committed_total(&id);
            if record.spent != committed {
                return Err(Error::InvariantViolation(format!(
                    "beneficiary {}: spent {} but committed payments total {}",
                    id, record.spent, committed
                )));
            }
        }

        let public_key = self.public_key();
        self.log.verify_chain(public_key.as_ref())?;

        info!(entries = self.log.len(), "Ledger integrity verified");
        Ok(())
    }

    // Accessors

    /// Configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Registry
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Allocation ledger
    pub fn allocations(&self) -> &AllocationLedger {
        &self.allocations
    }

    /// Event log
    pub fn log(&self) -> &EventLog {
        &self.log
    }

    /// Metrics
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Flush the store and release the ledger
    pub fn shutdown(self) -> Result<()> {
        self.log.flush()?;
        info!(
            service = %self.config.service_name,
            entries = self.log.len(),
            "Relief ledger shut down"
        );
        Ok(())
    }
}

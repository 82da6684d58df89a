//! Relief Ledger
//!
//! Disaster-relief fund ledger: verified vendors and beneficiaries, per
//! beneficiary allocations, rule-checked payments and an append-only,
//! hash-chained record of every payment attempt.
//!
//! # Architecture
//!
//! - **Registry**: vendor approvals and beneficiary verification
//! - **Fund Pool**: donations raised, optionally capping allocations
//! - **Allocation Ledger**: allocation and spent per beneficiary
//! - **Payment Validator**: ordered rule chain, atomic with the commit
//! - **Event Log**: append-only, queryable, optionally signed
//!
//! # Invariants
//!
//! - `spent` never exceeds `allocation`, also under concurrent requests
//! - `spent` equals the sum of committed payments in the log
//! - Rejected attempts are recorded and never move funds
//! - Append-only: entries are never modified or deleted

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod allocation;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod error;
pub mod event_log;
pub mod funds;
pub mod ledger;
pub mod metrics;
pub mod registry;
pub mod report;
pub mod rules;
pub mod storage;
pub mod types;
pub mod validator;

// Re-exports
pub use allocation::{AllocationLedger, Reservation};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, DuplicateWindow, PolicyConfig, StorageBackend};
pub use error::{Error, RejectionReason, Result};
pub use event_log::{Aggregate, EventLog, GroupBy, PaymentFilter, PaymentQuery};
pub use funds::{Donation, FundPool};
pub use ledger::ReliefLedger;
pub use registry::{Registry, RegistryStats};
pub use report::Dashboard;
pub use rules::{PaymentRule, RuleChain};
pub use types::{
    Beneficiary, BeneficiaryId, OutcomeKind, Payment, PaymentOutcome, PaymentRequest, Signature,
    Vendor, VendorId,
};

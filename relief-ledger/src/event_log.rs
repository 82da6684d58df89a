//! Append-only payment event log
//!
//! Every payment attempt, committed or rejected, is appended here.
//!
//! # Invariants
//!
//! - Append-only: entries are never modified or removed
//! - Linearizable: `sequence` is the total order of appends
//! - Hash chain: each entry's hash covers the previous entry's hash
//! - Durable before visible: an entry is written to the backing store
//!   before readers can observe it

use crate::{
    crypto::{hash_payment, KeyPair},
    error::{Error, Result},
    storage::{MemoryStore, PaymentStore},
    types::{BeneficiaryId, OutcomeKind, Payment, VendorId},
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[derive(Debug, Default)]
struct LogState {
    entries: Vec<Payment>,
    head: [u8; 32],
    /// (beneficiary, vendor) -> index of the latest committed entry
    last_committed: HashMap<(BeneficiaryId, VendorId), usize>,
    committed_totals: HashMap<BeneficiaryId, Decimal>,
}

impl LogState {
    fn index(&mut self, payment: &Payment) {
        if payment.is_committed() {
            self.last_committed.insert(
                (payment.beneficiary_id.clone(), payment.vendor_id.clone()),
                self.entries.len(),
            );
            let total = self
                .committed_totals
                .entry(payment.beneficiary_id.clone())
                .or_insert(Decimal::ZERO);
            *total = total.saturating_add(payment.amount);
        }
        self.head = payment.hash;
        self.entries.push(payment.clone());
    }
}

#[derive(Debug)]
struct LogInner {
    state: RwLock<LogState>,
    store: Arc<dyn PaymentStore>,
    signer: RwLock<Option<Arc<KeyPair>>>,
}

/// Payment event log
#[derive(Debug, Clone)]
pub struct EventLog {
    inner: Arc<LogInner>,
}

impl EventLog {
    /// Open a log over a store, replaying and checking whatever it holds
    pub fn open(store: Arc<dyn PaymentStore>) -> Result<Self> {
        let history = store.load()?;
        verify_entries(&history, None)?;

        let mut state = LogState::default();
        for payment in &history {
            state.index(payment);
        }

        if !history.is_empty() {
            tracing::info!(entries = history.len(), "Replayed payment event log");
        }

        Ok(Self {
            inner: Arc::new(LogInner {
                state: RwLock::new(state),
                store,
                signer: RwLock::new(None),
            }),
        })
    }

    /// Empty in-memory log
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(LogInner {
                state: RwLock::new(LogState::default()),
                store: Arc::new(MemoryStore::new()),
                signer: RwLock::new(None),
            }),
        }
    }

    /// Sign every subsequent entry hash with this key
    pub fn set_signer(&self, keypair: Arc<KeyPair>) {
        *self.inner.signer.write() = Some(keypair);
    }

    /// Append a payment.
    ///
    /// Assigns `sequence`, `prev_hash`, `hash` and `signature`, persists the
    /// entry, then publishes it. Returns the entry as stored.
    pub fn append(&self, mut payment: Payment) -> Result<Payment> {
        let signer = self.inner.signer.read().clone();
        let mut state = self.inner.state.write();

        payment.sequence = state.entries.len() as u64;
        payment.prev_hash = state.head;
        payment.hash = hash_payment(&payment)?;
        payment.signature = signer.map(|keypair| keypair.sign(&payment.hash));

        self.inner.store.append(&payment)?;
        state.index(&payment);

        tracing::debug!(
            sequence = payment.sequence,
            payment_id = %payment.payment_id,
            outcome = %payment.outcome.kind(),
            "Payment appended"
        );

        Ok(payment)
    }

    /// Lazy query over entries matching `filter`
    pub fn query(&self, filter: PaymentFilter) -> PaymentQuery {
        PaymentQuery {
            log: self.clone(),
            filter,
        }
    }

    /// Group entries by `key` in a single pass. Entries mapped to `None` are skipped.
    pub fn aggregate<K, F>(&self, key: F) -> BTreeMap<K, Aggregate>
    where
        K: Ord,
        F: Fn(&Payment) -> Option<K>,
    {
        let state = self.inner.state.read();
        let mut groups: BTreeMap<K, Aggregate> = BTreeMap::new();

        for payment in &state.entries {
            if let Some(k) = key(payment) {
                groups.entry(k).or_default().record(payment);
            }
        }

        groups
    }

    /// Group entries by one of the built-in keys
    pub fn aggregate_by(&self, group: GroupBy) -> BTreeMap<String, Aggregate> {
        self.aggregate(|payment| group.key(payment))
    }

    /// Totals over the whole log
    pub fn totals(&self) -> Aggregate {
        let state = self.inner.state.read();
        state
            .entries
            .iter()
            .fold(Aggregate::default(), |mut acc, payment| {
                acc.record(payment);
                acc
            })
    }

    /// Sum of committed amounts for a beneficiary
    pub fn committed_total(&self, beneficiary: &BeneficiaryId) -> Decimal {
        self.inner
            .state
            .read()
            .committed_totals
            .get(beneficiary)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    /// Committed sums for every beneficiary that has one
    pub fn committed_totals(&self) -> HashMap<BeneficiaryId, Decimal> {
        self.inner.state.read().committed_totals.clone()
    }

    /// Latest committed payment for a beneficiary/vendor pair
    pub fn last_committed(&self, beneficiary: &BeneficiaryId, vendor: &VendorId) -> Option<Payment> {
        let key = (beneficiary.clone(), vendor.clone());
        let state = self.inner.state.read();
        let index = *state.last_committed.get(&key)?;
        Some(state.entries[index].clone())
    }

    /// Entry by sequence number
    pub fn get(&self, sequence: u64) -> Option<Payment> {
        let index = usize::try_from(sequence).ok()?;
        self.inner.state.read().entries.get(index).cloned()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.inner.state.read().entries.len()
    }

    /// Whether the log is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hash of the latest entry (zeroes when empty)
    pub fn head_hash(&self) -> [u8; 32] {
        self.inner.state.read().head
    }

    /// Recompute the hash chain and, with a public key, check every signature
    pub fn verify_chain(&self, public_key: Option<&[u8; 32]>) -> Result<()> {
        let state = self.inner.state.read();
        verify_entries(&state.entries, public_key)
    }

    /// Flush the backing store
    pub fn flush(&self) -> Result<()> {
        self.inner.store.flush()
    }
}

fn verify_entries(entries: &[Payment], public_key: Option<&[u8; 32]>) -> Result<()> {
    let mut head = [0u8; 32];

    for (index, payment) in entries.iter().enumerate() {
        if payment.sequence != index as u64 {
            return Err(Error::InvariantViolation(format!(
                "entry {} carries sequence {}",
                index, payment.sequence
            )));
        }
        if payment.prev_hash != head {
            return Err(Error::InvariantViolation(format!(
                "entry {} does not link to its predecessor",
                index
            )));
        }
        if hash_payment(payment)? != payment.hash {
            return Err(Error::InvariantViolation(format!(
                "entry {} hash mismatch",
                index
            )));
        }
        if let Some(public_key) = public_key {
            let signed = payment
                .signature
                .as_ref()
                .map(|signature| signature.verify(&payment.hash, public_key))
                .unwrap_or(false);
            if !signed {
                return Err(Error::SignatureError(format!(
                    "entry {} is not signed by the expected key",
                    index
                )));
            }
        }
        head = payment.hash;
    }

    Ok(())
}

/// Predicate over payments. Empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaymentFilter {
    /// Only this beneficiary
    pub beneficiary_id: Option<BeneficiaryId>,
    /// Only this vendor
    pub vendor_id: Option<VendorId>,
    /// Only this outcome
    pub outcome: Option<OutcomeKind>,
    /// Timestamp at or after
    pub from: Option<DateTime<Utc>>,
    /// Timestamp strictly before
    pub until: Option<DateTime<Utc>>,
}

impl PaymentFilter {
    /// Match everything
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to a beneficiary
    pub fn beneficiary(mut self, id: impl Into<BeneficiaryId>) -> Self {
        self.beneficiary_id = Some(id.into());
        self
    }

    /// Restrict to a vendor
    pub fn vendor(mut self, id: impl Into<VendorId>) -> Self {
        self.vendor_id = Some(id.into());
        self
    }

    /// Restrict to an outcome
    pub fn outcome(mut self, outcome: OutcomeKind) -> Self {
        self.outcome = Some(outcome);
        self
    }

    /// Restrict to `[from, until)`
    pub fn between(mut self, from: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.until = Some(until);
        self
    }

    /// Whether `payment` passes the filter
    pub fn matches(&self, payment: &Payment) -> bool {
        self.beneficiary_id
            .as_ref()
            .map_or(true, |id| *id == payment.beneficiary_id)
            && self
                .vendor_id
                .as_ref()
                .map_or(true, |id| *id == payment.vendor_id)
            && self
                .outcome
                .map_or(true, |outcome| outcome == payment.outcome.kind())
            && self.from.map_or(true, |from| payment.timestamp >= from)
            && self.until.map_or(true, |until| payment.timestamp < until)
    }
}

/// Restartable query. Each call to [`iter`](Self::iter) walks the log as it
/// stands at that moment; entries appended during iteration are not visited.
#[derive(Debug, Clone)]
pub struct PaymentQuery {
    log: EventLog,
    filter: PaymentFilter,
}

impl PaymentQuery {
    /// Start a fresh pass
    pub fn iter(&self) -> QueryIter<'_> {
        QueryIter {
            query: self,
            position: 0,
            end: self.log.len(),
        }
    }

    /// Filter in use
    pub fn filter(&self) -> &PaymentFilter {
        &self.filter
    }

    /// Sum of matching amounts
    pub fn total_amount(&self) -> Decimal {
        self.iter()
            .fold(Decimal::ZERO, |total, payment| total.saturating_add(payment.amount))
    }
}

impl<'a> IntoIterator for &'a PaymentQuery {
    type Item = Payment;
    type IntoIter = QueryIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Lazy iterator over a [`PaymentQuery`]
#[derive(Debug)]
pub struct QueryIter<'a> {
    query: &'a PaymentQuery,
    position: usize,
    end: usize,
}

impl Iterator for QueryIter<'_> {
    type Item = Payment;

    fn next(&mut self) -> Option<Payment> {
        let state = self.query.log.inner.state.read();
        while self.position < self.end {
            let payment = &state.entries[self.position];
            self.position += 1;
            if self.query.filter.matches(payment) {
                return Some(payment.clone());
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.end - self.position))
    }
}

/// Counts and sums for one group
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregate {
    /// All attempts
    pub payments: u64,
    /// Committed attempts
    pub committed: u64,
    /// Rejected attempts
    pub rejected: u64,
    /// Sum of committed amounts
    pub committed_amount: Decimal,
    /// Sum of rejected amounts
    pub rejected_amount: Decimal,
}

impl Aggregate {
    fn record(&mut self, payment: &Payment) {
        self.payments += 1;
        if payment.is_committed() {
            self.committed += 1;
            self.committed_amount = self.committed_amount.saturating_add(payment.amount);
        } else {
            self.rejected += 1;
            self.rejected_amount = self.rejected_amount.saturating_add(payment.amount);
        }
    }
}

/// Built-in grouping keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    /// Vendor ID
    Vendor,
    /// Beneficiary ID
    Beneficiary,
    /// "committed" / "rejected"
    Outcome,
    /// Rejection code; committed payments are skipped
    RejectionReason,
    /// Disaster tag; untagged payments are skipped
    Disaster,
    /// UTC calendar day
    Day,
}

impl GroupBy {
    fn key(&self, payment: &Payment) -> Option<String> {
        match self {
            GroupBy::Vendor => Some(payment.vendor_id.to_string()),
            GroupBy::Beneficiary => Some(payment.beneficiary_id.to_string()),
            GroupBy::Outcome => Some(payment.outcome.kind().to_string()),
            GroupBy::RejectionReason => payment.rejection().map(|r| r.code().to_string()),
            GroupBy::Disaster => payment.disaster_id.clone(),
            GroupBy::Day => Some(payment.timestamp.date_naive().to_string()),
        }
    }
}

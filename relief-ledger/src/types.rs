//! Core types for the relief ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode) for hashing
//! - Exact arithmetic (Decimal for money)
//! - Immutability once appended to the event log

use crate::error::RejectionReason;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Vendor identifier (GST number, registry code, ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VendorId(String);

impl VendorId {
    /// Create new vendor ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VendorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for VendorId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Beneficiary identifier (national ID reference, case number, ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BeneficiaryId(String);

impl BeneficiaryId {
    /// Create new beneficiary ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BeneficiaryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for BeneficiaryId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Vendor snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vendor {
    /// Vendor ID
    pub id: VendorId,
    /// Whether the vendor may currently be paid
    pub approved: bool,
    /// First time the vendor was recorded
    pub registered_at: DateTime<Utc>,
    /// Last approval or revocation
    pub updated_at: DateTime<Utc>,
}

/// Beneficiary snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beneficiary {
    /// Beneficiary ID
    pub id: BeneficiaryId,
    /// Whether the beneficiary may currently draw funds
    pub verified: bool,
    /// Total allocation
    pub allocation: Decimal,
    /// Sum of committed payments
    pub spent: Decimal,
    /// Last verification timestamp
    pub verified_at: DateTime<Utc>,
}

impl Beneficiary {
    /// Allocation left to draw against
    pub fn remaining(&self) -> Decimal {
        self.allocation - self.spent
    }
}

/// A proposed payment, as submitted by a payment-request surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequest {
    /// Beneficiary whose allocation is drawn
    pub beneficiary_id: BeneficiaryId,
    /// Vendor receiving the funds
    pub vendor_id: VendorId,
    /// Amount
    pub amount: Decimal,
    /// Disaster or campaign the payment belongs to
    #[serde(default)]
    pub disaster_id: Option<String>,
}

impl PaymentRequest {
    /// Create new payment request
    pub fn new(
        beneficiary_id: impl Into<BeneficiaryId>,
        vendor_id: impl Into<VendorId>,
        amount: Decimal,
    ) -> Self {
        Self {
            beneficiary_id: beneficiary_id.into(),
            vendor_id: vendor_id.into(),
            amount,
            disaster_id: None,
        }
    }

    /// Tag the request with a disaster/campaign ID
    pub fn with_disaster(mut self, disaster_id: impl Into<String>) -> Self {
        self.disaster_id = Some(disaster_id.into());
        self
    }
}

/// Final outcome of a payment attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentOutcome {
    /// All rules passed, funds reserved
    Committed,
    /// A rule refused the payment
    Rejected {
        /// First rule that failed
        reason: RejectionReason,
    },
}

impl PaymentOutcome {
    /// Outcome without the rejection detail
    pub fn kind(&self) -> OutcomeKind {
        match self {
            PaymentOutcome::Committed => OutcomeKind::Committed,
            PaymentOutcome::Rejected { .. } => OutcomeKind::Rejected,
        }
    }
}

/// Outcome discriminant, used by filters and grouping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// Committed payment
    Committed,
    /// Rejected attempt
    Rejected,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeKind::Committed => write!(f, "committed"),
            OutcomeKind::Rejected => write!(f, "rejected"),
        }
    }
}

/// Payment record stored in the event log
///
/// `sequence`, `prev_hash`, `hash` and `signature` are assigned by
/// [`EventLog::append`](crate::event_log::EventLog::append).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    /// Unique payment ID (UUIDv7 for time-ordering)
    pub payment_id: Uuid,

    /// Position in the event log
    pub sequence: u64,

    /// Beneficiary reference
    pub beneficiary_id: BeneficiaryId,

    /// Vendor reference
    pub vendor_id: VendorId,

    /// Amount (exact decimal)
    pub amount: Decimal,

    /// Decision timestamp
    pub timestamp: DateTime<Utc>,

    /// Disaster or campaign tag
    #[serde(default)]
    pub disaster_id: Option<String>,

    /// Committed or rejected
    pub outcome: PaymentOutcome,

    /// Hash of the previous log entry (zeroes for the first)
    pub prev_hash: [u8; 32],

    /// Hash of this entry
    pub hash: [u8; 32],

    /// Operator signature over `hash`
    #[serde(default)]
    pub signature: Option<Signature>,
}

/// Fields covered by the entry hash
#[derive(Serialize)]
struct CanonicalPayment<'a> {
    payment_id: &'a Uuid,
    sequence: u64,
    beneficiary_id: &'a BeneficiaryId,
    vendor_id: &'a VendorId,
    amount: &'a Decimal,
    timestamp: &'a DateTime<Utc>,
    disaster_id: &'a Option<String>,
    outcome: &'a PaymentOutcome,
    prev_hash: &'a [u8; 32],
}

impl Payment {
    /// Build an unsequenced payment record from a request and its outcome
    pub fn from_request(
        request: &PaymentRequest,
        outcome: PaymentOutcome,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            payment_id: Uuid::now_v7(),
            sequence: 0,
            beneficiary_id: request.beneficiary_id.clone(),
            vendor_id: request.vendor_id.clone(),
            amount: request.amount,
            timestamp,
            disaster_id: request.disaster_id.clone(),
            outcome,
            prev_hash: [0u8; 32],
            hash: [0u8; 32],
            signature: None,
        }
    }

    /// Create canonical bytes for hashing
    pub fn canonical_bytes(&self) -> crate::Result<Vec<u8>> {
        let canonical = CanonicalPayment {
            payment_id: &self.payment_id,
            sequence: self.sequence,
            beneficiary_id: &self.beneficiary_id,
            vendor_id: &self.vendor_id,
            amount: &self.amount,
            timestamp: &self.timestamp,
            disaster_id: &self.disaster_id,
            outcome: &self.outcome,
            prev_hash: &self.prev_hash,
        };
        Ok(bincode::serialize(&canonical)?)
    }

    /// Whether funds were reserved for this payment
    pub fn is_committed(&self) -> bool {
        matches!(self.outcome, PaymentOutcome::Committed)
    }

    /// Rejection reason, if any
    pub fn rejection(&self) -> Option<&RejectionReason> {
        match &self.outcome {
            PaymentOutcome::Committed => None,
            PaymentOutcome::Rejected { reason } => Some(reason),
        }
    }
}

/// Digital signature (Ed25519, 64 bytes)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    bytes: Vec<u8>,
}

impl Signature {
    /// Create from bytes
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self {
            bytes: bytes.to_vec(),
        }
    }

    /// Get bytes, `None` if the stored value is not 64 bytes long
    pub fn to_array(&self) -> Option<[u8; 64]> {
        self.bytes.as_slice().try_into().ok()
    }

    /// Verify signature
    pub fn verify(&self, message: &[u8], public_key: &[u8; 32]) -> bool {
        crate::crypto::verify_signature(message, self, public_key)
    }
}

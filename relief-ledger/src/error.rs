//! Error types for the relief ledger
//!
//! Two families live here:
//! - [`Error`]: hard failures caused by caller misuse or the storage layer.
//! - [`RejectionReason`]: policy outcomes of the payment rule chain. These are
//!   returned as data inside a rejected [`Payment`](crate::types::Payment),
//!   never as `Err`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Referenced vendor, beneficiary or payment does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed input (negative allocation, non-positive reservation, ...)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Storage error (file, RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Binary serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invariant violation (spent mismatch, broken hash chain, ...)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Signature verification failed
    #[error("Signature verification failed: {0}")]
    SignatureError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Metrics registration error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

#[cfg(feature = "rocksdb")]
impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

/// Why the rule chain refused a payment
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    /// Vendor unknown or not approved
    #[error("Vendor not approved")]
    VendorNotApproved,

    /// Beneficiary unknown or not verified
    #[error("Beneficiary not verified")]
    BeneficiaryNotVerified,

    /// Amount is zero or negative
    #[error("Invalid amount {amount}: must be positive")]
    InvalidAmount {
        /// Requested amount
        amount: Decimal,
    },

    /// Amount above the single-payment ceiling
    #[error("Payment {amount} exceeds single payment ceiling {ceiling}")]
    PaymentTooLarge {
        /// Requested amount
        amount: Decimal,
        /// Configured ceiling
        ceiling: Decimal,
    },

    /// Same beneficiary/vendor pair already paid inside the window
    #[error("Duplicate payment: previous payment {previous_payment} inside window")]
    DuplicatePayment {
        /// Sequence number of the earlier committed payment
        previous_payment: u64,
    },

    /// Reservation against the allocation failed
    #[error("Insufficient funds: requested {requested}, remaining {remaining}")]
    InsufficientFunds {
        /// Requested amount
        requested: Decimal,
        /// Remaining balance at the time of the check
        remaining: Decimal,
    },
}

impl RejectionReason {
    /// Stable short code, used for metric labels and grouping
    pub fn code(&self) -> &'static str {
        match self {
            RejectionReason::VendorNotApproved => "vendor_not_approved",
            RejectionReason::BeneficiaryNotVerified => "beneficiary_not_verified",
            RejectionReason::InvalidAmount { .. } => "invalid_amount",
            RejectionReason::PaymentTooLarge { .. } => "payment_too_large",
            RejectionReason::DuplicatePayment { .. } => "duplicate_payment",
            RejectionReason::InsufficientFunds { .. } => "insufficient_funds",
        }
    }
}

//! Allocation ledger: per-beneficiary allocation and remaining balance
//!
//! `reserve` is the only operation that needs coordination. It runs as a
//! critical section on the beneficiary's record mutex, so concurrent
//! reservations on one beneficiary can never together exceed the allocation.
//! No I/O happens while the lock is held.

use crate::{
    error::{Error, Result},
    registry::{BeneficiaryRecord, Registry, RecordCell},
    types::BeneficiaryId,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Result of a reservation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reservation {
    /// `spent` was incremented
    Granted {
        /// Balance left after the reservation
        remaining: Decimal,
    },
    /// Amount exceeds the remaining balance, nothing changed
    Denied {
        /// Requested amount
        requested: Decimal,
        /// Balance at the time of the check
        remaining: Decimal,
    },
}

impl Reservation {
    /// Whether funds were reserved
    pub fn is_granted(&self) -> bool {
        matches!(self, Reservation::Granted { .. })
    }
}

/// Check-and-increment on an already locked record
pub(crate) fn reserve_locked(record: &mut BeneficiaryRecord, amount: Decimal) -> Reservation {
    let remaining = record.remaining();
    if amount > remaining {
        return Reservation::Denied {
            requested: amount,
            remaining,
        };
    }
    record.spent += amount;
    Reservation::Granted {
        remaining: record.remaining(),
    }
}

/// Allocation ledger over the registry's beneficiary records
#[derive(Debug, Clone)]
pub struct AllocationLedger {
    registry: Arc<Registry>,
}

impl AllocationLedger {
    /// Create ledger view over a registry
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// `allocation - spent`
    pub fn remaining_balance(&self, id: &BeneficiaryId) -> Result<Decimal> {
        let cell = self.cell(id)?;
        let record = cell.lock();
        Ok(record.remaining())
    }

    /// Total allocation
    pub fn allocation(&self, id: &BeneficiaryId) -> Result<Decimal> {
        let cell = self.cell(id)?;
        let record = cell.lock();
        Ok(record.allocation)
    }

    /// Sum of committed payments
    pub fn spent(&self, id: &BeneficiaryId) -> Result<Decimal> {
        let cell = self.cell(id)?;
        let record = cell.lock();
        Ok(record.spent)
    }

    /// Atomically reserve `amount` if it fits in the remaining balance
    pub fn reserve(&self, id: &BeneficiaryId, amount: Decimal) -> Result<Reservation> {
        if amount <= Decimal::ZERO {
            return Err(Error::InvalidArgument(format!(
                "Reservation amount must be positive, got {}",
                amount
            )));
        }

        let cell = self.cell(id)?;
        let reservation = {
            let mut record = cell.lock();
            reserve_locked(&mut record, amount)
        };

        debug!(beneficiary_id = %id, %amount, ?reservation, "Reservation attempted");
        Ok(reservation)
    }

    /// Increase a beneficiary's allocation
    pub fn top_up(&self, id: &BeneficiaryId, extra: Decimal) -> Result<Decimal> {
        if extra < Decimal::ZERO {
            return Err(Error::InvalidArgument(format!(
                "Top-up must be non-negative, got {}",
                extra
            )));
        }

        let cell = self.cell(id)?;
        let allocation = {
            let mut record = cell.lock();
            let current = record.allocation;
            record.allocation = current.checked_add(extra).ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "Top-up of {} overflows allocation {}",
                    extra, current
                ))
            })?;
            record.allocation
        };

        info!(beneficiary_id = %id, %extra, %allocation, "Allocation topped up");
        Ok(allocation)
    }

    fn cell(&self, id: &BeneficiaryId) -> Result<RecordCell> {
        self.registry
            .record(id)
            .ok_or_else(|| Error::NotFound(format!("beneficiary {}", id)))
    }
}

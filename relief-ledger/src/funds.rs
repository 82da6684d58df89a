//! Donated funds
//!
//! Donations raise the pool that allocations are drawn from. With
//! `policy.require_funding` set, the ledger routes every allocation change
//! through [`FundPool::within_raised`], which holds the pool lock while the
//! change is checked and applied.

use crate::{
    clock::Clock,
    error::{Error, Result},
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// One donation into the pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Donation {
    /// Donor name as given
    pub donor: String,
    /// Amount donated
    pub amount: Decimal,
    /// Time the donation was recorded
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct PoolState {
    raised: Decimal,
    donations: Vec<Donation>,
}

/// Pool of raised funds
#[derive(Debug)]
pub struct FundPool {
    state: Mutex<PoolState>,
    clock: Arc<dyn Clock>,
}

impl FundPool {
    /// Empty pool
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(PoolState::default()),
            clock,
        }
    }

    /// Add a donation. Returns the new raised total.
    pub fn record_donation(&self, donor: impl Into<String>, amount: Decimal) -> Result<Decimal> {
        let donor = donor.into();
        if donor.trim().is_empty() {
            return Err(Error::InvalidArgument("Donor must not be empty".to_string()));
        }
        if amount <= Decimal::ZERO {
            return Err(Error::InvalidArgument(format!(
                "Donation must be positive, got {}",
                amount
            )));
        }

        let mut state = self.state.lock();
        let raised = state.raised.checked_add(amount).ok_or_else(|| {
            Error::InvalidArgument(format!(
                "Donation of {} overflows raised total {}",
                amount, state.raised
            ))
        })?;
        state.raised = raised;
        state.donations.push(Donation {
            donor: donor.clone(),
            amount,
            received_at: self.clock.now(),
        });
        drop(state);

        info!(%donor, %amount, %raised, "Donation recorded");
        Ok(raised)
    }

    /// Total donated
    pub fn raised(&self) -> Decimal {
        self.state.lock().raised
    }

    /// Donations in arrival order
    pub fn donations(&self) -> Vec<Donation> {
        self.state.lock().donations.clone()
    }

    /// Apply an allocation change if the allocated total afterwards stays
    /// within the raised total. `allocated_after` and `apply` both run under
    /// the pool lock, so concurrent changes cannot jointly overshoot.
    pub fn within_raised<T>(
        &self,
        allocated_after: impl FnOnce() -> Decimal,
        apply: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let state = self.state.lock();
        let allocated = allocated_after();
        if allocated > state.raised {
            return Err(Error::InvalidArgument(format!(
                "Allocations would total {} but only {} has been raised",
                allocated, state.raised
            )));
        }
        apply()
    }
}

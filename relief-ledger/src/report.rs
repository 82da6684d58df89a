//! Transparency dashboard
//!
//! Public summary figures derived from the registry, the event log and the
//! raised total. Spending figures come from the log, so committed payments
//! count even for beneficiaries not yet re-verified after a reopen.

use crate::{
    event_log::{Aggregate, EventLog, GroupBy},
    registry::Registry,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Snapshot of fund usage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dashboard {
    /// Sum of all donations
    pub total_raised: Decimal,
    /// Sum of all beneficiary allocations
    pub total_allocated: Decimal,
    /// Sum of all committed payments
    pub total_spent: Decimal,
    /// `total_raised - total_spent`; negative when spending outran donations
    pub funds_remaining: Decimal,
    /// `total_allocated - total_spent`
    pub unspent_allocation: Decimal,
    /// Beneficiaries currently verified
    pub beneficiaries_verified: usize,
    /// Beneficiaries with at least one committed payment
    pub beneficiaries_helped: usize,
    /// Vendors currently approved
    pub vendors_approved: usize,
    /// Committed payments
    pub vendor_payments: u64,
    /// Rejected attempts
    pub rejected_payments: u64,
    /// Mean committed amount, two decimal places
    pub average_payment: Decimal,
    /// Allocated as a percentage of raised, one decimal place
    pub allocation_efficiency: Decimal,
    /// Spent as a percentage of allocated, one decimal place
    pub spending_efficiency: Decimal,
    /// Totals per disaster tag
    pub disasters: BTreeMap<String, Aggregate>,
}

impl Dashboard {
    /// Compute the dashboard from current state
    pub fn compute(registry: &Registry, log: &EventLog, total_raised: Decimal) -> Self {
        let stats = registry.stats();
        let totals = log.totals();
        let total_spent = totals.committed_amount;

        let beneficiaries_helped = log
            .committed_totals()
            .values()
            .filter(|total| **total > Decimal::ZERO)
            .count();

        let average_payment = if totals.committed > 0 {
            (totals.committed_amount / Decimal::from(totals.committed)).round_dp(2)
        } else {
            Decimal::ZERO
        };

        Self {
            total_raised,
            total_allocated: stats.total_allocated,
            total_spent,
            funds_remaining: total_raised - total_spent,
            unspent_allocation: stats.total_allocated - total_spent,
            beneficiaries_verified: stats.beneficiaries_verified,
            beneficiaries_helped,
            vendors_approved: stats.vendors_approved,
            vendor_payments: totals.committed,
            rejected_payments: totals.rejected,
            average_payment,
            allocation_efficiency: percentage(stats.total_allocated, total_raised),
            spending_efficiency: percentage(total_spent, stats.total_allocated),
            disasters: log.aggregate_by(GroupBy::Disaster),
        }
    }
}

/// `part / whole * 100` to one decimal place, zero when `whole` is not positive
fn percentage(part: Decimal, whole: Decimal) -> Decimal {
    if whole <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    part.checked_div(whole)
        .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
        .map_or(Decimal::MAX, |percent| percent.round_dp(1))
}

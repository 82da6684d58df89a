//! Registry of vendors and beneficiaries
//!
//! The registry trusts its callers: identity checks (KYC, tax registration)
//! happen upstream and arrive here as approve/verify calls.
//!
//! Each beneficiary record lives behind its own mutex so that the allocation
//! ledger and the payment validator can serialize work per beneficiary while
//! different beneficiaries proceed in parallel. The map shard lock is never
//! held while a record lock is awaited.

use crate::{
    clock::Clock,
    error::{Error, Result},
    types::{Beneficiary, BeneficiaryId, Vendor, VendorId},
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Mutable beneficiary state, guarded by a per-beneficiary mutex
#[derive(Debug, Clone)]
pub struct BeneficiaryRecord {
    /// Whether the beneficiary may currently draw funds
    pub verified: bool,
    /// Total allocation
    pub allocation: Decimal,
    /// Sum of committed payments
    pub spent: Decimal,
    /// Last verification timestamp
    pub verified_at: DateTime<Utc>,
}

impl BeneficiaryRecord {
    /// Allocation left to draw against
    pub fn remaining(&self) -> Decimal {
        self.allocation - self.spent
    }

    fn reverify(&mut self, allocation: Decimal, now: DateTime<Utc>) -> Result<()> {
        if allocation < self.spent {
            return Err(Error::InvalidArgument(format!(
                "Allocation {} is below amount already spent {}",
                allocation, self.spent
            )));
        }
        self.verified = true;
        self.allocation = allocation;
        self.verified_at = now;
        Ok(())
    }
}

pub(crate) type RecordCell = Arc<Mutex<BeneficiaryRecord>>;

/// Registry statistics, grouped by role and status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    /// Approved vendors
    pub vendors_approved: usize,
    /// Registered or revoked vendors
    pub vendors_pending: usize,
    /// Verified beneficiaries
    pub beneficiaries_verified: usize,
    /// Suspended beneficiaries
    pub beneficiaries_suspended: usize,
    /// Sum of all allocations
    pub total_allocated: Decimal,
    /// Sum of all spent amounts
    pub total_spent: Decimal,
}

/// Vendor and beneficiary registry
#[derive(Debug)]
pub struct Registry {
    vendors: DashMap<VendorId, Vendor>,
    beneficiaries: DashMap<BeneficiaryId, RecordCell>,
    /// Spent amounts replayed from the event log for beneficiaries not yet re-verified
    opening_spent: DashMap<BeneficiaryId, Decimal>,
    clock: Arc<dyn Clock>,
}

impl Registry {
    /// Create empty registry
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            vendors: DashMap::new(),
            beneficiaries: DashMap::new(),
            opening_spent: DashMap::new(),
            clock,
        }
    }

    /// Seed spent amounts recovered from a replayed event log.
    ///
    /// A beneficiary verified later starts with this amount already spent.
    pub fn seed_spent(&self, spent: impl IntoIterator<Item = (BeneficiaryId, Decimal)>) {
        for (id, amount) in spent {
            self.opening_spent.insert(id, amount);
        }
    }

    // Vendors

    /// Record a vendor awaiting approval. No-op if already known.
    pub fn register_vendor(&self, id: VendorId) {
        let now = self.clock.now();
        self.vendors.entry(id.clone()).or_insert_with(|| {
            info!(vendor_id = %id, "Vendor registered (pending approval)");
            Vendor {
                id,
                approved: false,
                registered_at: now,
                updated_at: now,
            }
        });
    }

    /// Approve a vendor, creating it if unknown. Idempotent.
    pub fn approve_vendor(&self, id: VendorId) {
        let now = self.clock.now();
        self.vendors
            .entry(id.clone())
            .and_modify(|vendor| {
                if !vendor.approved {
                    vendor.approved = true;
                    vendor.updated_at = now;
                    info!(vendor_id = %vendor.id, "Vendor approved");
                }
            })
            .or_insert_with(|| {
                info!(vendor_id = %id, "Vendor approved");
                Vendor {
                    id,
                    approved: true,
                    registered_at: now,
                    updated_at: now,
                }
            });
    }

    /// Revoke a vendor's approval
    pub fn revoke_vendor(&self, id: &VendorId) -> Result<()> {
        let mut vendor = self
            .vendors
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("vendor {}", id)))?;

        if vendor.approved {
            vendor.approved = false;
            vendor.updated_at = self.clock.now();
            info!(vendor_id = %id, "Vendor approval revoked");
        }
        Ok(())
    }

    /// Whether the vendor exists and is approved
    pub fn is_vendor_approved(&self, id: &VendorId) -> bool {
        self.vendors.get(id).map(|v| v.approved).unwrap_or(false)
    }

    /// Vendor snapshot
    pub fn vendor(&self, id: &VendorId) -> Option<Vendor> {
        self.vendors.get(id).map(|v| v.value().clone())
    }

    /// All vendors, sorted by ID
    pub fn vendors(&self) -> Vec<Vendor> {
        let mut vendors: Vec<Vendor> = self.vendors.iter().map(|v| v.value().clone()).collect();
        vendors.sort_by(|a, b| a.id.cmp(&b.id));
        vendors
    }

    // Beneficiaries

    /// Register a beneficiary as verified with the given allocation.
    ///
    /// Re-verifying a known beneficiary restores the flag and replaces the
    /// allocation, which may not drop below what was already spent.
    pub fn verify_beneficiary(&self, id: BeneficiaryId, allocation: Decimal) -> Result<()> {
        if allocation < Decimal::ZERO {
            return Err(Error::InvalidArgument(format!(
                "Allocation must be non-negative, got {}",
                allocation
            )));
        }

        let now = self.clock.now();

        if let Some(cell) = self.record(&id) {
            cell.lock().reverify(allocation, now)?;
            info!(beneficiary_id = %id, %allocation, "Beneficiary re-verified");
            return Ok(());
        }

        let opening = self
            .opening_spent
            .get(&id)
            .map(|s| *s.value())
            .unwrap_or(Decimal::ZERO);
        if allocation < opening {
            return Err(Error::InvalidArgument(format!(
                "Allocation {} is below amount already spent {}",
                allocation, opening
            )));
        }

        let mut created = false;
        let cell = self
            .beneficiaries
            .entry(id.clone())
            .or_insert_with(|| {
                created = true;
                Arc::new(Mutex::new(BeneficiaryRecord {
                    verified: true,
                    allocation,
                    spent: opening,
                    verified_at: now,
                }))
            })
            .clone();

        if created {
            self.opening_spent.remove(&id);
            info!(beneficiary_id = %id, %allocation, "Beneficiary verified");
        } else {
            // Lost a race with a concurrent verification of the same ID
            cell.lock().reverify(allocation, now)?;
            info!(beneficiary_id = %id, %allocation, "Beneficiary re-verified");
        }

        Ok(())
    }

    /// Clear a beneficiary's verification flag
    pub fn suspend_beneficiary(&self, id: &BeneficiaryId) -> Result<()> {
        let cell = self
            .record(id)
            .ok_or_else(|| Error::NotFound(format!("beneficiary {}", id)))?;

        let mut record = cell.lock();
        if record.verified {
            record.verified = false;
            info!(beneficiary_id = %id, "Beneficiary suspended");
        }
        Ok(())
    }

    /// Whether the beneficiary exists and is verified
    pub fn is_beneficiary_verified(&self, id: &BeneficiaryId) -> bool {
        match self.record(id) {
            Some(cell) => {
                let record = cell.lock();
                record.verified
            }
            None => false,
        }
    }

    /// Beneficiary snapshot
    pub fn beneficiary(&self, id: &BeneficiaryId) -> Option<Beneficiary> {
        let cell = self.record(id)?;
        let record = cell.lock();
        Some(Self::snapshot(id.clone(), &record))
    }

    /// All beneficiaries, sorted by ID
    pub fn beneficiaries(&self) -> Vec<Beneficiary> {
        let mut snapshots: Vec<Beneficiary> = self
            .records()
            .into_iter()
            .map(|(id, cell)| {
                let record = cell.lock();
                Self::snapshot(id, &record)
            })
            .collect();
        snapshots.sort_by(|a, b| a.id.cmp(&b.id));
        snapshots
    }

    /// Counts and totals by role and status
    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats::default();

        for vendor in self.vendors.iter() {
            if vendor.approved {
                stats.vendors_approved += 1;
            } else {
                stats.vendors_pending += 1;
            }
        }

        for (_, cell) in self.records() {
            let record = cell.lock();
            if record.verified {
                stats.beneficiaries_verified += 1;
            } else {
                stats.beneficiaries_suspended += 1;
            }
            stats.total_allocated = stats.total_allocated.saturating_add(record.allocation);
            stats.total_spent = stats.total_spent.saturating_add(record.spent);
        }

        stats
    }

    /// Shared handle to a beneficiary's record
    pub(crate) fn record(&self, id: &BeneficiaryId) -> Option<RecordCell> {
        self.beneficiaries.get(id).map(|cell| Arc::clone(cell.value()))
    }

    /// Handles to every record, collected before any record is locked
    pub(crate) fn records(&self) -> Vec<(BeneficiaryId, RecordCell)> {
        self.beneficiaries
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }

    fn snapshot(id: BeneficiaryId, record: &BeneficiaryRecord) -> Beneficiary {
        Beneficiary {
            id,
            verified: record.verified,
            allocation: record.allocation,
            spent: record.spent,
            verified_at: record.verified_at,
        }
    }
}

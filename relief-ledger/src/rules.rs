//! Payment rules
//!
//! A payment is checked by an ordered [`RuleChain`]. Evaluation stops at the
//! first rule that refuses, so the reported reason is deterministic when
//! several rules would fail at once.
//!
//! Standard order:
//!
//! 1. [`VendorApproved`]
//! 2. [`BeneficiaryVerified`]
//! 3. [`PositiveAmount`]
//! 4. [`SinglePaymentCeiling`]
//! 5. [`NoDuplicatePayment`]
//! 6. [`ReserveFunds`]
//!
//! Only [`ReserveFunds`] mutates state. A mutating rule must be the last one
//! in a chain, otherwise a later refusal would leave funds reserved for a
//! rejected payment.

use crate::{
    allocation::{reserve_locked, Reservation},
    config::PolicyConfig,
    error::{Error, RejectionReason, Result},
    event_log::EventLog,
    registry::{BeneficiaryRecord, Registry},
    types::PaymentRequest,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::fmt;

/// Outcome of a single rule
pub type Verdict = std::result::Result<(), RejectionReason>;

/// Everything a rule may look at while the beneficiary is locked
pub struct RuleContext<'a> {
    /// Payment under evaluation
    pub request: &'a PaymentRequest,
    /// Vendor approvals
    pub registry: &'a Registry,
    /// Committed history
    pub log: &'a EventLog,
    /// Ceiling and duplicate window
    pub policy: &'a PolicyConfig,
    /// Decision time
    pub now: DateTime<Utc>,
    /// Locked beneficiary record, `None` if the beneficiary is unknown
    pub record: Option<&'a mut BeneficiaryRecord>,
}

impl fmt::Debug for RuleContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleContext")
            .field("request", self.request)
            .field("now", &self.now)
            .field("record", &self.record)
            .finish()
    }
}

/// A named check in the payment rule chain
pub trait PaymentRule: Send + Sync + fmt::Debug {
    /// Rule name, used in logs
    fn name(&self) -> &'static str;

    /// Whether the rule reserves funds when it passes. A chain holds exactly
    /// one such rule, in last position.
    fn mutates(&self) -> bool {
        false
    }

    /// Check the payment, refusing with a reason
    fn apply(&self, ctx: &mut RuleContext<'_>) -> Verdict;
}

/// Vendor must exist and be approved
#[derive(Debug, Default, Clone, Copy)]
pub struct VendorApproved;

impl PaymentRule for VendorApproved {
    fn name(&self) -> &'static str {
        "vendor_approved"
    }

    fn apply(&self, ctx: &mut RuleContext<'_>) -> Verdict {
        if ctx.registry.is_vendor_approved(&ctx.request.vendor_id) {
            Ok(())
        } else {
            Err(RejectionReason::VendorNotApproved)
        }
    }
}

/// Beneficiary must exist and be verified
#[derive(Debug, Default, Clone, Copy)]
pub struct BeneficiaryVerified;

impl PaymentRule for BeneficiaryVerified {
    fn name(&self) -> &'static str {
        "beneficiary_verified"
    }

    fn apply(&self, ctx: &mut RuleContext<'_>) -> Verdict {
        match ctx.record.as_deref() {
            Some(record) if record.verified => Ok(()),
            _ => Err(RejectionReason::BeneficiaryNotVerified),
        }
    }
}

/// Amount must be strictly positive
#[derive(Debug, Default, Clone, Copy)]
pub struct PositiveAmount;

impl PaymentRule for PositiveAmount {
    fn name(&self) -> &'static str {
        "positive_amount"
    }

    fn apply(&self, ctx: &mut RuleContext<'_>) -> Verdict {
        let amount = ctx.request.amount;
        if amount > Decimal::ZERO {
            Ok(())
        } else {
            Err(RejectionReason::InvalidAmount { amount })
        }
    }
}

/// Amount must not exceed `max_single_payment`
#[derive(Debug, Default, Clone, Copy)]
pub struct SinglePaymentCeiling;

impl PaymentRule for SinglePaymentCeiling {
    fn name(&self) -> &'static str {
        "single_payment_ceiling"
    }

    fn apply(&self, ctx: &mut RuleContext<'_>) -> Verdict {
        let amount = ctx.request.amount;
        let ceiling = ctx.policy.max_single_payment;
        if amount > ceiling {
            Err(RejectionReason::PaymentTooLarge { amount, ceiling })
        } else {
            Ok(())
        }
    }
}

/// No committed payment for the same beneficiary/vendor pair inside the window
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDuplicatePayment;

impl PaymentRule for NoDuplicatePayment {
    fn name(&self) -> &'static str {
        "no_duplicate_payment"
    }

    fn apply(&self, ctx: &mut RuleContext<'_>) -> Verdict {
        let previous = ctx
            .log
            .last_committed(&ctx.request.beneficiary_id, &ctx.request.vendor_id);

        match previous {
            Some(previous) if ctx.policy.duplicate_window.covers(previous.timestamp, ctx.now) => {
                Err(RejectionReason::DuplicatePayment {
                    previous_payment: previous.sequence,
                })
            }
            _ => Ok(()),
        }
    }
}

/// Reserve the amount against the beneficiary's allocation
#[derive(Debug, Default, Clone, Copy)]
pub struct ReserveFunds;

impl PaymentRule for ReserveFunds {
    fn name(&self) -> &'static str {
        "reserve_funds"
    }

    fn mutates(&self) -> bool {
        true
    }

    fn apply(&self, ctx: &mut RuleContext<'_>) -> Verdict {
        let amount = ctx.request.amount;
        let Some(record) = ctx.record.as_deref_mut() else {
            return Err(RejectionReason::BeneficiaryNotVerified);
        };

        match reserve_locked(record, amount) {
            Reservation::Granted { .. } => Ok(()),
            Reservation::Denied {
                requested,
                remaining,
            } => Err(RejectionReason::InsufficientFunds {
                requested,
                remaining,
            }),
        }
    }
}

/// Ordered list of payment rules
#[derive(Debug)]
pub struct RuleChain {
    rules: Vec<Box<dyn PaymentRule>>,
}

impl RuleChain {
    /// Build a chain. Exactly one rule may change ledger state, and it must
    /// come last, so that every committed payment has reserved its amount.
    pub fn new(rules: Vec<Box<dyn PaymentRule>>) -> Result<Self> {
        let mutating: Vec<usize> = rules
            .iter()
            .enumerate()
            .filter(|(_, rule)| rule.mutates())
            .map(|(position, _)| position)
            .collect();

        match mutating.as_slice() {
            [] => Err(Error::InvalidArgument(
                "rule chain has no rule that reserves funds".to_string(),
            )),
            [position] if position + 1 == rules.len() => Ok(Self { rules }),
            [position] => Err(Error::InvalidArgument(format!(
                "rule `{}` changes ledger state and must be last in the chain",
                rules[*position].name()
            ))),
            _ => Err(Error::InvalidArgument(format!(
                "rule chain has {} rules that change ledger state, expected one",
                mutating.len()
            ))),
        }
    }

    /// The six relief payment rules in their standard order
    pub fn standard() -> Self {
        Self {
            rules: vec![
                Box::new(VendorApproved),
                Box::new(BeneficiaryVerified),
                Box::new(PositiveAmount),
                Box::new(SinglePaymentCeiling),
                Box::new(NoDuplicatePayment),
                Box::new(ReserveFunds),
            ],
        }
    }

    /// Rule names in evaluation order
    pub fn names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|rule| rule.name()).collect()
    }

    /// Apply rules in order, stopping at the first refusal
    pub fn evaluate(&self, ctx: &mut RuleContext<'_>) -> Verdict {
        for rule in &self.rules {
            if let Err(reason) = rule.apply(ctx) {
                tracing::debug!(
                    rule = rule.name(),
                    reason = reason.code(),
                    beneficiary_id = %ctx.request.beneficiary_id,
                    vendor_id = %ctx.request.vendor_id,
                    "Payment rule refused"
                );
                return Err(reason);
            }
        }
        Ok(())
    }
}

impl Default for RuleChain {
    fn default() -> Self {
        Self::standard()
    }
}

//! Payments and refunds.
//!
//! Each Payment runs its own state machine, extensible through
//! [`PaymentProcess`](crate::process::PaymentProcess) values. Refunds have
//! a small fixed machine of their own: Pending until the money actually
//! moves, then Settled or Failed. A failed refund's total stops counting
//! against its payment, freeing the amount to be refunded again.

use crate::id::{OrderItemId, PaymentId, RefundId, SurchargeId};
use crate::money::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a [`Payment`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentState {
    /// Recorded but not yet processed.
    Created,
    /// Being checked by the payment provider.
    Validating,
    /// Funds reserved but not captured.
    Authorized,
    /// Funds captured.
    Settled,
    /// Rejected by the payment provider.
    Declined,
    /// Abandoned or voided before settlement.
    Cancelled,
    /// Plugin-defined state merged in by a custom payment process.
    Custom(String),
}

impl fmt::Display for PaymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Validating => write!(f, "Validating"),
            Self::Authorized => write!(f, "Authorized"),
            Self::Settled => write!(f, "Settled"),
            Self::Declined => write!(f, "Declined"),
            Self::Cancelled => write!(f, "Cancelled"),
            Self::Custom(name) => write!(f, "{name}"),
        }
    }
}

/// Lifecycle state of a [`Refund`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RefundState {
    /// Created but the money has not moved yet.
    Pending,
    /// Money returned to the customer.
    Settled,
    /// The provider could not process the refund.
    Failed,
}

impl RefundState {
    /// Whether the refund machine permits `from` to become `to`.
    #[must_use]
    pub fn can_transition(from: Self, to: Self) -> bool {
        matches!((from, to), (Self::Pending, Self::Settled | Self::Failed))
    }
}

impl fmt::Display for RefundState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Settled => write!(f, "Settled"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Money returned to the customer against one [`Payment`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Refund {
    /// Refund identifier.
    pub id: RefundId,
    /// The payment this refund draws from.
    pub payment_id: PaymentId,
    /// Positive with-tax amount returned.
    pub total: Money,
    /// Where the refund is in its lifecycle.
    pub state: RefundState,
    /// Optional operator-facing reason.
    pub reason: Option<String>,
    /// Units this refund covers.
    pub item_ids: Vec<OrderItemId>,
    /// Surcharges this refund covers.
    pub surcharge_ids: Vec<SurchargeId>,
    /// When the refund was created.
    pub created_at: DateTime<Utc>,
}

impl Refund {
    /// Creates a pending refund against `payment_id`.
    #[must_use]
    pub fn new(payment_id: PaymentId, total: Money, now: DateTime<Utc>) -> Self {
        Self {
            id: RefundId::new(),
            payment_id,
            total,
            state: RefundState::Pending,
            reason: None,
            item_ids: Vec::new(),
            surcharge_ids: Vec::new(),
            created_at: now,
        }
    }
}

/// A payment against an Order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    /// Payment identifier.
    pub id: PaymentId,
    /// Payment method code, e.g. "standard-payment".
    pub method: String,
    /// With-tax amount this payment covers.
    pub amount: Money,
    /// Where the payment is in its lifecycle.
    pub state: PaymentState,
    /// Provider-side transaction reference.
    pub transaction_id: Option<String>,
    /// Provider-specific details.
    pub metadata: serde_json::Value,
    /// Refunds drawn against this payment.
    pub refunds: Vec<Refund>,
    /// When the payment was recorded.
    pub created_at: DateTime<Utc>,
}

impl Payment {
    /// Records a new payment in the Created state.
    #[must_use]
    pub fn new(
        method: impl Into<String>,
        amount: Money,
        metadata: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: PaymentId::new(),
            method: method.into(),
            amount,
            state: PaymentState::Created,
            transaction_id: None,
            metadata,
            refunds: Vec::new(),
            created_at: now,
        }
    }

    /// Whether funds have been captured.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.state == PaymentState::Settled
    }

    /// Total returned through refunds that have not failed.
    #[must_use]
    pub fn refunded_total(&self) -> Money {
        self.refunds
            .iter()
            .filter(|refund| refund.state != RefundState::Failed)
            .map(|refund| refund.total)
            .sum()
    }

    /// Amount still available to refund.
    #[must_use]
    pub fn refundable(&self) -> Money {
        (self.amount - self.refunded_total()).max_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payment(amount: i64) -> Payment {
        Payment::new("test-method", Money::from_minor(amount), serde_json::Value::Null, Utc::now())
    }

    #[test]
    fn new_payments_start_created() {
        let p = payment(12_000);
        assert_eq!(p.state, PaymentState::Created);
        assert_eq!(p.refundable(), Money::from_minor(12_000));
    }

    #[test]
    fn failed_refunds_do_not_consume_refundable() {
        let mut p = payment(10_000);
        let mut refund = Refund::new(p.id, Money::from_minor(4000), Utc::now());
        refund.state = RefundState::Failed;
        p.refunds.push(refund);
        p.refunds.push(Refund::new(p.id, Money::from_minor(1000), Utc::now()));
        assert_eq!(p.refunded_total(), Money::from_minor(1000));
        assert_eq!(p.refundable(), Money::from_minor(9000));
    }

    #[test]
    fn refund_machine_only_leaves_pending() {
        assert!(RefundState::can_transition(RefundState::Pending, RefundState::Settled));
        assert!(RefundState::can_transition(RefundState::Pending, RefundState::Failed));
        assert!(!RefundState::can_transition(RefundState::Settled, RefundState::Failed));
        assert!(!RefundState::can_transition(RefundState::Failed, RefundState::Pending));
    }
}

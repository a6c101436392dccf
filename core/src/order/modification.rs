//! Order modification audit records.

use crate::id::{OrderItemId, OrderModificationId, PaymentId, RefundId, SurchargeId};
use crate::money::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Immutable record of one applied (non-dry-run) order modification.
///
/// A modification is settled once money stopped being owed in either
/// direction: zero or negative price changes settle at creation (the
/// refunds are created alongside), positive ones settle when the
/// additional payment covering them is recorded.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderModification {
    /// Modification identifier.
    pub id: OrderModificationId,
    /// When the modification was applied.
    pub created_at: DateTime<Utc>,
    /// With-tax delta against the order total before the modification.
    pub price_change: Money,
    /// Operator note explaining the change.
    pub note: String,
    /// Units added or cancelled by this modification.
    pub item_ids: Vec<OrderItemId>,
    /// Surcharges added by this modification.
    pub surcharge_ids: Vec<SurchargeId>,
    /// Refunds created for a negative price change.
    pub refund_ids: Vec<RefundId>,
    /// Payment that covered a positive price change, once recorded.
    pub payment_id: Option<PaymentId>,
}

impl OrderModification {
    /// Creates a record for the given price change.
    #[must_use]
    pub fn new(price_change: Money, note: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: OrderModificationId::new(),
            created_at: now,
            price_change,
            note: note.into(),
            item_ids: Vec::new(),
            surcharge_ids: Vec::new(),
            refund_ids: Vec::new(),
            payment_id: None,
        }
    }

    /// Whether the price change has been fully paid out or in.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        !self.price_change.is_positive() || self.payment_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settlement_follows_price_change_sign() {
        let now = Utc::now();
        assert!(OrderModification::new(Money::ZERO, "noop", now).is_settled());
        assert!(OrderModification::new(Money::from_minor(-500), "refunded", now).is_settled());

        let mut owing = OrderModification::new(Money::from_minor(500), "extra", now);
        assert!(!owing.is_settled());
        owing.payment_id = Some(PaymentId::new());
        assert!(owing.is_settled());
    }
}

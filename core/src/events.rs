//! Domain events published after successful commits.
//!
//! Operations buffer events while they mutate the working copy and hand
//! the buffer to the [`EventPublisher`] only after the store commit
//! succeeds. Dry runs and failed operations never publish anything.

use crate::context::RequestContext;
use crate::id::{
    CustomerId, FulfillmentId, OrderId, OrderModificationId, PaymentId, RefundId,
};
use crate::money::Money;
use crate::order::fulfillment::FulfillmentState;
use crate::order::payment::{PaymentState, RefundState};
use crate::order::OrderState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Something that happened to an order, published after the commit that
/// made it true.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum DomainEvent {
    /// The order crossed its placement boundary. Fired exactly once per
    /// order.
    OrderPlaced {
        /// The placed order.
        order_id: OrderId,
        /// When placement happened.
        placed_at: DateTime<Utc>,
    },
    /// The order moved to a new state.
    OrderStateTransitioned {
        /// The order.
        order_id: OrderId,
        /// State before.
        from: OrderState,
        /// State after.
        to: OrderState,
    },
    /// A payment moved to a new state.
    PaymentStateTransitioned {
        /// The owning order.
        order_id: OrderId,
        /// The payment.
        payment_id: PaymentId,
        /// State before.
        from: PaymentState,
        /// State after.
        to: PaymentState,
    },
    /// A fulfillment moved to a new state.
    FulfillmentStateTransitioned {
        /// The owning order.
        order_id: OrderId,
        /// The fulfillment.
        fulfillment_id: FulfillmentId,
        /// State before.
        from: FulfillmentState,
        /// State after.
        to: FulfillmentState,
    },
    /// A refund moved to a new state.
    RefundStateTransitioned {
        /// The owning order.
        order_id: OrderId,
        /// The refund.
        refund_id: RefundId,
        /// State before.
        from: RefundState,
        /// State after.
        to: RefundState,
    },
    /// A coupon code was applied to the order.
    CouponCodeApplied {
        /// The order.
        order_id: OrderId,
        /// The applied code.
        coupon_code: String,
    },
    /// A coupon code was removed from the order.
    CouponCodeRemoved {
        /// The order.
        order_id: OrderId,
        /// The removed code.
        coupon_code: String,
    },
    /// A non-dry-run modification was applied.
    OrderModified {
        /// The modified order.
        order_id: OrderId,
        /// The audit record created.
        modification_id: OrderModificationId,
        /// With-tax price delta of the modification.
        price_change: Money,
    },
    /// A guest order was reconciled into a customer's order.
    OrderMerged {
        /// The deleted guest order.
        guest_order_id: OrderId,
        /// The surviving order.
        order_id: OrderId,
        /// The customer both orders now belong to.
        customer_id: CustomerId,
    },
}

/// Buffer of events pending the commit of one operation.
pub type PendingEvents = SmallVec<[DomainEvent; 4]>;

/// Consumer of committed domain events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes one event. Called after the commit it describes.
    async fn publish(&self, ctx: &RequestContext, event: DomainEvent);
}

/// Publisher that drops every event. The default.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopPublisher;

#[async_trait]
impl EventPublisher for NoopPublisher {
    async fn publish(&self, _ctx: &RequestContext, _event: DomainEvent) {}
}

//! The Order aggregate.
//!
//! An [`Order`] owns its lines, surcharges, payments, fulfillments, and
//! modification records. Engine operations load the aggregate, mutate a
//! working copy, and commit it atomically; no entity inside the aggregate
//! is ever persisted on its own.

pub mod address;
pub mod fulfillment;
pub mod line;
pub mod modification;
pub mod payment;
pub mod surcharge;

pub use address::Address;
pub use fulfillment::{Fulfillment, FulfillmentState};
pub use line::{OrderItem, OrderLine};
pub use modification::OrderModification;
pub use payment::{Payment, PaymentState, Refund, RefundState};
pub use surcharge::Surcharge;

use crate::custom_fields::CustomFields;
use crate::id::{
    ChannelId, CustomerId, FulfillmentId, OrderId, OrderItemId, OrderLineId, PaymentId,
    PromotionId, RefundId,
};
use crate::money::{Money, TaxRate};
use crate::promotion::Adjustment;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of an [`Order`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderState {
    /// The customer is still building the order.
    AddingItems,
    /// Contents locked; waiting for payment to be arranged.
    ArrangingPayment,
    /// Payment authorized but not captured.
    PaymentAuthorized,
    /// Payment captured in full.
    PaymentSettled,
    /// Some units have shipped.
    PartiallyShipped,
    /// All units have shipped.
    Shipped,
    /// Some units have been delivered.
    PartiallyDelivered,
    /// All units have been delivered.
    Delivered,
    /// An operator is modifying the placed order.
    Modifying,
    /// A modification raised the total; awaiting the extra payment.
    ArrangingAdditionalPayment,
    /// Terminal: the order was cancelled.
    Cancelled,
    /// Plugin-defined state merged in by a custom order process.
    Custom(String),
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddingItems => write!(f, "AddingItems"),
            Self::ArrangingPayment => write!(f, "ArrangingPayment"),
            Self::PaymentAuthorized => write!(f, "PaymentAuthorized"),
            Self::PaymentSettled => write!(f, "PaymentSettled"),
            Self::PartiallyShipped => write!(f, "PartiallyShipped"),
            Self::Shipped => write!(f, "Shipped"),
            Self::PartiallyDelivered => write!(f, "PartiallyDelivered"),
            Self::Delivered => write!(f, "Delivered"),
            Self::Modifying => write!(f, "Modifying"),
            Self::ArrangingAdditionalPayment => write!(f, "ArrangingAdditionalPayment"),
            Self::Cancelled => write!(f, "Cancelled"),
            Self::Custom(name) => write!(f, "{name}"),
        }
    }
}

/// The order aggregate root.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Order identifier.
    pub id: OrderId,
    /// Human-facing order reference.
    pub code: String,
    /// Where the order is in its lifecycle.
    pub state: OrderState,
    /// True until the order is placed or cancelled.
    pub active: bool,
    /// The customer the order belongs to, once known.
    pub customer_id: Option<CustomerId>,
    /// Sales channel the order was created in.
    pub channel_id: ChannelId,
    /// ISO 4217 currency code all amounts are in.
    pub currency_code: String,
    /// Lines, one per variant and custom-field bag.
    pub lines: Vec<OrderLine>,
    /// Ad-hoc surcharges added during modification.
    pub surcharges: Vec<Surcharge>,
    /// Payments recorded against the order.
    pub payments: Vec<Payment>,
    /// Shipments of the order's units.
    pub fulfillments: Vec<Fulfillment>,
    /// Audit trail of applied modifications.
    pub modifications: Vec<OrderModification>,
    /// Coupon codes currently applied, in application order.
    pub coupon_codes: Vec<String>,
    /// Promotions applied as of the last evaluation; drives
    /// activation/deactivation side effects.
    pub active_promotion_ids: Vec<PromotionId>,
    /// Destination address snapshot.
    pub shipping_address: Option<Address>,
    /// Billing address snapshot.
    pub billing_address: Option<Address>,
    /// Net shipping price from the last quote.
    pub shipping: Money,
    /// Tax rate on shipping.
    pub shipping_tax_rate: TaxRate,
    /// Order-scoped promotion effects; rewritten on every evaluation pass.
    pub adjustments: Vec<Adjustment>,
    /// Shipping-scoped promotion effects; rewritten on every evaluation pass.
    pub shipping_adjustments: Vec<Adjustment>,
    /// Custom-field bag for the `"Order"` entity.
    pub custom_fields: CustomFields,
    /// Set exactly once, when the order crosses its placement boundary.
    pub placed_at: Option<DateTime<Utc>>,
    /// When the order was created.
    pub created_at: DateTime<Utc>,
    /// When the order was last written.
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency token; checked and bumped by the store.
    pub version: u64,

    /// Cached: net sum of discounted line totals.
    pub sub_total: Money,
    /// Cached: gross sum of discounted line totals.
    pub sub_total_with_tax: Money,
    /// Cached: gross shipping after shipping-scoped adjustments.
    pub shipping_with_tax: Money,
    /// Cached: net order total.
    pub total: Money,
    /// Cached: gross order total. The amount the customer pays.
    pub total_with_tax: Money,
}

impl Order {
    /// Creates an empty active order in the `AddingItems` state.
    #[must_use]
    pub fn new(channel_id: ChannelId, currency_code: impl Into<String>, now: DateTime<Utc>) -> Self {
        let id = OrderId::new();
        Self {
            id,
            code: generate_code(&id),
            state: OrderState::AddingItems,
            active: true,
            customer_id: None,
            channel_id,
            currency_code: currency_code.into(),
            lines: Vec::new(),
            surcharges: Vec::new(),
            payments: Vec::new(),
            fulfillments: Vec::new(),
            modifications: Vec::new(),
            coupon_codes: Vec::new(),
            active_promotion_ids: Vec::new(),
            shipping_address: None,
            billing_address: None,
            shipping: Money::ZERO,
            shipping_tax_rate: TaxRate::ZERO,
            adjustments: Vec::new(),
            shipping_adjustments: Vec::new(),
            custom_fields: CustomFields::new(),
            placed_at: None,
            created_at: now,
            updated_at: now,
            version: 0,
            sub_total: Money::ZERO,
            sub_total_with_tax: Money::ZERO,
            shipping_with_tax: Money::ZERO,
            total: Money::ZERO,
            total_with_tax: Money::ZERO,
        }
    }

    /// Live units across all lines.
    #[must_use]
    pub fn total_quantity(&self) -> u32 {
        self.lines.iter().map(OrderLine::quantity).sum()
    }

    /// Whether the order has no live units.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total_quantity() == 0
    }

    /// Line by id.
    #[must_use]
    pub fn get_line(&self, id: OrderLineId) -> Option<&OrderLine> {
        self.lines.iter().find(|line| line.id == id)
    }

    /// Mutable line by id.
    pub fn get_line_mut(&mut self, id: OrderLineId) -> Option<&mut OrderLine> {
        self.lines.iter_mut().find(|line| line.id == id)
    }

    /// Index of the line selling `variant_id` with an identical
    /// custom-field bag, if one exists. The bag is part of line identity.
    #[must_use]
    pub fn matching_line_index(
        &self,
        variant_id: crate::id::VariantId,
        custom_fields: &CustomFields,
    ) -> Option<usize> {
        self.lines
            .iter()
            .position(|line| line.variant_id == variant_id && &line.custom_fields == custom_fields)
    }

    /// The line and unit owning `item_id`.
    #[must_use]
    pub fn find_item(&self, item_id: OrderItemId) -> Option<(&OrderLine, &OrderItem)> {
        self.lines.iter().find_map(|line| {
            line.items.iter().find(|item| item.id == item_id).map(|item| (line, item))
        })
    }

    /// Payment by id.
    #[must_use]
    pub fn payment(&self, id: PaymentId) -> Option<&Payment> {
        self.payments.iter().find(|p| p.id == id)
    }

    /// Mutable payment by id.
    pub fn payment_mut(&mut self, id: PaymentId) -> Option<&mut Payment> {
        self.payments.iter_mut().find(|p| p.id == id)
    }

    /// Fulfillment by id.
    #[must_use]
    pub fn fulfillment(&self, id: FulfillmentId) -> Option<&Fulfillment> {
        self.fulfillments.iter().find(|f| f.id == id)
    }

    /// Mutable fulfillment by id.
    pub fn fulfillment_mut(&mut self, id: FulfillmentId) -> Option<&mut Fulfillment> {
        self.fulfillments.iter_mut().find(|f| f.id == id)
    }

    /// Mutable refund by id, searching every payment.
    pub fn refund_mut(&mut self, id: RefundId) -> Option<&mut Refund> {
        self.payments.iter_mut().find_map(|p| p.refunds.iter_mut().find(|r| r.id == id))
    }

    /// Sum of settled payment amounts.
    #[must_use]
    pub fn total_settled(&self) -> Money {
        self.payments.iter().filter(|p| p.is_settled()).map(|p| p.amount).sum()
    }

    /// Sum of authorized (not yet captured) payment amounts.
    #[must_use]
    pub fn total_authorized(&self) -> Money {
        self.payments
            .iter()
            .filter(|p| p.state == PaymentState::Authorized)
            .map(|p| p.amount)
            .sum()
    }

    /// Total returned to the customer through non-failed refunds.
    #[must_use]
    pub fn total_refunded(&self) -> Money {
        self.payments.iter().map(Payment::refunded_total).sum()
    }

    /// What the customer has effectively paid: settled minus refunded.
    #[must_use]
    pub fn total_covered(&self) -> Money {
        self.total_settled() - self.total_refunded()
    }

    /// Amount still owed by the customer. Negative when the order is
    /// overpaid (a refund is outstanding).
    #[must_use]
    pub fn outstanding(&self) -> Money {
        self.total_with_tax - self.total_covered()
    }

    /// The modification still awaiting its covering payment, if any.
    #[must_use]
    pub fn unsettled_modification(&self) -> Option<&OrderModification> {
        self.modifications.iter().find(|m| !m.is_settled())
    }

    /// Mutable variant of [`unsettled_modification`](Self::unsettled_modification).
    pub fn unsettled_modification_mut(&mut self) -> Option<&mut OrderModification> {
        self.modifications.iter_mut().find(|m| !m.is_settled())
    }

    /// Order state implied by the fulfillment states of the live units,
    /// or `None` while nothing has shipped.
    #[must_use]
    pub fn fulfillment_derived_state(&self) -> Option<OrderState> {
        let mut live = 0u32;
        let mut shipped = 0u32;
        let mut delivered = 0u32;
        for line in &self.lines {
            for item in line.live_items() {
                live += 1;
                let state = item
                    .fulfillment_id
                    .and_then(|id| self.fulfillment(id))
                    .map(|f| f.state.clone());
                match state {
                    Some(FulfillmentState::Delivered) => {
                        delivered += 1;
                        shipped += 1;
                    }
                    Some(FulfillmentState::Shipped) => shipped += 1,
                    _ => {}
                }
            }
        }
        if live == 0 || shipped == 0 {
            return None;
        }
        if delivered == live {
            Some(OrderState::Delivered)
        } else if delivered > 0 {
            Some(OrderState::PartiallyDelivered)
        } else if shipped == live {
            Some(OrderState::Shipped)
        } else {
            Some(OrderState::PartiallyShipped)
        }
    }

    /// Drops every promotion adjustment ahead of a fresh evaluation pass.
    pub fn clear_adjustments(&mut self) {
        for line in &mut self.lines {
            line.adjustments.clear();
        }
        self.adjustments.clear();
        self.shipping_adjustments.clear();
    }

    /// Stamps the aggregate as written now.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}

/// Derives the human-facing order code from the order id.
fn generate_code(id: &OrderId) -> String {
    let hex = id.as_uuid().simple().to_string();
    hex[..12].to_uppercase()
}

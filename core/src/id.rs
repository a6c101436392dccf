//! Entity identifiers.
//!
//! Every entity gets its own UUID newtype so ids of different entities
//! cannot be confused at compile time.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wraps an existing `Uuid`.
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

entity_id!(
    /// Unique identifier for an Order aggregate.
    OrderId
);
entity_id!(
    /// Unique identifier for an OrderLine.
    OrderLineId
);
entity_id!(
    /// Unique identifier for a single OrderItem unit.
    OrderItemId
);
entity_id!(
    /// Unique identifier for a Payment.
    PaymentId
);
entity_id!(
    /// Unique identifier for a Refund.
    RefundId
);
entity_id!(
    /// Unique identifier for a Fulfillment.
    FulfillmentId
);
entity_id!(
    /// Unique identifier for a Surcharge.
    SurchargeId
);
entity_id!(
    /// Unique identifier for an OrderModification record.
    OrderModificationId
);
entity_id!(
    /// Unique identifier for a Promotion.
    PromotionId
);
entity_id!(
    /// Unique identifier for a purchasable product variant.
    VariantId
);
entity_id!(
    /// Unique identifier for a Customer.
    CustomerId
);
entity_id!(
    /// Unique identifier for a sales Channel.
    ChannelId
);

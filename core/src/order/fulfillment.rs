//! Fulfillments: physical shipments of order units.

use crate::id::{FulfillmentId, OrderItemId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a [`Fulfillment`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FulfillmentState {
    /// Created, waiting to leave the warehouse.
    Pending,
    /// Handed to the carrier.
    Shipped,
    /// Received by the customer.
    Delivered,
    /// Abandoned; its units become fulfillable again.
    Cancelled,
    /// Plugin-defined state merged in by a custom fulfillment process.
    Custom(String),
}

impl fmt::Display for FulfillmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Shipped => write!(f, "Shipped"),
            Self::Delivered => write!(f, "Delivered"),
            Self::Cancelled => write!(f, "Cancelled"),
            Self::Custom(name) => write!(f, "{name}"),
        }
    }
}

/// A shipment covering some or all of an Order's units.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Fulfillment {
    /// Fulfillment identifier.
    pub id: FulfillmentId,
    /// Where the shipment is in its lifecycle.
    pub state: FulfillmentState,
    /// Shipping method or handler code.
    pub method: String,
    /// Carrier tracking code, if known.
    pub tracking_code: String,
    /// Units travelling in this shipment.
    pub item_ids: Vec<OrderItemId>,
    /// When the fulfillment was created.
    pub created_at: DateTime<Utc>,
}

impl Fulfillment {
    /// Creates a pending fulfillment over the given units.
    #[must_use]
    pub fn new(
        method: impl Into<String>,
        tracking_code: impl Into<String>,
        item_ids: Vec<OrderItemId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: FulfillmentId::new(),
            state: FulfillmentState::Pending,
            method: method.into(),
            tracking_code: tracking_code.into(),
            item_ids,
            created_at: now,
        }
    }
}

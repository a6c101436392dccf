//! The persistence seam.
//!
//! The engine never issues queries of its own: it loads a consistent
//! snapshot of the aggregate through [`OrderStore`], mutates a working
//! copy, and hands the store one atomic [`OrderCommit`]. Everything in a
//! commit applies together or not at all, and a commit based on a stale
//! order version must fail with [`StoreError::VersionConflict`]; that
//! version check is what serializes concurrent mutations of one order.

use crate::context::RequestContext;
use crate::error::StoreError;
use crate::id::{CustomerId, OrderId, VariantId};
use crate::money::{Money, TaxRate};
use crate::order::Order;
use crate::promotion::Promotion;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Catalog data the engine needs about a purchasable variant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProductVariant {
    /// Variant identifier.
    pub id: VariantId,
    /// Stock-keeping unit code.
    pub sku: String,
    /// Current net list price.
    pub list_price: Money,
    /// Tax rate for the variant.
    pub tax_rate: TaxRate,
    /// Physical units in the warehouse.
    pub stock_on_hand: u32,
    /// Units already allocated to placed orders.
    pub stock_allocated: u32,
}

impl ProductVariant {
    /// Units that can still be sold.
    #[must_use]
    pub const fn saleable(&self) -> u32 {
        self.stock_on_hand.saturating_sub(self.stock_allocated)
    }
}

/// A change to one variant's allocated stock, carried inside a commit.
/// Positive deltas allocate (placement, modification adds), negative ones
/// release (cancellation, quantity decreases).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAdjustment {
    /// The variant whose allocation moves.
    pub variant_id: VariantId,
    /// Signed number of units.
    pub delta: i64,
}

/// Everything one engine operation writes, applied atomically.
#[derive(Clone, Debug)]
pub struct OrderCommit {
    /// The aggregate as it should be stored. `order.version` is the
    /// version the mutation was based on; the store bumps it on success.
    pub order: Order,
    /// Orders to delete in the same transaction (the guest order after a
    /// merge).
    pub delete_order_ids: Vec<OrderId>,
    /// Stock allocation deltas to apply in the same transaction.
    pub stock_adjustments: Vec<StockAdjustment>,
}

impl OrderCommit {
    /// A commit writing just the order.
    #[must_use]
    pub const fn order(order: Order) -> Self {
        Self { order, delete_order_ids: Vec::new(), stock_adjustments: Vec::new() }
    }
}

/// Persistence operations the engine depends on.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Loads the full aggregate for `order_id`.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] when the order does not exist.
    async fn load_order(&self, ctx: &RequestContext, order_id: OrderId)
        -> Result<Order, StoreError>;

    /// The customer's active (not yet placed) order, if any.
    ///
    /// # Errors
    ///
    /// Backend failures only; no active order is `Ok(None)`.
    async fn find_active_order(
        &self,
        ctx: &RequestContext,
        customer_id: CustomerId,
    ) -> Result<Option<Order>, StoreError>;

    /// Catalog lookup for a variant.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] when the variant does not exist.
    async fn variant(
        &self,
        ctx: &RequestContext,
        variant_id: VariantId,
    ) -> Result<ProductVariant, StoreError>;

    /// All promotions that could currently apply on this channel.
    ///
    /// # Errors
    ///
    /// Backend failures.
    async fn active_promotions(&self, ctx: &RequestContext) -> Result<Vec<Promotion>, StoreError>;

    /// Number of completed orders by `customer_id` that carried
    /// `coupon_code`. Drives per-customer usage limits.
    ///
    /// # Errors
    ///
    /// Backend failures.
    async fn coupon_usage_count(
        &self,
        ctx: &RequestContext,
        coupon_code: &str,
        customer_id: CustomerId,
    ) -> Result<u32, StoreError>;

    /// Number of completed orders, by anyone, that carried `coupon_code`.
    /// Drives global usage limits.
    ///
    /// # Errors
    ///
    /// Backend failures.
    async fn total_coupon_usage_count(
        &self,
        ctx: &RequestContext,
        coupon_code: &str,
    ) -> Result<u32, StoreError>;

    /// Applies a commit atomically and returns the stored order with its
    /// version bumped.
    ///
    /// # Errors
    ///
    /// [`StoreError::VersionConflict`] when the stored version moved since
    /// the order was loaded; backend failures otherwise.
    async fn commit(&self, ctx: &RequestContext, commit: OrderCommit) -> Result<Order, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saleable_stock_never_underflows() {
        let variant = ProductVariant {
            id: VariantId::new(),
            sku: "SKU-1".into(),
            list_price: Money::from_minor(5374),
            tax_rate: TaxRate::from_percent(20),
            stock_on_hand: 3,
            stock_allocated: 5,
        };
        assert_eq!(variant.saleable(), 0);
    }
}

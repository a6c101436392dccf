//! In-memory [`OrderStore`] with real version-checked commits.
//!
//! Commits behave like the production store is required to: the whole
//! [`OrderCommit`] applies together, the stored version is checked against
//! the one the mutation was based on, and stock deltas land on the seeded
//! variants. That makes optimistic-concurrency and allocation behavior
//! testable without a database.

use async_trait::async_trait;
use orderflow_core::context::RequestContext;
use orderflow_core::error::StoreError;
use orderflow_core::id::{CustomerId, OrderId, VariantId};
use orderflow_core::money::{Money, TaxRate};
use orderflow_core::order::Order;
use orderflow_core::promotion::Promotion;
use orderflow_core::store::{OrderCommit, OrderStore, ProductVariant};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Everything the engine persists, held in hash maps.
#[derive(Debug, Default)]
pub struct InMemoryOrderStore {
    orders: Mutex<HashMap<OrderId, Order>>,
    variants: Mutex<HashMap<VariantId, ProductVariant>>,
    promotions: Mutex<Vec<Promotion>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl InMemoryOrderStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a variant and returns its id.
    pub fn seed_variant(
        &self,
        sku: impl Into<String>,
        list_price: Money,
        tax_rate: TaxRate,
        stock_on_hand: u32,
    ) -> VariantId {
        let variant = ProductVariant {
            id: VariantId::new(),
            sku: sku.into(),
            list_price,
            tax_rate,
            stock_on_hand,
            stock_allocated: 0,
        };
        let id = variant.id;
        lock(&self.variants).insert(id, variant);
        id
    }

    /// Replaces a seeded variant's list price, simulating catalog drift.
    pub fn set_variant_price(&self, variant_id: VariantId, list_price: Money) {
        if let Some(variant) = lock(&self.variants).get_mut(&variant_id) {
            variant.list_price = list_price;
        }
    }

    /// Current snapshot of a seeded variant, allocations included.
    #[must_use]
    pub fn variant_snapshot(&self, variant_id: VariantId) -> Option<ProductVariant> {
        lock(&self.variants).get(&variant_id).cloned()
    }

    /// Inserts an order directly, bypassing the commit path.
    pub fn insert_order(&self, order: Order) {
        lock(&self.orders).insert(order.id, order);
    }

    /// Whether an order is stored, deleted guest orders included.
    #[must_use]
    pub fn contains_order(&self, order_id: OrderId) -> bool {
        lock(&self.orders).contains_key(&order_id)
    }

    /// Makes a promotion available to the engine.
    pub fn seed_promotion(&self, promotion: Promotion) {
        lock(&self.promotions).push(promotion);
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn load_order(
        &self,
        _ctx: &RequestContext,
        order_id: OrderId,
    ) -> Result<Order, StoreError> {
        lock(&self.orders).get(&order_id).cloned().ok_or_else(|| StoreError::NotFound {
            entity: "Order",
            id: order_id.to_string(),
        })
    }

    async fn find_active_order(
        &self,
        _ctx: &RequestContext,
        customer_id: CustomerId,
    ) -> Result<Option<Order>, StoreError> {
        Ok(lock(&self.orders)
            .values()
            .find(|order| order.active && order.customer_id == Some(customer_id))
            .cloned())
    }

    async fn variant(
        &self,
        _ctx: &RequestContext,
        variant_id: VariantId,
    ) -> Result<ProductVariant, StoreError> {
        lock(&self.variants).get(&variant_id).cloned().ok_or_else(|| StoreError::NotFound {
            entity: "ProductVariant",
            id: variant_id.to_string(),
        })
    }

    async fn active_promotions(&self, _ctx: &RequestContext) -> Result<Vec<Promotion>, StoreError> {
        Ok(lock(&self.promotions).clone())
    }

    async fn coupon_usage_count(
        &self,
        _ctx: &RequestContext,
        coupon_code: &str,
        customer_id: CustomerId,
    ) -> Result<u32, StoreError> {
        let count = lock(&self.orders)
            .values()
            .filter(|order| {
                order.placed_at.is_some()
                    && order.customer_id == Some(customer_id)
                    && order.coupon_codes.iter().any(|code| code == coupon_code)
            })
            .count();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn total_coupon_usage_count(
        &self,
        _ctx: &RequestContext,
        coupon_code: &str,
    ) -> Result<u32, StoreError> {
        let count = lock(&self.orders)
            .values()
            .filter(|order| {
                order.placed_at.is_some()
                    && order.coupon_codes.iter().any(|code| code == coupon_code)
            })
            .count();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn commit(
        &self,
        _ctx: &RequestContext,
        commit: OrderCommit,
    ) -> Result<Order, StoreError> {
        let mut orders = lock(&self.orders);
        if let Some(stored) = orders.get(&commit.order.id) {
            if stored.version != commit.order.version {
                return Err(StoreError::VersionConflict {
                    order_id: commit.order.id,
                    expected: commit.order.version,
                    actual: stored.version,
                });
            }
        }

        let mut variants = lock(&self.variants);
        for adjustment in &commit.stock_adjustments {
            let variant =
                variants.get_mut(&adjustment.variant_id).ok_or_else(|| StoreError::NotFound {
                    entity: "ProductVariant",
                    id: adjustment.variant_id.to_string(),
                })?;
            let allocated = i64::from(variant.stock_allocated) + adjustment.delta;
            variant.stock_allocated = u32::try_from(allocated.max(0)).unwrap_or(0);
        }

        for order_id in &commit.delete_order_ids {
            orders.remove(order_id);
        }

        let mut order = commit.order;
        order.version += 1;
        orders.insert(order.id, order.clone());
        Ok(order)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // test assertions may unwrap
mod tests {
    use super::*;
    use crate::mocks::test_context;
    use chrono::Utc;
    use orderflow_core::id::ChannelId;
    use orderflow_core::store::StockAdjustment;

    #[tokio::test]
    async fn stale_commits_are_rejected() {
        let store = InMemoryOrderStore::new();
        let ctx = test_context();
        let order = Order::new(ChannelId::new(), "USD", Utc::now());
        let stored = store.commit(&ctx, OrderCommit::order(order)).await.unwrap();
        assert_eq!(stored.version, 1);

        // First writer wins; the copy still at version 1 conflicts.
        let fresh = store.commit(&ctx, OrderCommit::order(stored.clone())).await.unwrap();
        assert_eq!(fresh.version, 2);
        let err = store.commit(&ctx, OrderCommit::order(stored)).await.unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { expected: 1, actual: 2, .. }));
    }

    #[tokio::test]
    async fn commits_apply_stock_deltas() {
        let store = InMemoryOrderStore::new();
        let ctx = test_context();
        let variant_id =
            store.seed_variant("SKU-1", Money::from_minor(1000), TaxRate::ZERO, 10);
        let order = Order::new(ChannelId::new(), "USD", Utc::now());
        let commit = OrderCommit {
            order,
            delete_order_ids: Vec::new(),
            stock_adjustments: vec![StockAdjustment { variant_id, delta: 3 }],
        };
        store.commit(&ctx, commit).await.unwrap();
        let variant = store.variant_snapshot(variant_id).unwrap();
        assert_eq!(variant.stock_allocated, 3);
        assert_eq!(variant.saleable(), 7);
    }

    #[tokio::test]
    async fn coupon_usage_counts_placed_orders_only() {
        let store = InMemoryOrderStore::new();
        let ctx = test_context();
        let customer = CustomerId::new();

        let mut placed = Order::new(ChannelId::new(), "USD", Utc::now());
        placed.customer_id = Some(customer);
        placed.coupon_codes.push("SAVE10".into());
        placed.placed_at = Some(Utc::now());
        store.insert_order(placed);

        let mut open = Order::new(ChannelId::new(), "USD", Utc::now());
        open.customer_id = Some(customer);
        open.coupon_codes.push("SAVE10".into());
        store.insert_order(open);

        assert_eq!(store.coupon_usage_count(&ctx, "SAVE10", customer).await.unwrap(), 1);
        assert_eq!(store.total_coupon_usage_count(&ctx, "SAVE10").await.unwrap(), 1);
        assert_eq!(store.coupon_usage_count(&ctx, "OTHER", customer).await.unwrap(), 0);
    }
}

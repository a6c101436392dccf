//! Engine configuration: every pluggable strategy in one place.
//!
//! Hosts build an [`OrderEngineConfig`] at startup and hand it to the
//! [`OrderService`](crate::service::OrderService). Every slot has a
//! sensible default, so `OrderEngineConfig::default()` is a working
//! configuration.

use crate::context::RequestContext;
use crate::custom_fields::CustomFieldsRegistry;
use crate::merge::{MergeOrdersStrategy, OrderMergeStrategy};
use crate::money::Money;
use crate::order::fulfillment::FulfillmentState;
use crate::order::payment::PaymentState;
use crate::order::{Order, OrderLine, OrderState};
use crate::process::{
    DefaultFulfillmentProcess, DefaultOrderPlacedStrategy, DefaultOrderProcess,
    DefaultPaymentProcess, FulfillmentProcess, OrderPlacedStrategy, OrderProcess, PaymentProcess,
};
use crate::promotion::{default_registry, PromotionAction, PromotionCondition, PromotionRegistry};
use crate::shipping::{FlatRateShippingCalculator, ShippingCalculator};
use crate::state_machine::Transitions;
use crate::store::ProductVariant;
use async_trait::async_trait;
use std::sync::Arc;

/// Decides what an existing line should charge when the catalog price of
/// its variant has moved since the line was created.
pub trait ChangedPriceHandlingStrategy: Send + Sync {
    /// Net unit price the line should use, given the latest list price.
    fn price_for_existing_line(
        &self,
        ctx: &RequestContext,
        line: &OrderLine,
        latest_list_price: Money,
    ) -> Money;
}

/// Always charges the latest catalog price. The default.
#[derive(Clone, Copy, Debug, Default)]
pub struct UseLatestPriceStrategy;

impl ChangedPriceHandlingStrategy for UseLatestPriceStrategy {
    fn price_for_existing_line(
        &self,
        _ctx: &RequestContext,
        _line: &OrderLine,
        latest_list_price: Money,
    ) -> Money {
        latest_list_price
    }
}

/// Keeps charging whatever the line already charges.
#[derive(Clone, Copy, Debug, Default)]
pub struct KeepCurrentPriceStrategy;

impl ChangedPriceHandlingStrategy for KeepCurrentPriceStrategy {
    fn price_for_existing_line(
        &self,
        _ctx: &RequestContext,
        line: &OrderLine,
        _latest_list_price: Money,
    ) -> Money {
        line.unit_price
    }
}

/// Veto point ahead of order-content mutations. Interceptors run in
/// registration order; the first veto aborts the operation with the veto
/// string surfaced in [`OrderError::Intercepted`](crate::error::OrderError).
#[async_trait]
pub trait OrderInterceptor: Send + Sync {
    /// Runs before units of `variant` are added to the order.
    ///
    /// # Errors
    ///
    /// The veto message.
    async fn will_add_item(
        &self,
        _ctx: &RequestContext,
        _order: &Order,
        _variant: &ProductVariant,
        _quantity: u32,
    ) -> Result<(), String> {
        Ok(())
    }

    /// Runs before a line's quantity changes.
    ///
    /// # Errors
    ///
    /// The veto message.
    async fn will_adjust_line(
        &self,
        _ctx: &RequestContext,
        _order: &Order,
        _line: &OrderLine,
        _new_quantity: u32,
    ) -> Result<(), String> {
        Ok(())
    }

    /// Runs before a line is removed outright.
    ///
    /// # Errors
    ///
    /// The veto message.
    async fn will_remove_line(
        &self,
        _ctx: &RequestContext,
        _order: &Order,
        _line: &OrderLine,
    ) -> Result<(), String> {
        Ok(())
    }
}

/// All pluggable behavior of the order engine.
#[derive(Clone)]
pub struct OrderEngineConfig {
    /// Order processes, in registration order.
    pub order_processes: Vec<Arc<dyn OrderProcess>>,
    /// Payment processes, in registration order.
    pub payment_processes: Vec<Arc<dyn PaymentProcess>>,
    /// Fulfillment processes, in registration order.
    pub fulfillment_processes: Vec<Arc<dyn FulfillmentProcess>>,
    /// Decides which transitions place an order.
    pub placed_strategy: Arc<dyn OrderPlacedStrategy>,
    /// Reconciles guest and customer orders at login.
    pub merge_strategy: Arc<dyn OrderMergeStrategy>,
    /// Prices shipping.
    pub shipping_calculator: Arc<dyn ShippingCalculator>,
    /// Handles catalog price drift on existing lines.
    pub changed_price_handling: Arc<dyn ChangedPriceHandlingStrategy>,
    /// Content-mutation veto points, in registration order.
    pub interceptors: Vec<Arc<dyn OrderInterceptor>>,
    /// Registered promotion conditions and actions.
    pub promotions: PromotionRegistry,
    /// Custom-field declarations for Order and OrderLine.
    pub custom_fields: CustomFieldsRegistry,
    /// Most live units an order may hold.
    pub max_order_items: u32,
}

impl Default for OrderEngineConfig {
    fn default() -> Self {
        Self {
            order_processes: vec![Arc::new(DefaultOrderProcess)],
            payment_processes: vec![Arc::new(DefaultPaymentProcess)],
            fulfillment_processes: vec![Arc::new(DefaultFulfillmentProcess)],
            placed_strategy: Arc::new(DefaultOrderPlacedStrategy),
            merge_strategy: Arc::new(MergeOrdersStrategy),
            shipping_calculator: Arc::new(FlatRateShippingCalculator::default()),
            changed_price_handling: Arc::new(UseLatestPriceStrategy),
            interceptors: Vec::new(),
            promotions: default_registry(),
            custom_fields: CustomFieldsRegistry::new(),
            max_order_items: 999,
        }
    }
}

impl OrderEngineConfig {
    /// Default configuration; identical to `Default::default()`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an order process after the ones already registered.
    #[must_use]
    pub fn with_order_process(mut self, process: Arc<dyn OrderProcess>) -> Self {
        self.order_processes.push(process);
        self
    }

    /// Appends a payment process.
    #[must_use]
    pub fn with_payment_process(mut self, process: Arc<dyn PaymentProcess>) -> Self {
        self.payment_processes.push(process);
        self
    }

    /// Appends a fulfillment process.
    #[must_use]
    pub fn with_fulfillment_process(mut self, process: Arc<dyn FulfillmentProcess>) -> Self {
        self.fulfillment_processes.push(process);
        self
    }

    /// Replaces the placement predicate.
    #[must_use]
    pub fn with_placed_strategy(mut self, strategy: Arc<dyn OrderPlacedStrategy>) -> Self {
        self.placed_strategy = strategy;
        self
    }

    /// Replaces the merge strategy.
    #[must_use]
    pub fn with_merge_strategy(mut self, strategy: Arc<dyn OrderMergeStrategy>) -> Self {
        self.merge_strategy = strategy;
        self
    }

    /// Replaces the shipping calculator.
    #[must_use]
    pub fn with_shipping_calculator(mut self, calculator: Arc<dyn ShippingCalculator>) -> Self {
        self.shipping_calculator = calculator;
        self
    }

    /// Replaces the changed-price handling strategy.
    #[must_use]
    pub fn with_changed_price_handling(
        mut self,
        strategy: Arc<dyn ChangedPriceHandlingStrategy>,
    ) -> Self {
        self.changed_price_handling = strategy;
        self
    }

    /// Appends an interceptor.
    #[must_use]
    pub fn with_interceptor(mut self, interceptor: Arc<dyn OrderInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Registers a promotion condition.
    #[must_use]
    pub fn with_promotion_condition(mut self, condition: Arc<dyn PromotionCondition>) -> Self {
        self.promotions.register_condition(condition);
        self
    }

    /// Registers a promotion action.
    #[must_use]
    pub fn with_promotion_action(mut self, action: Arc<dyn PromotionAction>) -> Self {
        self.promotions.register_action(action);
        self
    }

    /// Replaces the custom-field registry.
    #[must_use]
    pub fn with_custom_fields(mut self, registry: CustomFieldsRegistry) -> Self {
        self.custom_fields = registry;
        self
    }

    /// Sets the per-order item ceiling.
    #[must_use]
    pub const fn with_max_order_items(mut self, max: u32) -> Self {
        self.max_order_items = max;
        self
    }

    /// Order transition table merged from all registered processes.
    #[must_use]
    pub fn order_transitions(&self) -> Transitions<OrderState> {
        let maps: Vec<_> = self.order_processes.iter().map(|p| p.transitions()).collect();
        Transitions::from_maps(maps.iter())
    }

    /// Payment transition table merged from all registered processes.
    #[must_use]
    pub fn payment_transitions(&self) -> Transitions<PaymentState> {
        let maps: Vec<_> = self.payment_processes.iter().map(|p| p.transitions()).collect();
        Transitions::from_maps(maps.iter())
    }

    /// Fulfillment transition table merged from all registered processes.
    #[must_use]
    pub fn fulfillment_transitions(&self) -> Transitions<FulfillmentState> {
        let maps: Vec<_> = self.fulfillment_processes.iter().map(|p| p.transitions()).collect();
        Transitions::from_maps(maps.iter())
    }
}

impl std::fmt::Debug for OrderEngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderEngineConfig")
            .field("order_processes", &self.order_processes.len())
            .field("payment_processes", &self.payment_processes.len())
            .field("fulfillment_processes", &self.fulfillment_processes.len())
            .field("interceptors", &self.interceptors.len())
            .field("max_order_items", &self.max_order_items)
            .finish_non_exhaustive()
    }
}

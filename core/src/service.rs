//! The order engine's operation surface.
//!
//! Every operation follows the same session shape: load a consistent
//! snapshot of the aggregate from the [`OrderStore`], validate, mutate a
//! working copy, run the recalculation pass, then issue one atomic commit.
//! Domain events are buffered during the operation and published only
//! after the commit succeeds; any error before the commit means nothing
//! was written.

use crate::calculator::{recalculate, RecalculateOptions};
use crate::config::OrderEngineConfig;
use crate::context::RequestContext;
use crate::custom_fields::CustomFields;
use crate::error::OrderError;
use crate::events::{DomainEvent, EventPublisher, PendingEvents};
use crate::id::{CustomerId, FulfillmentId, OrderId, OrderItemId, OrderLineId, PaymentId, RefundId, VariantId};
use crate::merge::MergedOrderLine;
use crate::modify::{
    apply_modification, check_item_limit, check_stock, validate_adjust_quantity,
    validate_quantity, ModificationContext, ModifyOrderInput, ModifyOrderResult,
};
use crate::order::{
    Fulfillment, FulfillmentState, Order, OrderLine, OrderState, Payment, PaymentState,
    RefundState,
};
use crate::promotion::Promotion;
use crate::store::{OrderCommit, OrderStore, StockAdjustment};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// The engine. One instance serves every request; per-request state lives
/// in the [`RequestContext`] and the loaded aggregate.
pub struct OrderService {
    store: Arc<dyn OrderStore>,
    publisher: Arc<dyn EventPublisher>,
    config: Arc<OrderEngineConfig>,
}

impl OrderService {
    /// Creates a service over the given store, publisher, and
    /// configuration.
    #[must_use]
    pub fn new(
        store: Arc<dyn OrderStore>,
        publisher: Arc<dyn EventPublisher>,
        config: OrderEngineConfig,
    ) -> Self {
        Self { store, publisher, config: Arc::new(config) }
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &OrderEngineConfig {
        &self.config
    }

    /// Loads an order.
    ///
    /// # Errors
    ///
    /// Store failures, including not-found.
    pub async fn get_order(&self, ctx: &RequestContext, order_id: OrderId) -> Result<Order, OrderError> {
        Ok(self.store.load_order(ctx, order_id).await?)
    }

    /// Creates and persists an empty order in the `AddingItems` state.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn create_order(
        &self,
        ctx: &RequestContext,
        currency_code: &str,
    ) -> Result<Order, OrderError> {
        let order = Order::new(ctx.channel_id(), currency_code, ctx.now());
        let order = self.store.commit(ctx, OrderCommit::order(order)).await?;
        debug!(order_id = %order.id, "order created");
        Ok(order)
    }

    /// Adds `quantity` units of a variant to an active order. When a line
    /// with the same variant and custom fields exists, it is incremented
    /// (and repriced per the changed-price strategy); otherwise a new line
    /// is created.
    ///
    /// # Errors
    ///
    /// Quantity, stock, limit, custom-field, and interceptor errors; the
    /// order must be in `AddingItems`.
    pub async fn add_item_to_order(
        &self,
        ctx: &RequestContext,
        order_id: OrderId,
        variant_id: VariantId,
        quantity: i32,
        custom_fields: CustomFields,
    ) -> Result<Order, OrderError> {
        let mut order = self.store.load_order(ctx, order_id).await?;
        self.ensure_contents_mutable(&order)?;
        let quantity = validate_quantity(quantity)?;
        let variant = self.store.variant(ctx, variant_id).await?;
        check_stock(&variant, quantity)?;
        check_item_limit(&order, &self.config, quantity)?;
        self.config.custom_fields.validate("OrderLine", &custom_fields)?;

        for interceptor in &self.config.interceptors {
            interceptor
                .will_add_item(ctx, &order, &variant, quantity)
                .await
                .map_err(|interceptor_error| OrderError::Intercepted { interceptor_error })?;
        }

        match order.matching_line_index(variant_id, &custom_fields) {
            Some(index) => {
                let price = self.config.changed_price_handling.price_for_existing_line(
                    ctx,
                    &order.lines[index],
                    variant.list_price,
                );
                order.lines[index].set_unit_price(price);
                order.lines[index].add_units(quantity);
            }
            None => {
                order.lines.push(OrderLine::new(
                    variant_id,
                    variant.list_price,
                    variant.tax_rate,
                    quantity,
                    custom_fields,
                ));
            }
        }

        self.recalculate_and_commit(ctx, order, PendingEvents::new()).await
    }

    /// Sets a line's live quantity on an active order. Zero removes the
    /// line outright (audit retention only applies after placement).
    ///
    /// # Errors
    ///
    /// Quantity, stock, limit, and interceptor errors; the order must be
    /// in `AddingItems`.
    pub async fn adjust_order_line(
        &self,
        ctx: &RequestContext,
        order_id: OrderId,
        line_id: OrderLineId,
        quantity: i32,
    ) -> Result<Order, OrderError> {
        let mut order = self.store.load_order(ctx, order_id).await?;
        self.ensure_contents_mutable(&order)?;
        let target = validate_adjust_quantity(quantity)?;
        let line = order.get_line(line_id).ok_or_else(|| OrderError::EntityNotFound {
            entity: "OrderLine",
            id: line_id.to_string(),
        })?;
        let current = line.quantity();
        let variant_id = line.variant_id;

        for interceptor in &self.config.interceptors {
            interceptor
                .will_adjust_line(ctx, &order, line, target)
                .await
                .map_err(|interceptor_error| OrderError::Intercepted { interceptor_error })?;
        }

        if target == 0 {
            order.lines.retain(|l| l.id != line_id);
        } else if target > current {
            let extra = target - current;
            let variant = self.store.variant(ctx, variant_id).await?;
            check_stock(&variant, extra)?;
            check_item_limit(&order, &self.config, extra)?;
            if let Some(line) = order.get_line_mut(line_id) {
                line.add_units(extra);
            }
        } else if target < current {
            if let Some(line) = order.get_line_mut(line_id) {
                line.remove_units(current - target);
            }
        }

        self.recalculate_and_commit(ctx, order, PendingEvents::new()).await
    }

    /// Removes a line from an active order.
    ///
    /// # Errors
    ///
    /// Interceptor vetoes; the order must be in `AddingItems` and the line
    /// must exist.
    pub async fn remove_order_line(
        &self,
        ctx: &RequestContext,
        order_id: OrderId,
        line_id: OrderLineId,
    ) -> Result<Order, OrderError> {
        let mut order = self.store.load_order(ctx, order_id).await?;
        self.ensure_contents_mutable(&order)?;
        let line = order.get_line(line_id).ok_or_else(|| OrderError::EntityNotFound {
            entity: "OrderLine",
            id: line_id.to_string(),
        })?;

        for interceptor in &self.config.interceptors {
            interceptor
                .will_remove_line(ctx, &order, line)
                .await
                .map_err(|interceptor_error| OrderError::Intercepted { interceptor_error })?;
        }

        order.lines.retain(|l| l.id != line_id);
        self.recalculate_and_commit(ctx, order, PendingEvents::new()).await
    }

    /// Applies a coupon code after checking validity, dates, and usage
    /// limits. Applying a code the order already carries is a no-op.
    ///
    /// # Errors
    ///
    /// [`OrderError::CouponCodeInvalid`], [`OrderError::CouponCodeExpired`],
    /// or [`OrderError::CouponCodeLimit`].
    pub async fn apply_coupon_code(
        &self,
        ctx: &RequestContext,
        order_id: OrderId,
        coupon_code: &str,
    ) -> Result<Order, OrderError> {
        let mut order = self.store.load_order(ctx, order_id).await?;
        let promotions = self.store.active_promotions(ctx).await?;
        self.validate_coupon(ctx, &order, coupon_code, &promotions).await?;

        let mut events = PendingEvents::new();
        if !order.coupon_codes.iter().any(|code| code == coupon_code) {
            order.coupon_codes.push(coupon_code.to_string());
            events.push(DomainEvent::CouponCodeApplied {
                order_id: order.id,
                coupon_code: coupon_code.to_string(),
            });
        }
        self.recalculate_with(ctx, order, &promotions, events).await
    }

    /// Removes a coupon code; promotions that no longer apply are
    /// deactivated with their side effects.
    ///
    /// # Errors
    ///
    /// Store and strategy failures.
    pub async fn remove_coupon_code(
        &self,
        ctx: &RequestContext,
        order_id: OrderId,
        coupon_code: &str,
    ) -> Result<Order, OrderError> {
        let mut order = self.store.load_order(ctx, order_id).await?;
        let mut events = PendingEvents::new();
        if order.coupon_codes.iter().any(|code| code == coupon_code) {
            order.coupon_codes.retain(|code| code != coupon_code);
            events.push(DomainEvent::CouponCodeRemoved {
                order_id: order.id,
                coupon_code: coupon_code.to_string(),
            });
        }
        self.recalculate_and_commit(ctx, order, events).await
    }

    /// Attaches a customer to an (anonymous) order. Coupon codes whose
    /// per-customer limit the customer has already exhausted are silently
    /// stripped.
    ///
    /// # Errors
    ///
    /// Store and strategy failures.
    pub async fn set_customer(
        &self,
        ctx: &RequestContext,
        order_id: OrderId,
        customer_id: CustomerId,
    ) -> Result<Order, OrderError> {
        let mut order = self.store.load_order(ctx, order_id).await?;
        order.customer_id = Some(customer_id);
        let promotions = self.store.active_promotions(ctx).await?;
        self.strip_exhausted_codes(ctx, &mut order, customer_id, &promotions).await?;
        self.recalculate_with(ctx, order, &promotions, PendingEvents::new()).await
    }

    /// Sets the shipping address and requotes shipping against it.
    ///
    /// # Errors
    ///
    /// Shipping calculator failures.
    pub async fn set_shipping_address(
        &self,
        ctx: &RequestContext,
        order_id: OrderId,
        address: crate::order::Address,
    ) -> Result<Order, OrderError> {
        let mut order = self.store.load_order(ctx, order_id).await?;
        order.shipping_address = Some(address);
        let promotions = self.store.active_promotions(ctx).await?;
        recalculate(
            ctx,
            &mut order,
            &self.config,
            &promotions,
            RecalculateOptions { requote_shipping: true },
        )
        .await?;
        order.touch(ctx.now());
        self.commit_and_publish(ctx, OrderCommit::order(order), PendingEvents::new()).await
    }

    /// Transitions the order to a new state through the merged transition
    /// table and every registered process's hooks.
    ///
    /// # Errors
    ///
    /// [`OrderError::OrderStateTransition`] on a table miss or hook veto.
    pub async fn transition_order_to_state(
        &self,
        ctx: &RequestContext,
        order_id: OrderId,
        to: OrderState,
    ) -> Result<Order, OrderError> {
        let mut order = self.store.load_order(ctx, order_id).await?;
        let mut events = PendingEvents::new();
        let mut stock = Vec::new();
        self.transition_order(ctx, &mut order, to, &mut events, &mut stock).await?;
        order.touch(ctx.now());
        let commit =
            OrderCommit { order, delete_order_ids: Vec::new(), stock_adjustments: stock };
        self.commit_and_publish(ctx, commit, events).await
    }

    /// Records a payment in the `Created` state for the order's
    /// outstanding amount.
    ///
    /// # Errors
    ///
    /// [`OrderError::OrderPaymentState`] outside `ArrangingPayment`.
    pub async fn add_payment_to_order(
        &self,
        ctx: &RequestContext,
        order_id: OrderId,
        method: &str,
        metadata: serde_json::Value,
    ) -> Result<Order, OrderError> {
        let mut order = self.store.load_order(ctx, order_id).await?;
        if order.state != OrderState::ArrangingPayment {
            return Err(OrderError::OrderPaymentState {
                order_id: order.id,
                state: order.state.clone(),
            });
        }
        let amount = order.outstanding().max_zero();
        order.payments.push(Payment::new(method, amount, metadata, ctx.now()));
        order.touch(ctx.now());
        self.commit_and_publish(ctx, OrderCommit::order(order), PendingEvents::new()).await
    }

    /// Records an already-settled manual payment for the outstanding
    /// amount and lets settlement drive the order forward: out of
    /// `ArrangingPayment` (placing the order) or out of
    /// `ArrangingAdditionalPayment` (settling the open modification).
    ///
    /// # Errors
    ///
    /// [`OrderError::ManualPaymentState`] outside the payment-arranging
    /// states.
    pub async fn add_manual_payment(
        &self,
        ctx: &RequestContext,
        order_id: OrderId,
        method: &str,
        metadata: serde_json::Value,
    ) -> Result<Order, OrderError> {
        let mut order = self.store.load_order(ctx, order_id).await?;
        if !matches!(
            order.state,
            OrderState::ArrangingPayment | OrderState::ArrangingAdditionalPayment
        ) {
            return Err(OrderError::ManualPaymentState {
                order_id: order.id,
                state: order.state.clone(),
            });
        }
        let amount = order.outstanding().max_zero();
        let mut payment = Payment::new(method, amount, metadata, ctx.now());
        payment.state = PaymentState::Settled;
        let payment_id = payment.id;
        order.payments.push(payment);

        let mut events = PendingEvents::new();
        events.push(DomainEvent::PaymentStateTransitioned {
            order_id: order.id,
            payment_id,
            from: PaymentState::Created,
            to: PaymentState::Settled,
        });
        let mut stock = Vec::new();
        self.after_payment_settled(ctx, &mut order, payment_id, &mut events, &mut stock).await?;
        order.touch(ctx.now());
        let commit =
            OrderCommit { order, delete_order_ids: Vec::new(), stock_adjustments: stock };
        self.commit_and_publish(ctx, commit, events).await
    }

    /// Transitions a payment through the merged payment table and hooks.
    /// Settling a payment that covers the order total is the trigger that
    /// moves the order out of the payment-arranging states.
    ///
    /// # Errors
    ///
    /// [`OrderError::PaymentStateTransition`] on a table miss or veto.
    pub async fn transition_payment_to_state(
        &self,
        ctx: &RequestContext,
        order_id: OrderId,
        payment_id: PaymentId,
        to: PaymentState,
    ) -> Result<Order, OrderError> {
        let mut order = self.store.load_order(ctx, order_id).await?;
        let payment = order.payment(payment_id).ok_or_else(|| OrderError::EntityNotFound {
            entity: "Payment",
            id: payment_id.to_string(),
        })?;
        let from = payment.state.clone();

        let table = self.config.payment_transitions();
        if !table.can(&from, &to) {
            return Err(OrderError::PaymentStateTransition {
                from,
                to,
                transition_error: "the transition is not permitted by the state machine".into(),
            });
        }
        for process in &self.config.payment_processes {
            if let Err(veto) =
                process.on_transition_start(ctx, &from, &to, &order, payment).await
            {
                for process in &self.config.payment_processes {
                    process.on_transition_error(ctx, &from, &to, &veto).await;
                }
                return Err(OrderError::PaymentStateTransition {
                    from,
                    to,
                    transition_error: veto,
                });
            }
        }

        if let Some(payment) = order.payment_mut(payment_id) {
            payment.state = to.clone();
        }
        for process in &self.config.payment_processes {
            process.on_transition_end(ctx, &from, &to, &mut order).await;
        }

        let mut events = PendingEvents::new();
        events.push(DomainEvent::PaymentStateTransitioned {
            order_id: order.id,
            payment_id,
            from,
            to: to.clone(),
        });

        let mut stock = Vec::new();
        if to == PaymentState::Settled {
            self.after_payment_settled(ctx, &mut order, payment_id, &mut events, &mut stock)
                .await?;
        }
        order.touch(ctx.now());
        let commit =
            OrderCommit { order, delete_order_ids: Vec::new(), stock_adjustments: stock };
        self.commit_and_publish(ctx, commit, events).await
    }

    /// Convenience: transitions a payment to `Settled`.
    ///
    /// # Errors
    ///
    /// As [`transition_payment_to_state`](Self::transition_payment_to_state).
    pub async fn settle_payment(
        &self,
        ctx: &RequestContext,
        order_id: OrderId,
        payment_id: PaymentId,
    ) -> Result<Order, OrderError> {
        self.transition_payment_to_state(ctx, order_id, payment_id, PaymentState::Settled).await
    }

    /// Creates a pending fulfillment over the given units.
    ///
    /// # Errors
    ///
    /// [`OrderError::FulfillmentCreation`] when the order is unplaced, the
    /// item set is empty, or an item is missing, cancelled, or already
    /// fulfilled.
    pub async fn create_fulfillment(
        &self,
        ctx: &RequestContext,
        order_id: OrderId,
        item_ids: Vec<OrderItemId>,
        method: &str,
        tracking_code: &str,
    ) -> Result<Order, OrderError> {
        let mut order = self.store.load_order(ctx, order_id).await?;
        if order.placed_at.is_none() {
            return Err(OrderError::FulfillmentCreation {
                message: "the Order has not been placed".into(),
            });
        }
        if item_ids.is_empty() {
            return Err(OrderError::FulfillmentCreation {
                message: "at least one OrderItem is required".into(),
            });
        }
        for item_id in &item_ids {
            let Some((_, item)) = order.find_item(*item_id) else {
                return Err(OrderError::FulfillmentCreation {
                    message: format!("no OrderItem with id {item_id}"),
                });
            };
            if item.cancelled {
                return Err(OrderError::FulfillmentCreation {
                    message: format!("OrderItem {item_id} is cancelled"),
                });
            }
            if item.fulfillment_id.is_some() {
                return Err(OrderError::FulfillmentCreation {
                    message: format!("OrderItem {item_id} already belongs to a Fulfillment"),
                });
            }
        }

        let fulfillment = Fulfillment::new(method, tracking_code, item_ids.clone(), ctx.now());
        let fulfillment_id = fulfillment.id;
        order.fulfillments.push(fulfillment);
        for line in &mut order.lines {
            for item in &mut line.items {
                if item_ids.contains(&item.id) {
                    item.fulfillment_id = Some(fulfillment_id);
                }
            }
        }
        order.touch(ctx.now());
        self.commit_and_publish(ctx, OrderCommit::order(order), PendingEvents::new()).await
    }

    /// Transitions a fulfillment and, when every live unit's shipment
    /// progressed, follows with the fulfillment-derived order transition
    /// (`PartiallyShipped`, `Shipped`, `PartiallyDelivered`, `Delivered`).
    ///
    /// # Errors
    ///
    /// [`OrderError::FulfillmentStateTransition`] on a table miss or veto.
    pub async fn transition_fulfillment_to_state(
        &self,
        ctx: &RequestContext,
        order_id: OrderId,
        fulfillment_id: FulfillmentId,
        to: FulfillmentState,
    ) -> Result<Order, OrderError> {
        let mut order = self.store.load_order(ctx, order_id).await?;
        let fulfillment =
            order.fulfillment(fulfillment_id).ok_or_else(|| OrderError::EntityNotFound {
                entity: "Fulfillment",
                id: fulfillment_id.to_string(),
            })?;
        let from = fulfillment.state.clone();

        let table = self.config.fulfillment_transitions();
        if !table.can(&from, &to) {
            return Err(OrderError::FulfillmentStateTransition {
                from,
                to,
                transition_error: "the transition is not permitted by the state machine".into(),
            });
        }
        for process in &self.config.fulfillment_processes {
            if let Err(veto) = process.on_transition_start(ctx, &from, &to, &order).await {
                for process in &self.config.fulfillment_processes {
                    process.on_transition_error(ctx, &from, &to, &veto).await;
                }
                return Err(OrderError::FulfillmentStateTransition {
                    from,
                    to,
                    transition_error: veto,
                });
            }
        }

        if let Some(fulfillment) = order.fulfillment_mut(fulfillment_id) {
            fulfillment.state = to.clone();
        }
        if to == FulfillmentState::Cancelled {
            // cancelled shipments release their units for re-fulfillment
            for line in &mut order.lines {
                for item in &mut line.items {
                    if item.fulfillment_id == Some(fulfillment_id) {
                        item.fulfillment_id = None;
                    }
                }
            }
        }

        let mut events = PendingEvents::new();
        events.push(DomainEvent::FulfillmentStateTransitioned {
            order_id: order.id,
            fulfillment_id,
            from,
            to,
        });

        let mut stock = Vec::new();
        if let Some(derived) = order.fulfillment_derived_state() {
            if derived != order.state
                && self.config.order_transitions().can(&order.state, &derived)
            {
                self.transition_order(ctx, &mut order, derived, &mut events, &mut stock).await?;
            }
        }
        order.touch(ctx.now());
        let commit =
            OrderCommit { order, delete_order_ids: Vec::new(), stock_adjustments: stock };
        self.commit_and_publish(ctx, commit, events).await
    }

    /// Marks a pending refund settled.
    ///
    /// # Errors
    ///
    /// [`OrderError::RefundStateTransition`] when the refund is not
    /// pending.
    pub async fn settle_refund(
        &self,
        ctx: &RequestContext,
        order_id: OrderId,
        refund_id: RefundId,
    ) -> Result<Order, OrderError> {
        self.transition_refund(ctx, order_id, refund_id, RefundState::Settled).await
    }

    /// Marks a pending refund failed; its amount becomes refundable again.
    ///
    /// # Errors
    ///
    /// [`OrderError::RefundStateTransition`] when the refund is not
    /// pending.
    pub async fn fail_refund(
        &self,
        ctx: &RequestContext,
        order_id: OrderId,
        refund_id: RefundId,
    ) -> Result<Order, OrderError> {
        self.transition_refund(ctx, order_id, refund_id, RefundState::Failed).await
    }

    /// Cancels the order: runs the state transition (veto-able by
    /// processes), cancels every live unit, and releases any allocated
    /// stock.
    ///
    /// # Errors
    ///
    /// [`OrderError::OrderStateTransition`] when cancellation is not
    /// permitted from the current state.
    pub async fn cancel_order(
        &self,
        ctx: &RequestContext,
        order_id: OrderId,
    ) -> Result<Order, OrderError> {
        let mut order = self.store.load_order(ctx, order_id).await?;
        let mut events = PendingEvents::new();
        let mut stock = Vec::new();
        let was_placed = order.placed_at.is_some();
        self.transition_order(ctx, &mut order, OrderState::Cancelled, &mut events, &mut stock)
            .await?;
        for line in &mut order.lines {
            let live = line.quantity();
            if live > 0 {
                line.cancel_units(live);
                if was_placed {
                    stock.push(StockAdjustment {
                        variant_id: line.variant_id,
                        delta: -i64::from(live),
                    });
                }
            }
        }
        order.active = false;
        order.touch(ctx.now());
        let commit =
            OrderCommit { order, delete_order_ids: Vec::new(), stock_adjustments: stock };
        self.commit_and_publish(ctx, commit, events).await
    }

    /// Modifies a placed order. Only valid in the `Modifying` state; see
    /// [`ModifyOrderInput`] for what can change. With `dry_run` the
    /// would-be order and price change are returned and nothing is
    /// persisted, repeatably.
    ///
    /// # Errors
    ///
    /// [`OrderError::OrderModificationState`] outside `Modifying`;
    /// [`OrderError::NoChangesSpecified`] for empty input;
    /// [`OrderError::RefundPaymentIdMissing`] when a price decrease names
    /// no refund payment; plus quantity/stock/limit/coupon/interceptor
    /// errors.
    pub async fn modify_order(
        &self,
        ctx: &RequestContext,
        order_id: OrderId,
        input: ModifyOrderInput,
        dry_run: bool,
    ) -> Result<ModifyOrderResult, OrderError> {
        let order = self.store.load_order(ctx, order_id).await?;
        if order.state != OrderState::Modifying {
            return Err(OrderError::OrderModificationState { order_id: order.id });
        }
        if input.is_empty() {
            return Err(OrderError::NoChangesSpecified);
        }

        let promotions = self.store.active_promotions(ctx).await?;
        if let Some(codes) = &input.coupon_codes {
            for code in codes {
                if !order.coupon_codes.iter().any(|existing| existing == code) {
                    self.validate_coupon(ctx, &order, code, &promotions).await?;
                }
            }
        }

        // Prefetch every variant the modification touches.
        let mut variants = HashMap::new();
        for add in &input.add_items {
            if !variants.contains_key(&add.variant_id) {
                variants.insert(add.variant_id, self.store.variant(ctx, add.variant_id).await?);
            }
        }
        for adjust in &input.adjust_order_lines {
            if let Some(line) = order.get_line(adjust.line_id) {
                if !variants.contains_key(&line.variant_id) {
                    variants
                        .insert(line.variant_id, self.store.variant(ctx, line.variant_id).await?);
                }
            }
        }

        for add in &input.add_items {
            if let Some(variant) = variants.get(&add.variant_id) {
                let quantity = validate_quantity(add.quantity)?;
                for interceptor in &self.config.interceptors {
                    interceptor
                        .will_add_item(ctx, &order, variant, quantity)
                        .await
                        .map_err(|interceptor_error| OrderError::Intercepted {
                            interceptor_error,
                        })?;
                }
            }
        }
        for adjust in &input.adjust_order_lines {
            if let Some(line) = order.get_line(adjust.line_id) {
                let target = validate_adjust_quantity(adjust.quantity)?;
                for interceptor in &self.config.interceptors {
                    interceptor
                        .will_adjust_line(ctx, &order, line, target)
                        .await
                        .map_err(|interceptor_error| OrderError::Intercepted {
                            interceptor_error,
                        })?;
                }
            }
        }

        let mut working = order;
        let mctx = ModificationContext {
            config: &self.config,
            promotions: &promotions,
            variants: &variants,
        };
        let outcome = apply_modification(ctx, &mut working, &input, dry_run, &mctx).await?;

        if dry_run {
            return Ok(ModifyOrderResult { order: working, price_change: outcome.price_change });
        }

        let mut events = PendingEvents::new();
        if let Some(modification) = working.modifications.last() {
            events.push(DomainEvent::OrderModified {
                order_id: working.id,
                modification_id: modification.id,
                price_change: modification.price_change,
            });
        }
        let commit = OrderCommit {
            order: working,
            delete_order_ids: Vec::new(),
            stock_adjustments: outcome.stock_adjustments,
        };
        let order = self.commit_and_publish(ctx, commit, events).await?;
        Ok(ModifyOrderResult { order, price_change: outcome.price_change })
    }

    /// Reconciles a guest order with the signed-in customer's existing
    /// active order through the configured merge strategy. The strategy's
    /// output entirely replaces the surviving order's lines; the guest
    /// order is deleted in the same commit. Without an existing order the
    /// guest order is simply attached to the customer.
    ///
    /// # Errors
    ///
    /// Store and strategy failures.
    pub async fn merge_orders(
        &self,
        ctx: &RequestContext,
        guest_order_id: OrderId,
        customer_id: CustomerId,
    ) -> Result<Order, OrderError> {
        let guest = self.store.load_order(ctx, guest_order_id).await?;
        let promotions = self.store.active_promotions(ctx).await?;

        let existing = self
            .store
            .find_active_order(ctx, customer_id)
            .await?
            .filter(|existing| existing.id != guest.id);
        let Some(mut target) = existing else {
            let mut order = guest;
            order.customer_id = Some(customer_id);
            self.strip_exhausted_codes(ctx, &mut order, customer_id, &promotions).await?;
            return self.recalculate_with(ctx, order, &promotions, PendingEvents::new()).await;
        };

        let merged = self.config.merge_strategy.merge(&guest, &target);
        target.lines = merged.into_iter().map(build_line).collect();
        target.customer_id = Some(customer_id);
        self.strip_exhausted_codes(ctx, &mut target, customer_id, &promotions).await?;
        recalculate(ctx, &mut target, &self.config, &promotions, RecalculateOptions::default())
            .await?;
        target.touch(ctx.now());

        let mut events = PendingEvents::new();
        events.push(DomainEvent::OrderMerged {
            guest_order_id: guest.id,
            order_id: target.id,
            customer_id,
        });
        info!(guest = %guest.id, target = %target.id, "orders merged");
        let commit = OrderCommit {
            order: target,
            delete_order_ids: vec![guest.id],
            stock_adjustments: Vec::new(),
        };
        self.commit_and_publish(ctx, commit, events).await
    }

    // ------------------------------------------------------------------
    // internals
    // ------------------------------------------------------------------

    fn ensure_contents_mutable(&self, order: &Order) -> Result<(), OrderError> {
        if order.state != OrderState::AddingItems {
            return Err(OrderError::OrderContentsLocked {
                order_id: order.id,
                state: order.state.clone(),
            });
        }
        Ok(())
    }

    /// Table check, hooks, state mutation, and placement side effects for
    /// one order transition. On veto, nothing is mutated.
    async fn transition_order(
        &self,
        ctx: &RequestContext,
        order: &mut Order,
        to: OrderState,
        events: &mut PendingEvents,
        stock: &mut Vec<StockAdjustment>,
    ) -> Result<(), OrderError> {
        let from = order.state.clone();
        let table = self.config.order_transitions();
        if !table.can(&from, &to) {
            return Err(OrderError::OrderStateTransition {
                from,
                to,
                transition_error: "the transition is not permitted by the state machine".into(),
            });
        }
        for process in &self.config.order_processes {
            if let Err(veto) = process.on_transition_start(ctx, &from, &to, order).await {
                for process in &self.config.order_processes {
                    process.on_transition_error(ctx, &from, &to, &veto).await;
                }
                return Err(OrderError::OrderStateTransition {
                    from,
                    to,
                    transition_error: veto,
                });
            }
        }

        order.state = to.clone();
        for process in &self.config.order_processes {
            process.on_transition_end(ctx, &from, &to, order).await;
        }
        debug!(order_id = %order.id, %from, %to, "order state transitioned");
        events.push(DomainEvent::OrderStateTransitioned { order_id: order.id, from: from.clone(), to: to.clone() });

        if order.placed_at.is_none()
            && self.config.placed_strategy.should_set_as_placed(ctx, &from, &to, order)
        {
            order.active = false;
            let placed_at = ctx.now();
            order.placed_at = Some(placed_at);
            for line in &order.lines {
                let quantity = line.quantity();
                if quantity > 0 {
                    stock.push(StockAdjustment {
                        variant_id: line.variant_id,
                        delta: i64::from(quantity),
                    });
                }
            }
            events.push(DomainEvent::OrderPlaced { order_id: order.id, placed_at });
            info!(order_id = %order.id, "order placed");
        }
        Ok(())
    }

    /// Settlement side effects: marks an open modification settled and
    /// moves the order out of the payment-arranging states once covered.
    async fn after_payment_settled(
        &self,
        ctx: &RequestContext,
        order: &mut Order,
        payment_id: PaymentId,
        events: &mut PendingEvents,
        stock: &mut Vec<StockAdjustment>,
    ) -> Result<(), OrderError> {
        if order.outstanding().is_positive() {
            return Ok(());
        }
        if order.state == OrderState::ArrangingAdditionalPayment {
            if let Some(modification) = order.unsettled_modification_mut() {
                modification.payment_id = Some(payment_id);
            }
        }
        if matches!(
            order.state,
            OrderState::ArrangingPayment | OrderState::ArrangingAdditionalPayment
        ) {
            self.transition_order(ctx, order, OrderState::PaymentSettled, events, stock).await?;
        }
        Ok(())
    }

    async fn transition_refund(
        &self,
        ctx: &RequestContext,
        order_id: OrderId,
        refund_id: RefundId,
        to: RefundState,
    ) -> Result<Order, OrderError> {
        let mut order = self.store.load_order(ctx, order_id).await?;
        let refund = order
            .payments
            .iter()
            .find_map(|p| p.refunds.iter().find(|r| r.id == refund_id))
            .ok_or_else(|| OrderError::EntityNotFound {
                entity: "Refund",
                id: refund_id.to_string(),
            })?;
        let from = refund.state;
        if !RefundState::can_transition(from, to) {
            return Err(OrderError::RefundStateTransition {
                from,
                to,
                transition_error: "the transition is not permitted by the state machine".into(),
            });
        }
        if let Some(refund) = order.refund_mut(refund_id) {
            refund.state = to;
        }
        let mut events = PendingEvents::new();
        events.push(DomainEvent::RefundStateTransitioned { order_id: order.id, refund_id, from, to });
        order.touch(ctx.now());
        self.commit_and_publish(ctx, OrderCommit::order(order), events).await
    }

    async fn validate_coupon(
        &self,
        ctx: &RequestContext,
        order: &Order,
        coupon_code: &str,
        promotions: &[Promotion],
    ) -> Result<(), OrderError> {
        let promotion = promotions
            .iter()
            .find(|p| p.enabled && p.coupon_code.as_deref() == Some(coupon_code))
            .ok_or_else(|| OrderError::CouponCodeInvalid { coupon_code: coupon_code.into() })?;
        let now = ctx.now();
        if promotion.ends_at.is_some_and(|end| end < now) {
            return Err(OrderError::CouponCodeExpired { coupon_code: coupon_code.into() });
        }
        if !promotion.is_date_active(now) {
            return Err(OrderError::CouponCodeInvalid { coupon_code: coupon_code.into() });
        }
        if let Some(limit) = promotion.usage_limit {
            let used = self.store.total_coupon_usage_count(ctx, coupon_code).await?;
            if used >= limit {
                return Err(OrderError::CouponCodeLimit {
                    coupon_code: coupon_code.into(),
                    limit,
                });
            }
        }
        if let (Some(limit), Some(customer_id)) =
            (promotion.per_customer_usage_limit, order.customer_id)
        {
            let used = self.store.coupon_usage_count(ctx, coupon_code, customer_id).await?;
            if used >= limit {
                return Err(OrderError::CouponCodeLimit {
                    coupon_code: coupon_code.into(),
                    limit,
                });
            }
        }
        Ok(())
    }

    /// Silently removes codes whose per-customer limit `customer_id` has
    /// already exhausted. Used when an anonymous order gains a customer.
    async fn strip_exhausted_codes(
        &self,
        ctx: &RequestContext,
        order: &mut Order,
        customer_id: CustomerId,
        promotions: &[Promotion],
    ) -> Result<(), OrderError> {
        let mut kept = Vec::with_capacity(order.coupon_codes.len());
        for code in order.coupon_codes.clone() {
            let limit = promotions
                .iter()
                .find(|p| p.coupon_code.as_deref() == Some(code.as_str()))
                .and_then(|p| p.per_customer_usage_limit);
            let keep = match limit {
                Some(limit) => {
                    self.store.coupon_usage_count(ctx, &code, customer_id).await? < limit
                }
                None => true,
            };
            if keep {
                kept.push(code);
            } else {
                debug!(order_id = %order.id, coupon_code = %code, "stripping exhausted coupon code");
            }
        }
        order.coupon_codes = kept;
        Ok(())
    }

    async fn recalculate_and_commit(
        &self,
        ctx: &RequestContext,
        order: Order,
        events: PendingEvents,
    ) -> Result<Order, OrderError> {
        let promotions = self.store.active_promotions(ctx).await?;
        self.recalculate_with(ctx, order, &promotions, events).await
    }

    async fn recalculate_with(
        &self,
        ctx: &RequestContext,
        mut order: Order,
        promotions: &[Promotion],
        events: PendingEvents,
    ) -> Result<Order, OrderError> {
        recalculate(ctx, &mut order, &self.config, promotions, RecalculateOptions::default())
            .await?;
        order.touch(ctx.now());
        self.commit_and_publish(ctx, OrderCommit::order(order), events).await
    }

    async fn commit_and_publish(
        &self,
        ctx: &RequestContext,
        commit: OrderCommit,
        events: PendingEvents,
    ) -> Result<Order, OrderError> {
        let order = self.store.commit(ctx, commit).await?;
        for event in events {
            self.publisher.publish(ctx, event).await;
        }
        Ok(order)
    }
}

fn build_line(merged: MergedOrderLine) -> OrderLine {
    OrderLine::new(
        merged.variant_id,
        merged.unit_price,
        merged.tax_rate,
        merged.quantity,
        merged.custom_fields,
    )
}

impl std::fmt::Debug for OrderService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderService").field("config", &self.config).finish_non_exhaustive()
    }
}

//! Order, Payment, and Fulfillment processes.
//!
//! A process contributes a [`TransitionMap`] and lifecycle hooks. The
//! engine folds all registered processes, in registration order, into one
//! transition table per machine; hooks run in the same order and the first
//! veto short-circuits with its message propagated verbatim.

use crate::context::RequestContext;
use crate::order::fulfillment::FulfillmentState;
use crate::order::payment::{Payment, PaymentState};
use crate::order::{Order, OrderState};
use crate::state_machine::TransitionMap;
use async_trait::async_trait;

/// A participant in the Order state machine.
#[async_trait]
pub trait OrderProcess: Send + Sync {
    /// Transition entries this process contributes.
    fn transitions(&self) -> TransitionMap<OrderState> {
        TransitionMap::new()
    }

    /// Runs before the state changes. Returning `Err` vetoes the
    /// transition; the message is surfaced verbatim to the caller and no
    /// mutation takes place.
    ///
    /// # Errors
    ///
    /// The veto message.
    async fn on_transition_start(
        &self,
        _ctx: &RequestContext,
        _from: &OrderState,
        _to: &OrderState,
        _order: &Order,
    ) -> Result<(), String> {
        Ok(())
    }

    /// Runs after the state has changed. May mutate the order; the
    /// mutation is committed with the rest of the aggregate.
    async fn on_transition_end(
        &self,
        _ctx: &RequestContext,
        _from: &OrderState,
        _to: &OrderState,
        _order: &mut Order,
    ) {
    }

    /// Observes a vetoed or rejected transition.
    async fn on_transition_error(
        &self,
        _ctx: &RequestContext,
        _from: &OrderState,
        _to: &OrderState,
        _error: &str,
    ) {
    }
}

/// A participant in the Payment state machine.
#[async_trait]
pub trait PaymentProcess: Send + Sync {
    /// Transition entries this process contributes.
    fn transitions(&self) -> TransitionMap<PaymentState> {
        TransitionMap::new()
    }

    /// Runs before the payment state changes; `Err` vetoes.
    ///
    /// # Errors
    ///
    /// The veto message.
    async fn on_transition_start(
        &self,
        _ctx: &RequestContext,
        _from: &PaymentState,
        _to: &PaymentState,
        _order: &Order,
        _payment: &Payment,
    ) -> Result<(), String> {
        Ok(())
    }

    /// Runs after the payment state has changed.
    async fn on_transition_end(
        &self,
        _ctx: &RequestContext,
        _from: &PaymentState,
        _to: &PaymentState,
        _order: &mut Order,
    ) {
    }

    /// Observes a vetoed or rejected transition.
    async fn on_transition_error(
        &self,
        _ctx: &RequestContext,
        _from: &PaymentState,
        _to: &PaymentState,
        _error: &str,
    ) {
    }
}

/// A participant in the Fulfillment state machine.
#[async_trait]
pub trait FulfillmentProcess: Send + Sync {
    /// Transition entries this process contributes.
    fn transitions(&self) -> TransitionMap<FulfillmentState> {
        TransitionMap::new()
    }

    /// Runs before the fulfillment state changes; `Err` vetoes.
    ///
    /// # Errors
    ///
    /// The veto message.
    async fn on_transition_start(
        &self,
        _ctx: &RequestContext,
        _from: &FulfillmentState,
        _to: &FulfillmentState,
        _order: &Order,
    ) -> Result<(), String> {
        Ok(())
    }

    /// Observes a vetoed or rejected transition.
    async fn on_transition_error(
        &self,
        _ctx: &RequestContext,
        _from: &FulfillmentState,
        _to: &FulfillmentState,
        _error: &str,
    ) {
    }
}

/// Decides which transitions place an order.
///
/// Placement fires exactly once per order: it clears the `active` flag,
/// stamps `placed_at`, allocates stock, and queues the `OrderPlaced`
/// event.
pub trait OrderPlacedStrategy: Send + Sync {
    /// Whether moving `from` → `to` places the order.
    fn should_set_as_placed(
        &self,
        ctx: &RequestContext,
        from: &OrderState,
        to: &OrderState,
        order: &Order,
    ) -> bool;
}

/// Places the order when payment is first authorized or settled out of
/// `ArrangingPayment`.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultOrderPlacedStrategy;

impl OrderPlacedStrategy for DefaultOrderPlacedStrategy {
    fn should_set_as_placed(
        &self,
        _ctx: &RequestContext,
        from: &OrderState,
        to: &OrderState,
        _order: &Order,
    ) -> bool {
        *from == OrderState::ArrangingPayment
            && matches!(to, OrderState::PaymentAuthorized | OrderState::PaymentSettled)
    }
}

/// The built-in order lifecycle: checkout, payment, modification, and
/// fulfillment-derived states, with payment-coverage guards.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultOrderProcess;

#[async_trait]
impl OrderProcess for DefaultOrderProcess {
    fn transitions(&self) -> TransitionMap<OrderState> {
        use OrderState::{
            AddingItems, ArrangingAdditionalPayment, ArrangingPayment, Cancelled, Delivered,
            Modifying, PartiallyDelivered, PartiallyShipped, PaymentAuthorized, PaymentSettled,
            Shipped,
        };
        TransitionMap::new()
            .allow(AddingItems, [ArrangingPayment, Cancelled])
            .allow(ArrangingPayment, [PaymentAuthorized, PaymentSettled, AddingItems, Cancelled])
            .allow(PaymentAuthorized, [PaymentSettled, Modifying, Cancelled])
            .allow(PaymentSettled, [PartiallyShipped, Shipped, Modifying, Cancelled])
            .allow(Modifying, [PaymentSettled, PaymentAuthorized, ArrangingAdditionalPayment])
            .allow(
                ArrangingAdditionalPayment,
                [PaymentSettled, PaymentAuthorized, Modifying, Cancelled],
            )
            .allow(PartiallyShipped, [Shipped, PartiallyDelivered, Cancelled])
            .allow(Shipped, [PartiallyDelivered, Delivered, Cancelled])
            .allow(PartiallyDelivered, [Delivered, Cancelled])
    }

    async fn on_transition_start(
        &self,
        _ctx: &RequestContext,
        from: &OrderState,
        to: &OrderState,
        order: &Order,
    ) -> Result<(), String> {
        if *from == OrderState::AddingItems && *to != OrderState::Cancelled && order.is_empty() {
            return Err("cannot transition an empty Order".to_string());
        }
        if *to == OrderState::PaymentAuthorized
            && order.total_authorized() + order.total_settled() < order.total_with_tax
        {
            return Err("the Order total is not covered by authorized Payments".to_string());
        }
        if *from == OrderState::Modifying
            && *to != OrderState::ArrangingAdditionalPayment
            && order.unsettled_modification().is_some()
        {
            return Err(
                "an outstanding modification requires an additional payment".to_string()
            );
        }
        if *to == OrderState::PaymentSettled && order.outstanding().is_positive() {
            let reason = if *from == OrderState::ArrangingAdditionalPayment {
                "the additional payment arising from the order modification has not been settled"
            } else {
                "the Order total is not covered by settled Payments"
            };
            return Err(reason.to_string());
        }
        Ok(())
    }
}

/// The built-in payment lifecycle.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultPaymentProcess;

#[async_trait]
impl PaymentProcess for DefaultPaymentProcess {
    fn transitions(&self) -> TransitionMap<PaymentState> {
        use PaymentState::{Authorized, Cancelled, Created, Declined, Settled, Validating};
        TransitionMap::new()
            .allow(Created, [Validating, Authorized, Settled, Declined, Cancelled])
            .allow(Validating, [Authorized, Settled, Declined, Cancelled])
            .allow(Authorized, [Settled, Cancelled])
    }
}

/// The built-in fulfillment lifecycle.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultFulfillmentProcess;

#[async_trait]
impl FulfillmentProcess for DefaultFulfillmentProcess {
    fn transitions(&self) -> TransitionMap<FulfillmentState> {
        use FulfillmentState::{Cancelled, Delivered, Pending, Shipped};
        TransitionMap::new()
            .allow(Pending, [Shipped, Cancelled])
            .allow(Shipped, [Delivered, Cancelled])
    }
}

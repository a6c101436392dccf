//! Integration tests for fulfillment: creation guards, shipment-derived
//! order states, cancelled shipments, and order cancellation.

#![allow(clippy::unwrap_used)] // test assertions may unwrap

use async_trait::async_trait;
use orderflow_core::context::RequestContext;
use orderflow_core::error::OrderError;
use orderflow_core::id::{OrderItemId, VariantId};
use orderflow_core::order::{FulfillmentState, Order, OrderState};
use orderflow_core::process::FulfillmentProcess;
use orderflow_core::{OrderEngineConfig, OrderService};
use orderflow_testing::fixtures;
use orderflow_testing::{CollectingPublisher, InMemoryOrderStore, test_context};
use std::sync::{Arc, Mutex};

struct Harness {
    store: Arc<InMemoryOrderStore>,
    service: OrderService,
    ctx: RequestContext,
}

fn harness(config: OrderEngineConfig) -> Harness {
    let store = Arc::new(InMemoryOrderStore::new());
    let publisher = Arc::new(CollectingPublisher::new());
    let service = OrderService::new(store.clone(), publisher, config);
    Harness { store, service, ctx: test_context() }
}

/// Builds, pays, and places an order with `quantity` units of `variant_id`.
async fn place_order(h: &Harness, variant_id: VariantId, quantity: i32) -> Order {
    let order = h.service.create_order(&h.ctx, "USD").await.unwrap();
    let order = h
        .service
        .add_item_to_order(&h.ctx, order.id, variant_id, quantity, Default::default())
        .await
        .unwrap();
    let order = h
        .service
        .transition_order_to_state(&h.ctx, order.id, OrderState::ArrangingPayment)
        .await
        .unwrap();
    let order = h
        .service
        .add_payment_to_order(&h.ctx, order.id, "standard-payment", serde_json::Value::Null)
        .await
        .unwrap();
    let payment_id = order.payments[0].id;
    h.service.settle_payment(&h.ctx, order.id, payment_id).await.unwrap()
}

fn item_ids(order: &Order) -> Vec<OrderItemId> {
    order.lines[0].items.iter().map(|item| item.id).collect()
}

#[tokio::test]
async fn creation_requires_a_placed_order_and_valid_live_items() {
    let h = harness(fixtures::test_config());
    let variant_id = fixtures::standard_catalog(&h.store);

    // Unplaced order.
    let order = h.service.create_order(&h.ctx, "USD").await.unwrap();
    let order = h
        .service
        .add_item_to_order(&h.ctx, order.id, variant_id, 1, Default::default())
        .await
        .unwrap();
    let item = order.lines[0].items[0].id;
    let err = h
        .service
        .create_fulfillment(&h.ctx, order.id, vec![item], "post", "T1")
        .await
        .unwrap_err();
    assert!(matches!(err, OrderError::FulfillmentCreation { .. }));

    // Empty item set.
    let placed = place_order(&h, variant_id, 1).await;
    let err = h
        .service
        .create_fulfillment(&h.ctx, placed.id, Vec::new(), "post", "T1")
        .await
        .unwrap_err();
    assert!(matches!(err, OrderError::FulfillmentCreation { .. }));

    // Unknown item.
    let err = h
        .service
        .create_fulfillment(&h.ctx, placed.id, vec![OrderItemId::new()], "post", "T1")
        .await
        .unwrap_err();
    assert!(matches!(err, OrderError::FulfillmentCreation { .. }));

    // Already fulfilled item.
    let item = placed.lines[0].items[0].id;
    h.service.create_fulfillment(&h.ctx, placed.id, vec![item], "post", "T1").await.unwrap();
    let err = h
        .service
        .create_fulfillment(&h.ctx, placed.id, vec![item], "post", "T2")
        .await
        .unwrap_err();
    assert!(matches!(err, OrderError::FulfillmentCreation { .. }));
}

#[tokio::test]
async fn shipment_progress_drives_the_order_state() {
    let h = harness(fixtures::test_config());
    let variant_id = fixtures::standard_catalog(&h.store);
    let order = place_order(&h, variant_id, 2).await;
    let items = item_ids(&order);

    let order = h
        .service
        .create_fulfillment(&h.ctx, order.id, vec![items[0]], "post", "T1")
        .await
        .unwrap();
    let first = order.fulfillments[0].id;
    assert_eq!(order.fulfillments[0].state, FulfillmentState::Pending);
    assert_eq!(order.state, OrderState::PaymentSettled, "pending shipments change nothing");

    // One of two units shipped.
    let order = h
        .service
        .transition_fulfillment_to_state(&h.ctx, order.id, first, FulfillmentState::Shipped)
        .await
        .unwrap();
    assert_eq!(order.state, OrderState::PartiallyShipped);

    // Second unit shipped: every live unit is on its way.
    let order = h
        .service
        .create_fulfillment(&h.ctx, order.id, vec![items[1]], "post", "T2")
        .await
        .unwrap();
    let second = order.fulfillments[1].id;
    let order = h
        .service
        .transition_fulfillment_to_state(&h.ctx, order.id, second, FulfillmentState::Shipped)
        .await
        .unwrap();
    assert_eq!(order.state, OrderState::Shipped);

    // Deliveries follow the same derivation.
    let order = h
        .service
        .transition_fulfillment_to_state(&h.ctx, order.id, first, FulfillmentState::Delivered)
        .await
        .unwrap();
    assert_eq!(order.state, OrderState::PartiallyDelivered);
    let order = h
        .service
        .transition_fulfillment_to_state(&h.ctx, order.id, second, FulfillmentState::Delivered)
        .await
        .unwrap();
    assert_eq!(order.state, OrderState::Delivered);
}

#[tokio::test]
async fn cancelled_shipments_free_their_units() {
    let h = harness(fixtures::test_config());
    let variant_id = fixtures::standard_catalog(&h.store);
    let order = place_order(&h, variant_id, 1).await;
    let item = order.lines[0].items[0].id;

    let order = h
        .service
        .create_fulfillment(&h.ctx, order.id, vec![item], "post", "T1")
        .await
        .unwrap();
    let fulfillment_id = order.fulfillments[0].id;
    assert_eq!(order.lines[0].items[0].fulfillment_id, Some(fulfillment_id));

    let order = h
        .service
        .transition_fulfillment_to_state(
            &h.ctx,
            order.id,
            fulfillment_id,
            FulfillmentState::Cancelled,
        )
        .await
        .unwrap();
    assert_eq!(order.lines[0].items[0].fulfillment_id, None);
    assert_eq!(order.state, OrderState::PaymentSettled);

    // The freed unit can be fulfilled again.
    let order = h
        .service
        .create_fulfillment(&h.ctx, order.id, vec![item], "courier", "T2")
        .await
        .unwrap();
    assert_eq!(order.fulfillments.len(), 2);
    assert_eq!(order.lines[0].items[0].fulfillment_id, Some(order.fulfillments[1].id));
}

#[tokio::test]
async fn fulfillment_table_misses_are_rejected() {
    let h = harness(fixtures::test_config());
    let variant_id = fixtures::standard_catalog(&h.store);
    let order = place_order(&h, variant_id, 1).await;
    let item = order.lines[0].items[0].id;
    let order = h
        .service
        .create_fulfillment(&h.ctx, order.id, vec![item], "post", "T1")
        .await
        .unwrap();
    let fulfillment_id = order.fulfillments[0].id;

    let err = h
        .service
        .transition_fulfillment_to_state(
            &h.ctx,
            order.id,
            fulfillment_id,
            FulfillmentState::Delivered,
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrderError::FulfillmentStateTransition { from: FulfillmentState::Pending, .. }
    ));
}

/// Vetoes shipment and records what it observed.
struct CarrierEmbargoProcess {
    observed: Mutex<Vec<String>>,
}

#[async_trait]
impl FulfillmentProcess for CarrierEmbargoProcess {
    async fn on_transition_start(
        &self,
        _ctx: &RequestContext,
        _from: &FulfillmentState,
        to: &FulfillmentState,
        _order: &Order,
    ) -> Result<(), String> {
        if *to == FulfillmentState::Shipped {
            return Err("the carrier is not accepting parcels".to_string());
        }
        Ok(())
    }

    async fn on_transition_error(
        &self,
        _ctx: &RequestContext,
        _from: &FulfillmentState,
        _to: &FulfillmentState,
        error: &str,
    ) {
        self.observed.lock().unwrap().push(error.to_string());
    }
}

#[tokio::test]
async fn vetoed_fulfillment_transitions_are_observable() {
    let embargo = Arc::new(CarrierEmbargoProcess { observed: Mutex::new(Vec::new()) });
    let config = fixtures::test_config().with_fulfillment_process(embargo.clone());
    let h = harness(config);
    let variant_id = fixtures::standard_catalog(&h.store);
    let order = place_order(&h, variant_id, 1).await;
    let item = order.lines[0].items[0].id;
    let order = h
        .service
        .create_fulfillment(&h.ctx, order.id, vec![item], "post", "T1")
        .await
        .unwrap();
    let fulfillment_id = order.fulfillments[0].id;

    let err = h
        .service
        .transition_fulfillment_to_state(
            &h.ctx,
            order.id,
            fulfillment_id,
            FulfillmentState::Shipped,
        )
        .await
        .unwrap_err();
    let OrderError::FulfillmentStateTransition { transition_error, .. } = err else {
        panic!("expected a fulfillment transition error, got {err:?}");
    };
    assert_eq!(transition_error, "the carrier is not accepting parcels");
    assert_eq!(*embargo.observed.lock().unwrap(), vec![transition_error]);
}

#[tokio::test]
async fn cancelling_a_placed_order_releases_its_stock() {
    let h = harness(fixtures::test_config());
    let variant_id = fixtures::standard_catalog(&h.store);
    let order = place_order(&h, variant_id, 2).await;
    assert_eq!(h.store.variant_snapshot(variant_id).unwrap().stock_allocated, 2);

    let order = h.service.cancel_order(&h.ctx, order.id).await.unwrap();
    assert_eq!(order.state, OrderState::Cancelled);
    assert!(!order.active);
    assert_eq!(order.lines[0].quantity(), 0, "every live unit is cancelled");
    assert_eq!(order.lines[0].total_units(), 2, "units stay for the audit trail");
    assert_eq!(h.store.variant_snapshot(variant_id).unwrap().stock_allocated, 0);
}

#[tokio::test]
async fn cancelling_before_placement_leaves_stock_alone() {
    let h = harness(fixtures::test_config());
    let variant_id = fixtures::standard_catalog(&h.store);
    let order = h.service.create_order(&h.ctx, "USD").await.unwrap();
    let order = h
        .service
        .add_item_to_order(&h.ctx, order.id, variant_id, 2, Default::default())
        .await
        .unwrap();
    assert_eq!(h.store.variant_snapshot(variant_id).unwrap().stock_allocated, 0);

    let order = h.service.cancel_order(&h.ctx, order.id).await.unwrap();
    assert_eq!(order.state, OrderState::Cancelled);
    assert_eq!(h.store.variant_snapshot(variant_id).unwrap().stock_allocated, 0);
}

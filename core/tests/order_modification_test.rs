//! Integration tests for post-placement order modification: dry runs,
//! refund creation, shipping requotes, and the audit trail.

#![allow(clippy::unwrap_used)] // test assertions may unwrap

use orderflow_core::error::OrderError;
use orderflow_core::events::DomainEvent;
use orderflow_core::id::VariantId;
use orderflow_core::modify::{
    AdjustLineInput, ModificationRefundInput, ModifyOrderInput, ModifyOrderOptions, SurchargeInput,
};
use orderflow_core::money::{Money, TaxRate};
use orderflow_core::order::{Address, Order, OrderState, RefundState};
use orderflow_core::{OrderEngineConfig, OrderService, RequestContext};
use orderflow_testing::fixtures::{self, ByCountryShippingCalculator};
use orderflow_testing::{CollectingPublisher, InMemoryOrderStore, test_context};
use std::sync::Arc;

struct Harness {
    store: Arc<InMemoryOrderStore>,
    publisher: Arc<CollectingPublisher>,
    service: OrderService,
    ctx: RequestContext,
}

fn harness(config: OrderEngineConfig) -> Harness {
    let store = Arc::new(InMemoryOrderStore::new());
    let publisher = Arc::new(CollectingPublisher::new());
    let service = OrderService::new(store.clone(), publisher.clone(), config);
    Harness { store, publisher, service, ctx: test_context() }
}

/// Builds, pays, and places an order with `quantity` units of `variant_id`,
/// leaving it in the `Modifying` state.
async fn placed_order_in_modifying(h: &Harness, variant_id: VariantId, quantity: i32) -> Order {
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
    let order = h.service.settle_payment(&h.ctx, order.id, payment_id).await.unwrap();
    assert_eq!(order.state, OrderState::PaymentSettled);
    h.service
        .transition_order_to_state(&h.ctx, order.id, OrderState::Modifying)
        .await
        .unwrap()
}

#[tokio::test]
async fn dry_run_previews_without_persisting() {
    let h = harness(fixtures::test_config());
    let variant_id = fixtures::standard_catalog(&h.store);
    let order = placed_order_in_modifying(&h, variant_id, 2).await;
    // 2 units at 5374 net, 20% tax
    assert_eq!(order.total_with_tax, Money::from_minor(12_898));

    let input = ModifyOrderInput {
        adjust_order_lines: vec![AdjustLineInput { line_id: order.lines[0].id, quantity: 1 }],
        ..Default::default()
    };
    let preview = h.service.modify_order(&h.ctx, order.id, input.clone(), true).await.unwrap();
    assert_eq!(preview.price_change, Money::from_minor(-6449));
    assert_eq!(preview.order.lines[0].quantity(), 1);

    // Nothing was written: same preview again, and the store is untouched.
    let again = h.service.modify_order(&h.ctx, order.id, input, true).await.unwrap();
    assert_eq!(again.price_change, Money::from_minor(-6449));

    let stored = h.service.get_order(&h.ctx, order.id).await.unwrap();
    assert_eq!(stored.lines[0].quantity(), 2);
    assert!(stored.modifications.is_empty());
    assert!(!h.publisher.events().iter().any(|e| matches!(e, DomainEvent::OrderModified { .. })));
}

#[tokio::test]
async fn empty_input_is_rejected() {
    let h = harness(fixtures::test_config());
    let variant_id = fixtures::standard_catalog(&h.store);
    let order = placed_order_in_modifying(&h, variant_id, 1).await;

    let err = h
        .service
        .modify_order(&h.ctx, order.id, ModifyOrderInput::default(), false)
        .await
        .unwrap_err();
    assert_eq!(err, OrderError::NoChangesSpecified);
    assert_eq!(err.error_code(), "NO_CHANGES_SPECIFIED_ERROR");
}

#[tokio::test]
async fn modification_outside_modifying_state_is_rejected() {
    let h = harness(fixtures::test_config());
    let variant_id = fixtures::standard_catalog(&h.store);
    let order = h.service.create_order(&h.ctx, "USD").await.unwrap();
    let order = h
        .service
        .add_item_to_order(&h.ctx, order.id, variant_id, 1, Default::default())
        .await
        .unwrap();

    let input = ModifyOrderInput {
        adjust_order_lines: vec![AdjustLineInput { line_id: order.lines[0].id, quantity: 2 }],
        ..Default::default()
    };
    let err = h.service.modify_order(&h.ctx, order.id, input, false).await.unwrap_err();
    assert!(matches!(err, OrderError::OrderModificationState { .. }));
}

#[tokio::test]
async fn price_decrease_requires_a_refund_payment() {
    let h = harness(fixtures::test_config());
    let variant_id = fixtures::standard_catalog(&h.store);
    let order = placed_order_in_modifying(&h, variant_id, 2).await;

    let input = ModifyOrderInput {
        adjust_order_lines: vec![AdjustLineInput { line_id: order.lines[0].id, quantity: 1 }],
        ..Default::default()
    };
    let err = h.service.modify_order(&h.ctx, order.id, input, false).await.unwrap_err();
    assert_eq!(err, OrderError::RefundPaymentIdMissing);

    // The failed attempt persisted nothing.
    let stored = h.service.get_order(&h.ctx, order.id).await.unwrap();
    assert_eq!(stored.lines[0].quantity(), 2);
    assert!(stored.modifications.is_empty());
}

#[tokio::test]
async fn quantity_decrease_refunds_and_releases_stock() {
    let h = harness(fixtures::test_config());
    let variant_id = fixtures::standard_catalog(&h.store);
    let order = placed_order_in_modifying(&h, variant_id, 2).await;
    let payment_id = order.payments[0].id;
    assert_eq!(h.store.variant_snapshot(variant_id).unwrap().stock_allocated, 2);

    let input = ModifyOrderInput {
        adjust_order_lines: vec![AdjustLineInput { line_id: order.lines[0].id, quantity: 1 }],
        refund: Some(ModificationRefundInput {
            payment_id,
            reason: Some("one unit returned before shipping".into()),
        }),
        note: "customer kept one".into(),
        ..Default::default()
    };
    let result = h.service.modify_order(&h.ctx, order.id, input, false).await.unwrap();
    assert_eq!(result.price_change, Money::from_minor(-6449));

    let order = result.order;
    assert_eq!(order.lines[0].quantity(), 1);
    assert_eq!(order.lines[0].total_units(), 2, "cancelled unit is retained");
    assert_eq!(order.total_with_tax, Money::from_minor(6449));

    // Audit record and refund.
    assert_eq!(order.modifications.len(), 1);
    let modification = &order.modifications[0];
    assert_eq!(modification.price_change, Money::from_minor(-6449));
    assert_eq!(modification.note, "customer kept one");
    assert_eq!(modification.refund_ids.len(), 1);
    assert!(modification.is_settled(), "decreases settle at creation");

    let refund = &order.payments[0].refunds[0];
    assert_eq!(refund.total, Money::from_minor(6449));
    assert_eq!(refund.state, RefundState::Pending);
    assert_eq!(refund.item_ids.len(), 1);

    // The cancelled unit points back at its refund.
    let cancelled = order.lines[0].items.iter().find(|item| item.cancelled).unwrap();
    assert_eq!(cancelled.refund_id, Some(refund.id));

    // What the customer paid minus refunds matches the new total.
    let covered = order.payments[0].amount - refund.total;
    assert_eq!(covered, order.total_with_tax);

    // Stock allocation released in the same commit.
    assert_eq!(h.store.variant_snapshot(variant_id).unwrap().stock_allocated, 1);

    assert!(h.publisher.events().iter().any(|e| matches!(
        e,
        DomainEvent::OrderModified { price_change, .. } if *price_change == Money::from_minor(-6449)
    )));
}

#[tokio::test]
async fn shipping_address_change_drives_the_price_change() {
    let config = fixtures::test_config()
        .with_shipping_calculator(Arc::new(ByCountryShippingCalculator::gb_us()));
    let h = harness(config);
    let variant_id = fixtures::standard_catalog(&h.store);

    let order = h.service.create_order(&h.ctx, "USD").await.unwrap();
    let order = h
        .service
        .add_item_to_order(&h.ctx, order.id, variant_id, 1, Default::default())
        .await
        .unwrap();
    let order = h
        .service
        .set_shipping_address(&h.ctx, order.id, Address::for_country("GB"))
        .await
        .unwrap();
    assert_eq!(order.shipping, Money::from_minor(500));
    assert_eq!(order.total_with_tax, Money::from_minor(6949));

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
    let order = h.service.settle_payment(&h.ctx, order.id, payment_id).await.unwrap();
    let order = h
        .service
        .transition_order_to_state(&h.ctx, order.id, OrderState::Modifying)
        .await
        .unwrap();

    let input = ModifyOrderInput {
        update_shipping_address: Some(Address::for_country("US")),
        options: ModifyOrderOptions { recalculate_shipping: true },
        ..Default::default()
    };
    let result = h.service.modify_order(&h.ctx, order.id, input, false).await.unwrap();
    assert_eq!(result.price_change, Money::from_minor(500), "GB 500 becomes US 1000");
    assert_eq!(result.order.shipping, Money::from_minor(1000));
    assert_eq!(result.order.modifications[0].price_change, Money::from_minor(500));
    assert!(!result.order.modifications[0].is_settled(), "increase awaits payment");
}

#[tokio::test]
async fn surcharges_raise_the_total() {
    let h = harness(fixtures::test_config());
    let variant_id = fixtures::standard_catalog(&h.store);
    let order = placed_order_in_modifying(&h, variant_id, 1).await;

    let input = ModifyOrderInput {
        surcharges: vec![SurchargeInput {
            description: "gift wrapping".into(),
            price: Money::from_minor(250),
            tax_rate: TaxRate::ZERO,
        }],
        ..Default::default()
    };
    let result = h.service.modify_order(&h.ctx, order.id, input, false).await.unwrap();
    assert_eq!(result.price_change, Money::from_minor(250));
    assert_eq!(result.order.surcharges.len(), 1);
    assert_eq!(result.order.modifications[0].surcharge_ids, vec![result.order.surcharges[0].id]);
}

#[tokio::test]
async fn cancelling_every_unit_refunds_everything_and_repeats_as_a_noop() {
    let h = harness(fixtures::test_config());
    let variant_id = fixtures::standard_catalog(&h.store);
    let order = placed_order_in_modifying(&h, variant_id, 2).await;
    let payment_id = order.payments[0].id;
    let line_id = order.lines[0].id;

    let input = ModifyOrderInput {
        adjust_order_lines: vec![AdjustLineInput { line_id, quantity: 0 }],
        refund: Some(ModificationRefundInput { payment_id, reason: None }),
        ..Default::default()
    };
    let result = h.service.modify_order(&h.ctx, order.id, input.clone(), false).await.unwrap();
    assert_eq!(result.price_change, Money::from_minor(-12_898));
    assert_eq!(result.order.total_with_tax, Money::ZERO);
    assert!(result.order.is_empty());
    assert_eq!(h.store.variant_snapshot(variant_id).unwrap().stock_allocated, 0);

    // Adjusting to zero again changes nothing and owes nothing.
    let repeat = h.service.modify_order(&h.ctx, order.id, input, false).await.unwrap();
    assert_eq!(repeat.price_change, Money::ZERO);
    assert_eq!(repeat.order.payments[0].refunds.len(), 1, "no second refund");
}

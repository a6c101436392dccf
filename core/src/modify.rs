//! Post-placement order modification.
//!
//! A placed order's contents may only change through `modify_order`, in
//! the explicit `Modifying` state. The engine applies the requested
//! changes to a working copy, runs the full recalculation pass, and
//! compares the with-tax total against the pre-modification snapshot to
//! produce `price_change`. A dry run stops there; a wet run additionally
//! creates the audit record, refunds for price decreases (prorated across
//! settled payments), and the stock-allocation deltas for the commit.

use crate::calculator::{recalculate, RecalculateOptions};
use crate::config::OrderEngineConfig;
use crate::context::RequestContext;
use crate::custom_fields::CustomFields;
use crate::error::OrderError;
use crate::id::{OrderItemId, OrderLineId, PaymentId, SurchargeId, VariantId};
use crate::money::{Money, TaxRate};
use crate::order::{Order, OrderLine, OrderModification, Payment, Refund, Surcharge};
use crate::promotion::Promotion;
use crate::store::{ProductVariant, StockAdjustment};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

/// One variant to add (or increment) during a modification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AddItemInput {
    /// Variant to add.
    pub variant_id: VariantId,
    /// Requested quantity; must be positive.
    pub quantity: i32,
    /// Custom fields for the line. Part of line identity: a bag that
    /// matches no existing line starts a new one.
    #[serde(default)]
    pub custom_fields: CustomFields,
}

/// A quantity change for one existing line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustLineInput {
    /// The line to adjust.
    pub line_id: OrderLineId,
    /// New live quantity; zero cancels every unit but keeps the line.
    pub quantity: i32,
}

/// An ad-hoc surcharge to add during a modification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SurchargeInput {
    /// Why the surcharge is applied.
    pub description: String,
    /// Signed net amount.
    pub price: Money,
    /// Tax rate on the amount.
    pub tax_rate: TaxRate,
}

/// Where a refund for a price decrease should be drawn from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModificationRefundInput {
    /// Payment the refund (and any proration remainder) is drawn against.
    pub payment_id: PaymentId,
    /// Operator-facing reason recorded on the refunds.
    pub reason: Option<String>,
}

/// Toggles for the modification pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifyOrderOptions {
    /// Requote shipping against the (possibly updated) address.
    pub recalculate_shipping: bool,
}

/// Everything a single `modify_order` call may change. All fields are
/// optional, but at least one change must be present.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ModifyOrderInput {
    /// Variants to add or increment.
    #[serde(default)]
    pub add_items: Vec<AddItemInput>,
    /// Quantity changes for existing lines.
    #[serde(default)]
    pub adjust_order_lines: Vec<AdjustLineInput>,
    /// Surcharges to add.
    #[serde(default)]
    pub surcharges: Vec<SurchargeInput>,
    /// Replacement shipping address.
    pub update_shipping_address: Option<crate::order::Address>,
    /// Replacement coupon-code list. `Some(vec![])` clears all codes.
    pub coupon_codes: Option<Vec<String>>,
    /// Fields merged (not replaced) into the order's custom-field bag.
    pub custom_fields: Option<CustomFields>,
    /// Where to draw refunds from when the price decreases.
    pub refund: Option<ModificationRefundInput>,
    /// Operator note recorded on the modification.
    #[serde(default)]
    pub note: String,
    /// Pass toggles.
    #[serde(default)]
    pub options: ModifyOrderOptions,
}

impl ModifyOrderInput {
    /// Whether the input specifies no change at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.add_items.is_empty()
            && self.adjust_order_lines.is_empty()
            && self.surcharges.is_empty()
            && self.update_shipping_address.is_none()
            && self.coupon_codes.is_none()
            && self.custom_fields.is_none()
    }
}

/// Result of a `modify_order` call. For dry runs, `order` is the would-be
/// state and nothing was persisted.
#[derive(Clone, Debug)]
pub struct ModifyOrderResult {
    /// The order after the modification.
    pub order: Order,
    /// With-tax delta against the order before the modification.
    pub price_change: Money,
}

/// Prefetched collaborator data the modification pass needs.
pub(crate) struct ModificationContext<'a> {
    pub config: &'a OrderEngineConfig,
    pub promotions: &'a [Promotion],
    /// Variants referenced by `add_items`, keyed by id.
    pub variants: &'a HashMap<VariantId, ProductVariant>,
}

/// What a wet-run commit must carry besides the order itself.
#[derive(Debug, Default)]
pub(crate) struct ModificationOutcome {
    pub price_change: Money,
    pub stock_adjustments: Vec<StockAdjustment>,
}

/// Applies `input` to `order` in memory and, unless `dry_run`, appends the
/// audit record and refunds. The caller owns state checks, coupon
/// validation, interceptor dispatch, and the commit.
pub(crate) async fn apply_modification(
    ctx: &RequestContext,
    order: &mut Order,
    input: &ModifyOrderInput,
    dry_run: bool,
    mctx: &ModificationContext<'_>,
) -> Result<ModificationOutcome, OrderError> {
    let total_before = order.total_with_tax;
    let mut added_item_ids: Vec<OrderItemId> = Vec::new();
    let mut cancelled_item_ids: Vec<OrderItemId> = Vec::new();
    let mut surcharge_ids: Vec<SurchargeId> = Vec::new();
    let mut stock_adjustments: Vec<StockAdjustment> = Vec::new();

    for add in &input.add_items {
        let quantity = validate_quantity(add.quantity)?;
        let variant = mctx.variants.get(&add.variant_id).ok_or_else(|| {
            OrderError::EntityNotFound { entity: "ProductVariant", id: add.variant_id.to_string() }
        })?;
        check_stock(variant, quantity)?;
        check_item_limit(order, mctx.config, quantity)?;
        mctx.config.custom_fields.validate("OrderLine", &add.custom_fields)?;

        let ids = match order.matching_line_index(add.variant_id, &add.custom_fields) {
            Some(index) => {
                let price = mctx.config.changed_price_handling.price_for_existing_line(
                    ctx,
                    &order.lines[index],
                    variant.list_price,
                );
                order.lines[index].set_unit_price(price);
                order.lines[index].add_units(quantity)
            }
            None => {
                let line = OrderLine::new(
                    add.variant_id,
                    variant.list_price,
                    variant.tax_rate,
                    quantity,
                    add.custom_fields.clone(),
                );
                let ids = line.items.iter().map(|item| item.id).collect();
                order.lines.push(line);
                ids
            }
        };
        added_item_ids.extend(ids);
        stock_adjustments
            .push(StockAdjustment { variant_id: add.variant_id, delta: i64::from(quantity) });
    }

    for adjust in &input.adjust_order_lines {
        let target = validate_adjust_quantity(adjust.quantity)?;
        let line = order.get_line(adjust.line_id).ok_or_else(|| OrderError::EntityNotFound {
            entity: "OrderLine",
            id: adjust.line_id.to_string(),
        })?;
        let current = line.quantity();
        let variant_id = line.variant_id;

        if target > current {
            let extra = target - current;
            let variant = match mctx.variants.get(&variant_id) {
                Some(variant) => variant.clone(),
                None => {
                    return Err(OrderError::EntityNotFound {
                        entity: "ProductVariant",
                        id: variant_id.to_string(),
                    })
                }
            };
            check_stock(&variant, extra)?;
            check_item_limit(order, mctx.config, extra)?;
            if let Some(line) = order.get_line_mut(adjust.line_id) {
                added_item_ids.extend(line.add_units(extra));
            }
            stock_adjustments.push(StockAdjustment { variant_id, delta: i64::from(extra) });
        } else if target < current {
            let drop = current - target;
            if let Some(line) = order.get_line_mut(adjust.line_id) {
                cancelled_item_ids.extend(line.cancel_units(drop));
            }
            stock_adjustments.push(StockAdjustment { variant_id, delta: -i64::from(drop) });
        }
        // target == current is a no-op for this line
    }

    for surcharge in &input.surcharges {
        let entity = Surcharge::new(&surcharge.description, surcharge.price, surcharge.tax_rate);
        surcharge_ids.push(entity.id);
        order.surcharges.push(entity);
    }

    if let Some(address) = &input.update_shipping_address {
        order.shipping_address = Some(address.clone());
    }

    if let Some(codes) = &input.coupon_codes {
        order.coupon_codes.clone_from(codes);
    }

    if let Some(fields) = &input.custom_fields {
        let mut merged = order.custom_fields.clone();
        for (key, value) in fields {
            merged.insert(key.clone(), value.clone());
        }
        mctx.config.custom_fields.validate("Order", &merged)?;
        order.custom_fields = merged;
    }

    recalculate(
        ctx,
        order,
        mctx.config,
        mctx.promotions,
        RecalculateOptions { requote_shipping: input.options.recalculate_shipping },
    )
    .await?;

    let price_change = order.total_with_tax - total_before;
    order.touch(ctx.now());

    if dry_run {
        return Ok(ModificationOutcome { price_change, stock_adjustments: Vec::new() });
    }

    let mut modification = OrderModification::new(price_change, input.note.clone(), ctx.now());
    modification.item_ids.extend(added_item_ids);
    modification.item_ids.extend(cancelled_item_ids.iter().copied());
    modification.surcharge_ids = surcharge_ids;

    if price_change.is_negative() {
        let Some(refund_input) = &input.refund else {
            return Err(OrderError::RefundPaymentIdMissing);
        };
        let shares = plan_refunds(order, price_change.abs(), refund_input.payment_id)?;
        // The named payment's refund carries the cancelled units; rollover
        // refunds on other payments are amount-only.
        let carrier = shares
            .iter()
            .find(|(id, _)| *id == refund_input.payment_id)
            .or_else(|| shares.first())
            .map(|(id, _)| *id);
        for (payment_id, amount) in shares {
            let mut refund = Refund::new(payment_id, amount, ctx.now());
            refund.reason.clone_from(&refund_input.reason);
            let carries_items = Some(payment_id) == carrier;
            if carries_items {
                refund.item_ids = cancelled_item_ids.clone();
            }
            modification.refund_ids.push(refund.id);
            let refund_id = refund.id;
            if let Some(payment) = order.payment_mut(payment_id) {
                payment.refunds.push(refund);
            }
            if carries_items {
                for item_id in &cancelled_item_ids {
                    mark_item_refunded(order, *item_id, refund_id);
                }
            }
        }
    }

    info!(
        order_id = %order.id,
        price_change = %modification.price_change,
        "order modification applied"
    );
    order.modifications.push(modification);
    Ok(ModificationOutcome { price_change, stock_adjustments })
}

fn mark_item_refunded(order: &mut Order, item_id: OrderItemId, refund_id: crate::id::RefundId) {
    for line in &mut order.lines {
        if let Some(item) = line.items.iter_mut().find(|item| item.id == item_id) {
            if item.refund_id.is_none() {
                item.refund_id = Some(refund_id);
            }
        }
    }
}

/// Splits `refund_total` across the order's settled payments in proportion
/// to each payment's original amount. The rounding remainder goes to
/// `preferred`; shares exceeding a payment's refundable residue roll over
/// to the other payments.
pub(crate) fn plan_refunds(
    order: &Order,
    refund_total: Money,
    preferred: PaymentId,
) -> Result<Vec<(PaymentId, Money)>, OrderError> {
    let settled: Vec<&Payment> = order.payments.iter().filter(|p| p.is_settled()).collect();
    if !settled.iter().any(|p| p.id == preferred) {
        return Err(OrderError::EntityNotFound { entity: "Payment", id: preferred.to_string() });
    }

    let refundable_total: Money = settled.iter().map(|p| p.refundable()).sum();
    if refund_total > refundable_total {
        return Err(OrderError::RefundAmountExceeded {
            requested: refund_total,
            refundable: refundable_total,
        });
    }

    let amount_total: i64 = settled.iter().map(|p| p.amount.minor()).sum();
    let mut shares: Vec<(PaymentId, Money)> = settled
        .iter()
        .map(|p| (p.id, refund_total.prorate(p.amount.minor(), amount_total)))
        .collect();
    let assigned: Money = shares.iter().map(|(_, amount)| *amount).sum();
    let remainder = refund_total - assigned;
    if let Some(share) = shares.iter_mut().find(|(id, _)| *id == preferred) {
        share.1 += remainder;
    }

    // Cap each share at its payment's refundable residue; whatever spills
    // over moves to payments with capacity left, preferred payment first.
    let mut overflow = Money::ZERO;
    for (id, amount) in &mut shares {
        let capacity = settled
            .iter()
            .find(|p| p.id == *id)
            .map_or(Money::ZERO, |p| p.refundable());
        if *amount > capacity {
            overflow += *amount - capacity;
            *amount = capacity;
        }
    }
    if overflow.is_positive() {
        for (id, amount) in &mut shares {
            let capacity = settled
                .iter()
                .find(|p| p.id == *id)
                .map_or(Money::ZERO, |p| p.refundable());
            let headroom = capacity - *amount;
            if headroom.is_positive() {
                let take = if overflow < headroom { overflow } else { headroom };
                *amount += take;
                overflow -= take;
                if overflow.is_zero() {
                    break;
                }
            }
        }
    }

    Ok(shares.into_iter().filter(|(_, amount)| amount.is_positive()).collect())
}

pub(crate) fn validate_quantity(quantity: i32) -> Result<u32, OrderError> {
    u32::try_from(quantity)
        .ok()
        .filter(|q| *q > 0)
        .ok_or(OrderError::NegativeQuantity { quantity })
}

pub(crate) fn validate_adjust_quantity(quantity: i32) -> Result<u32, OrderError> {
    u32::try_from(quantity).map_err(|_| OrderError::NegativeQuantity { quantity })
}

pub(crate) fn check_stock(variant: &ProductVariant, requested: u32) -> Result<(), OrderError> {
    if requested > variant.saleable() {
        return Err(OrderError::InsufficientStock { quantity_available: variant.saleable() });
    }
    Ok(())
}

pub(crate) fn check_item_limit(
    order: &Order,
    config: &OrderEngineConfig,
    adding: u32,
) -> Result<(), OrderError> {
    if order.total_quantity().saturating_add(adding) > config.max_order_items {
        return Err(OrderError::OrderLimit { max_items: config.max_order_items });
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // test assertions may unwrap
mod tests {
    use super::*;
    use crate::id::ChannelId;
    use crate::order::PaymentState;
    use chrono::Utc;
    use proptest::prelude::*;

    fn order_with_settled_payments(amounts: &[i64]) -> Order {
        let mut order = Order::new(ChannelId::new(), "USD", Utc::now());
        for amount in amounts {
            let mut payment = Payment::new(
                "test",
                Money::from_minor(*amount),
                serde_json::Value::Null,
                Utc::now(),
            );
            payment.state = PaymentState::Settled;
            order.payments.push(payment);
        }
        order
    }

    #[test]
    fn empty_input_is_detected() {
        assert!(ModifyOrderInput::default().is_empty());
        let with_note = ModifyOrderInput { note: "just a note".into(), ..Default::default() };
        assert!(with_note.is_empty(), "a bare note is not a change");
    }

    #[test]
    fn refunds_prorate_by_payment_amount() {
        let order = order_with_settled_payments(&[12_000, 3_000]);
        let preferred = order.payments[0].id;
        let shares = plan_refunds(&order, Money::from_minor(5000), preferred).unwrap();
        assert_eq!(shares.len(), 2);
        assert_eq!(shares[0].1, Money::from_minor(4000));
        assert_eq!(shares[1].1, Money::from_minor(1000));
    }

    #[test]
    fn proration_remainder_goes_to_the_named_payment() {
        let order = order_with_settled_payments(&[1000, 1000, 1000]);
        let preferred = order.payments[1].id;
        // 100 / 3 = 33 each, remainder 1
        let shares = plan_refunds(&order, Money::from_minor(100), preferred).unwrap();
        let total: Money = shares.iter().map(|(_, amount)| *amount).sum();
        assert_eq!(total, Money::from_minor(100));
        let named = shares.iter().find(|(id, _)| *id == preferred).unwrap();
        assert_eq!(named.1, Money::from_minor(34));
    }

    #[test]
    fn shares_capped_at_refundable_roll_over() {
        let mut order = order_with_settled_payments(&[10_000, 10_000]);
        let preferred = order.payments[0].id;
        // First payment already refunded down to 1000 of capacity.
        let first_id = order.payments[0].id;
        order.payments[0].refunds.push(Refund::new(
            first_id,
            Money::from_minor(9000),
            Utc::now(),
        ));
        let shares = plan_refunds(&order, Money::from_minor(6000), preferred).unwrap();
        let by_id: HashMap<_, _> = shares.into_iter().collect();
        assert_eq!(by_id[&order.payments[0].id], Money::from_minor(1000));
        assert_eq!(by_id[&order.payments[1].id], Money::from_minor(5000));
    }

    #[test]
    fn refunds_beyond_total_capacity_are_rejected() {
        let order = order_with_settled_payments(&[2000]);
        let preferred = order.payments[0].id;
        let err = plan_refunds(&order, Money::from_minor(2500), preferred).unwrap_err();
        assert!(matches!(err, OrderError::RefundAmountExceeded { .. }));
    }

    #[test]
    fn unknown_preferred_payment_is_rejected() {
        let order = order_with_settled_payments(&[2000]);
        let err = plan_refunds(&order, Money::from_minor(100), PaymentId::new()).unwrap_err();
        assert!(matches!(err, OrderError::EntityNotFound { entity: "Payment", .. }));
    }

    #[test]
    fn quantities_must_be_positive_for_adds() {
        assert!(matches!(
            validate_quantity(-1),
            Err(OrderError::NegativeQuantity { quantity: -1 })
        ));
        assert!(matches!(validate_quantity(0), Err(OrderError::NegativeQuantity { .. })));
        assert_eq!(validate_quantity(3).unwrap(), 3);
        // adjusting to zero is allowed; below zero is not
        assert_eq!(validate_adjust_quantity(0).unwrap(), 0);
        assert!(validate_adjust_quantity(-2).is_err());
    }

    proptest! {
        #[test]
        fn planned_refunds_always_sum_to_the_request(
            amounts in proptest::collection::vec(1000i64..100_000, 1..5),
            requested_ratio in 1u32..100,
        ) {
            let order = order_with_settled_payments(&amounts);
            let preferred = order.payments[0].id;
            let capacity: i64 = amounts.iter().sum();
            let requested = Money::from_minor(capacity * i64::from(requested_ratio) / 100);
            if requested.is_zero() {
                return Ok(());
            }
            let shares = plan_refunds(&order, requested, preferred).unwrap();
            let total: Money = shares.iter().map(|(_, amount)| *amount).sum();
            prop_assert_eq!(total, requested);
            for (id, amount) in &shares {
                let payment = order.payments.iter().find(|p| p.id == *id).unwrap();
                prop_assert!(*amount <= payment.refundable());
            }
        }
    }
}

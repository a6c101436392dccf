//! The full order recalculation pass.
//!
//! Runs after every content mutation, inside the operation and before its
//! commit: promotions are re-evaluated, shipping optionally requoted, and
//! the cached totals rewritten. The pass is the single place totals are
//! computed, which is what keeps the aggregate invariant (total equals
//! discounted line totals plus shipping plus order adjustments plus
//! surcharges) true after every operation.

use crate::config::OrderEngineConfig;
use crate::context::RequestContext;
use crate::error::OrderError;
use crate::order::{Order, OrderLine, Surcharge};
use crate::promotion::{apply_promotions, Promotion};
use tracing::debug;

/// What the pass should requote beyond prices and promotions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecalculateOptions {
    /// Requote shipping through the configured calculator.
    pub requote_shipping: bool,
}

/// Re-evaluates promotions, optionally requotes shipping, and rewrites the
/// order's cached totals.
///
/// Promotion activation/deactivation hooks run inside this pass, so any
/// order data they mutate is part of whatever commit follows.
///
/// # Errors
///
/// Propagates promotion and shipping strategy failures; the order may be
/// partially recalculated on error and must not be committed.
pub async fn recalculate(
    ctx: &RequestContext,
    order: &mut Order,
    config: &OrderEngineConfig,
    promotions: &[Promotion],
    options: RecalculateOptions,
) -> Result<(), OrderError> {
    apply_promotions(ctx, order, promotions, &config.promotions).await?;

    if options.requote_shipping {
        let quote = config.shipping_calculator.calculate(ctx, order).await.map_err(|message| {
            OrderError::StrategyFailed { strategy: "ShippingCalculator", message }
        })?;
        order.shipping = quote.price;
        order.shipping_tax_rate = quote.tax_rate;
        // Shipping-scoped promotion adjustments were computed against the
        // old quote; evaluate again so free-shipping style actions see the
        // new price.
        apply_promotions(ctx, order, promotions, &config.promotions).await?;
    }

    recalculate_totals(order);
    debug!(
        order_id = %order.id,
        total = %order.total,
        total_with_tax = %order.total_with_tax,
        "order totals recalculated"
    );
    Ok(())
}

/// Rewrites the cached totals from the order's current lines, adjustments,
/// shipping, and surcharges. Pure arithmetic; no strategies involved.
pub fn recalculate_totals(order: &mut Order) {
    let sub_total: crate::money::Money =
        order.lines.iter().map(OrderLine::discounted_line_price).sum();
    let sub_total_with_tax: crate::money::Money =
        order.lines.iter().map(OrderLine::discounted_line_price_with_tax).sum();

    // Order-scoped adjustment amounts are tax-inclusive: they reduce the
    // net and gross totals by the same figure.
    let order_adjustment: crate::money::Money =
        order.adjustments.iter().map(|a| a.amount).sum();

    let shipping_discount: crate::money::Money =
        order.shipping_adjustments.iter().map(|a| a.amount).sum();
    let shipping_net = (order.shipping + shipping_discount).max_zero();
    let shipping_with_tax = order.shipping_tax_rate.with_tax(shipping_net);

    let surcharge_net: crate::money::Money = order.surcharges.iter().map(|s| s.price).sum();
    let surcharge_with_tax: crate::money::Money =
        order.surcharges.iter().map(Surcharge::price_with_tax).sum();

    order.sub_total = sub_total;
    order.sub_total_with_tax = sub_total_with_tax;
    order.shipping_with_tax = shipping_with_tax;
    order.total = (sub_total + order_adjustment).max_zero() + shipping_net + surcharge_net;
    order.total_with_tax =
        (sub_total_with_tax + order_adjustment).max_zero() + shipping_with_tax + surcharge_with_tax;
}

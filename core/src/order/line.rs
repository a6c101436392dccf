//! Order lines and their per-unit items.
//!
//! An [`OrderLine`] groups the units of one variant (with one custom-field
//! bag); each physical unit is an [`OrderItem`]. Units are only ever
//! removed outright while the order is still being built. After placement
//! a quantity decrease cancels items instead, preserving them for audits,
//! refunds, and fulfillment history.

use crate::custom_fields::CustomFields;
use crate::id::{FulfillmentId, OrderItemId, OrderLineId, RefundId, VariantId};
use crate::money::{Money, TaxRate};
use crate::promotion::Adjustment;
use serde::{Deserialize, Serialize};

/// One physical unit belonging to an [`OrderLine`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    /// Unit identifier.
    pub id: OrderItemId,
    /// Net unit price currently in effect for this unit.
    pub unit_price: Money,
    /// Tax rate applied to this unit.
    pub tax_rate: TaxRate,
    /// Cancelled units stay on the line but no longer count or price.
    pub cancelled: bool,
    /// Fulfillment this unit was shipped with, once assigned.
    pub fulfillment_id: Option<FulfillmentId>,
    /// Refund covering this unit, once one exists.
    pub refund_id: Option<RefundId>,
}

impl OrderItem {
    /// Creates a live, unfulfilled unit.
    #[must_use]
    pub fn new(unit_price: Money, tax_rate: TaxRate) -> Self {
        Self {
            id: OrderItemId::new(),
            unit_price,
            tax_rate,
            cancelled: false,
            fulfillment_id: None,
            refund_id: None,
        }
    }

    /// Gross unit price.
    #[must_use]
    pub fn unit_price_with_tax(&self) -> Money {
        self.tax_rate.with_tax(self.unit_price)
    }
}

/// A product variant plus quantity on an Order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    /// Line identifier.
    pub id: OrderLineId,
    /// The purchasable variant this line sells.
    pub variant_id: VariantId,
    /// Net unit price currently charged. May move with the catalog under
    /// the configured price-change handling while the order is active.
    pub unit_price: Money,
    /// Net list price captured when the line was created.
    pub initial_list_price: Money,
    /// Tax rate for every unit on the line.
    pub tax_rate: TaxRate,
    /// One entry per physical unit, including cancelled ones.
    pub items: Vec<OrderItem>,
    /// Bag distinguishing this line from other lines of the same variant.
    pub custom_fields: CustomFields,
    /// Line-scoped promotion effects; rewritten on every evaluation pass.
    pub adjustments: Vec<Adjustment>,
}

impl OrderLine {
    /// Creates a line with `quantity` live units at the given price.
    #[must_use]
    pub fn new(
        variant_id: VariantId,
        unit_price: Money,
        tax_rate: TaxRate,
        quantity: u32,
        custom_fields: CustomFields,
    ) -> Self {
        let items = (0..quantity).map(|_| OrderItem::new(unit_price, tax_rate)).collect();
        Self {
            id: OrderLineId::new(),
            variant_id,
            unit_price,
            initial_list_price: unit_price,
            tax_rate,
            items,
            custom_fields,
            adjustments: Vec::new(),
        }
    }

    /// Live (non-cancelled) unit count.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn quantity(&self) -> u32 {
        self.items.iter().filter(|item| !item.cancelled).count() as u32
    }

    /// All units ever added, cancelled included.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn total_units(&self) -> u32 {
        self.items.len() as u32
    }

    /// Iterator over live units.
    pub fn live_items(&self) -> impl Iterator<Item = &OrderItem> {
        self.items.iter().filter(|item| !item.cancelled)
    }

    /// Gross unit price.
    #[must_use]
    pub fn unit_price_with_tax(&self) -> Money {
        self.tax_rate.with_tax(self.unit_price)
    }

    /// How far the unit price has moved since the line was created.
    #[must_use]
    pub fn unit_price_change_since_added(&self) -> Money {
        self.unit_price - self.initial_list_price
    }

    /// Net line total before discounts: unit price times live quantity.
    #[must_use]
    pub fn line_price(&self) -> Money {
        self.unit_price * self.quantity()
    }

    /// Gross line total before discounts.
    #[must_use]
    pub fn line_price_with_tax(&self) -> Money {
        self.tax_rate.with_tax(self.line_price())
    }

    /// Net line total after line-scoped promotion adjustments, floored at
    /// zero.
    #[must_use]
    pub fn discounted_line_price(&self) -> Money {
        let discount: Money = self.adjustments.iter().map(|a| a.amount).sum();
        (self.line_price() + discount).max_zero()
    }

    /// Gross line total after adjustments.
    #[must_use]
    pub fn discounted_line_price_with_tax(&self) -> Money {
        self.tax_rate.with_tax(self.discounted_line_price())
    }

    /// Reprices the line and every unit on it.
    pub fn set_unit_price(&mut self, price: Money) {
        self.unit_price = price;
        for item in &mut self.items {
            item.unit_price = price;
        }
    }

    /// Adds `n` live units at the line's current price. Returns their ids.
    pub fn add_units(&mut self, n: u32) -> Vec<OrderItemId> {
        let mut ids = Vec::with_capacity(n as usize);
        for _ in 0..n {
            let item = OrderItem::new(self.unit_price, self.tax_rate);
            ids.push(item.id);
            self.items.push(item);
        }
        ids
    }

    /// Removes up to `n` live units outright, newest first. Only valid
    /// while the order is being built. Returns how many were removed.
    pub fn remove_units(&mut self, n: u32) -> u32 {
        let mut removed = 0;
        while removed < n {
            let Some(index) = self.items.iter().rposition(|item| !item.cancelled) else {
                break;
            };
            self.items.remove(index);
            removed += 1;
        }
        removed
    }

    /// Cancels up to `n` live units, newest first, keeping them on the
    /// line. Returns the cancelled ids.
    pub fn cancel_units(&mut self, n: u32) -> Vec<OrderItemId> {
        let mut cancelled = Vec::new();
        let mut remaining = n;
        while remaining > 0 {
            let Some(index) = self.items.iter().rposition(|item| !item.cancelled) else {
                break;
            };
            self.items[index].cancelled = true;
            cancelled.push(self.items[index].id);
            remaining -= 1;
        }
        cancelled
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // test assertions may unwrap
mod tests {
    use super::*;

    fn line(quantity: u32) -> OrderLine {
        OrderLine::new(
            VariantId::new(),
            Money::from_minor(5374),
            TaxRate::from_percent(20),
            quantity,
            CustomFields::new(),
        )
    }

    #[test]
    fn new_line_captures_initial_price_per_unit() {
        let line = line(3);
        assert_eq!(line.quantity(), 3);
        assert_eq!(line.items.len(), 3);
        assert!(line.items.iter().all(|i| i.unit_price == Money::from_minor(5374)));
        assert_eq!(line.unit_price_change_since_added(), Money::ZERO);
        assert_eq!(line.line_price(), Money::from_minor(16_122));
    }

    #[test]
    fn repricing_updates_every_unit_but_not_initial_price() {
        let mut line = line(2);
        line.set_unit_price(Money::from_minor(6000));
        assert_eq!(line.unit_price, Money::from_minor(6000));
        assert!(line.items.iter().all(|i| i.unit_price == Money::from_minor(6000)));
        assert_eq!(line.initial_list_price, Money::from_minor(5374));
        assert_eq!(line.unit_price_change_since_added(), Money::from_minor(626));
    }

    #[test]
    fn cancel_units_keeps_items_and_reduces_quantity() {
        let mut line = line(3);
        let last_id = line.items[2].id;
        let cancelled = line.cancel_units(2);
        assert_eq!(cancelled.len(), 2);
        assert_eq!(cancelled[0], last_id, "newest unit cancels first");
        assert_eq!(line.quantity(), 1);
        assert_eq!(line.total_units(), 3);
        assert_eq!(line.line_price(), Money::from_minor(5374));
    }

    #[test]
    fn cancelling_more_than_live_units_stops_at_zero() {
        let mut line = line(2);
        let first = line.cancel_units(5);
        assert_eq!(first.len(), 2);
        assert_eq!(line.quantity(), 0);
        // a second pass has nothing left to cancel
        assert!(line.cancel_units(1).is_empty());
        assert_eq!(line.total_units(), 2);
    }

    #[test]
    fn remove_units_drops_items_outright() {
        let mut line = line(3);
        assert_eq!(line.remove_units(2), 2);
        assert_eq!(line.items.len(), 1);
        assert_eq!(line.quantity(), 1);
    }

    #[test]
    fn discounted_price_applies_adjustments_and_floors_at_zero() {
        let mut line = line(1);
        line.adjustments.push(Adjustment {
            promotion_id: crate::id::PromotionId::new(),
            description: "test promo".into(),
            amount: Money::from_minor(-6000),
        });
        assert_eq!(line.discounted_line_price(), Money::ZERO);
    }

    #[test]
    fn live_item_prices_sum_to_line_price() {
        let mut line = line(4);
        line.cancel_units(1);
        let sum: Money = line.live_items().map(|i| i.unit_price).sum();
        assert_eq!(sum, line.line_price());
    }
}

//! Guest-to-customer order reconciliation.
//!
//! When a guest signs in with an existing active order, the configured
//! [`OrderMergeStrategy`] decides which lines survive. Strategies are pure
//! functions over the two orders; their output entirely replaces the
//! surviving order's line set, and the guest order is deleted in the same
//! commit.

use crate::custom_fields::CustomFields;
use crate::id::VariantId;
use crate::money::{Money, TaxRate};
use crate::order::{Order, OrderLine};

/// A line in the merged result: enough to rebuild an [`OrderLine`] without
/// consulting the catalog again.
#[derive(Clone, Debug, PartialEq)]
pub struct MergedOrderLine {
    /// Variant the line sells.
    pub variant_id: VariantId,
    /// Live quantity the merged line should hold.
    pub quantity: u32,
    /// Net unit price carried over from the source line.
    pub unit_price: Money,
    /// Tax rate carried over from the source line.
    pub tax_rate: TaxRate,
    /// Custom-field bag carried over from the source line.
    pub custom_fields: CustomFields,
}

impl MergedOrderLine {
    /// Captures a live order line.
    #[must_use]
    pub fn from_line(line: &OrderLine) -> Self {
        Self {
            variant_id: line.variant_id,
            quantity: line.quantity(),
            unit_price: line.unit_price,
            tax_rate: line.tax_rate,
            custom_fields: line.custom_fields.clone(),
        }
    }

    /// Whether this entry and `line` would share an order line: same
    /// variant and identical custom fields.
    #[must_use]
    pub fn matches(&self, line: &OrderLine) -> bool {
        self.variant_id == line.variant_id && self.custom_fields == line.custom_fields
    }
}

/// Policy reconciling a guest order with the customer's existing order.
pub trait OrderMergeStrategy: Send + Sync {
    /// Lines the surviving order should end up with.
    fn merge(&self, guest: &Order, existing: &Order) -> Vec<MergedOrderLine>;
}

fn live_lines(order: &Order) -> impl Iterator<Item = &OrderLine> {
    order.lines.iter().filter(|line| line.quantity() > 0)
}

/// Unions the two orders' lines; where both carry the same variant with
/// the same custom fields, the guest's quantity wins.
#[derive(Clone, Copy, Debug, Default)]
pub struct MergeOrdersStrategy;

impl OrderMergeStrategy for MergeOrdersStrategy {
    fn merge(&self, guest: &Order, existing: &Order) -> Vec<MergedOrderLine> {
        let mut merged: Vec<MergedOrderLine> =
            live_lines(existing).map(MergedOrderLine::from_line).collect();
        for line in live_lines(guest) {
            if let Some(entry) = merged.iter_mut().find(|entry| entry.matches(line)) {
                entry.quantity = line.quantity();
                entry.unit_price = line.unit_price;
            } else {
                merged.push(MergedOrderLine::from_line(line));
            }
        }
        merged
    }
}

/// Keeps only the guest's lines.
#[derive(Clone, Copy, Debug, Default)]
pub struct UseGuestStrategy;

impl OrderMergeStrategy for UseGuestStrategy {
    fn merge(&self, guest: &Order, _existing: &Order) -> Vec<MergedOrderLine> {
        live_lines(guest).map(MergedOrderLine::from_line).collect()
    }
}

/// Keeps only the existing order's lines.
#[derive(Clone, Copy, Debug, Default)]
pub struct UseExistingStrategy;

impl OrderMergeStrategy for UseExistingStrategy {
    fn merge(&self, _guest: &Order, existing: &Order) -> Vec<MergedOrderLine> {
        live_lines(existing).map(MergedOrderLine::from_line).collect()
    }
}

/// Takes the guest's lines only when the existing order is empty,
/// otherwise keeps the existing lines untouched.
#[derive(Clone, Copy, Debug, Default)]
pub struct UseGuestIfExistingEmptyStrategy;

impl OrderMergeStrategy for UseGuestIfExistingEmptyStrategy {
    fn merge(&self, guest: &Order, existing: &Order) -> Vec<MergedOrderLine> {
        if existing.is_empty() {
            live_lines(guest).map(MergedOrderLine::from_line).collect()
        } else {
            live_lines(existing).map(MergedOrderLine::from_line).collect()
        }
    }
}

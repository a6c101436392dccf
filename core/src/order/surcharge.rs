//! Ad-hoc order surcharges.

use crate::id::SurchargeId;
use crate::money::{Money, TaxRate};
use serde::{Deserialize, Serialize};

/// A signed price adjustment applied to an Order during modification,
/// outside the promotion system. Positive surcharges add cost, negative
/// ones grant ad-hoc compensation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Surcharge {
    /// Surcharge identifier.
    pub id: SurchargeId,
    /// Why the surcharge was applied.
    pub description: String,
    /// Signed net amount.
    pub price: Money,
    /// Tax rate applied on top of the net amount.
    pub tax_rate: TaxRate,
}

impl Surcharge {
    /// Creates a surcharge with a fresh id.
    #[must_use]
    pub fn new(description: impl Into<String>, price: Money, tax_rate: TaxRate) -> Self {
        Self { id: SurchargeId::new(), description: description.into(), price, tax_rate }
    }

    /// Gross amount.
    #[must_use]
    pub fn price_with_tax(&self) -> Money {
        self.tax_rate.with_tax(self.price)
    }
}

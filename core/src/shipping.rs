//! Shipping price calculation.

use crate::context::RequestContext;
use crate::money::{Money, TaxRate};
use crate::order::Order;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Price quoted by a [`ShippingCalculator`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingQuote {
    /// Net shipping price.
    pub price: Money,
    /// Tax rate applied to the shipping price.
    pub tax_rate: TaxRate,
}

/// Prices shipping for an order, typically from its shipping address.
///
/// Quoted whenever an order's address changes and on modification when
/// `recalculate_shipping` is requested.
#[async_trait]
pub trait ShippingCalculator: Send + Sync {
    /// Quotes shipping for the order as it currently stands.
    ///
    /// # Errors
    ///
    /// Returns a message when no quote can be produced.
    async fn calculate(&self, ctx: &RequestContext, order: &Order) -> Result<ShippingQuote, String>;
}

/// The same price for every destination. The default calculator.
#[derive(Clone, Copy, Debug)]
pub struct FlatRateShippingCalculator {
    /// Net price quoted for every order.
    pub price: Money,
    /// Tax rate on the quote.
    pub tax_rate: TaxRate,
}

impl Default for FlatRateShippingCalculator {
    fn default() -> Self {
        Self { price: Money::ZERO, tax_rate: TaxRate::ZERO }
    }
}

#[async_trait]
impl ShippingCalculator for FlatRateShippingCalculator {
    async fn calculate(
        &self,
        _ctx: &RequestContext,
        _order: &Order,
    ) -> Result<ShippingQuote, String> {
        Ok(ShippingQuote { price: self.price, tax_rate: self.tax_rate })
    }
}

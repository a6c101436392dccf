//! Canned catalog, shipping, and promotion data for engine tests.

use async_trait::async_trait;
use orderflow_core::config::OrderEngineConfig;
use orderflow_core::context::RequestContext;
use orderflow_core::custom_fields::{CustomFieldDef, CustomFieldKind, CustomFieldsRegistry};
use orderflow_core::id::VariantId;
use orderflow_core::money::{Money, TaxRate};
use orderflow_core::order::Order;
use orderflow_core::promotion::{ConfiguredStrategy, Promotion};
use orderflow_core::shipping::{ShippingCalculator, ShippingQuote};
use serde_json::json;
use std::collections::HashMap;

use crate::store::InMemoryOrderStore;

/// Net list price the standard catalog variant is seeded with.
pub const STANDARD_PRICE: Money = Money::from_minor(5374);

/// Seeds one variant at [`STANDARD_PRICE`], 20% tax, 100 units on hand.
pub fn standard_catalog(store: &InMemoryOrderStore) -> VariantId {
    store.seed_variant("SKU-STD", STANDARD_PRICE, TaxRate::from_percent(20), 100)
}

/// Quotes shipping by destination country, with a fallback for everywhere
/// else. Untaxed, to keep expected totals easy to read.
#[derive(Clone, Debug)]
pub struct ByCountryShippingCalculator {
    rates: HashMap<String, Money>,
    fallback: Money,
}

impl ByCountryShippingCalculator {
    /// Builds a calculator from `(country code, net price)` pairs.
    #[must_use]
    pub fn new(
        rates: impl IntoIterator<Item = (&'static str, Money)>,
        fallback: Money,
    ) -> Self {
        Self {
            rates: rates.into_iter().map(|(code, price)| (code.to_string(), price)).collect(),
            fallback,
        }
    }

    /// GB at 500, US at 1000, everywhere else at 2000.
    #[must_use]
    pub fn gb_us() -> Self {
        Self::new(
            [("GB", Money::from_minor(500)), ("US", Money::from_minor(1000))],
            Money::from_minor(2000),
        )
    }
}

#[async_trait]
impl ShippingCalculator for ByCountryShippingCalculator {
    async fn calculate(
        &self,
        _ctx: &RequestContext,
        order: &Order,
    ) -> Result<ShippingQuote, String> {
        let price = order
            .shipping_address
            .as_ref()
            .and_then(|address| self.rates.get(&address.country_code))
            .copied()
            .unwrap_or(self.fallback);
        Ok(ShippingQuote { price, tax_rate: TaxRate::ZERO })
    }
}

/// Registry declaring the custom fields the test suites use: an optional
/// `engraving` text field and a `priority` int on order lines, and a
/// `giftMessage` text field on orders.
#[must_use]
pub fn test_custom_fields() -> CustomFieldsRegistry {
    let mut registry = CustomFieldsRegistry::new();
    registry.register(
        "OrderLine",
        CustomFieldDef::new(
            "engraving",
            CustomFieldKind::Text { pattern: None, max_length: Some(40) },
        ),
    );
    registry.register(
        "OrderLine",
        CustomFieldDef::new("priority", CustomFieldKind::Int { min: Some(1), max: Some(5) }),
    );
    registry.register(
        "Order",
        CustomFieldDef::new(
            "giftMessage",
            CustomFieldKind::Text { pattern: None, max_length: None },
        ),
    );
    registry
}

/// Default engine configuration with the test custom fields registered.
#[must_use]
pub fn test_config() -> OrderEngineConfig {
    OrderEngineConfig::default().with_custom_fields(test_custom_fields())
}

/// An always-on promotion discounting the whole order by `percentage`.
#[must_use]
pub fn percent_off_promotion(name: &str, percentage: i64) -> Promotion {
    let mut promotion = Promotion::new(name);
    promotion.actions.push(ConfiguredStrategy::new(
        "order_percentage_discount",
        json!({ "percentage": percentage }),
    ));
    promotion
}

/// A coupon-gated variant of [`percent_off_promotion`].
#[must_use]
pub fn coupon_promotion(code: &str, percentage: i64) -> Promotion {
    let mut promotion = percent_off_promotion(&format!("{percentage}% off with {code}"), percentage);
    promotion.coupon_code = Some(code.to_string());
    promotion
}

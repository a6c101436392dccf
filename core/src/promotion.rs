//! Promotions: conditional discounts with side effects.
//!
//! A [`Promotion`] entity stores configured condition and action codes;
//! the codes resolve at evaluation time against [`PromotionCondition`] and
//! [`PromotionAction`] strategies registered in a [`PromotionRegistry`].
//! Every mutating operation re-evaluates all candidate promotions from
//! scratch: conditions are pure predicates over the order, actions compute
//! transient [`Adjustment`]s on lines, the order, or shipping.
//!
//! Activation and deactivation hooks may mutate order data beyond price
//! (line custom fields are the classic case). Hooks always run before the
//! aggregate is committed, so whatever they change rides along in the same
//! commit.

use crate::context::RequestContext;
use crate::error::OrderError;
use crate::id::{OrderLineId, PromotionId};
use crate::money::Money;
use crate::order::Order;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// One promotion's effect on a price. Recomputed on every evaluation pass
/// and never persisted as its own entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Adjustment {
    /// The promotion that produced this adjustment.
    pub promotion_id: PromotionId,
    /// Human-readable description, usually the promotion name.
    pub description: String,
    /// Signed amount; discounts are negative.
    pub amount: Money,
}

/// A condition or action reference stored on a [`Promotion`]: the strategy
/// code plus its configured arguments.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConfiguredStrategy {
    /// Code of the registered strategy to invoke.
    pub code: String,
    /// Arguments the strategy was configured with.
    pub args: serde_json::Value,
}

impl ConfiguredStrategy {
    /// Pairs a strategy code with its arguments.
    #[must_use]
    pub fn new(code: impl Into<String>, args: serde_json::Value) -> Self {
        Self { code: code.into(), args }
    }
}

/// A conditional discount rule, optionally gated by a coupon code.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Promotion {
    /// Promotion identifier.
    pub id: PromotionId,
    /// Display name, used as the adjustment description.
    pub name: String,
    /// Disabled promotions are never evaluated.
    pub enabled: bool,
    /// When set, the promotion only applies to orders carrying this code.
    pub coupon_code: Option<String>,
    /// Promotions are inactive before this instant.
    pub starts_at: Option<DateTime<Utc>>,
    /// Promotions are inactive after this instant.
    pub ends_at: Option<DateTime<Utc>>,
    /// Total number of orders the promotion may be used on.
    pub usage_limit: Option<u32>,
    /// Number of completed orders per customer the coupon may appear on.
    pub per_customer_usage_limit: Option<u32>,
    /// All conditions must hold for the promotion to apply.
    pub conditions: Vec<ConfiguredStrategy>,
    /// Actions executed when the conditions hold.
    pub actions: Vec<ConfiguredStrategy>,
}

impl Promotion {
    /// Creates an enabled promotion with no coupon, dates, or limits.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: PromotionId::new(),
            name: name.into(),
            enabled: true,
            coupon_code: None,
            starts_at: None,
            ends_at: None,
            usage_limit: None,
            per_customer_usage_limit: None,
            conditions: Vec::new(),
            actions: Vec::new(),
        }
    }

    /// Whether the promotion's date window contains `now`.
    #[must_use]
    pub fn is_date_active(&self, now: DateTime<Utc>) -> bool {
        self.starts_at.is_none_or(|start| start <= now)
            && self.ends_at.is_none_or(|end| now <= end)
    }

    /// Whether the promotion can apply to `order` at all, before its
    /// conditions are consulted: enabled, date-active, and (when coupon
    /// gated) the order carries the code.
    #[must_use]
    pub fn is_candidate(&self, order: &Order, now: DateTime<Utc>) -> bool {
        self.enabled
            && self.is_date_active(now)
            && self
                .coupon_code
                .as_ref()
                .is_none_or(|code| order.coupon_codes.contains(code))
    }
}

/// Where an action's computed discount lands.
#[derive(Clone, Debug, PartialEq)]
pub enum DiscountTarget {
    /// Order-level amount applied after line totals.
    Order {
        /// Signed amount; discounts are negative.
        amount: Money,
    },
    /// Amount applied to one line's total.
    Line {
        /// The line to adjust.
        line_id: OrderLineId,
        /// Signed amount; discounts are negative.
        amount: Money,
    },
    /// Amount applied to the shipping price.
    Shipping {
        /// Signed amount; discounts are negative.
        amount: Money,
    },
}

/// A pure predicate over an order.
#[async_trait]
pub trait PromotionCondition: Send + Sync {
    /// Code this condition registers under.
    fn code(&self) -> &str;

    /// Whether the condition holds for `order` under `args`.
    ///
    /// # Errors
    ///
    /// Returns a message when the configured arguments are unusable.
    async fn check(
        &self,
        ctx: &RequestContext,
        order: &Order,
        args: &serde_json::Value,
    ) -> Result<bool, String>;
}

/// Computes discounts, and optionally performs side effects when the
/// promotion starts or stops applying to an order.
#[async_trait]
pub trait PromotionAction: Send + Sync {
    /// Code this action registers under.
    fn code(&self) -> &str;

    /// Discounts this action contributes for `order` under `args`.
    ///
    /// # Errors
    ///
    /// Returns a message when the configured arguments are unusable.
    async fn execute(
        &self,
        ctx: &RequestContext,
        order: &Order,
        args: &serde_json::Value,
    ) -> Result<Vec<DiscountTarget>, String>;

    /// Runs when the promotion newly applies to the order. May mutate the
    /// order (custom fields and the like); the mutation is committed with
    /// the rest of the aggregate.
    ///
    /// # Errors
    ///
    /// Returns a message to abort the enclosing operation.
    async fn on_activate(
        &self,
        _ctx: &RequestContext,
        _order: &mut Order,
        _args: &serde_json::Value,
    ) -> Result<(), String> {
        Ok(())
    }

    /// Runs when the promotion stops applying to the order. Same
    /// persistence contract as [`on_activate`](Self::on_activate).
    ///
    /// # Errors
    ///
    /// Returns a message to abort the enclosing operation.
    async fn on_deactivate(
        &self,
        _ctx: &RequestContext,
        _order: &mut Order,
        _args: &serde_json::Value,
    ) -> Result<(), String> {
        Ok(())
    }
}

/// Registered condition and action strategies, keyed by code.
#[derive(Clone, Default)]
pub struct PromotionRegistry {
    conditions: HashMap<String, Arc<dyn PromotionCondition>>,
    actions: HashMap<String, Arc<dyn PromotionAction>>,
}

impl PromotionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a condition under its code.
    pub fn register_condition(&mut self, condition: Arc<dyn PromotionCondition>) {
        self.conditions.insert(condition.code().to_string(), condition);
    }

    /// Registers an action under its code.
    pub fn register_action(&mut self, action: Arc<dyn PromotionAction>) {
        self.actions.insert(action.code().to_string(), action);
    }

    /// Condition registered under `code`.
    #[must_use]
    pub fn condition(&self, code: &str) -> Option<&Arc<dyn PromotionCondition>> {
        self.conditions.get(code)
    }

    /// Action registered under `code`.
    #[must_use]
    pub fn action(&self, code: &str) -> Option<&Arc<dyn PromotionAction>> {
        self.actions.get(code)
    }
}

impl std::fmt::Debug for PromotionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromotionRegistry")
            .field("conditions", &self.conditions.keys().collect::<Vec<_>>())
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Re-evaluates every candidate promotion against `order`, rewriting all
/// adjustments and running activation/deactivation side effects for
/// promotions whose applicability changed since the last pass.
///
/// Usage limits are enforced when a coupon is applied, not here; by the
/// time a promotion reaches evaluation its code has already been admitted
/// onto the order.
///
/// # Errors
///
/// Returns [`OrderError::StrategyFailed`] when a condition or action
/// fails, or a hook aborts the operation.
pub async fn apply_promotions(
    ctx: &RequestContext,
    order: &mut Order,
    promotions: &[Promotion],
    registry: &PromotionRegistry,
) -> Result<(), OrderError> {
    order.clear_adjustments();
    let now = ctx.now();
    let previously_active = order.active_promotion_ids.clone();
    let mut now_active = Vec::new();

    for promotion in promotions {
        if !promotion.is_candidate(order, now) {
            continue;
        }
        if !conditions_hold(ctx, order, promotion, registry).await? {
            continue;
        }
        for configured in &promotion.actions {
            let action = registry.action(&configured.code).ok_or_else(|| {
                OrderError::StrategyFailed {
                    strategy: "PromotionAction",
                    message: format!("no action registered for code \"{}\"", configured.code),
                }
            })?;
            let targets = action
                .execute(ctx, order, &configured.args)
                .await
                .map_err(|message| OrderError::StrategyFailed {
                    strategy: "PromotionAction",
                    message,
                })?;
            apply_targets(order, promotion, targets);
        }
        now_active.push(promotion.id);
    }

    // Activation/deactivation side effects run here, before the caller
    // commits the aggregate, so their mutations are part of the commit.
    for promotion in promotions {
        let was_active = previously_active.contains(&promotion.id);
        let is_active = now_active.contains(&promotion.id);
        if was_active == is_active {
            continue;
        }
        debug!(
            promotion = %promotion.name,
            activating = is_active,
            "promotion applicability changed"
        );
        for configured in &promotion.actions {
            let Some(action) = registry.action(&configured.code) else {
                continue;
            };
            let hook_result = if is_active {
                action.on_activate(ctx, order, &configured.args).await
            } else {
                action.on_deactivate(ctx, order, &configured.args).await
            };
            hook_result.map_err(|message| OrderError::StrategyFailed {
                strategy: "PromotionAction",
                message,
            })?;
        }
    }

    order.active_promotion_ids = now_active;
    Ok(())
}

async fn conditions_hold(
    ctx: &RequestContext,
    order: &Order,
    promotion: &Promotion,
    registry: &PromotionRegistry,
) -> Result<bool, OrderError> {
    for configured in &promotion.conditions {
        let condition = registry.condition(&configured.code).ok_or_else(|| {
            OrderError::StrategyFailed {
                strategy: "PromotionCondition",
                message: format!("no condition registered for code \"{}\"", configured.code),
            }
        })?;
        let holds = condition
            .check(ctx, order, &configured.args)
            .await
            .map_err(|message| OrderError::StrategyFailed {
                strategy: "PromotionCondition",
                message,
            })?;
        if !holds {
            return Ok(false);
        }
    }
    Ok(true)
}

fn apply_targets(order: &mut Order, promotion: &Promotion, targets: Vec<DiscountTarget>) {
    for target in targets {
        match target {
            DiscountTarget::Order { amount } => order.adjustments.push(Adjustment {
                promotion_id: promotion.id,
                description: promotion.name.clone(),
                amount,
            }),
            DiscountTarget::Line { line_id, amount } => {
                if let Some(line) = order.get_line_mut(line_id) {
                    line.adjustments.push(Adjustment {
                        promotion_id: promotion.id,
                        description: promotion.name.clone(),
                        amount,
                    });
                }
            }
            DiscountTarget::Shipping { amount } => order.shipping_adjustments.push(Adjustment {
                promotion_id: promotion.id,
                description: promotion.name.clone(),
                amount,
            }),
        }
    }
}

fn i64_arg(args: &serde_json::Value, key: &str) -> Result<i64, String> {
    args.get(key)
        .and_then(serde_json::Value::as_i64)
        .ok_or_else(|| format!("missing or non-integer argument \"{key}\""))
}

/// Condition: the order's pre-discount net subtotal reaches a threshold.
///
/// Args: `{ "amount": <minor units> }`.
#[derive(Clone, Copy, Debug, Default)]
pub struct MinimumOrderAmountCondition;

#[async_trait]
impl PromotionCondition for MinimumOrderAmountCondition {
    fn code(&self) -> &str {
        "minimum_order_amount"
    }

    async fn check(
        &self,
        _ctx: &RequestContext,
        order: &Order,
        args: &serde_json::Value,
    ) -> Result<bool, String> {
        let threshold = Money::from_minor(i64_arg(args, "amount")?);
        let subtotal: Money = order.lines.iter().map(crate::order::OrderLine::line_price).sum();
        Ok(subtotal >= threshold)
    }
}

/// Condition: the order contains a given variant in at least a given
/// quantity.
///
/// Args: `{ "variant_id": "<uuid>", "min_quantity": <n> }`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ContainsProductCondition;

#[async_trait]
impl PromotionCondition for ContainsProductCondition {
    fn code(&self) -> &str {
        "contains_product"
    }

    async fn check(
        &self,
        _ctx: &RequestContext,
        order: &Order,
        args: &serde_json::Value,
    ) -> Result<bool, String> {
        let raw = args
            .get("variant_id")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| "missing argument \"variant_id\"".to_string())?;
        let variant_id = raw
            .parse::<uuid::Uuid>()
            .map(crate::id::VariantId::from_uuid)
            .map_err(|e| format!("invalid variant id \"{raw}\": {e}"))?;
        let min_quantity = i64_arg(args, "min_quantity").unwrap_or(1);
        let quantity: i64 = order
            .lines
            .iter()
            .filter(|line| line.variant_id == variant_id)
            .map(|line| i64::from(line.quantity()))
            .sum();
        Ok(quantity >= min_quantity)
    }
}

/// Action: percentage discount on the whole order.
///
/// Args: `{ "percentage": <0..=100> }`. The amount is computed against the
/// discounted gross subtotal so stacked promotions do not over-discount.
#[derive(Clone, Copy, Debug, Default)]
pub struct OrderPercentageDiscount;

#[async_trait]
impl PromotionAction for OrderPercentageDiscount {
    fn code(&self) -> &str {
        "order_percentage_discount"
    }

    async fn execute(
        &self,
        _ctx: &RequestContext,
        order: &Order,
        args: &serde_json::Value,
    ) -> Result<Vec<DiscountTarget>, String> {
        let percentage = i64_arg(args, "percentage")?;
        if !(0..=100).contains(&percentage) {
            return Err(format!("percentage {percentage} is out of range"));
        }
        let subtotal: Money = order
            .lines
            .iter()
            .map(crate::order::OrderLine::discounted_line_price_with_tax)
            .sum();
        let amount = -subtotal.prorate(percentage, 100);
        Ok(vec![DiscountTarget::Order { amount }])
    }
}

/// Action: percentage discount on every line.
///
/// Args: `{ "percentage": <0..=100> }`.
#[derive(Clone, Copy, Debug, Default)]
pub struct LinePercentageDiscount;

#[async_trait]
impl PromotionAction for LinePercentageDiscount {
    fn code(&self) -> &str {
        "line_percentage_discount"
    }

    async fn execute(
        &self,
        _ctx: &RequestContext,
        order: &Order,
        args: &serde_json::Value,
    ) -> Result<Vec<DiscountTarget>, String> {
        let percentage = i64_arg(args, "percentage")?;
        if !(0..=100).contains(&percentage) {
            return Err(format!("percentage {percentage} is out of range"));
        }
        Ok(order
            .lines
            .iter()
            .map(|line| DiscountTarget::Line {
                line_id: line.id,
                amount: -line.line_price().prorate(percentage, 100),
            })
            .collect())
    }
}

/// Action: shipping is free.
#[derive(Clone, Copy, Debug, Default)]
pub struct FreeShippingAction;

#[async_trait]
impl PromotionAction for FreeShippingAction {
    fn code(&self) -> &str {
        "free_shipping"
    }

    async fn execute(
        &self,
        _ctx: &RequestContext,
        order: &Order,
        _args: &serde_json::Value,
    ) -> Result<Vec<DiscountTarget>, String> {
        Ok(vec![DiscountTarget::Shipping { amount: -order.shipping }])
    }
}

/// Registry pre-loaded with the built-in conditions and actions.
#[must_use]
pub fn default_registry() -> PromotionRegistry {
    let mut registry = PromotionRegistry::new();
    registry.register_condition(Arc::new(MinimumOrderAmountCondition));
    registry.register_condition(Arc::new(ContainsProductCondition));
    registry.register_action(Arc::new(OrderPercentageDiscount));
    registry.register_action(Arc::new(LinePercentageDiscount));
    registry.register_action(Arc::new(FreeShippingAction));
    registry
}

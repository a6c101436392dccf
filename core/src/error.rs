//! Engine error taxonomy.
//!
//! Every operation returns `Result<_, OrderError>`. Expected business
//! failures (validation, vetoed transitions, coupon problems) are ordinary
//! variants that API layers can map onto their own error surfaces via
//! [`OrderError::error_code`]; infrastructure failures arrive wrapped from
//! the persistence seam.

use crate::custom_fields::CustomFieldError;
use crate::id::OrderId;
use crate::money::Money;
use crate::order::fulfillment::FulfillmentState;
use crate::order::payment::{PaymentState, RefundState};
use crate::order::OrderState;
use thiserror::Error;

/// Errors surfaced by engine operations.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum OrderError {
    /// A negative quantity was supplied.
    #[error("{quantity} is not a valid quantity for an OrderLine")]
    NegativeQuantity {
        /// The offending quantity.
        quantity: i32,
    },

    /// The order would exceed the configured maximum number of items.
    #[error("Cannot add items. An Order may not contain more than {max_items} items")]
    OrderLimit {
        /// The configured ceiling.
        max_items: u32,
    },

    /// Not enough saleable stock to satisfy the requested quantity.
    #[error("Only {quantity_available} item(s) are available")]
    InsufficientStock {
        /// Units that could still be added.
        quantity_available: u32,
    },

    /// A modify_order call specified no changes at all.
    #[error("No changes were specified")]
    NoChangesSpecified,

    /// A modification reduced the total but named no payment to refund.
    #[error("A refund payment id must be supplied when the modification results in a price decrease")]
    RefundPaymentIdMissing,

    /// A refund could not be covered by the order's settled payments.
    #[error("Refund of {requested} exceeds the refundable amount of {refundable}")]
    RefundAmountExceeded {
        /// The with-tax amount that had to be refunded.
        requested: Money,
        /// What the settled payments could still return.
        refundable: Money,
    },

    /// The Order state machine rejected a transition.
    #[error("Cannot transition Order from \"{from}\" to \"{to}\": {transition_error}")]
    OrderStateTransition {
        /// State the order was in.
        from: OrderState,
        /// Requested target state.
        to: OrderState,
        /// Table miss or the veto message from a process hook, verbatim.
        transition_error: String,
    },

    /// The Payment state machine rejected a transition.
    #[error("Cannot transition Payment from \"{from}\" to \"{to}\": {transition_error}")]
    PaymentStateTransition {
        /// State the payment was in.
        from: PaymentState,
        /// Requested target state.
        to: PaymentState,
        /// Table miss or the veto message from a process hook, verbatim.
        transition_error: String,
    },

    /// The Fulfillment state machine rejected a transition.
    #[error("Cannot transition Fulfillment from \"{from}\" to \"{to}\": {transition_error}")]
    FulfillmentStateTransition {
        /// State the fulfillment was in.
        from: FulfillmentState,
        /// Requested target state.
        to: FulfillmentState,
        /// Table miss or the veto message from a process hook, verbatim.
        transition_error: String,
    },

    /// The Refund state machine rejected a transition.
    #[error("Cannot transition Refund from \"{from}\" to \"{to}\": {transition_error}")]
    RefundStateTransition {
        /// State the refund was in.
        from: RefundState,
        /// Requested target state.
        to: RefundState,
        /// Why the transition was rejected.
        transition_error: String,
    },

    /// modify_order was called outside the Modifying state.
    #[error("Order {order_id} is not in the \"Modifying\" state")]
    OrderModificationState {
        /// The order in question.
        order_id: OrderId,
    },

    /// Order contents may only change while the order is being built.
    #[error("The contents of Order {order_id} cannot be modified in the \"{state}\" state")]
    OrderContentsLocked {
        /// The order in question.
        order_id: OrderId,
        /// Its current state.
        state: OrderState,
    },

    /// A payment was added outside the payment-arranging states.
    #[error("A Payment may only be added to Order {order_id} in the \"ArrangingPayment\" state, not \"{state}\"")]
    OrderPaymentState {
        /// The order in question.
        order_id: OrderId,
        /// Its current state.
        state: OrderState,
    },

    /// A manual payment was added outside the payment-arranging states.
    #[error(
        "A manual Payment may only be added to Order {order_id} in the \"ArrangingPayment\" or \"ArrangingAdditionalPayment\" states, not \"{state}\""
    )]
    ManualPaymentState {
        /// The order in question.
        order_id: OrderId,
        /// Its current state.
        state: OrderState,
    },

    /// A fulfillment could not be created from the given items.
    #[error("Could not create Fulfillment: {message}")]
    FulfillmentCreation {
        /// What was wrong with the request.
        message: String,
    },

    /// The coupon code matches no available promotion.
    #[error("Coupon code \"{coupon_code}\" is not valid")]
    CouponCodeInvalid {
        /// The rejected code.
        coupon_code: String,
    },

    /// The coupon code's promotion has passed its end date.
    #[error("Coupon code \"{coupon_code}\" has expired")]
    CouponCodeExpired {
        /// The rejected code.
        coupon_code: String,
    },

    /// A usage limit on the coupon code's promotion has been reached.
    #[error("Coupon code \"{coupon_code}\" cannot be used more than {limit} time(s)")]
    CouponCodeLimit {
        /// The rejected code.
        coupon_code: String,
        /// The exhausted limit.
        limit: u32,
    },

    /// An OrderInterceptor vetoed the operation.
    #[error("An error occurred when attempting to modify the Order: {interceptor_error}")]
    Intercepted {
        /// The veto reason, verbatim from the interceptor.
        interceptor_error: String,
    },

    /// A pluggable strategy failed in a way the operation cannot recover from.
    #[error("{strategy} failed: {message}")]
    StrategyFailed {
        /// Which strategy seam failed.
        strategy: &'static str,
        /// The failure it reported.
        message: String,
    },

    /// A custom-field bag violated the registered schema.
    #[error(transparent)]
    CustomField(#[from] CustomFieldError),

    /// A referenced entity does not exist.
    #[error("No {entity} with id {id} could be found")]
    EntityNotFound {
        /// Entity type name.
        entity: &'static str,
        /// The id that failed to resolve.
        id: String,
    },

    /// The persistence layer failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl OrderError {
    /// Stable machine-readable code for API layers.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::NegativeQuantity { .. } => "NEGATIVE_QUANTITY_ERROR",
            Self::OrderLimit { .. } => "ORDER_LIMIT_ERROR",
            Self::InsufficientStock { .. } => "INSUFFICIENT_STOCK_ERROR",
            Self::NoChangesSpecified => "NO_CHANGES_SPECIFIED_ERROR",
            Self::RefundPaymentIdMissing => "REFUND_PAYMENT_ID_MISSING_ERROR",
            Self::RefundAmountExceeded { .. } => "REFUND_AMOUNT_ERROR",
            Self::OrderStateTransition { .. } => "ORDER_STATE_TRANSITION_ERROR",
            Self::PaymentStateTransition { .. } => "PAYMENT_STATE_TRANSITION_ERROR",
            Self::FulfillmentStateTransition { .. } => "FULFILLMENT_STATE_TRANSITION_ERROR",
            Self::RefundStateTransition { .. } => "REFUND_STATE_TRANSITION_ERROR",
            Self::OrderModificationState { .. } => "ORDER_MODIFICATION_STATE_ERROR",
            Self::OrderContentsLocked { .. } => "ORDER_MODIFICATION_ERROR",
            Self::OrderPaymentState { .. } => "ORDER_PAYMENT_STATE_ERROR",
            Self::ManualPaymentState { .. } => "MANUAL_PAYMENT_STATE_ERROR",
            Self::FulfillmentCreation { .. } => "CREATE_FULFILLMENT_ERROR",
            Self::CouponCodeInvalid { .. } => "COUPON_CODE_INVALID_ERROR",
            Self::CouponCodeExpired { .. } => "COUPON_CODE_EXPIRED_ERROR",
            Self::CouponCodeLimit { .. } => "COUPON_CODE_LIMIT_ERROR",
            Self::Intercepted { .. } => "ORDER_INTERCEPTOR_ERROR",
            Self::StrategyFailed { .. } => "STRATEGY_FAILED_ERROR",
            Self::CustomField(_) => "INVALID_CUSTOM_FIELD_ERROR",
            Self::EntityNotFound { .. } => "ENTITY_NOT_FOUND_ERROR",
            Self::Store(_) => "STORE_ERROR",
        }
    }
}

/// Errors surfaced by [`OrderStore`](crate::store::OrderStore) implementations.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum StoreError {
    /// No stored entity with the given id.
    #[error("{entity} with id {id} was not found")]
    NotFound {
        /// Entity type name.
        entity: &'static str,
        /// The id that failed to resolve.
        id: String,
    },

    /// A commit raced with a concurrent commit of the same order.
    #[error("Order {order_id} was modified concurrently (expected version {expected}, found {actual})")]
    VersionConflict {
        /// The contested order.
        order_id: OrderId,
        /// Version the commit was based on.
        expected: u64,
        /// Version actually stored.
        actual: u64,
    },

    /// The storage backend failed.
    #[error("storage backend error: {message}")]
    Backend {
        /// Backend-specific description.
        message: String,
    },
}

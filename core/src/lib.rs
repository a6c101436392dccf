//! # Orderflow Core
//!
//! A standalone order engine: the order/payment/fulfillment state
//! machines, the post-placement modification engine, and promotion
//! evaluation with side effects, extracted into a library that host
//! applications drive through [`OrderService`].
//!
//! ## Architecture
//!
//! - **Aggregate sessions**: every operation loads the [`Order`]
//!   aggregate through the [`OrderStore`](store::OrderStore) seam,
//!   mutates a working copy, and issues one atomic commit. Errors before
//!   the commit leave nothing written.
//! - **Pluggable strategies**: processes, shipping, merge, price-change
//!   handling, interceptors, and promotion conditions/actions are all
//!   injected via [`OrderEngineConfig`]; the engine treats every call as
//!   possibly failing or vetoing.
//! - **Typed errors**: every operation returns
//!   `Result<_, `[`OrderError`]`>` with stable machine-readable codes;
//!   business failures are values, never panics.
//! - **Explicit context**: no globals; each call takes a
//!   [`RequestContext`] carrying the channel, actor, and clock.
//!
//! ## Example
//!
//! ```ignore
//! use orderflow_core::{OrderEngineConfig, OrderService, RequestContext};
//!
//! let service = OrderService::new(store, publisher, OrderEngineConfig::default());
//! let order = service.create_order(&ctx, "USD").await?;
//! let order = service
//!     .add_item_to_order(&ctx, order.id, variant_id, 2, Default::default())
//!     .await?;
//! ```

pub mod calculator;
pub mod config;
pub mod context;
pub mod custom_fields;
pub mod error;
pub mod events;
pub mod id;
pub mod merge;
pub mod modify;
pub mod money;
pub mod order;
pub mod process;
pub mod promotion;
pub mod service;
pub mod shipping;
pub mod state_machine;
pub mod store;

pub use config::OrderEngineConfig;
pub use context::{Actor, Clock, RequestContext, SystemClock};
pub use error::{OrderError, StoreError};
pub use id::{
    ChannelId, CustomerId, FulfillmentId, OrderId, OrderItemId, OrderLineId, OrderModificationId,
    PaymentId, PromotionId, RefundId, SurchargeId, VariantId,
};
pub use modify::{ModifyOrderInput, ModifyOrderResult};
pub use money::{Money, TaxRate};
pub use order::{Order, OrderLine, OrderState};
pub use service::OrderService;

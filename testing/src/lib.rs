//! # Orderflow Testing
//!
//! Testing utilities for the Orderflow engine.
//!
//! This crate provides:
//! - Deterministic mocks for the injected seams (clock, event publisher)
//! - An in-memory [`OrderStore`](orderflow_core::store::OrderStore) with
//!   real version-checked commits and stock accounting
//! - Canned catalog, shipping, and promotion fixtures
//!
//! ## Example
//!
//! ```ignore
//! use orderflow_testing::{fixtures, InMemoryOrderStore, test_context};
//! use orderflow_core::OrderService;
//! use std::sync::Arc;
//!
//! #[tokio::test]
//! async fn add_one_item() {
//!     let store = Arc::new(InMemoryOrderStore::new());
//!     let variant_id = fixtures::standard_catalog(&store);
//!     let service = OrderService::new(
//!         store,
//!         Arc::new(orderflow_core::events::NoopPublisher),
//!         fixtures::test_config(),
//!     );
//!     let ctx = test_context();
//!
//!     let order = service.create_order(&ctx, "USD").await.unwrap();
//!     let order = service
//!         .add_item_to_order(&ctx, order.id, variant_id, 1, Default::default())
//!         .await
//!         .unwrap();
//!     assert_eq!(order.total_quantity(), 1);
//! }
//! ```

pub mod fixtures;
pub mod mocks;
pub mod store;

pub use mocks::{CollectingPublisher, FixedClock, test_clock, test_context};
pub use store::InMemoryOrderStore;

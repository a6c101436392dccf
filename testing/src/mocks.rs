//! Deterministic stand-ins for the engine's injected seams.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orderflow_core::context::{Clock, RequestContext};
use orderflow_core::events::{DomainEvent, EventPublisher};
use orderflow_core::id::ChannelId;
use std::sync::{Arc, Mutex, PoisonError};

/// Fixed clock for deterministic tests.
///
/// Always returns the same time, making tests reproducible.
#[derive(Debug, Clone)]
pub struct FixedClock {
    time: DateTime<Utc>,
}

impl FixedClock {
    /// Create a new fixed clock with the given time.
    #[must_use]
    pub const fn new(time: DateTime<Utc>) -> Self {
        Self { time }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.time
    }
}

/// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC).
///
/// # Panics
///
/// This function will panic if the hardcoded timestamp fails to parse,
/// which should never happen in practice.
#[must_use]
#[allow(clippy::expect_used)]
pub fn test_clock() -> FixedClock {
    FixedClock::new(
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .expect("hardcoded timestamp should always parse")
            .with_timezone(&Utc),
    )
}

/// A system-actor [`RequestContext`] on a fresh channel, driven by
/// [`test_clock`].
#[must_use]
pub fn test_context() -> RequestContext {
    RequestContext::system(ChannelId::new(), Arc::new(test_clock()))
}

/// Publisher that records every event it is handed, in order.
#[derive(Debug, Default)]
pub struct CollectingPublisher {
    events: Mutex<Vec<DomainEvent>>,
}

impl CollectingPublisher {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything published so far.
    #[must_use]
    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Drains and returns everything published so far.
    pub fn take(&self) -> Vec<DomainEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

#[async_trait]
impl EventPublisher for CollectingPublisher {
    async fn publish(&self, _ctx: &RequestContext, event: DomainEvent) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orderflow_core::id::OrderId;

    #[test]
    fn fixed_clock_is_stable() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
    }

    #[tokio::test]
    async fn collecting_publisher_preserves_order() {
        let publisher = CollectingPublisher::new();
        let ctx = test_context();
        let order_id = OrderId::new();
        publisher
            .publish(&ctx, DomainEvent::CouponCodeApplied {
                order_id,
                coupon_code: "A".into(),
            })
            .await;
        publisher
            .publish(&ctx, DomainEvent::CouponCodeRemoved {
                order_id,
                coupon_code: "A".into(),
            })
            .await;
        let events = publisher.take();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], DomainEvent::CouponCodeApplied { .. }));
        assert!(publisher.events().is_empty());
    }
}

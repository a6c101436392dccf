//! Request-scoped execution context.
//!
//! Every engine operation receives a [`RequestContext`] carrying the sales
//! channel, the acting identity, and the clock. Injecting the clock keeps
//! date-sensitive logic (promotion windows, placement timestamps)
//! deterministic under test.

use crate::id::{ChannelId, CustomerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Provides the current time.
///
/// Production code uses [`SystemClock`]; tests inject a fixed clock.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// A [`Clock`] backed by the system time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// The identity an operation runs on behalf of.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Actor {
    /// Internal or scheduled work with no end user attached.
    System,
    /// A shopper, authenticated or converted from a guest session.
    Customer(CustomerId),
    /// A staff member acting through an administrative surface.
    Administrator,
}

/// Per-request context threaded through every engine operation.
#[derive(Clone)]
pub struct RequestContext {
    channel_id: ChannelId,
    actor: Actor,
    clock: Arc<dyn Clock>,
}

impl RequestContext {
    /// Creates a context for the given channel and actor.
    #[must_use]
    pub fn new(channel_id: ChannelId, actor: Actor, clock: Arc<dyn Clock>) -> Self {
        Self { channel_id, actor, clock }
    }

    /// Convenience constructor for system-initiated work.
    #[must_use]
    pub fn system(channel_id: ChannelId, clock: Arc<dyn Clock>) -> Self {
        Self::new(channel_id, Actor::System, clock)
    }

    /// The sales channel this request belongs to.
    #[must_use]
    pub const fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    /// The acting identity.
    #[must_use]
    pub const fn actor(&self) -> &Actor {
        &self.actor
    }

    /// Current time from the injected clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Shared handle to the clock.
    #[must_use]
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Returns a copy of this context acting as the given customer.
    #[must_use]
    pub fn as_customer(&self, customer_id: CustomerId) -> Self {
        Self {
            channel_id: self.channel_id,
            actor: Actor::Customer(customer_id),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("channel_id", &self.channel_id)
            .field("actor", &self.actor)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StoppedClock(DateTime<Utc>);

    impl Clock for StoppedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    #[test]
    fn context_reads_injected_clock() {
        #[allow(clippy::unwrap_used)] // fixed literal always parses
        let instant = "2025-06-01T12:00:00Z".parse().unwrap();
        let ctx = RequestContext::system(ChannelId::new(), Arc::new(StoppedClock(instant)));
        assert_eq!(ctx.now(), instant);
        assert_eq!(ctx.actor(), &Actor::System);
    }

    #[test]
    fn as_customer_switches_actor_only() {
        let ctx = RequestContext::system(ChannelId::new(), Arc::new(SystemClock));
        let customer = CustomerId::new();
        let shopper = ctx.as_customer(customer);
        assert_eq!(shopper.actor(), &Actor::Customer(customer));
        assert_eq!(shopper.channel_id(), ctx.channel_id());
    }
}

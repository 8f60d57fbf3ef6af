use super::EventSubscriber;
use crate::EmptyResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug, Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one live attachment to an event log
///
/// Notifications are tagged with the id of the subscription that produced them.
/// Receivers compare it against the id they currently consider live and discard
/// anything stale, which prevents torn-down subscriptions from resurrecting
/// state after a resubscription race.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Allocates the next unused identifier
    pub fn next() -> Self {
        Self(NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Opaque, totally ordered cursor into an event log
///
/// Only the log itself assigns positions; consumers treat them as tokens to
/// hand back when resuming. The ordering of positions matches the order in
/// which events were appended.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position(String);

impl Position {
    /// Creates a position from its raw representation
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Raw representation of the position
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Position {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Raw event record as it is stored in the log
#[derive(Debug, Clone)]
pub struct StoredEvent {
    /// Name of the stream the event was appended to
    pub stream: String,
    /// Position the log assigned to the event
    pub position: Position,
    /// Opaque serialized payload, interpreted by an [`EventFormatter`](super::EventFormatter)
    pub payload: Vec<u8>,
}

/// Opaque predicate selecting the stored events a consumer is interested in
#[derive(Clone)]
pub struct EventFilter(Arc<dyn Fn(&StoredEvent) -> bool + Send + Sync>);

impl EventFilter {
    /// Creates a filter from a predicate over raw stored events
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&StoredEvent) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(predicate))
    }

    /// Filter matching every event in the log
    pub fn all() -> Self {
        Self::new(|_| true)
    }

    /// Evaluates the predicate against a stored event
    pub fn matches(&self, event: &StoredEvent) -> bool {
        (self.0)(event)
    }
}

impl Debug for EventFilter {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("EventFilter")
    }
}

/// Append-only, position-addressable, subscribable source of stored events
pub trait EventStore: Send + Sync {
    /// Attaches a subscriber to the log, replaying matching events after `position`
    ///
    /// A `position` of `None` replays the log from its start. The returned
    /// handle owns the attachment; dropping it detaches the subscriber.
    fn create_subscription(
        &self,
        subscriber: Arc<dyn EventSubscriber<StoredEvent>>,
        filter: EventFilter,
        position: Option<Position>,
    ) -> Box<dyn EventSubscription>;
}

/// Handle representing one live attachment to an event log or pipeline stage
///
/// Disposal happens through [`Drop`]; there is no explicit unsubscribe.
#[async_trait]
pub trait EventSubscription: Send + Sync {
    /// Identity under which this subscription delivers notifications
    fn id(&self) -> SubscriptionId;

    /// Prods an idle or errored subscription to look for new work immediately
    fn wake_up(&self);

    /// Flushes buffered, not yet delivered items before a graceful teardown
    async fn complete(&self) -> EmptyResult {
        Ok(())
    }
}

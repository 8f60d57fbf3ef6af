use super::StoredEvent;
use crate::BoxedError;

/// Converts raw stored events into typed domain events
///
/// Formatters are injected into the parsing stage of a consumer pipeline. A
/// parse failure only skips the offending event, it never terminates the
/// subscription.
pub trait EventFormatter: Send + Sync {
    /// Typed event produced by this formatter
    type Event;

    /// Attempts to parse the payload of a stored event
    fn parse(&self, event: &StoredEvent) -> Result<Self::Event, BoxedError>;
}

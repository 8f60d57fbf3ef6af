use crate::event::{EventBatch, EventFilter};
use crate::EmptyResult;
use async_trait::async_trait;
use std::time::Duration;

/// User supplied handler processing batches of typed events
///
/// Implementations receive batches in log order and must be idempotent per
/// position since delivery is at-least-once. Returning an `Err` from
/// [`on`](EventConsumer::on) halts the consumer with a recorded fault until it
/// is explicitly reactivated.
#[async_trait]
pub trait EventConsumer: Send + Sync + 'static {
    /// Typed event this consumer processes
    type Event: Send + Sync + 'static;

    /// Name of the consumer, used as the checkpoint key and in diagnostics
    fn name(&self) -> &str;

    /// Predicate selecting the stored events this consumer subscribes to
    fn events_filter(&self) -> EventFilter {
        EventFilter::all()
    }

    /// Upper bound on the number of envelopes per delivered batch
    fn batch_size(&self) -> usize {
        500
    }

    /// Idle time after which a partially filled batch is flushed
    fn batch_delay(&self) -> Duration {
        Duration::from_millis(500)
    }

    /// Processes one ordered batch of envelopes
    async fn on(&self, batch: &EventBatch<Self::Event>) -> EmptyResult;

    /// Discards all state derived from previously handled events
    ///
    /// Invoked by a reset before the consumer rewinds to the log start.
    async fn clear(&self) -> EmptyResult {
        Ok(())
    }
}

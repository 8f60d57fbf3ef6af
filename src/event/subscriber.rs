use super::{EventSubscription, SubscriptionId};
use crate::{ChainedError, EmptyResult};
use async_trait::async_trait;
use std::sync::Arc;

/// Receiver for ordered notifications from a subscription
///
/// Both callbacks carry the [`SubscriptionId`] of the handle that produced the
/// notification so that receivers can ignore deliveries from superseded
/// pipelines. Within one subscription's lifetime, `on_next` is invoked in log
/// order and never concurrently with itself.
#[async_trait]
pub trait EventSubscriber<T>: Send + Sync {
    /// Delivers the next item of the stream
    async fn on_next(&self, subscription: SubscriptionId, item: T) -> EmptyResult;

    /// Signals that the subscription failed and will deliver no further items
    async fn on_error(&self, subscription: SubscriptionId, error: ChainedError) -> EmptyResult;
}

/// Factory assembling a subscription pipeline that delivers to the given subscriber
///
/// Used by stages that have to rebuild their inner pipeline, so it may be
/// invoked more than once over the lifetime of the outer subscription.
pub type SubscriptionFactory<T> =
    Arc<dyn Fn(Arc<dyn EventSubscriber<T>>) -> Box<dyn EventSubscription> + Send + Sync>;

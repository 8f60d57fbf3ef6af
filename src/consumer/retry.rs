use crate::event::{
    EventBatch, EventSubscriber, EventSubscription, SubscriptionFactory, SubscriptionId,
};
use crate::helpers::{Backoff, RetryWindow};
use crate::{ChainedError, EmptyResult};
use async_trait::async_trait;
use log::{debug, warn};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::time::sleep;

/// Policy bounding how aggressively a failed inner pipeline is rebuilt
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of rebuilds within [`window`](RetryPolicy::window)
    pub max_retries: usize,
    /// Sliding window over which rebuilds are counted
    pub window: Duration,
    /// Delay before the first rebuild, doubled on every consecutive fault
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            window: Duration::from_secs(300),
            initial_delay: Duration::from_millis(250),
        }
    }
}

const EXHAUSTED_BACKOFF_DELAY: Duration = Duration::from_secs(30);

/// Pipeline stage making transient subscription faults invisible downstream
///
/// Owns the creation of the inner pipeline through a [`SubscriptionFactory`]
/// and rebuilds it after a backoff delay whenever it reports an error, as long
/// as the [`RetryPolicy`] window permits. Once the budget is exhausted the
/// error is forwarded to the outer subscriber instead. Deliveries from a
/// superseded inner pipeline are discarded by [`SubscriptionId`] comparison.
pub struct RetrySubscription<E> {
    shared: Arc<RetryShared<E>>,
}

impl<E> RetrySubscription<E>
where
    E: Send + Sync + 'static,
{
    /// Creates the stage and immediately attaches the inner pipeline
    ///
    /// The target is held weakly; once it is gone the stage goes silent and
    /// stops rebuilding.
    pub fn create(
        target: Weak<dyn EventSubscriber<EventBatch<E>>>,
        factory: SubscriptionFactory<EventBatch<E>>,
        policy: RetryPolicy,
    ) -> Self {
        let shared = Arc::new(RetryShared {
            id: SubscriptionId::next(),
            target,
            factory,
            inner: Mutex::new(RetryInner {
                subscription: None,
                window: RetryWindow::new(policy.max_retries, policy.window),
                backoff: Backoff::new(policy.initial_delay, 32),
                generation: 0,
                waiting: false,
                closed: false,
            }),
        });

        shared.attach_locked(&mut shared.inner.lock().unwrap());

        Self { shared }
    }
}

#[async_trait]
impl<E> EventSubscription for RetrySubscription<E>
where
    E: Send + Sync + 'static,
{
    fn id(&self) -> SubscriptionId {
        self.shared.id
    }

    fn wake_up(&self) {
        let mut inner = self.shared.inner.lock().unwrap();

        match &inner.subscription {
            Some(subscription) => subscription.wake_up(),
            None if inner.waiting => {
                // Invalidate the sleeping rebuild task and reattach right away
                inner.generation += 1;
                self.shared.attach_locked(&mut inner);
            }
            None => {}
        }
    }

    async fn complete(&self) -> EmptyResult {
        let subscription = self.shared.inner.lock().unwrap().subscription.clone();

        match subscription {
            Some(subscription) => subscription.complete().await,
            None => Ok(()),
        }
    }
}

impl<E> Drop for RetrySubscription<E> {
    fn drop(&mut self) {
        let mut inner = self.shared.inner.lock().unwrap();
        inner.closed = true;
        inner.subscription = None;
    }
}

struct RetryShared<E> {
    id: SubscriptionId,
    target: Weak<dyn EventSubscriber<EventBatch<E>>>,
    factory: SubscriptionFactory<EventBatch<E>>,
    inner: Mutex<RetryInner>,
}

struct RetryInner {
    subscription: Option<Arc<dyn EventSubscription>>,
    window: RetryWindow,
    backoff: Backoff,
    generation: u64,
    waiting: bool,
    closed: bool,
}

impl<E> RetryShared<E>
where
    E: Send + Sync + 'static,
{
    fn attach_locked(self: &Arc<Self>, inner: &mut RetryInner) {
        if inner.closed || inner.subscription.is_some() {
            return;
        }

        let subscriber: Arc<dyn EventSubscriber<EventBatch<E>>> = Arc::new(RetrySubscriber {
            shared: Arc::clone(self),
        });

        inner.waiting = false;
        inner.subscription = Some(Arc::from((self.factory)(subscriber)));
    }

    fn schedule_rebuild(self: &Arc<Self>, generation: u64, delay: Duration) {
        let shared = Arc::downgrade(self);

        tokio::spawn(async move {
            sleep(delay).await;

            if let Some(shared) = shared.upgrade() {
                let mut inner = shared.inner.lock().unwrap();

                if inner.waiting && inner.generation == generation {
                    shared.attach_locked(&mut inner);
                }
            }
        });
    }
}

struct RetrySubscriber<E> {
    shared: Arc<RetryShared<E>>,
}

enum FaultDecision {
    Ignore,
    Rebuild(u64, Duration),
    GiveUp,
}

#[async_trait]
impl<E> EventSubscriber<EventBatch<E>> for RetrySubscriber<E>
where
    E: Send + Sync + 'static,
{
    async fn on_next(&self, subscription: SubscriptionId, item: EventBatch<E>) -> EmptyResult {
        {
            let inner = self.shared.inner.lock().unwrap();

            let current = inner.subscription.as_ref().map(|s| s.id());
            if inner.closed || current != Some(subscription) {
                return Ok(());
            }
        }

        match self.shared.target.upgrade() {
            Some(target) => target.on_next(self.shared.id, item).await,
            None => Ok(()),
        }
    }

    async fn on_error(&self, subscription: SubscriptionId, error: ChainedError) -> EmptyResult {
        let decision = {
            let mut inner = self.shared.inner.lock().unwrap();

            let current = inner.subscription.as_ref().map(|s| s.id());
            if inner.closed || current != Some(subscription) {
                FaultDecision::Ignore
            } else {
                inner.subscription = None;

                if inner.window.try_admit() {
                    inner.generation += 1;
                    inner.waiting = true;

                    let delay = inner
                        .backoff
                        .next()
                        .unwrap_or(EXHAUSTED_BACKOFF_DELAY);

                    FaultDecision::Rebuild(inner.generation, delay)
                } else {
                    FaultDecision::GiveUp
                }
            }
        };

        match decision {
            FaultDecision::Ignore => Ok(()),
            FaultDecision::Rebuild(generation, delay) => {
                warn!(
                    "Subscription pipeline failed, rebuilding in {:?}: {}",
                    delay, error
                );

                self.shared.schedule_rebuild(generation, delay);

                Ok(())
            }
            FaultDecision::GiveUp => {
                debug!("Retry budget exhausted, surfacing error: {}", error);

                match self.shared.target.upgrade() {
                    Some(target) => target.on_error(self.shared.id, error).await,
                    None => Ok(()),
                }
            }
        }
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use crate::event::{Envelope, Position};
    use pretty_assertions::assert_eq;
    use std::sync::Mutex as StdMutex;

    struct FakePipeline {
        id: SubscriptionId,
    }

    #[async_trait]
    impl EventSubscription for FakePipeline {
        fn id(&self) -> SubscriptionId {
            self.id
        }

        fn wake_up(&self) {}
    }

    #[derive(Default)]
    struct Sink {
        batches: StdMutex<Vec<EventBatch<u64>>>,
        errors: StdMutex<Vec<ChainedError>>,
    }

    #[async_trait]
    impl EventSubscriber<EventBatch<u64>> for Sink {
        async fn on_next(&self, _subscription: SubscriptionId, item: EventBatch<u64>) -> EmptyResult {
            self.batches.lock().unwrap().push(item);
            Ok(())
        }

        async fn on_error(&self, _subscription: SubscriptionId, error: ChainedError) -> EmptyResult {
            self.errors.lock().unwrap().push(error);
            Ok(())
        }
    }

    type Attachment = (SubscriptionId, Arc<dyn EventSubscriber<EventBatch<u64>>>);

    #[derive(Default)]
    struct FactoryLog {
        attachments: StdMutex<Vec<Attachment>>,
    }

    impl FactoryLog {
        fn factory(self: &Arc<Self>) -> SubscriptionFactory<EventBatch<u64>> {
            let log = Arc::clone(self);

            Arc::new(move |subscriber| {
                let id = SubscriptionId::next();
                log.attachments.lock().unwrap().push((id, subscriber));
                Box::new(FakePipeline { id })
            })
        }

        fn count(&self) -> usize {
            self.attachments.lock().unwrap().len()
        }

        fn last(&self) -> Attachment {
            let attachments = self.attachments.lock().unwrap();
            let (id, subscriber) = attachments.last().unwrap();
            (*id, Arc::clone(subscriber))
        }
    }

    fn batch(event: u64, position: &str) -> EventBatch<u64> {
        EventBatch {
            envelopes: vec![Envelope {
                event,
                position: Position::new(position),
            }],
            position: Position::new(position),
        }
    }

    fn policy(max_retries: usize, initial_delay: Duration) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            window: Duration::from_secs(300),
            initial_delay,
        }
    }

    async fn wait_for_attachments(log: &FactoryLog, count: usize) {
        for _ in 0..200 {
            if log.count() >= count {
                return;
            }

            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        panic!("Expected {} pipeline attachments, got {}", count, log.count());
    }

    #[tokio::test]
    async fn forward_batches_from_the_current_pipeline() {
        let sink = Arc::new(Sink::default());
        let log = Arc::new(FactoryLog::default());

        let subscription = RetrySubscription::create(
            Arc::downgrade(&sink) as Weak<dyn EventSubscriber<EventBatch<u64>>>,
            log.factory(),
            policy(1, Duration::from_millis(5)),
        );

        let (id, subscriber) = log.last();
        subscriber.on_next(id, batch(1, "1")).await.unwrap();

        assert_eq!(sink.batches.lock().unwrap().len(), 1);
        drop(subscription);
    }

    #[tokio::test]
    async fn rebuild_the_pipeline_after_an_error() {
        let sink = Arc::new(Sink::default());
        let log = Arc::new(FactoryLog::default());

        let _subscription = RetrySubscription::create(
            Arc::downgrade(&sink) as Weak<dyn EventSubscriber<EventBatch<u64>>>,
            log.factory(),
            policy(3, Duration::from_millis(5)),
        );

        let (id, subscriber) = log.last();
        subscriber
            .on_error(id, ChainedError::message("hiccup"))
            .await
            .unwrap();

        wait_for_attachments(&log, 2).await;

        // The fault never reached the outer subscriber
        assert!(sink.errors.lock().unwrap().is_empty());

        // The rebuilt pipeline delivers under its new identity
        let (new_id, new_subscriber) = log.last();
        assert_ne!(new_id, id);
        new_subscriber.on_next(new_id, batch(2, "2")).await.unwrap();
        assert_eq!(sink.batches.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn surface_the_error_once_the_budget_is_exhausted() {
        let sink = Arc::new(Sink::default());
        let log = Arc::new(FactoryLog::default());

        let _subscription = RetrySubscription::create(
            Arc::downgrade(&sink) as Weak<dyn EventSubscriber<EventBatch<u64>>>,
            log.factory(),
            policy(0, Duration::from_millis(5)),
        );

        let (id, subscriber) = log.last();
        subscriber
            .on_error(id, ChainedError::message("persistent"))
            .await
            .unwrap();

        let errors = sink.errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].head(), Some("persistent"));
        assert_eq!(log.count(), 1);
    }

    #[tokio::test]
    async fn discard_notifications_from_a_superseded_pipeline() {
        let sink = Arc::new(Sink::default());
        let log = Arc::new(FactoryLog::default());

        let _subscription = RetrySubscription::create(
            Arc::downgrade(&sink) as Weak<dyn EventSubscriber<EventBatch<u64>>>,
            log.factory(),
            policy(3, Duration::from_millis(5)),
        );

        let (stale_id, stale_subscriber) = log.last();
        stale_subscriber
            .on_error(stale_id, ChainedError::message("hiccup"))
            .await
            .unwrap();

        wait_for_attachments(&log, 2).await;

        stale_subscriber
            .on_next(stale_id, batch(1, "1"))
            .await
            .unwrap();
        stale_subscriber
            .on_error(stale_id, ChainedError::message("zombie"))
            .await
            .unwrap();

        assert!(sink.batches.lock().unwrap().is_empty());
        assert!(sink.errors.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn reattach_immediately_on_wake_up_while_backing_off() {
        let sink = Arc::new(Sink::default());
        let log = Arc::new(FactoryLog::default());

        let subscription = RetrySubscription::create(
            Arc::downgrade(&sink) as Weak<dyn EventSubscriber<EventBatch<u64>>>,
            log.factory(),
            policy(3, Duration::from_secs(3600)),
        );

        let (id, subscriber) = log.last();
        subscriber
            .on_error(id, ChainedError::message("hiccup"))
            .await
            .unwrap();

        assert_eq!(log.count(), 1);

        subscription.wake_up();

        assert_eq!(log.count(), 2);
    }

    #[tokio::test]
    async fn go_silent_after_teardown() {
        let sink = Arc::new(Sink::default());
        let log = Arc::new(FactoryLog::default());

        let subscription = RetrySubscription::create(
            Arc::downgrade(&sink) as Weak<dyn EventSubscriber<EventBatch<u64>>>,
            log.factory(),
            policy(3, Duration::from_millis(5)),
        );

        let (id, subscriber) = log.last();
        drop(subscription);

        subscriber.on_next(id, batch(1, "1")).await.unwrap();
        subscriber
            .on_error(id, ChainedError::message("late"))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(25)).await;

        assert!(sink.batches.lock().unwrap().is_empty());
        assert!(sink.errors.lock().unwrap().is_empty());
        assert_eq!(log.count(), 1);
    }
}

use super::{
    BatchSubscription, CheckpointStore, EventConsumer, EventConsumerState, ParseSubscription,
    RetryPolicy, RetrySubscription,
};
use crate::event::{
    EventBatch, EventFormatter, EventStore, EventSubscriber, EventSubscription, Position,
    SubscriptionFactory, SubscriptionId,
};
use crate::{ChainedError, EmptyResult};
use async_trait::async_trait;
use log::{debug, error};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;
use tokio::sync::Mutex;

/// Orchestrator owning one consumer's state machine and subscription pipeline
///
/// Every lifecycle operation and every pipeline notification funnels through
/// one asynchronous lock, so state is read, decided upon, and written back
/// atomically with respect to everything else touching this consumer. State
/// changes are written through to the [`CheckpointStore`] whenever the new
/// value differs from the previous one.
///
/// Faults inside the guarded section are not propagated to the caller: the
/// subscription is torn down and the state transitions to `Failed` with the
/// cause recorded, observable through [`state`](EventConsumerProcessor::state).
/// The only exception are checkpoint write failures, which are returned after
/// the in-memory state has been marked `Failed`.
pub struct EventConsumerProcessor<C: EventConsumer> {
    consumer: Arc<C>,
    formatter: Arc<dyn EventFormatter<Event = C::Event>>,
    store: Arc<dyn EventStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    retry_policy: RetryPolicy,
    resume: Arc<StdMutex<Option<Position>>>,
    inner: Mutex<ProcessorInner>,
}

struct ProcessorInner {
    state: EventConsumerState,
    subscription: Option<Arc<dyn EventSubscription>>,
}

impl<C: EventConsumer> EventConsumerProcessor<C> {
    /// Creates a processor for the given consumer and collaborators
    pub fn new(
        consumer: Arc<C>,
        formatter: Arc<dyn EventFormatter<Event = C::Event>>,
        store: Arc<dyn EventStore>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            consumer,
            formatter,
            store,
            checkpoints,
            retry_policy: RetryPolicy::default(),
            resume: Arc::new(StdMutex::new(None)),
            inner: Mutex::new(ProcessorInner {
                state: EventConsumerState::default(),
                subscription: None,
            }),
        }
    }

    /// Replaces the default [`RetryPolicy`] of the retry stage
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Loads the persisted state, defaulting to the initial state
    ///
    /// Idempotent; meant to be called once before any other operation.
    pub async fn initialize(&self) -> EmptyResult {
        let mut inner = self.inner.lock().await;

        if let Some(state) = self.checkpoints.load(self.consumer.name()).await? {
            inner.state = state;
        }

        *self.resume.lock().unwrap() = inner.state.position().cloned();

        Ok(())
    }

    /// Read-only snapshot of the consumer's current state
    pub async fn state(&self) -> EventConsumerState {
        self.inner.lock().await.state.clone()
    }

    /// Ensures the consumer is attached to the log and recovers from `Failed`
    ///
    /// A `Failed` consumer is resubscribed and promoted to `Started` with its
    /// fault cleared. A `Stopped` consumer is attached without changing its
    /// status, a warm reattachment that keeps consuming under the `Stopped`
    /// label. An already `Started` consumer merely has its subscription woken.
    pub async fn activate(self: &Arc<Self>) -> EmptyResult {
        let mut inner = self.inner.lock().await;
        let previous = inner.state.clone();
        let mut detached = None;

        let result = {
            self.subscribe(&mut inner);

            if inner.state.is_failed() {
                inner.state = inner.state.clone().started();
            }

            Ok(())
        };

        self.conclude(&mut inner, previous, result, "activate", &mut detached)
            .await
    }

    /// Subscribes and transitions to `Started`; a no-op unless `Stopped`
    pub async fn start(self: &Arc<Self>) -> EmptyResult {
        let mut inner = self.inner.lock().await;
        let previous = inner.state.clone();
        let mut detached = None;

        let result = {
            if inner.state.is_stopped() {
                self.subscribe(&mut inner);
                inner.state = inner.state.clone().started();
            }

            Ok(())
        };

        self.conclude(&mut inner, previous, result, "start", &mut detached)
            .await
    }

    /// Unsubscribes and transitions to `Stopped`; a no-op if already `Stopped`
    pub async fn stop(&self) -> EmptyResult {
        let mut inner = self.inner.lock().await;
        let previous = inner.state.clone();
        let mut detached = None;

        let result = {
            if !inner.state.is_stopped() {
                detached = inner.subscription.take();
                inner.state = inner.state.clone().stopped();
            }

            Ok(())
        };

        self.conclude(&mut inner, previous, result, "stop", &mut detached)
            .await
    }

    /// Rewinds the consumer to the start of the log
    ///
    /// Tears down the subscription, invokes the consumer's
    /// [`clear`](EventConsumer::clear), resets the state to its initial value
    /// and resubscribes from the log start. Effective regardless of status.
    pub async fn reset(self: &Arc<Self>) -> EmptyResult {
        let mut inner = self.inner.lock().await;
        let previous = inner.state.clone();
        let mut detached = None;

        let result = async {
            detached = inner.subscription.take();

            self.clear().await?;

            inner.state = EventConsumerState::default();
            *self.resume.lock().unwrap() = None;

            self.subscribe(&mut inner);

            Ok(())
        }
        .await;

        self.conclude(&mut inner, previous, result, "reset", &mut detached)
            .await
    }

    /// Flushes any buffered partial batch, best-effort
    ///
    /// Intended for graceful shutdown. Failures are logged, never returned.
    /// Deliberately runs outside the state lock: the flush feeds the pending
    /// batch back through [`on_next`](EventSubscriber::on_next), which needs it.
    pub async fn complete(&self) {
        let subscription = self.inner.lock().await.subscription.clone();

        if let Some(subscription) = subscription {
            if let Err(error) = subscription.complete().await {
                error!(
                    "Failed to complete consumer {}: {}",
                    self.consumer.name(),
                    error
                );
            }
        }
    }

    /// Applies the error-capturing and write-through tail of a guarded operation
    ///
    /// Detached subscriptions are parked in `detached` instead of being dropped
    /// here: notifications arrive on a task owned by a pipeline stage, and
    /// dropping that stage aborts its task at the next await point. The handle
    /// must outlive the checkpoint write, so the caller drops it on return.
    async fn conclude(
        &self,
        inner: &mut ProcessorInner,
        previous: EventConsumerState,
        result: EmptyResult,
        operation: &str,
        detached: &mut Option<Arc<dyn EventSubscription>>,
    ) -> EmptyResult {
        if let Err(error) = result {
            if let Some(subscription) = inner.subscription.take() {
                *detached = Some(subscription);
            }

            let cause = ChainedError::from_boxed(error);
            error!(
                "Consumer {} failed at {:?} during {}: {}",
                self.consumer.name(),
                previous.position(),
                operation,
                cause
            );

            inner.state = previous.clone().failed(cause);
        }

        if inner.state == previous {
            return Ok(());
        }

        *self.resume.lock().unwrap() = inner.state.position().cloned();

        if let Err(error) = self.checkpoints.write(self.consumer.name(), &inner.state).await {
            let cause = ChainedError::from_boxed(error);
            error!(
                "Failed to persist state of consumer {}: {}",
                self.consumer.name(),
                cause
            );

            inner.state = inner.state.clone().failed(cause.clone());

            return Err(cause.into());
        }

        Ok(())
    }

    /// Creates the subscription pipeline or wakes the existing one
    fn subscribe(self: &Arc<Self>, inner: &mut ProcessorInner) {
        match &inner.subscription {
            Some(subscription) => subscription.wake_up(),
            None => {
                let subscriber: Arc<dyn EventSubscriber<EventBatch<C::Event>>> =
                    Arc::clone(self) as _;

                let subscription = RetrySubscription::create(
                    Arc::downgrade(&subscriber),
                    self.pipeline_factory(),
                    self.retry_policy.clone(),
                );

                inner.subscription = Some(Arc::new(subscription));
            }
        }
    }

    /// Factory building the inner pipeline: log subscription → parse → batch
    ///
    /// Invoked by the retry stage on every (re)build; each build resumes from
    /// the position recorded at the last successful checkpoint write.
    fn pipeline_factory(&self) -> SubscriptionFactory<EventBatch<C::Event>> {
        let store = Arc::clone(&self.store);
        let formatter = Arc::clone(&self.formatter);
        let filter = self.consumer.events_filter();
        let resume = Arc::clone(&self.resume);
        let batch_size = self.consumer.batch_size();
        let batch_delay = self.consumer.batch_delay();

        Arc::new(move |target| {
            let store = Arc::clone(&store);
            let formatter = Arc::clone(&formatter);
            let filter = filter.clone();
            let resume = Arc::clone(&resume);

            let subscription =
                BatchSubscription::create(batch_size, batch_delay, target, move |parsed| {
                    Box::new(ParseSubscription::create(formatter, parsed, move |raw| {
                        let position = resume.lock().unwrap().clone();
                        store.create_subscription(raw, filter, position)
                    }))
                });

            Box::new(subscription)
        })
    }

    async fn clear(&self) -> EmptyResult {
        debug!("Consumer {} reset started", self.consumer.name());
        let watch = Instant::now();

        let result = self.consumer.clear().await;

        debug!(
            "Consumer {} reset completed after {:?}",
            self.consumer.name(),
            watch.elapsed()
        );

        result
    }
}

#[async_trait]
impl<C: EventConsumer> EventSubscriber<EventBatch<C::Event>> for EventConsumerProcessor<C> {
    async fn on_next(&self, subscription: SubscriptionId, batch: EventBatch<C::Event>) -> EmptyResult {
        let mut inner = self.inner.lock().await;
        let previous = inner.state.clone();
        let mut detached = None;

        let result = async {
            let current = inner.subscription.as_ref().map(|s| s.id());
            if current != Some(subscription) {
                return Ok(());
            }

            if !batch.is_empty() {
                self.consumer.on(&batch).await?;
            }

            inner.state = inner
                .state
                .clone()
                .handled(batch.position.clone(), batch.len() as u64);

            Ok(())
        }
        .await;

        self.conclude(&mut inner, previous, result, "on_next", &mut detached)
            .await
    }

    async fn on_error(&self, subscription: SubscriptionId, error: ChainedError) -> EmptyResult {
        let mut inner = self.inner.lock().await;
        let previous = inner.state.clone();
        let mut detached = None;

        let result = {
            let current = inner.subscription.as_ref().map(|s| s.id());

            if current == Some(subscription) {
                detached = inner.subscription.take();
                inner.state = inner.state.clone().failed(error);
            }

            Ok(())
        };

        self.conclude(&mut inner, previous, result, "on_error", &mut detached)
            .await
    }
}

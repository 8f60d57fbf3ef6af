use crate::event::{
    Envelope, EventFormatter, EventSubscriber, EventSubscription, StoredEvent, SubscriptionId,
};
use crate::{ChainedError, EmptyResult};
use async_trait::async_trait;
use log::warn;
use std::sync::Arc;

/// Pipeline stage turning raw stored events into typed envelopes
///
/// Wraps a subscription to the raw log and forwards every event through the
/// injected [`EventFormatter`]. Events that fail to parse are logged and
/// dropped without terminating the subscription; ordering and source positions
/// of the remaining events are preserved.
pub struct ParseSubscription {
    id: SubscriptionId,
    inner: Box<dyn EventSubscription>,
}

impl ParseSubscription {
    /// Assembles the stage and attaches it to the inner subscription
    ///
    /// `create_inner` receives the stage's subscriber half and must return the
    /// raw log subscription feeding it.
    pub fn create<E, C>(
        formatter: Arc<dyn EventFormatter<Event = E>>,
        target: Arc<dyn EventSubscriber<Envelope<E>>>,
        create_inner: C,
    ) -> Self
    where
        E: Send + Sync + 'static,
        C: FnOnce(Arc<dyn EventSubscriber<StoredEvent>>) -> Box<dyn EventSubscription>,
    {
        let id = SubscriptionId::next();

        let subscriber = Arc::new(ParseSubscriber {
            id,
            formatter,
            target,
        });

        let inner = create_inner(subscriber);

        Self { id, inner }
    }
}

#[async_trait]
impl EventSubscription for ParseSubscription {
    fn id(&self) -> SubscriptionId {
        self.id
    }

    fn wake_up(&self) {
        self.inner.wake_up()
    }

    async fn complete(&self) -> EmptyResult {
        self.inner.complete().await
    }
}

struct ParseSubscriber<E> {
    id: SubscriptionId,
    formatter: Arc<dyn EventFormatter<Event = E>>,
    target: Arc<dyn EventSubscriber<Envelope<E>>>,
}

#[async_trait]
impl<E> EventSubscriber<StoredEvent> for ParseSubscriber<E>
where
    E: Send + Sync + 'static,
{
    async fn on_next(&self, _subscription: SubscriptionId, event: StoredEvent) -> EmptyResult {
        match self.formatter.parse(&event) {
            Ok(parsed) => {
                let envelope = Envelope {
                    event: parsed,
                    position: event.position,
                };

                self.target.on_next(self.id, envelope).await
            }
            Err(error) => {
                warn!(
                    "Dropping unparsable event on stream {} at {}: {}",
                    event.stream, event.position, error
                );

                Ok(())
            }
        }
    }

    async fn on_error(&self, _subscription: SubscriptionId, error: ChainedError) -> EmptyResult {
        self.target.on_error(self.id, error).await
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use crate::event::Position;
    use crate::BoxedError;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    struct NullSubscription {
        id: SubscriptionId,
    }

    #[async_trait]
    impl EventSubscription for NullSubscription {
        fn id(&self) -> SubscriptionId {
            self.id
        }

        fn wake_up(&self) {}
    }

    #[derive(Default)]
    struct Sink {
        envelopes: Mutex<Vec<(SubscriptionId, Envelope<u64>)>>,
        errors: Mutex<Vec<ChainedError>>,
    }

    #[async_trait]
    impl EventSubscriber<Envelope<u64>> for Sink {
        async fn on_next(&self, subscription: SubscriptionId, item: Envelope<u64>) -> EmptyResult {
            self.envelopes.lock().unwrap().push((subscription, item));
            Ok(())
        }

        async fn on_error(&self, _subscription: SubscriptionId, error: ChainedError) -> EmptyResult {
            self.errors.lock().unwrap().push(error);
            Ok(())
        }
    }

    struct DigitFormatter;

    impl EventFormatter for DigitFormatter {
        type Event = u64;

        fn parse(&self, event: &StoredEvent) -> Result<Self::Event, BoxedError> {
            Ok(std::str::from_utf8(&event.payload)?.parse()?)
        }
    }

    fn stored(position: &str, payload: &[u8]) -> StoredEvent {
        StoredEvent {
            stream: "numbers".into(),
            position: Position::new(position),
            payload: payload.to_vec(),
        }
    }

    fn stage(sink: Arc<Sink>) -> (ParseSubscription, Arc<dyn EventSubscriber<StoredEvent>>) {
        let captured: Mutex<Option<Arc<dyn EventSubscriber<StoredEvent>>>> = Mutex::new(None);

        let subscription = ParseSubscription::create(Arc::new(DigitFormatter), sink, |subscriber| {
            *captured.lock().unwrap() = Some(subscriber);
            Box::new(NullSubscription {
                id: SubscriptionId::next(),
            })
        });

        let subscriber = captured.lock().unwrap().take().unwrap();
        (subscription, subscriber)
    }

    #[tokio::test]
    async fn forward_parsed_envelopes_under_its_own_id() {
        let sink = Arc::new(Sink::default());
        let (subscription, subscriber) = stage(sink.clone());

        subscriber
            .on_next(SubscriptionId::next(), stored("1", b"42"))
            .await
            .unwrap();

        let envelopes = sink.envelopes.lock().unwrap();
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].0, subscription.id());
        assert_eq!(envelopes[0].1.event, 42);
        assert_eq!(envelopes[0].1.position, Position::new("1"));
    }

    #[tokio::test]
    async fn drop_unparsable_events_and_keep_going() {
        let sink = Arc::new(Sink::default());
        let (_subscription, subscriber) = stage(sink.clone());

        subscriber
            .on_next(SubscriptionId::next(), stored("1", b"7"))
            .await
            .unwrap();
        subscriber
            .on_next(SubscriptionId::next(), stored("2", b"not a number"))
            .await
            .unwrap();
        subscriber
            .on_next(SubscriptionId::next(), stored("3", b"9"))
            .await
            .unwrap();

        let events: Vec<u64> = sink
            .envelopes
            .lock()
            .unwrap()
            .iter()
            .map(|(_, envelope)| envelope.event)
            .collect();

        assert_eq!(events, vec![7, 9]);
    }

    #[tokio::test]
    async fn forward_upstream_errors() {
        let sink = Arc::new(Sink::default());
        let (_subscription, subscriber) = stage(sink.clone());

        subscriber
            .on_error(SubscriptionId::next(), ChainedError::message("boom"))
            .await
            .unwrap();

        assert_eq!(sink.errors.lock().unwrap().len(), 1);
    }
}

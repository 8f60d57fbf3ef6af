use crate::event::{
    EventFilter, EventStore, EventSubscriber, EventSubscription, Position, StoredEvent,
    SubscriptionId,
};
use async_trait::async_trait;
use log::warn;
use std::sync::{Arc, Mutex};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

/// Append-only event log kept entirely in memory
///
/// Positions are assigned in append order and compare lexicographically in
/// that order. Subscriptions replay matching history from their start
/// position and then follow the live tail of the log.
pub struct MemoryEventStore {
    log: Arc<Mutex<Vec<StoredEvent>>>,
    length: watch::Sender<usize>,
}

impl Default for MemoryEventStore {
    fn default() -> Self {
        let (length, _) = watch::channel(0);

        Self {
            log: Arc::new(Mutex::new(Vec::new())),
            length,
        }
    }
}

impl MemoryEventStore {
    /// Creates an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event to the log, returning its assigned position
    pub fn append(&self, stream: impl Into<String>, payload: Vec<u8>) -> Position {
        let mut log = self.log.lock().unwrap();

        // Zero-padded so that lexicographic position order matches append order
        let position = Position::new(format!("{:020}", log.len() + 1));

        log.push(StoredEvent {
            stream: stream.into(),
            position: position.clone(),
            payload,
        });

        self.length.send_replace(log.len());

        position
    }
}

impl EventStore for MemoryEventStore {
    fn create_subscription(
        &self,
        subscriber: Arc<dyn EventSubscriber<StoredEvent>>,
        filter: EventFilter,
        position: Option<Position>,
    ) -> Box<dyn EventSubscription> {
        let id = SubscriptionId::next();
        let wake = Arc::new(Notify::new());

        let task = tokio::spawn(deliver(
            id,
            Arc::clone(&self.log),
            self.length.subscribe(),
            Arc::clone(&wake),
            subscriber,
            filter,
            position,
        ));

        Box::new(MemorySubscription { id, wake, task })
    }
}

async fn deliver(
    id: SubscriptionId,
    log: Arc<Mutex<Vec<StoredEvent>>>,
    mut length: watch::Receiver<usize>,
    wake: Arc<Notify>,
    subscriber: Arc<dyn EventSubscriber<StoredEvent>>,
    filter: EventFilter,
    position: Option<Position>,
) {
    // Events are only ever appended, so a plain index is a stable cursor
    let mut cursor = {
        let log = log.lock().unwrap();

        match position {
            Some(position) => log
                .iter()
                .position(|event| event.position > position)
                .unwrap_or(log.len()),
            None => 0,
        }
    };

    loop {
        let pending: Vec<StoredEvent> = {
            let log = log.lock().unwrap();
            let pending = log[cursor..]
                .iter()
                .filter(|event| filter.matches(event))
                .cloned()
                .collect();

            cursor = log.len();
            pending
        };

        for event in pending {
            if let Err(error) = subscriber.on_next(id, event).await {
                warn!("Subscriber rejected event delivery: {}", error);
            }
        }

        tokio::select! {
            changed = length.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = wake.notified() => {}
        }
    }
}

struct MemorySubscription {
    id: SubscriptionId,
    wake: Arc<Notify>,
    task: JoinHandle<()>,
}

#[async_trait]
impl EventSubscription for MemorySubscription {
    fn id(&self) -> SubscriptionId {
        self.id
    }

    fn wake_up(&self) {
        self.wake.notify_one();
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

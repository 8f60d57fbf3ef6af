use crate::event::{
    Envelope, EventBatch, EventSubscriber, EventSubscription, SubscriptionId,
};
use crate::{ChainedError, EmptyResult};
use async_trait::async_trait;
use log::warn;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;

#[derive(Debug, Error)]
enum BatchStageError {
    #[error("batching task is no longer running")]
    TaskGone,
}

enum Command<E> {
    Envelope(Envelope<E>),
    Error(ChainedError),
    Complete(oneshot::Sender<()>),
}

/// Pipeline stage accumulating envelopes into bounded batches
///
/// Envelopes received from the inner subscription are buffered and emitted as
/// one [`EventBatch`] once the size bound is reached or the idle delay passes.
/// Upstream errors flush the pending buffer before they are forwarded, and an
/// explicit [`complete`](EventSubscription::complete) flushes whatever is
/// buffered, so no envelope is ever lost silently. Emitted batches are never
/// empty.
pub struct BatchSubscription<E> {
    id: SubscriptionId,
    sender: mpsc::UnboundedSender<Command<E>>,
    task: JoinHandle<()>,
    inner: Box<dyn EventSubscription>,
}

impl<E> BatchSubscription<E>
where
    E: Send + Sync + 'static,
{
    /// Assembles the stage and attaches it to the inner subscription
    ///
    /// `create_inner` receives the stage's subscriber half and must return the
    /// subscription feeding it, usually a [`ParseSubscription`](super::ParseSubscription).
    pub fn create<C>(
        batch_size: usize,
        batch_delay: Duration,
        target: Arc<dyn EventSubscriber<EventBatch<E>>>,
        create_inner: C,
    ) -> Self
    where
        C: FnOnce(Arc<dyn EventSubscriber<Envelope<E>>>) -> Box<dyn EventSubscription>,
    {
        let id = SubscriptionId::next();
        let (sender, receiver) = mpsc::unbounded_channel();

        let task = tokio::spawn(run_batcher(
            id,
            batch_size.max(1),
            batch_delay,
            receiver,
            target,
        ));

        let subscriber = Arc::new(BatchSubscriber {
            sender: sender.clone(),
        });

        let inner = create_inner(subscriber);

        Self {
            id,
            sender,
            task,
            inner,
        }
    }
}

#[async_trait]
impl<E> EventSubscription for BatchSubscription<E>
where
    E: Send + Sync + 'static,
{
    fn id(&self) -> SubscriptionId {
        self.id
    }

    fn wake_up(&self) {
        self.inner.wake_up()
    }

    async fn complete(&self) -> EmptyResult {
        self.inner.complete().await?;

        let (ack, flushed) = oneshot::channel();

        self.sender
            .send(Command::Complete(ack))
            .map_err(|_| BatchStageError::TaskGone)?;

        flushed.await.map_err(|_| BatchStageError::TaskGone)?;

        Ok(())
    }
}

impl<E> Drop for BatchSubscription<E> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct BatchSubscriber<E> {
    sender: mpsc::UnboundedSender<Command<E>>,
}

#[async_trait]
impl<E> EventSubscriber<Envelope<E>> for BatchSubscriber<E>
where
    E: Send + Sync + 'static,
{
    async fn on_next(&self, _subscription: SubscriptionId, item: Envelope<E>) -> EmptyResult {
        // A torn down batching task makes the whole stage stale, nothing to report
        self.sender.send(Command::Envelope(item)).ok();
        Ok(())
    }

    async fn on_error(&self, _subscription: SubscriptionId, error: ChainedError) -> EmptyResult {
        self.sender.send(Command::Error(error)).ok();
        Ok(())
    }
}

async fn run_batcher<E>(
    id: SubscriptionId,
    batch_size: usize,
    batch_delay: Duration,
    mut receiver: mpsc::UnboundedReceiver<Command<E>>,
    target: Arc<dyn EventSubscriber<EventBatch<E>>>,
) {
    let mut buffer: Vec<Envelope<E>> = Vec::new();

    loop {
        let command = if buffer.is_empty() {
            receiver.recv().await
        } else {
            match timeout(batch_delay, receiver.recv()).await {
                Ok(command) => command,
                Err(_) => {
                    flush(id, &mut buffer, &target).await;
                    continue;
                }
            }
        };

        match command {
            Some(Command::Envelope(envelope)) => {
                buffer.push(envelope);

                if buffer.len() >= batch_size {
                    flush(id, &mut buffer, &target).await;
                }
            }
            Some(Command::Error(error)) => {
                flush(id, &mut buffer, &target).await;

                if let Err(error) = target.on_error(id, error).await {
                    warn!("Subscriber rejected error notification: {}", error);
                }
            }
            Some(Command::Complete(ack)) => {
                flush(id, &mut buffer, &target).await;
                ack.send(()).ok();
            }
            None => break,
        }
    }
}

async fn flush<E>(
    id: SubscriptionId,
    buffer: &mut Vec<Envelope<E>>,
    target: &Arc<dyn EventSubscriber<EventBatch<E>>>,
) {
    let position = match buffer.last() {
        Some(envelope) => envelope.position.clone(),
        None => return,
    };

    let batch = EventBatch {
        envelopes: std::mem::take(buffer),
        position,
    };

    if let Err(error) = target.on_next(id, batch).await {
        warn!("Subscriber rejected batch delivery: {}", error);
    }
}

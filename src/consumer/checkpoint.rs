use super::EventConsumerState;
use crate::{BoxedError, EmptyResult};
use async_trait::async_trait;

/// Durable mapping from consumer names to their persisted state
///
/// The checkpoint store is the single source of truth for a consumer's resume
/// position. It is read once during initialization and written whenever the
/// in-memory state changes by value.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Loads the persisted state of a consumer, `None` if it was never written
    async fn load(&self, consumer: &str) -> Result<Option<EventConsumerState>, BoxedError>;

    /// Overwrites the persisted state of a consumer
    async fn write(&self, consumer: &str, state: &EventConsumerState) -> EmptyResult;
}

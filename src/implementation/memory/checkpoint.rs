use crate::consumer::{CheckpointStore, EventConsumerState};
use crate::{BoxedError, EmptyResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Checkpoint store keeping consumer states in a process-local map
#[derive(Default)]
pub struct MemoryCheckpointStore {
    states: Mutex<HashMap<String, EventConsumerState>>,
}

impl MemoryCheckpointStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, consumer: &str) -> Result<Option<EventConsumerState>, BoxedError> {
        Ok(self.states.lock().unwrap().get(consumer).cloned())
    }

    async fn write(&self, consumer: &str, state: &EventConsumerState) -> EmptyResult {
        self.states
            .lock()
            .unwrap()
            .insert(consumer.to_owned(), state.clone());

        Ok(())
    }
}

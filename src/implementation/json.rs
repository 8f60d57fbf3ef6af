use crate::event::{EventFormatter, StoredEvent};
use crate::BoxedError;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;

/// Formatter deserializing stored event payloads from JSON
pub struct JsonEventFormatter<E> {
    _event: PhantomData<fn() -> E>,
}

impl<E> JsonEventFormatter<E> {
    /// Creates a formatter for the given event type
    pub fn new() -> Self {
        Self {
            _event: PhantomData,
        }
    }
}

impl<E> Default for JsonEventFormatter<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EventFormatter for JsonEventFormatter<E>
where
    E: DeserializeOwned + Send + Sync,
{
    type Event = E;

    fn parse(&self, event: &StoredEvent) -> Result<Self::Event, BoxedError> {
        Ok(serde_json::from_slice(&event.payload)?)
    }
}

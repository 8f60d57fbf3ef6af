use super::Position;

/// One parsed event together with the position of its stored source record
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope<E> {
    /// The parsed event payload
    pub event: E,
    /// Position of the stored event this envelope was parsed from
    pub position: Position,
}

/// Ordered, non-empty group of envelopes delivered to a handler in one call
#[derive(Debug, Clone, PartialEq)]
pub struct EventBatch<E> {
    /// Envelopes in log order
    pub envelopes: Vec<Envelope<E>>,
    /// Position to resume from once the batch has been handled
    pub position: Position,
}

impl<E> EventBatch<E> {
    /// Number of envelopes in the batch
    pub fn len(&self) -> usize {
        self.envelopes.len()
    }

    /// Whether the batch contains no envelopes
    pub fn is_empty(&self) -> bool {
        self.envelopes.is_empty()
    }
}

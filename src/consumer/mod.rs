//! The event consumer engine
//!
//! A consumer is a named logical reader of an event log with its own persisted
//! cursor. The [`EventConsumerProcessor`] owns the consumer's state machine
//! and assembles a layered subscription pipeline on top of the raw log:
//!
//! ```text
//! event log ─► parse stage ─► batch stage ─► retry stage ─► processor ─► handler
//! ```
//!
//! The [parse stage](ParseSubscription) turns raw stored events into typed
//! envelopes and skips anything unparsable. The [batch stage](BatchSubscription)
//! groups envelopes into bounded batches. The [retry stage](RetrySubscription)
//! wraps the two inner stages and transparently rebuilds them after transient
//! faults, resuming from the last durable position. The processor serializes
//! all state mutation, dispatches batches to the user supplied
//! [`EventConsumer`], and writes its [`EventConsumerState`] through to a
//! [`CheckpointStore`] on every observed change.

mod batch;
mod checkpoint;
mod handler;
mod parse;
mod processor;
mod retry;
mod state;

pub use batch::*;
pub use checkpoint::*;
pub use handler::*;
pub use parse::*;
pub use processor::*;
pub use retry::*;
pub use state::*;

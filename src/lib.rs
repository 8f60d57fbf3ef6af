//! Engine for consuming ordered, durable event logs with persisted positions.
//!
//! A named consumer subscribes to an append-only [`EventStore`](event::EventStore),
//! processes events in log order through a single handler, and records its read
//! position in a [`CheckpointStore`](consumer::CheckpointStore) so that it can
//! resume after restarts and failures. Delivery is at-least-once; handlers are
//! expected to be idempotent per position.
//!
//! The [`event`] module defines the contracts at the boundary to the event log,
//! the [`consumer`] module contains the processing engine built on top of them,
//! and [`implementation`] ships ready-made building blocks (a JSON formatter and
//! in-memory stores) for tests and embedded use.

#![deny(missing_docs)]

mod error;

pub mod consumer;
pub mod event;
pub mod helpers;
pub mod implementation;

pub use error::ChainedError;

/// Generic error type
pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result with no value and a [`BoxedError`]
pub type EmptyResult = Result<(), BoxedError>;

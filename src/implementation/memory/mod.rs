//! In-memory implementations of the event log and checkpoint store
//!
//! Not durable across process restarts; intended for tests and embedded use
//! where a real log would be overkill.

mod checkpoint;
mod store;

pub use checkpoint::*;
pub use store::*;

//! Contracts at the boundary to an ordered, durable event log
//!
//! An event log is an append-only, position-addressable store of
//! [`StoredEvents`](StoredEvent). Interested parties attach to it by creating
//! an [`EventSubscription`](EventSubscription) through an [`EventStore`],
//! providing an [`EventSubscriber`] which receives every matching event in log
//! order, starting after a given [`Position`].
//!
//! Subscriptions are layered: each processing stage exposes the same
//! subscriber contract it wraps, so stages compose into a pipeline where the
//! outermost handle controls the lifecycle of everything beneath it. Every
//! handle carries a process-unique [`SubscriptionId`] which downstream
//! subscribers use to discard notifications from superseded pipelines.

mod envelope;
mod formatter;
mod store;
mod subscriber;

pub use envelope::*;
pub use formatter::*;
pub use store::*;
pub use subscriber::*;

//! Append-only event storage with optimistic concurrency.
//!
//! Besides the classic single-aggregate append, the store offers
//! [`EventStore::append_atomic`], which commits events for several
//! aggregates at once (each with its own expected version). This is the
//! unit every fulfillment operation commits through: either all touched
//! aggregates advance together or none do.

pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod store;

pub use common::AggregateId;
pub use error::{EventStoreError, Result};
pub use event::{EventEnvelope, EventEnvelopeBuilder, EventId, Version};
pub use memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use query::EventQuery;
pub use store::{AggregateChanges, AppendOptions, EventStore, EventStoreExt, EventStream};

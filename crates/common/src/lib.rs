//! Shared identifier types for the fulfillment workspace.

mod types;

pub use types::{AggregateId, ProductId, UserId};

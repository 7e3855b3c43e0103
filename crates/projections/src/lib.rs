//! Query side of the order-fulfillment core.
//!
//! - [`Projection`]: folds store events into a read model
//! - [`ProjectionProcessor`]: incremental catch-up over the global stream
//! - [`OrderSummariesView`]: paged customer and admin order lists
//! - [`StockLevelsView`]: available and reserved units per product

pub mod error;
pub mod processor;
pub mod projection;
pub mod read_model;
pub mod views;

pub use error::{ProjectionError, Result};
pub use processor::ProjectionProcessor;
pub use projection::{Projection, ProjectionPosition};
pub use read_model::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, Page, PageRequest, ReadModel};
pub use views::{OrderSummariesView, OrderSummary, StockLevel, StockLevelsView};

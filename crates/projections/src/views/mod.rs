//! Read model views.

pub mod order_summaries;
pub mod stock_levels;

pub use order_summaries::{OrderSummariesView, OrderSummary};
pub use stock_levels::{StockLevel, StockLevelsView};

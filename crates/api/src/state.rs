//! Shared application state.

use std::sync::Arc;

use domain::OrderService;
use event_store::EventStore;
use fulfillment::{
    CheckoutOrchestrator, CouponAdmin, FulfillmentConfig, InMemoryUserDirectory, InventoryGuard,
    OutboxDispatcher, OutboxTask, PaymentVerifier, ReturnsWorkflow, SaleAdmin, WalletLedger,
};
use projections::{OrderSummariesView, ProjectionProcessor, StockLevelsView};

/// Everything a handler can reach.
pub struct AppState<S: EventStore> {
    pub checkout: Arc<CheckoutOrchestrator<S>>,
    pub returns: Arc<ReturnsWorkflow<S>>,
    pub orders: OrderService<S>,
    pub coupons: CouponAdmin<S>,
    pub sales: SaleAdmin<S>,
    pub ledger: WalletLedger<S>,
    pub inventory: InventoryGuard<S>,
    pub outbox: OutboxDispatcher<S>,
    pub processor: Arc<ProjectionProcessor<S>>,
    pub order_summaries: OrderSummariesView,
    pub stock_levels: StockLevelsView,
    /// Profiles served to checkout. Written through the admin users route.
    pub users: InMemoryUserDirectory,
    /// Checks gateway signatures on wallet top-ups.
    pub payments: Arc<dyn PaymentVerifier>,
    pub config: FulfillmentConfig,
}

impl<S: EventStore + Clone + 'static> AppState<S> {
    /// Hands post-commit side effects to the background dispatcher.
    pub fn dispatch(&self, tasks: Vec<OutboxTask>) {
        if !tasks.is_empty() {
            self.outbox.spawn(tasks);
        }
    }

    /// Brings the read models up to date before a list query.
    pub async fn catch_up(&self) -> Result<(), projections::ProjectionError> {
        self.processor.run_catch_up().await?;
        Ok(())
    }
}

//! HTTP surface of the order-fulfillment core.
//!
//! Provides REST endpoints for checkout, returns, refunds, coupons, sales,
//! stock and wallets, with structured logging (tracing) and Prometheus
//! metrics. Caller identity comes from gateway headers, see [`auth`].

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use domain::OrderService;
use event_store::EventStore;
use fulfillment::{
    CheckoutOrchestrator, CouponAdmin, FulfillmentConfig, InMemoryCollaborators, InventoryGuard,
    OutboxDispatcher, RefundSweeper, ReturnsWorkflow, SaleAdmin, WalletLedger,
};
use metrics_exporter_prometheus::PrometheusHandle;
use projections::{OrderSummariesView, ProjectionProcessor, StockLevelsView};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: EventStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    routes::router::<S>()
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Wires every service over one store and one set of collaborators.
///
/// Returns the handler state and the refund sweeper, which the caller
/// spawns so tests can drive it by hand instead.
pub fn create_state<S: EventStore + Clone + 'static>(
    store: S,
    fakes: &InMemoryCollaborators,
    config: FulfillmentConfig,
) -> (Arc<AppState<S>>, RefundSweeper<S>) {
    let collaborators = fakes.collaborators(&config.payment_secret);
    let retries = config.max_conflict_retries;

    let checkout = CheckoutOrchestrator::new(store.clone(), collaborators.clone(), config.clone());
    let discounts = checkout.discounts().clone();
    let outbox = OutboxDispatcher::new(discounts.clone(), collaborators.clone());
    let returns = Arc::new(ReturnsWorkflow::new(store.clone(), config.clone()));

    let order_summaries = OrderSummariesView::new();
    let stock_levels = StockLevelsView::new();
    let mut processor = ProjectionProcessor::new(store.clone());
    processor.register(Arc::new(order_summaries.clone()));
    processor.register(Arc::new(stock_levels.clone()));

    let sweeper = RefundSweeper::new(
        store.clone(),
        returns.clone(),
        discounts.clone(),
        outbox.clone(),
        config.refund_sweep_interval,
    );

    let state = Arc::new(AppState {
        checkout: Arc::new(checkout),
        returns,
        orders: OrderService::with_conflict_retries(store.clone(), retries),
        coupons: CouponAdmin::new(store.clone()),
        sales: SaleAdmin::new(store.clone(), discounts).with_conflict_retries(retries),
        ledger: WalletLedger::new(store.clone()).with_conflict_retries(retries),
        inventory: InventoryGuard::new(store),
        outbox,
        processor: Arc::new(processor),
        order_summaries,
        stock_levels,
        users: fakes.users.clone(),
        payments: collaborators.payments,
        config,
    });

    (state, sweeper)
}

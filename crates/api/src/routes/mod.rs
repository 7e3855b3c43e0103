//! HTTP route handlers.

pub mod admin;
pub mod coupons;
pub mod health;
pub mod metrics;
pub mod orders;
pub mod sales;
pub mod stock;
pub mod wallet;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use common::AggregateId;
use domain::Order;
use event_store::EventStore;
use projections::PageRequest;
use serde::Deserialize;

use crate::auth::Caller;
use crate::error::ApiError;
use crate::state::AppState;

/// Every application route except `/metrics`, which carries its own state.
pub fn router<S: EventStore + Clone + 'static>() -> Router<Arc<AppState<S>>> {
    Router::new()
        .route("/health", get(health::check::<S>))
        .route("/orders", post(orders::create::<S>))
        .route("/orders/mine", get(orders::mine::<S>))
        .route("/orders/{id}", get(orders::get::<S>))
        .route("/orders/{id}/cancel", post(orders::cancel::<S>))
        .route("/orders/{id}/return", post(orders::request_return::<S>))
        .route("/orders/{id}/invoice", get(orders::invoice::<S>))
        .route("/coupons", get(coupons::list_public::<S>))
        .route("/coupons/validate", post(coupons::validate::<S>))
        .route("/sales/active", get(sales::active::<S>))
        .route("/wallet", get(wallet::get::<S>))
        .route("/wallet/top-up", post(wallet::top_up::<S>))
        .route("/admin/orders", get(admin::list_orders::<S>))
        .route("/admin/orders/{id}", get(admin::get_order::<S>))
        .route("/admin/orders/{id}/stage", post(admin::update_stage::<S>))
        .route("/admin/orders/{id}/cancel", post(admin::cancel::<S>))
        .route(
            "/admin/orders/{id}/return-status",
            post(admin::update_return_status::<S>),
        )
        .route("/admin/orders/{id}/refund", post(admin::initiate_refund::<S>))
        .route(
            "/admin/orders/{id}/refund-failed",
            post(admin::mark_refund_failed::<S>),
        )
        .route(
            "/admin/orders/{id}/replacement",
            post(admin::create_replacement::<S>),
        )
        .route("/admin/returns", get(admin::open_returns::<S>))
        .route("/admin/users/{id}", put(admin::upsert_user::<S>))
        .route(
            "/admin/coupons",
            get(coupons::admin_list::<S>).post(coupons::create::<S>),
        )
        .route(
            "/admin/coupons/{code}/deactivate",
            post(coupons::deactivate::<S>),
        )
        .route(
            "/admin/sales",
            get(sales::admin_list::<S>).post(sales::create::<S>),
        )
        .route("/admin/sales/{id}/activate", post(sales::activate::<S>))
        .route("/admin/sales/{id}/deactivate", post(sales::deactivate::<S>))
        .route(
            "/admin/stock",
            get(stock::list::<S>).post(stock::register::<S>),
        )
        .route("/admin/stock/low", get(stock::low::<S>))
        .route("/admin/stock/{id}/replenish", post(stock::replenish::<S>))
}

/// `?page=&limit=` on list endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl PageQuery {
    pub fn request(&self) -> PageRequest {
        PageRequest::new(self.page, self.limit)
    }
}

fn parse_aggregate_id(id: &str) -> Result<AggregateId, ApiError> {
    id.trim()
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))
}

async fn load_order<S: EventStore + Clone + 'static>(
    state: &AppState<S>,
    order_id: AggregateId,
) -> Result<Order, ApiError> {
    state
        .orders
        .get_order(order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Order {order_id} not found")))
}

/// Loads an order the caller owns. Admins may read any order.
async fn load_visible_order<S: EventStore + Clone + 'static>(
    state: &AppState<S>,
    caller: &Caller,
    order_id: AggregateId,
) -> Result<Order, ApiError> {
    let order = load_order(state, order_id).await?;
    if !caller.is_admin() && !order.is_owned_by(caller.user_id) {
        return Err(ApiError::Forbidden("not your order".into()));
    }
    Ok(order)
}

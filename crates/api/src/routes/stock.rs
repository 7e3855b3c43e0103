//! Stock administration.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use common::ProductId;
use domain::ProductStock;
use event_store::EventStore;
use projections::StockLevel;
use serde::{Deserialize, Serialize};

use crate::auth::Admin;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const DEFAULT_LOW_STOCK_THRESHOLD: u32 = 5;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterStockRequest {
    /// Generated when absent.
    pub product_id: Option<ProductId>,
    pub name: String,
    pub category: String,
    pub quantity: u32,
}

#[derive(Debug, Deserialize)]
pub struct ReplenishRequest {
    pub quantity: u32,
}

#[derive(Debug, Deserialize)]
pub struct LowStockQuery {
    pub threshold: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StockView {
    pub product_id: Option<ProductId>,
    pub name: String,
    pub category: String,
    pub available: u32,
}

impl From<&ProductStock> for StockView {
    fn from(stock: &ProductStock) -> Self {
        Self {
            product_id: stock.product_id(),
            name: stock.name().to_string(),
            category: stock.category().to_string(),
            available: stock.available(),
        }
    }
}

/// POST /admin/stock: start tracking a product.
#[tracing::instrument(skip(state, _admin, req), fields(name = %req.name))]
pub async fn register<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    _admin: Admin,
    Json(req): Json<RegisterStockRequest>,
) -> ApiResult<(StatusCode, Json<StockView>)> {
    if req.name.trim().is_empty() || req.category.trim().is_empty() {
        return Err(ApiError::BadRequest("name and category are required".into()));
    }
    let product_id = req.product_id.unwrap_or_default();
    let stock = state
        .inventory
        .register(product_id, &req.name, &req.category, req.quantity)
        .await?;
    Ok((StatusCode::CREATED, Json(StockView::from(&stock))))
}

/// POST /admin/stock/{id}/replenish
#[tracing::instrument(skip(state, _admin, req))]
pub async fn replenish<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    _admin: Admin,
    Path(id): Path<String>,
    Json(req): Json<ReplenishRequest>,
) -> ApiResult<Json<StockView>> {
    let product_id: ProductId = id
        .trim()
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid product ID: {e}")))?;
    let stock = state.inventory.replenish(product_id, req.quantity).await?;
    Ok(Json(StockView::from(&stock)))
}

/// GET /admin/stock: every tracked product with reserved units.
#[tracing::instrument(skip(state, _admin))]
pub async fn list<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    _admin: Admin,
) -> ApiResult<Json<Vec<StockLevel>>> {
    state.catch_up().await?;
    Ok(Json(state.stock_levels.all().await))
}

/// GET /admin/stock/low?threshold=
#[tracing::instrument(skip(state, _admin))]
pub async fn low<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    _admin: Admin,
    Query(query): Query<LowStockQuery>,
) -> ApiResult<Json<Vec<StockLevel>>> {
    state.catch_up().await?;
    let threshold = query.threshold.unwrap_or(DEFAULT_LOW_STOCK_THRESHOLD);
    Ok(Json(state.stock_levels.low_stock(threshold).await))
}

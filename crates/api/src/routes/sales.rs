//! Category sales: the active sale for shoppers and sale administration.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::AggregateId;
use domain::{CategoryDiscount, Rate, Sale, SaleDefinition};
use event_store::EventStore;
use serde::{Deserialize, Serialize};

use super::parse_aggregate_id;
use crate::auth::Admin;
use crate::error::ApiResult;
use crate::state::AppState;

fn percent(p: u32) -> Rate {
    Rate::from_bps(p.saturating_mul(100))
}

// -- Request types --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryRequest {
    pub category: String,
    pub discount_percent: u32,
    #[serde(default)]
    pub prime_discount_percent: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSaleRequest {
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub description: String,
    pub categories: Vec<CategoryRequest>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    #[serde(default)]
    pub active: bool,
}

impl From<CreateSaleRequest> for SaleDefinition {
    fn from(req: CreateSaleRequest) -> Self {
        SaleDefinition {
            name: req.name,
            slug: req.slug,
            description: req.description,
            categories: req
                .categories
                .into_iter()
                .map(|c| CategoryDiscount {
                    category: c.category,
                    discount: percent(c.discount_percent),
                    prime_discount: percent(c.prime_discount_percent),
                })
                .collect(),
            starts_at: req.starts_at,
            ends_at: req.ends_at,
            active: req.active,
        }
    }
}

// -- Response types --

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryView {
    pub category: String,
    /// Basis points.
    pub discount: Rate,
    pub prime_discount: Rate,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleView {
    pub id: Option<AggregateId>,
    pub name: String,
    pub slug: String,
    pub description: String,
    pub categories: Vec<CategoryView>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub active: bool,
}

impl From<&Sale> for SaleView {
    fn from(sale: &Sale) -> Self {
        Self {
            id: sale.sale_id(),
            name: sale.name().to_string(),
            slug: sale.slug().to_string(),
            description: sale.description().to_string(),
            categories: sale
                .categories()
                .iter()
                .map(|c| CategoryView {
                    category: c.category.clone(),
                    discount: c.discount,
                    prime_discount: c.prime_discount,
                })
                .collect(),
            starts_at: sale.starts_at(),
            ends_at: sale.ends_at(),
            active: sale.is_active(),
        }
    }
}

// -- Handlers --

/// GET /sales/active: the sale shoppers see right now, or null.
#[tracing::instrument(skip(state))]
pub async fn active<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> ApiResult<Json<Option<SaleView>>> {
    let sale = state.sales.get_active(Utc::now()).await?;
    Ok(Json(sale.as_ref().map(SaleView::from)))
}

/// POST /admin/sales
#[tracing::instrument(skip(state, _admin, req), fields(slug = %req.slug))]
pub async fn create<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    _admin: Admin,
    Json(req): Json<CreateSaleRequest>,
) -> ApiResult<(StatusCode, Json<SaleView>)> {
    let sale = state.sales.create(req.into()).await?;
    Ok((StatusCode::CREATED, Json(SaleView::from(&sale))))
}

/// GET /admin/sales
#[tracing::instrument(skip(state, _admin))]
pub async fn admin_list<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    _admin: Admin,
) -> ApiResult<Json<Vec<SaleView>>> {
    let sales = state.sales.list().await?;
    Ok(Json(sales.iter().map(SaleView::from).collect()))
}

/// POST /admin/sales/{id}/activate: also deactivates whichever sale was on.
#[tracing::instrument(skip(state, _admin))]
pub async fn activate<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    _admin: Admin,
    Path(id): Path<String>,
) -> ApiResult<Json<SaleView>> {
    let sale = state.sales.activate(parse_aggregate_id(&id)?).await?;
    Ok(Json(SaleView::from(&sale)))
}

/// POST /admin/sales/{id}/deactivate
#[tracing::instrument(skip(state, _admin))]
pub async fn deactivate<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    _admin: Admin,
    Path(id): Path<String>,
) -> ApiResult<Json<SaleView>> {
    let sale = state.sales.deactivate(parse_aggregate_id(&id)?).await?;
    Ok(Json(SaleView::from(&sale)))
}

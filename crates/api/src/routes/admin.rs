//! Admin order and user endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use common::UserId;
use domain::{
    CancelOrder, CreateReplacement, InitiateRefund, MarkRefundFailed, Membership, RefundMethod,
    ReturnStatus, Stage, UpdateReturnStatus, UpdateStage,
};
use event_store::EventStore;
use fulfillment::UserProfile;
use projections::{OrderSummary, Page};
use serde::Deserialize;

use super::orders::OrderView;
use super::{PageQuery, load_order, parse_aggregate_id};
use crate::auth::Admin;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

// -- Request types --

#[derive(Debug, Deserialize)]
pub struct OrderListQuery {
    pub stage: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct StageRequest {
    pub stage: Stage,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminCancelRequest {
    pub reason: String,
    pub refund_method: Option<RefundMethod>,
}

#[derive(Debug, Deserialize)]
pub struct ReturnStatusRequest {
    pub status: ReturnStatus,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    pub method: RefundMethod,
}

#[derive(Debug, Deserialize)]
pub struct RefundFailedRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct UserRequest {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub membership: Membership,
}

// -- Handlers --

/// GET /admin/orders: every order, optionally one stage, newest first.
#[tracing::instrument(skip(state, _admin))]
pub async fn list_orders<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    _admin: Admin,
    Query(query): Query<OrderListQuery>,
) -> ApiResult<Json<Page<OrderSummary>>> {
    let stage = query
        .stage
        .as_deref()
        .map(str::parse::<Stage>)
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let page = PageQuery {
        page: query.page,
        limit: query.limit,
    };

    state.catch_up().await?;
    Ok(Json(state.order_summaries.all(stage, page.request()).await))
}

/// GET /admin/returns: orders with a return awaiting action.
#[tracing::instrument(skip(state, _admin))]
pub async fn open_returns<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    _admin: Admin,
) -> ApiResult<Json<Vec<OrderSummary>>> {
    state.catch_up().await?;
    Ok(Json(state.order_summaries.open_returns().await))
}

/// GET /admin/orders/{id}
#[tracing::instrument(skip(state, _admin))]
pub async fn get_order<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    _admin: Admin,
    Path(id): Path<String>,
) -> ApiResult<Json<OrderView>> {
    let order_id = parse_aggregate_id(&id)?;
    let order = load_order(&state, order_id).await?;
    Ok(Json(OrderView::new(order_id, &order)))
}

/// POST /admin/orders/{id}/stage: sets any stage until the order is delivered
/// or cancelled. Setting CANCELLED here returns no stock or money.
#[tracing::instrument(skip(state, _admin, req))]
pub async fn update_stage<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    _admin: Admin,
    Path(id): Path<String>,
    Json(req): Json<StageRequest>,
) -> ApiResult<Json<OrderView>> {
    let order_id = parse_aggregate_id(&id)?;
    let result = state
        .orders
        .update_stage(UpdateStage {
            order_id,
            stage: req.stage,
            note: req.note,
        })
        .await?;
    Ok(Json(OrderView::new(order_id, &result.aggregate)))
}

/// POST /admin/orders/{id}/cancel: cancel any order before shipping.
#[tracing::instrument(skip(state, admin, req))]
pub async fn cancel<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Admin(admin): Admin,
    Path(id): Path<String>,
    Json(req): Json<AdminCancelRequest>,
) -> ApiResult<Json<OrderView>> {
    let order_id = parse_aggregate_id(&id)?;
    let outcome = state
        .returns
        .cancel_order(CancelOrder {
            order_id,
            reason: req.reason,
            refund_method: req.refund_method,
            requested_by: admin.user_id,
            as_admin: true,
        })
        .await?;
    state.dispatch(outcome.outbox);
    Ok(Json(OrderView::new(order_id, &outcome.order)))
}

/// POST /admin/orders/{id}/return-status
#[tracing::instrument(skip(state, _admin, req))]
pub async fn update_return_status<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    _admin: Admin,
    Path(id): Path<String>,
    Json(req): Json<ReturnStatusRequest>,
) -> ApiResult<Json<OrderView>> {
    let order_id = parse_aggregate_id(&id)?;
    let outcome = state
        .returns
        .update_return_status(UpdateReturnStatus {
            order_id,
            status: req.status,
            note: req.note,
        })
        .await?;
    state.dispatch(outcome.outbox);
    Ok(Json(OrderView::new(order_id, &outcome.order)))
}

/// POST /admin/orders/{id}/refund: refund the order total.
#[tracing::instrument(skip(state, _admin, req))]
pub async fn initiate_refund<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    _admin: Admin,
    Path(id): Path<String>,
    Json(req): Json<RefundRequest>,
) -> ApiResult<Json<OrderView>> {
    let order_id = parse_aggregate_id(&id)?;
    let outcome = state
        .returns
        .initiate_refund(InitiateRefund {
            order_id,
            method: req.method,
        })
        .await?;
    state.dispatch(outcome.outbox);
    Ok(Json(OrderView::new(order_id, &outcome.order)))
}

/// POST /admin/orders/{id}/refund-failed
#[tracing::instrument(skip(state, _admin, req))]
pub async fn mark_refund_failed<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    _admin: Admin,
    Path(id): Path<String>,
    Json(req): Json<RefundFailedRequest>,
) -> ApiResult<Json<OrderView>> {
    let order_id = parse_aggregate_id(&id)?;
    let outcome = state
        .returns
        .mark_refund_failed(MarkRefundFailed {
            order_id,
            reason: req.reason,
        })
        .await?;
    Ok(Json(OrderView::new(order_id, &outcome.order)))
}

/// POST /admin/orders/{id}/replacement: returns the new order.
#[tracing::instrument(skip(state, _admin))]
pub async fn create_replacement<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    _admin: Admin,
    Path(id): Path<String>,
) -> ApiResult<Json<OrderView>> {
    let order_id = parse_aggregate_id(&id)?;
    let outcome = state
        .returns
        .create_replacement_order(CreateReplacement { order_id })
        .await?;
    let replacement_id = domain::Aggregate::id(&outcome.order)
        .ok_or_else(|| ApiError::NotFound(format!("Replacement for {order_id} not found")))?;
    state.dispatch(outcome.outbox);
    Ok(Json(OrderView::new(replacement_id, &outcome.order)))
}

/// PUT /admin/users/{id}: create or update a profile and its membership.
#[tracing::instrument(skip(state, _admin, req))]
pub async fn upsert_user<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    _admin: Admin,
    Path(id): Path<String>,
    Json(req): Json<UserRequest>,
) -> ApiResult<Json<UserProfile>> {
    let user_id: UserId = id
        .trim()
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid user ID: {e}")))?;
    if req.name.trim().is_empty() || req.email.trim().is_empty() {
        return Err(ApiError::BadRequest("name and email are required".into()));
    }

    let profile = UserProfile {
        user_id,
        name: req.name,
        email: req.email,
        phone: req.phone,
        membership: req.membership,
    };
    state.users.insert(profile.clone());
    tracing::info!(%user_id, "user profile saved");
    Ok(Json(profile))
}

//! Coupon validation for customers and coupon administration.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use domain::{Coupon, CouponDefinition, CouponValue, Money};
use event_store::EventStore;
use serde::{Deserialize, Serialize};

use crate::auth::{Admin, Caller};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

// -- Request types --

#[derive(Debug, Deserialize)]
pub struct ValidateCouponRequest {
    pub code: String,
    /// Cart subtotal in minor units.
    pub subtotal: Money,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCouponRequest {
    pub code: String,
    #[serde(default)]
    pub description: String,
    pub value: CouponValue,
    pub max_discount: Option<Money>,
    #[serde(default)]
    pub min_order: Money,
    pub usage_limit: Option<u32>,
    pub per_user_limit: Option<u32>,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    #[serde(default)]
    pub public: bool,
}

impl From<CreateCouponRequest> for CouponDefinition {
    fn from(req: CreateCouponRequest) -> Self {
        CouponDefinition {
            code: req.code,
            description: req.description,
            value: req.value,
            max_discount: req.max_discount,
            min_order: req.min_order,
            usage_limit: req.usage_limit,
            per_user_limit: req.per_user_limit,
            valid_from: req.valid_from,
            valid_to: req.valid_to,
            public: req.public,
        }
    }
}

// -- Response types --

/// `{valid: true, code, description, discount}` or `{valid: false, reason}`.
#[derive(Debug, Serialize)]
pub struct ValidateCouponResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount: Option<Money>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponView {
    pub code: String,
    pub description: String,
    pub value: Option<CouponValue>,
    pub max_discount: Option<Money>,
    pub min_order: Money,
    pub usage_limit: Option<u32>,
    pub per_user_limit: Option<u32>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
    pub public: bool,
    pub active: bool,
    pub used_count: u32,
}

impl From<&Coupon> for CouponView {
    fn from(coupon: &Coupon) -> Self {
        let def = coupon.definition();
        Self {
            code: coupon.code().to_string(),
            description: def.map(|d| d.description.clone()).unwrap_or_default(),
            value: def.map(|d| d.value),
            max_discount: def.and_then(|d| d.max_discount),
            min_order: def.map(|d| d.min_order).unwrap_or_default(),
            usage_limit: def.and_then(|d| d.usage_limit),
            per_user_limit: def.and_then(|d| d.per_user_limit),
            valid_from: def.map(|d| d.valid_from),
            valid_to: def.map(|d| d.valid_to),
            public: coupon.is_public(),
            active: coupon.is_active(),
            used_count: coupon.used_count(),
        }
    }
}

// -- Handlers --

/// POST /coupons/validate: would this code apply to the caller's cart?
#[tracing::instrument(skip(state, req), fields(user_id = %caller.user_id))]
pub async fn validate<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Json(req): Json<ValidateCouponRequest>,
) -> ApiResult<Json<ValidateCouponResponse>> {
    if req.code.trim().is_empty() {
        return Err(ApiError::BadRequest("code is required".into()));
    }
    let verdict = state
        .checkout
        .discounts()
        .validate_coupon(&req.code, req.subtotal, caller.user_id, Utc::now())
        .await?;

    let response = match verdict {
        Ok(quote) => ValidateCouponResponse {
            valid: true,
            code: Some(quote.code),
            description: Some(quote.description),
            discount: Some(quote.discount),
            reason: None,
        },
        Err(rejection) => ValidateCouponResponse {
            valid: false,
            code: None,
            description: None,
            discount: None,
            reason: Some(rejection.reason_code()),
        },
    };
    Ok(Json(response))
}

/// GET /coupons: public coupons that are currently usable.
#[tracing::instrument(skip(state, _caller))]
pub async fn list_public<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    _caller: Caller,
) -> ApiResult<Json<Vec<CouponView>>> {
    let coupons = state.coupons.list_public(Utc::now()).await?;
    Ok(Json(coupons.iter().map(CouponView::from).collect()))
}

/// POST /admin/coupons
#[tracing::instrument(skip(state, _admin, req), fields(code = %req.code))]
pub async fn create<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    _admin: Admin,
    Json(req): Json<CreateCouponRequest>,
) -> ApiResult<(StatusCode, Json<CouponView>)> {
    let coupon = state.coupons.create(req.into()).await?;
    Ok((StatusCode::CREATED, Json(CouponView::from(&coupon))))
}

/// GET /admin/coupons: every coupon, newest first.
#[tracing::instrument(skip(state, _admin))]
pub async fn admin_list<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    _admin: Admin,
) -> ApiResult<Json<Vec<CouponView>>> {
    let coupons = state.coupons.list().await?;
    Ok(Json(coupons.iter().map(CouponView::from).collect()))
}

/// POST /admin/coupons/{code}/deactivate
#[tracing::instrument(skip(state, _admin))]
pub async fn deactivate<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    _admin: Admin,
    Path(code): Path<String>,
) -> ApiResult<Json<CouponView>> {
    let coupon = state.coupons.deactivate(&code).await?;
    Ok(Json(CouponView::from(&coupon)))
}

//! Customer order endpoints: checkout, lists, cancel, return, invoice.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::{AggregateId, ProductId, UserId};
use domain::order::ReturnHistoryEntry;
use domain::{
    Aggregate, CancelOrder, CreateOrder, CustomerSnapshot, HistoryEntry, Invoice, LineItem,
    Money, Order, OrderTotals, PaymentFields, PaymentMethod, PaymentStatus, ProductRef,
    RefundMethod, RefundStatus, RequestReturn, ReturnStatus, ReturnType, Stage,
};
use event_store::EventStore;
use projections::{OrderSummary, Page};
use serde::{Deserialize, Serialize};

use super::{PageQuery, load_visible_order, parse_aggregate_id};
use crate::auth::Caller;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

// -- Request types --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineRequest {
    /// A catalog product whose stock is reserved.
    pub product_id: Option<ProductId>,
    /// An external catalog item. No stock is reserved.
    pub external_id: Option<String>,
    pub name: String,
    pub category: Option<String>,
    pub quantity: u32,
    /// Minor units.
    pub unit_price: Money,
}

impl LineRequest {
    fn into_line(self) -> ApiResult<LineItem> {
        let product = match (self.product_id, self.external_id) {
            (Some(id), None) => ProductRef::Catalog(id),
            (None, Some(id)) => ProductRef::External(id),
            _ => {
                return Err(ApiError::BadRequest(
                    "each line needs exactly one of productId or externalId".into(),
                ));
            }
        };
        Ok(LineItem {
            product,
            name: self.name,
            category: self.category,
            quantity: self.quantity,
            unit_price: self.unit_price,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub payment_id: String,
    pub payment_order_id: String,
    pub signature: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub lines: Vec<LineRequest>,
    pub shipping_address: String,
    pub coupon_code: Option<String>,
    /// Minor units of wallet balance to spend.
    pub wallet_amount: Option<Money>,
    pub payment: Option<PaymentRequest>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    pub reason: String,
    pub refund_method: Option<RefundMethod>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnRequest {
    pub reason: String,
    pub return_type: ReturnType,
    pub refund_method: Option<RefundMethod>,
}

// -- Response types --

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineView {
    pub product_id: Option<ProductId>,
    pub external_id: Option<String>,
    pub name: String,
    pub category: Option<String>,
    pub quantity: u32,
    pub unit_price: Money,
    pub line_total: Money,
}

impl From<&LineItem> for LineView {
    fn from(line: &LineItem) -> Self {
        let (product_id, external_id) = match &line.product {
            ProductRef::Catalog(id) => (Some(*id), None),
            ProductRef::External(id) => (None, Some(id.clone())),
        };
        Self {
            product_id,
            external_id,
            name: line.name.clone(),
            category: line.category.clone(),
            quantity: line.quantity,
            unit_price: line.unit_price,
            line_total: line.line_total(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TotalsView {
    pub subtotal: Money,
    pub discount: Money,
    pub sale_discount: Money,
    pub membership_discount: Money,
    pub tax: Money,
    pub shipping: Money,
    pub total_price: Money,
}

impl From<&OrderTotals> for TotalsView {
    fn from(t: &OrderTotals) -> Self {
        Self {
            subtotal: t.subtotal,
            discount: t.discount,
            sale_discount: t.sale_discount,
            membership_discount: t.membership_discount,
            tax: t.tax,
            shipping: t.shipping,
            total_price: t.total_price,
        }
    }
}

/// Full order as returned by single-order endpoints.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderView {
    pub id: AggregateId,
    pub order_code: String,
    pub invoice_number: Option<String>,
    pub user_id: Option<UserId>,
    pub customer: CustomerSnapshot,
    pub lines: Vec<LineView>,
    pub shipping_address: String,
    pub totals: TotalsView,
    pub coupon_code: Option<String>,
    pub stage: Stage,
    pub status_history: Vec<HistoryEntry>,
    pub payment_status: PaymentStatus,
    pub payment_method: PaymentMethod,
    pub payment_id: Option<String>,
    pub wallet_used: Money,
    pub return_status: ReturnStatus,
    pub return_type: Option<ReturnType>,
    pub return_reason: Option<String>,
    pub return_history: Vec<ReturnHistoryEntry>,
    pub refund_status: RefundStatus,
    pub refund_method: Option<RefundMethod>,
    pub refund_amount: Money,
    pub refund_due_at: Option<DateTime<Utc>>,
    pub replacement_order_id: Option<AggregateId>,
    pub replacement_from_id: Option<AggregateId>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl OrderView {
    pub fn new(id: AggregateId, order: &Order) -> Self {
        Self {
            id,
            order_code: order.order_code().to_string(),
            invoice_number: order.invoice_number().map(String::from),
            user_id: order.user_id(),
            customer: order.customer().clone(),
            lines: order.lines().iter().map(LineView::from).collect(),
            shipping_address: order.shipping_address().to_string(),
            totals: TotalsView::from(order.totals()),
            coupon_code: order.coupon_code().map(String::from),
            stage: order.stage(),
            status_history: order.status_history().to_vec(),
            payment_status: order.payment().status,
            payment_method: order.payment().method,
            payment_id: order.payment().payment_id.clone(),
            wallet_used: order.payment().wallet_used,
            return_status: order.return_status(),
            return_type: order.return_type(),
            return_reason: order.return_reason().map(String::from),
            return_history: order.return_history().to_vec(),
            refund_status: order.refund_status(),
            refund_method: order.refund_method(),
            refund_amount: order.refund_amount(),
            refund_due_at: order.refund_due_at(),
            replacement_order_id: order.replacement_order_id(),
            replacement_from_id: order.replacement_from_id(),
            created_at: order.created_at(),
            updated_at: order.updated_at(),
        }
    }
}

// -- Handlers --

/// POST /orders: price, reserve and place an order for the caller.
///
/// Answers 201 for a new order and 200 when the payment already backs one.
#[tracing::instrument(skip(state, req), fields(user_id = %caller.user_id))]
pub async fn create<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Json(req): Json<CreateOrderRequest>,
) -> ApiResult<(StatusCode, Json<OrderView>)> {
    let lines = req
        .lines
        .into_iter()
        .map(LineRequest::into_line)
        .collect::<ApiResult<Vec<_>>>()?;

    let mut cmd = CreateOrder::new(caller.user_id, lines, req.shipping_address);
    if let Some(code) = req.coupon_code {
        cmd = cmd.with_coupon(code);
    }
    if let Some(amount) = req.wallet_amount {
        cmd = cmd.with_wallet(amount);
    }
    if let Some(p) = req.payment {
        cmd = cmd.with_payment(PaymentFields {
            payment_id: p.payment_id,
            payment_order_id: p.payment_order_id,
            signature: p.signature,
        });
    }

    let requested_id = cmd.order_id;
    let outcome = state.checkout.create_order(cmd).await?;
    let order_id = outcome.order.id().unwrap_or(requested_id);
    state.dispatch(outcome.outbox);

    let status = if outcome.replayed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(OrderView::new(order_id, &outcome.order))))
}

/// GET /orders/mine: the caller's orders, newest first.
#[tracing::instrument(skip(state), fields(user_id = %caller.user_id))]
pub async fn mine<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Page<OrderSummary>>> {
    state.catch_up().await?;
    let page = state
        .order_summaries
        .for_customer(caller.user_id, query.request())
        .await;
    Ok(Json(page))
}

/// GET /orders/{id}: one order, owner or admin.
#[tracing::instrument(skip(state))]
pub async fn get<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Path(id): Path<String>,
) -> ApiResult<Json<OrderView>> {
    let order_id = parse_aggregate_id(&id)?;
    let order = load_visible_order(&state, &caller, order_id).await?;
    Ok(Json(OrderView::new(order_id, &order)))
}

/// POST /orders/{id}/cancel: the owner cancels before shipping.
#[tracing::instrument(skip(state, req))]
pub async fn cancel<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Path(id): Path<String>,
    Json(req): Json<CancelRequest>,
) -> ApiResult<Json<OrderView>> {
    let order_id = parse_aggregate_id(&id)?;
    let outcome = state
        .returns
        .cancel_order(CancelOrder {
            order_id,
            reason: req.reason,
            refund_method: req.refund_method,
            requested_by: caller.user_id,
            as_admin: false,
        })
        .await?;
    state.dispatch(outcome.outbox);
    Ok(Json(OrderView::new(order_id, &outcome.order)))
}

/// POST /orders/{id}/return: the owner asks to return a delivered order.
#[tracing::instrument(skip(state, req))]
pub async fn request_return<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Path(id): Path<String>,
    Json(req): Json<ReturnRequest>,
) -> ApiResult<Json<OrderView>> {
    let order_id = parse_aggregate_id(&id)?;
    let outcome = state
        .returns
        .request_return(RequestReturn {
            order_id,
            user_id: caller.user_id,
            reason: req.reason,
            return_type: req.return_type,
            refund_method: req.refund_method,
        })
        .await?;
    state.dispatch(outcome.outbox);
    Ok(Json(OrderView::new(order_id, &outcome.order)))
}

/// GET /orders/{id}/invoice: invoice figures, owner or admin.
#[tracing::instrument(skip(state))]
pub async fn invoice<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Path(id): Path<String>,
) -> ApiResult<Json<Invoice>> {
    let order_id = parse_aggregate_id(&id)?;
    let order = load_visible_order(&state, &caller, order_id).await?;
    let invoice = Invoice::for_order(&order, &state.config.currency)
        .ok_or_else(|| ApiError::NotFound(format!("No invoice for order {order_id}")))?;
    Ok(Json(invoice))
}

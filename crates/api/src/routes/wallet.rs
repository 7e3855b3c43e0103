//! The caller's wallet: balance, history and gateway top-ups.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use domain::{Money, PaymentFields, Wallet, WalletTransaction};
use event_store::EventStore;
use serde::{Deserialize, Serialize};

use crate::auth::Caller;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const DEFAULT_HISTORY: usize = 20;
const MAX_HISTORY: usize = 100;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopUpRequest {
    /// Minor units.
    pub amount: Money,
    pub payment_id: String,
    pub payment_order_id: String,
    pub signature: String,
}

#[derive(Debug, Serialize)]
pub struct WalletView {
    pub balance: Money,
    /// Newest first.
    pub transactions: Vec<WalletTransaction>,
}

impl WalletView {
    fn new(wallet: &Wallet, limit: usize) -> Self {
        Self {
            balance: wallet.balance(),
            transactions: wallet.recent_transactions(limit).cloned().collect(),
        }
    }
}

/// GET /wallet?limit=
#[tracing::instrument(skip(state), fields(user_id = %caller.user_id))]
pub async fn get<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<WalletView>> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY).clamp(1, MAX_HISTORY);
    let wallet = state.ledger.load(caller.user_id).await?;
    Ok(Json(WalletView::new(&wallet, limit)))
}

/// POST /wallet/top-up: credit a verified gateway payment. Replays are no-ops.
#[tracing::instrument(skip(state, req), fields(user_id = %caller.user_id))]
pub async fn top_up<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Json(req): Json<TopUpRequest>,
) -> ApiResult<Json<WalletView>> {
    if !req.amount.is_positive() {
        return Err(ApiError::BadRequest("amount must be positive".into()));
    }
    let payment = PaymentFields {
        payment_id: req.payment_id,
        payment_order_id: req.payment_order_id,
        signature: req.signature,
    };
    state.payments.verify(&payment)?;

    let wallet = state
        .ledger
        .top_up(caller.user_id, req.amount, &payment.payment_id)
        .await?;
    Ok(Json(WalletView::new(&wallet, DEFAULT_HISTORY)))
}

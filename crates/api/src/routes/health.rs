//! Liveness and read-model status.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use event_store::EventStore;
use projections::ReadModel;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct ReadModelStatus {
    pub name: &'static str,
    pub rows: usize,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub read_models: Vec<ReadModelStatus>,
}

/// GET /health: always "ok" while the process serves requests.
pub async fn check<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Json<HealthResponse> {
    let models: [&dyn ReadModel; 2] = [&state.order_summaries, &state.stock_levels];
    Json(HealthResponse {
        status: "ok",
        read_models: models
            .iter()
            .map(|m| ReadModelStatus {
                name: m.name(),
                rows: m.count(),
            })
            .collect(),
    })
}

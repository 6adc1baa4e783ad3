use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::error::AppResult;
use crate::AppState;

/// Read-only view of the slot table.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/free", get(free_slots))
}

#[derive(Debug, Serialize)]
pub struct FreeSlotsResponse {
    /// Zone the labels are written in.
    pub timezone: String,
    pub slots: Vec<String>,
}

/// Free slots that start in the future, in table order.
async fn free_slots(State(state): State<Arc<AppState>>) -> AppResult<Json<FreeSlotsResponse>> {
    let slots = state.store.scan_free_slots(Utc::now()).await?;
    Ok(Json(FreeSlotsResponse {
        timezone: state.store.timezone().name().to_string(),
        slots,
    }))
}

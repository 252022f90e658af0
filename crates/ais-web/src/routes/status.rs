//! `GET /api/status` - statistics snapshot.

use axum::{extract::State, response::Json, routing::get, Router};
use ais_core::HubStatistics;

use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/status", get(get_status))
}

async fn get_status(State(state): State<AppState>) -> Json<HubStatistics> {
    Json(state.stats.snapshot())
}

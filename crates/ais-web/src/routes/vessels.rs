//! Vessel query routes.
//!
//! # Endpoints
//!
//! ### `GET /api/vessels`
//! Every live vessel, without tracks, capped at `listLimit`.
//!
//! ### `GET /api/vessels/search?q=&page=&perPage=`
//! Case-insensitive substring search on MMSI, name and IMO. Pages are
//! 1-based; `perPage` defaults to 50 and is capped at 500.
//!
//! ### `GET /api/vessels/:id`
//! One vessel by internal id, including its track. Unknown or expired ids
//! are 404, malformed ids 400.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use ais_server::{PersistenceError, Projection, StoredVessel, VesselFilter};

use crate::AppState;

pub const DEFAULT_PER_PAGE: usize = 50;
pub const MAX_PER_PAGE: usize = 500;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/vessels", get(list_vessels))
        .route("/vessels/search", get(search_vessels))
        .route("/vessels/:id", get(get_vessel))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    pub q: Option<String>,
    pub page: Option<usize>,
    pub per_page: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchPage {
    pub items: Vec<StoredVessel>,
    pub page: usize,
    pub per_page: usize,
    pub total: usize,
}

fn unavailable(e: PersistenceError) -> StatusCode {
    error!(error = %e, "vessel query failed");
    StatusCode::SERVICE_UNAVAILABLE
}

async fn list_vessels(
    State(state): State<AppState>,
) -> Result<Json<Vec<StoredVessel>>, StatusCode> {
    let filter = VesselFilter::live(Utc::now(), state.settings.list_limit);
    let found = state
        .durable
        .find(&filter, Projection::Summary)
        .await
        .map_err(unavailable)?;
    Ok(Json(found.items))
}

async fn search_vessels(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchPage>, StatusCode> {
    let page = params.page.unwrap_or(1).max(1);
    let per_page = params
        .per_page
        .unwrap_or(DEFAULT_PER_PAGE)
        .clamp(1, MAX_PER_PAGE);
    let query = params
        .q
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty());

    let filter = VesselFilter {
        query,
        now: Utc::now(),
        skip: (page - 1).saturating_mul(per_page),
        limit: per_page,
    };
    let found = state
        .durable
        .find(&filter, Projection::Summary)
        .await
        .map_err(unavailable)?;

    Ok(Json(SearchPage {
        items: found.items,
        page,
        per_page,
        total: found.total,
    }))
}

async fn get_vessel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StoredVessel>, StatusCode> {
    let id = Uuid::parse_str(&id).map_err(|_| StatusCode::BAD_REQUEST)?;
    state
        .durable
        .find_by_id(id, Utc::now())
        .await
        .map_err(unavailable)?
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

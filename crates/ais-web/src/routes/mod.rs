//! HTTP route handlers for the AIS hub.

pub mod status;
pub mod vessels;

use crate::AppState;
use axum::{extract::State, response::Json, routing::get, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Create the main Axum router with all routes.
///
/// Routes are organized as:
/// - `/` - Discovery document
/// - `/api/vessels` - Vessel queries
/// - `/api/status` - Hub statistics
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(discovery_handler))
        .nest("/api", api_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(vessels::routes())
        .merge(status::routes())
}

/// Handler for `/` discovery endpoint.
async fn discovery_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "endpoints": {
            "vessels": "/api/vessels",
            "search": "/api/vessels/search",
            "vessel": "/api/vessels/{id}",
            "status": "/api/status",
            "stream": format!("ws://{}", state.info.ws_addr)
        },
        "server": {
            "id": state.info.name,
            "version": state.info.version
        }
    }))
}

//! # ais-web
//!
//! REST query surface for the AIS hub.
//!
//! This crate provides:
//! - Live vessel listing and search backed by the durable store
//! - Single-vessel lookup including the position track
//! - Hub statistics
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ais_web::{create_router, WebState};
//!
//! let state = Arc::new(WebState::new(durable, stats, settings.http, info));
//! let app = create_router(state);
//!
//! let listener = TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, app).await?;
//! ```

pub mod routes;

// Re-exports
pub use routes::create_router;

use ais_core::config::HttpSettings;
use ais_core::StatisticsCollector;
use ais_server::DurableStore;
use std::net::SocketAddr;
use std::sync::Arc;

/// Identity of the running hub, echoed by the discovery document.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    /// Where real-time clients connect.
    pub ws_addr: SocketAddr,
}

/// Shared state for all route handlers.
pub struct WebState {
    pub durable: Arc<dyn DurableStore>,
    pub stats: Arc<StatisticsCollector>,
    pub settings: HttpSettings,
    pub info: ServerInfo,
}

impl WebState {
    pub fn new(
        durable: Arc<dyn DurableStore>,
        stats: Arc<StatisticsCollector>,
        settings: HttpSettings,
        info: ServerInfo,
    ) -> Self {
        Self {
            durable,
            stats,
            settings,
            info,
        }
    }
}

/// Type alias for shared state in Axum handlers.
pub type AppState = Arc<WebState>;

//! HTTP API for the Slotbook service.
//!
//! This module provides the REST API endpoints for:
//! - Health monitoring
//! - Inbound chat messages from the transport adapter
//! - Runtime settings

use axum::{
    Json, Router,
    extract::State,
    routing::{get, post, put},
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::{I18nError, ServiceError};
use crate::service::SlotbookService;

pub mod messages;
pub mod settings;
use messages::post_message_handler;
use settings::{get_settings_handler, update_settings_handler};

/// Application state
pub struct AppState {
    pub service: Arc<SlotbookService>,
    pub start_time: Instant,
}

impl AppState {
    /// Render a service error in the configured default language
    pub fn i18n_error(&self, error: ServiceError) -> I18nError {
        let lang = self.service.runtime_config.dynamic().i18n.default_language;
        I18nError::new(error, self.service.i18n.clone(), lang)
    }
}

/// Build the API router
pub fn router(service: Arc<SlotbookService>) -> Router {
    let state = Arc::new(AppState {
        service,
        start_time: Instant::now(),
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Transport adapter posts every inbound text here
        .route("/messages", post(post_message_handler))
        // Settings endpoints
        .route("/settings", get(get_settings_handler))
        .route("/settings", put(update_settings_handler));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/api", api_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// === Health ===

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let (status, active_flows) = match state.service.db.count_all_states() {
        Ok(count) => ("healthy", Some(count)),
        Err(e) => {
            tracing::warn!(error = %e, "Health check could not reach the database");
            ("degraded", None)
        }
    };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        active_flows,
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: String,
    uptime_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    active_flows: Option<usize>,
}

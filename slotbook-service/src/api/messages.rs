//! Inbound message endpoint used by the chat transport adapter.

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::api::AppState;
use crate::error::{I18nError, ServiceError};

/// Request body for POST /api/messages
#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    /// Opaque external identity of the sender
    pub user_id: String,
    /// Display name supplied by the transport, used on first contact
    #[serde(default)]
    pub display_name: Option<String>,
    pub text: String,
}

/// Direct reply to the sender
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub reply: String,
}

/// POST /api/messages - handle one inbound text and return the reply
pub async fn post_message_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<MessageRequest>,
) -> Result<Json<MessageResponse>, I18nError> {
    if request.user_id.trim().is_empty() {
        return Err(state.i18n_error(ServiceError::invalid_input("error-missing-identity")));
    }

    debug!(identity = %request.user_id, "Inbound message");

    // SQLite access blocks; keep it off the async workers
    let service = state.service.clone();
    let reply = tokio::task::spawn_blocking(move || {
        service.handle_message(
            &request.user_id,
            request.display_name.as_deref(),
            &request.text,
        )
    })
    .await
    .map_err(|e| {
        state.i18n_error(ServiceError::Internal {
            message: format!("Message handler task failed: {}", e),
        })
    })?;

    Ok(Json(MessageResponse { reply }))
}

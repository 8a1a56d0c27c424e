use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

use crate::i18n::{I18n, Language, Localized};

/// Main service error type
///
/// The four business kinds carry the localized message that explains the
/// refusal to the user. Everything else is an infrastructure fault.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Referenced record does not exist, or an index is outside the current list
    #[error("Not found: {0}")]
    NotFound(Localized),

    /// The acting role may not perform this operation
    #[error("Not allowed: {0}")]
    NotAllowed(Localized),

    /// Text does not parse into the shape the current step expects
    #[error("Invalid input: {0}")]
    InvalidInput(Localized),

    /// Well-formed request refused by a business rule
    #[error("Policy violation: {0}")]
    PolicyViolation(Localized),

    #[error("Database error")]
    Database(#[from] DatabaseError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Database errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection failed")]
    Connection(#[source] rusqlite::Error),

    #[error("Query failed")]
    Query(#[source] rusqlite::Error),

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("Serialization failed")]
    Serialization(#[source] serde_json::Error),

    #[error("Database connection lock poisoned")]
    Poisoned,
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(e: rusqlite::Error) -> Self {
        DatabaseError::Query(e)
    }
}

/// API error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ServiceError {
    pub fn not_found(key: &'static str) -> Self {
        ServiceError::NotFound(Localized::new(key))
    }

    pub fn not_allowed(key: &'static str) -> Self {
        ServiceError::NotAllowed(Localized::new(key))
    }

    pub fn invalid_input(key: &'static str) -> Self {
        ServiceError::InvalidInput(Localized::new(key))
    }

    /// Whether this is one of the recoverable business refusals
    pub fn is_business(&self) -> bool {
        matches!(
            self,
            ServiceError::NotFound(_)
                | ServiceError::NotAllowed(_)
                | ServiceError::InvalidInput(_)
                | ServiceError::PolicyViolation(_)
        )
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::NotAllowed(_) => StatusCode::FORBIDDEN,
            ServiceError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ServiceError::PolicyViolation(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            ServiceError::NotFound(_) => "not_found",
            ServiceError::NotAllowed(_) => "not_allowed",
            ServiceError::InvalidInput(_) => "invalid_input",
            ServiceError::PolicyViolation(_) => "policy_violation",
            ServiceError::Database(_) => "database_error",
            ServiceError::Config { .. } => "config_error",
            ServiceError::Internal { .. } => "internal_error",
        }
    }

    /// Get a user-facing translated message
    pub fn user_message(&self, i18n: &I18n, lang: Language) -> String {
        match self {
            ServiceError::NotFound(msg)
            | ServiceError::NotAllowed(msg)
            | ServiceError::InvalidInput(msg)
            | ServiceError::PolicyViolation(msg) => msg.render(i18n, lang),
            // Storage and configuration faults only ever surface as the generic reply
            _ => i18n.get(lang, "error-internal", None),
        }
    }

    /// Status and body for an API reply; the message is the user-facing text
    pub fn error_response(&self, i18n: &I18n, lang: Language) -> (StatusCode, ErrorResponse) {
        let response = ErrorResponse {
            message: self.user_message(i18n, lang),
            code: Some(self.error_code().to_string()),
        };
        (self.status_code(), response)
    }

    pub fn into_response_with_i18n(self, i18n: &I18n, lang: Language) -> Response {
        let (status, response) = self.error_response(i18n, lang);
        (status, Json(response)).into_response()
    }
}

/// Service error paired with the catalog and language used to render it
pub struct I18nError {
    pub error: ServiceError,
    pub i18n: Arc<I18n>,
    pub lang: Language,
}

impl I18nError {
    pub fn new(error: ServiceError, i18n: Arc<I18n>, lang: Language) -> Self {
        Self { error, i18n, lang }
    }
}

impl IntoResponse for I18nError {
    fn into_response(self) -> Response {
        if !self.error.is_business() {
            tracing::error!(error = %format_error_chain(&self.error), "Request failed");
        }
        self.error.into_response_with_i18n(&self.i18n, self.lang)
    }
}

/// Result type alias for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Format an error together with its source chain for logging
pub fn format_error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_business_errors_render_localized() {
        let i18n = I18n::new();
        let err = ServiceError::NotFound(Localized::new("index-out-of-range").arg("max", 2));

        assert!(err.is_business());
        assert_eq!(
            err.user_message(&i18n, Language::En),
            "Invalid number. Please enter 1 ~ 2."
        );
    }

    #[test]
    fn test_api_response_uses_localized_text() {
        let i18n = I18n::new();
        let err = ServiceError::InvalidInput(Localized::new("error-unknown-setting").arg("key", "foo"));

        let (status, body) = err.error_response(&i18n, Language::En);
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.code.as_deref(), Some("invalid_input"));
        assert_eq!(
            body.message,
            Localized::new("error-unknown-setting")
                .arg("key", "foo")
                .render(&i18n, Language::En)
        );
        assert!(!body.message.contains("error-unknown-setting"));

        let (_, zh) = err.error_response(&i18n, Language::Zh);
        assert_ne!(zh.message, body.message);
    }

    #[test]
    fn test_api_response_hides_storage_details() {
        let i18n = I18n::new();
        let err = ServiceError::Database(DatabaseError::Poisoned);

        let (status, body) = err.error_response(&i18n, Language::En);
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.code.as_deref(), Some("database_error"));
        assert_eq!(body.message, i18n.get(Language::En, "error-internal", None));
    }

    #[test]
    fn test_storage_errors_render_generic_reply() {
        let i18n = I18n::new();
        let err = ServiceError::Database(DatabaseError::Poisoned);

        assert!(!err.is_business());
        assert_eq!(
            err.user_message(&i18n, Language::En),
            i18n.get(Language::En, "error-internal", None)
        );
    }

    #[test]
    fn test_error_chain_includes_sources() {
        let err = ServiceError::Database(DatabaseError::Query(
            rusqlite::Error::QueryReturnedNoRows,
        ));
        let chain = format_error_chain(&err);
        assert!(chain.starts_with("Database error: Query failed"));
    }
}

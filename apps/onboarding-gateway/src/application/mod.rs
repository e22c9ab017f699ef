use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use identity_core::{CoreError, domain::invitation::TokenError};
use serde_json::json;
use tracing::{debug, error, warn};

// Declare sub-modules within the application layer
pub mod authz;
pub mod commands;
pub mod middleware;
pub mod query;
pub mod tenant_context;

/// Error returned by every handler; renders `{success: false, error, message}`.
#[derive(thiserror::Error, Debug)]
#[error(transparent)]
pub struct ApiError(#[from] pub CoreError);

/// Status code and stable error code for a core error.
pub fn map_core_error(err: &CoreError) -> (StatusCode, &'static str) {
    match err {
        CoreError::Token(reason) => {
            let status = match reason {
                TokenError::NotFound => StatusCode::NOT_FOUND,
                TokenError::AlreadyUsed => StatusCode::CONFLICT,
                TokenError::Expired | TokenError::Inactive => StatusCode::GONE,
            };
            (status, reason.code())
        }
        CoreError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
        CoreError::DuplicateAccount => (StatusCode::CONFLICT, "duplicate_account"),
        CoreError::DuplicateSubdomain(_) => (StatusCode::CONFLICT, "duplicate_subdomain"),
        CoreError::NotActivated => (StatusCode::FORBIDDEN, "not_activated"),
        CoreError::InvalidCredentials => (StatusCode::UNAUTHORIZED, "invalid_credentials"),
        CoreError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
        CoreError::TenantNotFound(_) => (StatusCode::NOT_FOUND, "tenant_not_found"),
        CoreError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        CoreError::Infrastructure(_) | CoreError::Configuration(_) | CoreError::Internal(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = map_core_error(&self.0);
        let message = if status.is_server_error() {
            error!("CoreError occurred: {:?}", self.0);
            "internal error".to_string()
        } else {
            if matches!(status, StatusCode::FORBIDDEN | StatusCode::CONFLICT) {
                warn!(error = code, "Request rejected: {}", self.0);
            } else {
                debug!(error = code, "Request rejected: {}", self.0);
            }
            self.0.to_string()
        };
        (
            status,
            Json(json!({ "success": false, "error": code, "message": message })),
        )
            .into_response()
    }
}

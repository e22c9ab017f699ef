use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode, header},
    middleware::Next,
    response::Response,
};
use identity_core::domain::{invitation::hash_secret, role::Role};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::AppState;

/// Session context stored in the cache and attached to authenticated requests.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub account_id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub role: Role,
}

/// Cache key for a session token. Only the digest is used as key.
pub fn session_key(token: &str) -> String {
    format!("session:{}", hash_secret(token))
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Middleware to authenticate requests using a session token provided in the Authorization header.
pub async fn session_auth(
    State(app_state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(token) = bearer_token(req.headers()) else {
        warn!("Session authentication failed: missing or malformed Authorization header");
        return Err(StatusCode::UNAUTHORIZED);
    };

    match app_state.cache.get(&session_key(token)).await {
        Ok(Some(cached)) => match serde_json::from_slice::<AuthenticatedUser>(&cached) {
            Ok(user) => {
                debug!(account_id = %user.account_id, role = %user.role, "Session authenticated");
                req.extensions_mut().insert(user);
                Ok(next.run(req).await)
            }
            Err(e) => {
                warn!("Failed to deserialize cached session: {}", e);
                Err(StatusCode::UNAUTHORIZED)
            }
        },
        Ok(None) => {
            debug!("Session token not found or expired");
            Err(StatusCode::UNAUTHORIZED)
        }
        Err(e) => {
            warn!("Cache error during session lookup: {}", e);
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

use axum::{extract::FromRequestParts, http::request::Parts};
use http::{HeaderMap, header};
use std::convert::Infallible;

use crate::AppState;

pub const TENANT_HEADER: &str = "x-tenant-subdomain";

/// Tenant subdomain the request was addressed to, if any.
///
/// Taken from `X-Tenant-Subdomain` when present, otherwise from a `Host`
/// of the form `<subdomain>.<base domain>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantHost(pub Option<String>);

impl FromRequestParts<AppState> for TenantHost {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(TenantHost(resolve_subdomain(
            &parts.headers,
            &state.config.base_domain,
        )))
    }
}

pub fn resolve_subdomain(headers: &HeaderMap, base_domain: &str) -> Option<String> {
    if let Some(explicit) = headers
        .get(TENANT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
    {
        return Some(explicit);
    }

    let host = headers.get(header::HOST)?.to_str().ok()?.trim().to_lowercase();
    let host = match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name.to_string(),
        _ => host,
    };
    let label = host.strip_suffix(base_domain)?.strip_suffix('.')?;
    if label.is_empty() || label.contains('.') {
        None
    } else {
        Some(label.to_string())
    }
}

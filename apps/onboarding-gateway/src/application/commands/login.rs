use crate::{
    AppState,
    application::{
        ApiError,
        middleware::{AuthenticatedUser, bearer_token, session_key},
        tenant_context::TenantHost,
    },
};
use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use identity_core::{
    AccountRepository, Cache, CoreError, CredentialStore, TenantRepository,
    domain::{
        account::{AccountProfile, LoginIdentifier, login_candidates, synthetic_email},
        tenant::Tenant,
    },
};
use rand::{Rng, distr::Alphanumeric};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

const SESSION_TOKEN_LEN: usize = 48;

/// Resolves login identifiers to identities and opens sessions.
pub struct IdentityResolver {
    tenants: Arc<dyn TenantRepository>,
    accounts: Arc<dyn AccountRepository>,
    credentials: Arc<dyn CredentialStore>,
    cache: Arc<dyn Cache>,
    placeholder_email_domain: String,
    session_ttl_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub account: AccountProfile,
    pub expires_in: u64,
}

impl IdentityResolver {
    pub fn new(
        tenants: Arc<dyn TenantRepository>,
        accounts: Arc<dyn AccountRepository>,
        credentials: Arc<dyn CredentialStore>,
        cache: Arc<dyn Cache>,
        placeholder_email_domain: String,
        session_ttl_seconds: u64,
    ) -> Self {
        Self {
            tenants,
            accounts,
            credentials,
            cache,
            placeholder_email_domain,
            session_ttl_seconds,
        }
    }

    pub fn from_state(state: &AppState) -> Self {
        Self::new(
            state.tenants.clone(),
            state.accounts.clone(),
            state.credentials.clone(),
            state.cache.clone(),
            state.config.placeholder_email_domain.clone(),
            state.config.session_ttl_seconds,
        )
    }

    /// Finds the identity for `identifier` and checks `password` against it.
    ///
    /// Emails are authenticated directly. Enrollment ids need a tenant and
    /// try the profile's email on file first, then the synthetic login email.
    pub async fn authenticate(
        &self,
        tenant: Option<&Tenant>,
        identifier: &str,
        password: &str,
    ) -> Result<Uuid, CoreError> {
        match LoginIdentifier::parse(identifier) {
            LoginIdentifier::Email(email) => self.credentials.authenticate(&email, password).await,
            LoginIdentifier::EnrollmentId(enrollment_id) => {
                let tenant = tenant.ok_or(CoreError::InvalidCredentials)?;
                if enrollment_id.is_empty() {
                    return Err(CoreError::InvalidCredentials);
                }
                let profile = self
                    .accounts
                    .find_by_enrollment_id(tenant.id, &enrollment_id)
                    .await?;
                if profile.as_ref().is_some_and(|p| !p.is_activated()) {
                    return Err(CoreError::NotActivated);
                }

                let synthetic = synthetic_email(
                    &enrollment_id,
                    &tenant.subdomain,
                    &self.placeholder_email_domain,
                );
                let candidates =
                    login_candidates(profile.as_ref().map(|p| p.email.as_str()), &synthetic);
                for candidate in &candidates {
                    match self.credentials.authenticate(candidate, password).await {
                        Ok(identity_id) => return Ok(identity_id),
                        Err(CoreError::InvalidCredentials) => {
                            debug!(tenant_id = %tenant.id, "Login candidate rejected, trying next");
                        }
                        Err(e) => return Err(e),
                    }
                }
                Err(CoreError::InvalidCredentials)
            }
        }
    }

    pub async fn login(
        &self,
        tenant_subdomain: Option<&str>,
        identifier: &str,
        password: &str,
    ) -> Result<Session, CoreError> {
        let tenant = match tenant_subdomain {
            Some(subdomain) => Some(self.tenants.get_by_subdomain(subdomain).await?),
            None => None,
        };

        let identity_id = self
            .authenticate(tenant.as_ref(), identifier, password)
            .await?;
        let account = self
            .accounts
            .find_by_identity(identity_id)
            .await?
            .ok_or(CoreError::InvalidCredentials)?;

        if let Some(tenant) = &tenant {
            if account.tenant_id != Some(tenant.id) {
                return Err(CoreError::InvalidCredentials);
            }
        }
        if let Some(tenant_id) = account.tenant_id {
            let home = match tenant {
                Some(t) => t,
                None => self.tenants.get_by_id(tenant_id).await?,
            };
            if !home.active {
                return Err(CoreError::Forbidden(format!(
                    "tenant {} is inactive",
                    home.subdomain
                )));
            }
        }

        let token = new_session_token();
        let context = AuthenticatedUser {
            account_id: account.id,
            tenant_id: account.tenant_id,
            role: account.role,
        };
        let payload = serde_json::to_vec(&context)
            .map_err(|e| CoreError::Internal(format!("failed to encode session: {}", e)))?;
        self.cache
            .set(&session_key(&token), &payload, Some(self.session_ttl_seconds))
            .await?;

        info!(account_id = %account.id, role = %account.role, "Session opened");
        Ok(Session {
            token,
            account,
            expires_in: self.session_ttl_seconds,
        })
    }

    pub async fn logout(&self, token: &str) -> Result<(), CoreError> {
        self.cache.delete(&session_key(token)).await
    }
}

fn new_session_token() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(SESSION_TOKEN_LEN)
        .map(char::from)
        .collect()
}

#[derive(Deserialize)]
pub struct LoginRequest {
    identifier: String,
    password: String,
}

pub async fn handle_login_request(
    State(state): State<AppState>,
    TenantHost(tenant): TenantHost,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if payload.identifier.trim().is_empty() || payload.password.is_empty() {
        return Err(CoreError::Validation("identifier and password are required".into()).into());
    }

    let resolver = IdentityResolver::from_state(&state);
    let session = resolver
        .login(tenant.as_deref(), &payload.identifier, &payload.password)
        .await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "sessionToken": session.token,
            "expiresIn": session.expires_in,
            "accountId": session.account.id,
            "tenantId": session.account.tenant_id,
            "role": session.account.role,
        })),
    ))
}

pub async fn handle_logout_request(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    match bearer_token(&headers) {
        Some(token) => IdentityResolver::from_state(&state).logout(token).await?,
        None => warn!("Logout without a bearer token"),
    }
    Ok(StatusCode::NO_CONTENT)
}

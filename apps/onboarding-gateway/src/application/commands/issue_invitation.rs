use crate::{
    AppState,
    application::{
        ApiError,
        authz::{Requirement, actor_tenant, authorize, load_actor},
        middleware::AuthenticatedUser,
    },
};
use axum::{
    Json,
    extract::{Extension, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Duration, Utc};
use identity_core::{
    AccountRepository, CoreError, InvitationRepository, TenantRepository,
    domain::{
        invitation::{InvitationSecret, InvitationToken, MAX_INVITE_TTL_HOURS},
        role::{Capability, Role},
        tenant::Tenant,
    },
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Issues, revokes and deletes member invitations.
pub struct TokenIssuer {
    tenants: Arc<dyn TenantRepository>,
    invitations: Arc<dyn InvitationRepository>,
    accounts: Arc<dyn AccountRepository>,
}

#[derive(Debug, Clone)]
pub struct IssuedInvitation {
    pub token: InvitationToken,
    pub secret: InvitationSecret,
    pub tenant: Tenant,
}

pub fn invite_url(subdomain: &str, base_domain: &str, secret: &InvitationSecret) -> String {
    format!(
        "https://{}.{}/invite#token={}",
        subdomain,
        base_domain,
        secret.expose()
    )
}

impl TokenIssuer {
    pub fn new(
        tenants: Arc<dyn TenantRepository>,
        invitations: Arc<dyn InvitationRepository>,
        accounts: Arc<dyn AccountRepository>,
    ) -> Self {
        Self {
            tenants,
            invitations,
            accounts,
        }
    }

    pub async fn issue(
        &self,
        tenant_id: Uuid,
        target_role: Role,
        issuer_account_id: Uuid,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<IssuedInvitation, CoreError> {
        if ttl <= Duration::zero() || ttl > Duration::hours(MAX_INVITE_TTL_HOURS) {
            return Err(CoreError::Validation(format!(
                "invitation lifetime must be between 1 hour and {} hours",
                MAX_INVITE_TTL_HOURS
            )));
        }

        let issuer = load_actor(self.accounts.as_ref(), issuer_account_id).await?;
        authorize(&issuer, Requirement::TenantMember { tenant_id })?;
        authorize(&issuer, Requirement::Invite { target_role })?;

        let tenant = self.tenants.get_by_id(tenant_id).await?;
        if !tenant.active {
            return Err(CoreError::Forbidden(format!(
                "tenant {} is inactive",
                tenant.subdomain
            )));
        }

        let (token, secret) = InvitationToken::member(tenant_id, target_role, issuer.id, ttl, now);
        self.invitations.insert(token.clone()).await?;

        info!(
            token_id = %token.id,
            tenant_id = %tenant_id,
            role = %target_role,
            issued_by = %issuer.id,
            "Invitation issued"
        );
        Ok(IssuedInvitation {
            token,
            secret,
            tenant,
        })
    }

    /// Loads a token the issuer may manage. Tokens of other tenants are
    /// reported as missing.
    async fn managed_token(
        &self,
        token_id: Uuid,
        issuer_account_id: Uuid,
    ) -> Result<InvitationToken, CoreError> {
        let issuer = load_actor(self.accounts.as_ref(), issuer_account_id).await?;
        authorize(
            &issuer,
            Requirement::Capability(Capability::ManageInvitations),
        )?;
        let tenant_id = actor_tenant(&issuer)?;
        self.invitations
            .find_by_id(token_id)
            .await?
            .filter(|t| t.tenant_id == tenant_id)
            .ok_or_else(|| CoreError::NotFound(format!("invitation {}", token_id)))
    }

    pub async fn revoke(&self, token_id: Uuid, issuer_account_id: Uuid) -> Result<(), CoreError> {
        let token = self.managed_token(token_id, issuer_account_id).await?;
        self.invitations.deactivate(token.id).await?;
        info!(token_id = %token.id, "Invitation revoked");
        Ok(())
    }

    pub async fn delete(&self, token_id: Uuid, issuer_account_id: Uuid) -> Result<(), CoreError> {
        let token = self.managed_token(token_id, issuer_account_id).await?;
        if token.consumed_by.is_some() || !self.invitations.delete_unused(token.id).await? {
            return Err(CoreError::Validation(
                "used invitations cannot be deleted".into(),
            ));
        }
        info!(token_id = %token.id, "Invitation deleted");
        Ok(())
    }
}

// --- Axum Route Handlers ---

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct IssueInvitationDto {
    target_role: Role,
    expires_in_hours: Option<i64>,
}

pub async fn handle_issue_invitation_request(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(payload): Json<IssueInvitationDto>,
) -> Result<impl IntoResponse, ApiError> {
    let tenant_id = user
        .tenant_id
        .ok_or_else(|| CoreError::Forbidden("invitations belong to a tenant".into()))?;
    let hours = payload
        .expires_in_hours
        .unwrap_or(state.config.invite_ttl_hours);
    let ttl = Duration::try_hours(hours)
        .ok_or_else(|| CoreError::Validation("expiresInHours is out of range".into()))?;

    let issuer = TokenIssuer::new(
        state.tenants.clone(),
        state.invitations.clone(),
        state.accounts.clone(),
    );
    let issued = issuer
        .issue(
            tenant_id,
            payload.target_role,
            user.account_id,
            ttl,
            Utc::now(),
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "id": issued.token.id,
            "targetRole": issued.token.target_role,
            "expiresAt": issued.token.expires_at,
            "token": issued.secret.expose(),
            "inviteUrl": invite_url(&issued.tenant.subdomain, &state.config.base_domain, &issued.secret),
        })),
    ))
}

pub async fn handle_revoke_invitation_request(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(token_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    TokenIssuer::new(
        state.tenants.clone(),
        state.invitations.clone(),
        state.accounts.clone(),
    )
    .revoke(token_id, user.account_id)
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn handle_delete_invitation_request(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(token_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    TokenIssuer::new(
        state.tenants.clone(),
        state.invitations.clone(),
        state.accounts.clone(),
    )
    .delete(token_id, user.account_id)
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

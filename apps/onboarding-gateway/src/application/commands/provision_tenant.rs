use crate::{
    AppState,
    application::{
        ApiError,
        authz::{Requirement, authorize, load_actor},
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
        account::{AccountProfile, parse_email},
        invitation::{InvitationSecret, InvitationToken, MAX_BOOTSTRAP_TTL_HOURS},
        role::{Capability, Role},
        tenant::Tenant,
    },
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Creates tenants together with their first administrator invitation.
pub struct TenantProvisioner {
    tenants: Arc<dyn TenantRepository>,
    invitations: Arc<dyn InvitationRepository>,
    accounts: Arc<dyn AccountRepository>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionTenant {
    #[serde(alias = "tenantName")]
    pub name: String,
    pub subdomain: String,
    pub plan: String,
    pub base_domain: Option<String>,
    pub invite_email: Option<String>,
    pub invite_expires_hours: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct ProvisionedTenant {
    pub tenant: Tenant,
    pub onboarding_url: String,
    pub invite_secret: InvitationSecret,
    pub expires_at: DateTime<Utc>,
}

/// Link handed to the tenant's first administrator. The secret travels in
/// the fragment, which browsers do not send to servers.
pub fn onboarding_url(subdomain: &str, base_domain: &str, secret: &InvitationSecret) -> String {
    format!(
        "https://{}.{}/onboarding#token={}",
        subdomain,
        base_domain,
        secret.expose()
    )
}

fn bootstrap_ttl(hours: i64) -> Result<Duration, CoreError> {
    if !(1..=MAX_BOOTSTRAP_TTL_HOURS).contains(&hours) {
        return Err(CoreError::Validation(format!(
            "inviteExpiresHours must be between 1 and {}",
            MAX_BOOTSTRAP_TTL_HOURS
        )));
    }
    Ok(Duration::hours(hours))
}

fn recipient(invite_email: Option<&str>) -> Result<Option<String>, CoreError> {
    match invite_email.map(str::trim).filter(|e| !e.is_empty()) {
        Some(raw) => Ok(Some(parse_email(raw)?)),
        None => Ok(None),
    }
}

impl TenantProvisioner {
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

    pub async fn provision(
        &self,
        actor: &AccountProfile,
        command: ProvisionTenant,
        base_domain: &str,
        default_ttl_hours: i64,
        now: DateTime<Utc>,
    ) -> Result<ProvisionedTenant, CoreError> {
        authorize(actor, Requirement::Capability(Capability::ManageTenants))?;

        let tenant = Tenant::new(&command.name, &command.subdomain, &command.plan, now)?;
        let ttl = bootstrap_ttl(command.invite_expires_hours.unwrap_or(default_ttl_hours))?;
        let recipient_email = recipient(command.invite_email.as_deref())?;
        let base_domain = command
            .base_domain
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .unwrap_or(base_domain)
            .to_lowercase();

        let (invitation, secret) = InvitationToken::bootstrap(tenant.id, recipient_email, ttl, now);
        let expires_at = invitation.expires_at;
        let tenant = self.tenants.create_with_bootstrap(tenant, invitation).await?;

        info!(
            tenant_id = %tenant.id,
            subdomain = %tenant.subdomain,
            operator_id = %actor.id,
            "Tenant provisioned"
        );
        Ok(ProvisionedTenant {
            onboarding_url: onboarding_url(&tenant.subdomain, &base_domain, &secret),
            tenant,
            invite_secret: secret,
            expires_at,
        })
    }

    /// Replaces the bootstrap invitation of a tenant that has not been
    /// claimed yet. Every earlier bootstrap invitation stops working.
    pub async fn reissue_bootstrap(
        &self,
        actor: &AccountProfile,
        tenant_id: Uuid,
        invite_email: Option<&str>,
        ttl_hours: i64,
        base_domain: &str,
        now: DateTime<Utc>,
    ) -> Result<ProvisionedTenant, CoreError> {
        authorize(actor, Requirement::Capability(Capability::ManageTenants))?;

        let tenant = self.tenants.get_by_id(tenant_id).await?;
        // Early refusal only; replace_bootstrap repeats the check atomically.
        let claimed = self
            .accounts
            .list_by_tenant(tenant.id)
            .await?
            .iter()
            .any(|a| a.role == Role::Administrator && a.is_activated());
        if claimed {
            return Err(CoreError::Validation(
                "tenant already has an administrator".into(),
            ));
        }

        let ttl = bootstrap_ttl(ttl_hours)?;
        let (invitation, secret) =
            InvitationToken::bootstrap(tenant.id, recipient(invite_email)?, ttl, now);
        let expires_at = invitation.expires_at;
        self.invitations.replace_bootstrap(invitation).await?;

        info!(tenant_id = %tenant.id, operator_id = %actor.id, "Bootstrap invitation reissued");
        Ok(ProvisionedTenant {
            onboarding_url: onboarding_url(&tenant.subdomain, base_domain, &secret),
            tenant,
            invite_secret: secret,
            expires_at,
        })
    }

    pub async fn set_active(
        &self,
        actor: &AccountProfile,
        tenant_id: Uuid,
        active: bool,
    ) -> Result<Tenant, CoreError> {
        authorize(actor, Requirement::Capability(Capability::ManageTenants))?;
        let tenant = self.tenants.set_active(tenant_id, active).await?;
        info!(tenant_id = %tenant.id, active, "Tenant activation changed");
        Ok(tenant)
    }
}

fn provisioned_body(provisioned: &ProvisionedTenant) -> serde_json::Value {
    json!({
        "success": true,
        "tenantId": provisioned.tenant.id,
        "tenantName": provisioned.tenant.name,
        "subdomain": provisioned.tenant.subdomain,
        "onboardingUrl": provisioned.onboarding_url,
        "inviteToken": provisioned.invite_secret.expose(),
        "expiresAt": provisioned.expires_at,
    })
}

// --- Axum Route Handlers ---

pub async fn handle_provision_tenant_request(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(payload): Json<ProvisionTenant>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = load_actor(state.accounts.as_ref(), user.account_id).await?;
    let provisioner = TenantProvisioner::new(
        state.tenants.clone(),
        state.invitations.clone(),
        state.accounts.clone(),
    );
    let provisioned = provisioner
        .provision(
            &actor,
            payload,
            &state.config.base_domain,
            state.config.bootstrap_ttl_hours,
            Utc::now(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(provisioned_body(&provisioned))))
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ReissueBootstrapDto {
    invite_email: Option<String>,
    invite_expires_hours: Option<i64>,
}

pub async fn handle_reissue_bootstrap_request(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(tenant_id): Path<Uuid>,
    payload: Option<Json<ReissueBootstrapDto>>,
) -> Result<impl IntoResponse, ApiError> {
    let payload = payload.map(|Json(p)| p).unwrap_or_default();
    let actor = load_actor(state.accounts.as_ref(), user.account_id).await?;
    let provisioner = TenantProvisioner::new(
        state.tenants.clone(),
        state.invitations.clone(),
        state.accounts.clone(),
    );
    let provisioned = provisioner
        .reissue_bootstrap(
            &actor,
            tenant_id,
            payload.invite_email.as_deref(),
            payload
                .invite_expires_hours
                .unwrap_or(state.config.bootstrap_ttl_hours),
            &state.config.base_domain,
            Utc::now(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(provisioned_body(&provisioned))))
}

#[derive(Deserialize, Debug)]
pub struct SetActiveDto {
    active: bool,
}

pub async fn handle_set_tenant_active_request(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(tenant_id): Path<Uuid>,
    Json(payload): Json<SetActiveDto>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = load_actor(state.accounts.as_ref(), user.account_id).await?;
    let provisioner = TenantProvisioner::new(
        state.tenants.clone(),
        state.invitations.clone(),
        state.accounts.clone(),
    );
    let tenant = provisioner
        .set_active(&actor, tenant_id, payload.active)
        .await?;
    Ok((
        StatusCode::OK,
        Json(json!({ "success": true, "tenant": tenant })),
    ))
}

use axum::{
    Json,
    extract::{Extension, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use identity_core::domain::{
    account::AccountProfile,
    invitation::{InvitationKind, InvitationToken, TokenStatus},
    role::{Capability, Role},
    tenant::Tenant,
};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use super::ApiError;
use super::authz::{Requirement, actor_tenant, authorize, load_actor};
use super::middleware::AuthenticatedUser;
use crate::AppState;

const SYSTEM_ISSUER: &str = "system";

/// Public view of a tenant, enough to brand a login page.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantCard {
    pub id: Uuid,
    pub name: String,
    pub subdomain: String,
    pub active: bool,
}

impl From<&Tenant> for TenantCard {
    fn from(tenant: &Tenant) -> Self {
        Self {
            id: tenant.id,
            name: tenant.name.clone(),
            subdomain: tenant.subdomain.clone(),
            active: tenant.active,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvitationSummary {
    pub id: Uuid,
    pub target_role: Role,
    pub kind: InvitationKind,
    pub issued_by_name: String,
    pub issued_by_role: Option<Role>,
    pub status: TokenStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

pub fn summarize(
    token: &InvitationToken,
    issuer: Option<&AccountProfile>,
    now: DateTime<Utc>,
) -> InvitationSummary {
    let (issued_by_name, issued_by_role) = match (token.kind, issuer) {
        (InvitationKind::TenantBootstrap, _) => (SYSTEM_ISSUER.to_string(), None),
        (InvitationKind::Member, Some(p)) => (p.name.clone(), Some(p.role)),
        // issuer account was deleted since
        (InvitationKind::Member, None) => (String::new(), None),
    };
    InvitationSummary {
        id: token.id,
        target_role: token.target_role,
        kind: token.kind,
        issued_by_name,
        issued_by_role,
        status: token.status(now),
        created_at: token.created_at,
        expires_at: token.expires_at,
    }
}

pub async fn handle_get_tenant(
    State(state): State<AppState>,
    Path(subdomain): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let tenant = state.tenants.get_by_subdomain(&subdomain).await?;
    Ok((
        StatusCode::OK,
        Json(json!({ "success": true, "tenant": TenantCard::from(&tenant) })),
    ))
}

pub async fn handle_me(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<impl IntoResponse, ApiError> {
    let account = load_actor(state.accounts.as_ref(), user.account_id).await?;
    let tenant = match account.tenant_id {
        Some(id) => Some(TenantCard::from(&state.tenants.get_by_id(id).await?)),
        None => None,
    };
    let capabilities: Vec<Capability> = account.role.capabilities();
    debug!(account_id = %account.id, "Serving session profile");
    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "account": account,
            "tenant": tenant,
            "capabilities": capabilities,
        })),
    ))
}

pub async fn handle_list_invitations(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = load_actor(state.accounts.as_ref(), user.account_id).await?;
    authorize(&actor, Requirement::Capability(Capability::ManageInvitations))?;
    let tenant_id = actor_tenant(&actor)?;

    let tokens = state.invitations.list_for_tenant(tenant_id).await?;
    let mut issuers: HashMap<Uuid, Option<AccountProfile>> = HashMap::new();
    for issuer_id in tokens.iter().filter_map(|t| t.issued_by) {
        if !issuers.contains_key(&issuer_id) {
            let profile = state.accounts.find_by_id(issuer_id).await?;
            issuers.insert(issuer_id, profile);
        }
    }

    let now = Utc::now();
    let summaries: Vec<InvitationSummary> = tokens
        .iter()
        .map(|t| {
            let issuer = t
                .issued_by
                .and_then(|id| issuers.get(&id))
                .and_then(Option::as_ref);
            summarize(t, issuer, now)
        })
        .collect();

    Ok((
        StatusCode::OK,
        Json(json!({ "success": true, "invitations": summaries })),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_bootstrap_is_issued_by_system() {
        let now = Utc::now();
        let (token, _) = InvitationToken::bootstrap(Uuid::new_v4(), None, Duration::hours(72), now);
        let summary = summarize(&token, None, now);
        assert_eq!(summary.issued_by_name, "system");
        assert_eq!(summary.issued_by_role, None);
        assert_eq!(summary.status, TokenStatus::Active);
    }

    #[test]
    fn test_member_summary_names_issuer() {
        let now = Utc::now();
        let issuer = AccountProfile {
            id: Uuid::new_v4(),
            tenant_id: Some(Uuid::new_v4()),
            name: "Directora".into(),
            email: "dir@escola.pt".into(),
            enrollment_id: None,
            auth_identity_id: Some(Uuid::new_v4()),
            role: Role::Administrator,
        };
        let (mut token, _) = InvitationToken::member(
            issuer.tenant_id.unwrap(),
            Role::Teacher,
            issuer.id,
            Duration::hours(1),
            now,
        );
        token.active = false;

        let summary = summarize(&token, Some(&issuer), now + Duration::hours(2));

        assert_eq!(summary.issued_by_name, "Directora");
        assert_eq!(summary.issued_by_role, Some(Role::Administrator));
        // inactive is reported before expired
        assert_eq!(summary.status, TokenStatus::Inactive);
    }
}

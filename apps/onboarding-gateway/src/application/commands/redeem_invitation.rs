use crate::{
    AppState,
    application::{ApiError, commands::login::IdentityResolver},
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::{DateTime, Utc};
use identity_core::{
    CoreError, InvitationRepository, TenantRepository,
    domain::{
        account::{
            AccountDetails, NewAccount, NewCredential, Redemption, RegistrationForm,
            synthetic_email,
        },
        invitation::{InvitationKind, InvitationSecret, TokenContext, TokenError},
        role::Role,
    },
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub struct TokenRedeemer {
    tenants: Arc<dyn TenantRepository>,
    invitations: Arc<dyn InvitationRepository>,
    placeholder_email_domain: String,
}

/// Outcome of a successful redemption, with the credentials the client
/// signs in with.
#[derive(Clone)]
pub struct RedemptionResult {
    pub account_id: Uuid,
    pub tenant_id: Uuid,
    pub role: Role,
    pub auth_email: String,
    pub auth_password: String,
    pub activated_existing: bool,
}

impl TokenRedeemer {
    pub fn new(
        tenants: Arc<dyn TenantRepository>,
        invitations: Arc<dyn InvitationRepository>,
        placeholder_email_domain: String,
    ) -> Self {
        Self {
            tenants,
            invitations,
            placeholder_email_domain,
        }
    }

    /// Read-only check of a presented secret.
    pub async fn validate(
        &self,
        secret: &InvitationSecret,
        now: DateTime<Utc>,
    ) -> Result<TokenContext, CoreError> {
        if secret.expose().is_empty() {
            return Err(TokenError::NotFound.into());
        }
        let token = self
            .invitations
            .find_by_secret_hash(&secret.hash())
            .await?
            .ok_or(TokenError::NotFound)?;
        token.check_usable(now)?;

        let tenant = self.tenants.get_by_id(token.tenant_id).await?;
        if !tenant.active {
            return Err(TokenError::Inactive.into());
        }

        Ok(TokenContext {
            token_id: token.id,
            tenant_id: tenant.id,
            tenant_name: tenant.name,
            tenant_subdomain: tenant.subdomain,
            target_role: token.target_role,
            kind: token.kind,
            expires_at: token.expires_at,
            recipient_email: token.recipient_email,
        })
    }

    /// Validates the form, then consumes the invitation and enrolls the
    /// account in one store operation.
    pub async fn redeem(
        &self,
        secret: &InvitationSecret,
        form: &RegistrationForm,
        kind: InvitationKind,
        now: DateTime<Utc>,
    ) -> Result<RedemptionResult, CoreError> {
        let details = AccountDetails::from_form(form)?;

        let context = self.validate(secret, now).await?;
        if context.kind != kind {
            return Err(TokenError::NotFound.into());
        }
        details.ensure_fits(context.target_role)?;

        let (account, auth_password) = match details {
            AccountDetails::SelfEnrolled {
                name,
                enrollment_id,
            } => {
                let login_email = synthetic_email(
                    &enrollment_id,
                    &context.tenant_subdomain,
                    &self.placeholder_email_domain,
                );
                let account = NewAccount {
                    tenant_id: Some(context.tenant_id),
                    role: context.target_role,
                    name,
                    email: login_email.clone(),
                    enrollment_id: Some(enrollment_id.clone()),
                    credential: Some(NewCredential {
                        login_email,
                        password: enrollment_id.clone(),
                    }),
                };
                (account, enrollment_id)
            }
            AccountDetails::Credentialed {
                name,
                email,
                password,
            } => {
                if let Some(recipient) = &context.recipient_email {
                    if *recipient != email {
                        return Err(CoreError::Validation(
                            "this invitation was sent to a different email address".into(),
                        ));
                    }
                }
                let account = NewAccount {
                    tenant_id: Some(context.tenant_id),
                    role: context.target_role,
                    name,
                    email: email.clone(),
                    enrollment_id: None,
                    credential: Some(NewCredential {
                        login_email: email,
                        password: password.clone(),
                    }),
                };
                (account, password)
            }
        };

        let auth_email = account
            .credential
            .as_ref()
            .map(|c| c.login_email.clone())
            .unwrap_or_default();

        let redeemed = self
            .invitations
            .redeem(Redemption {
                secret_hash: secret.hash(),
                kind,
                now,
                account,
            })
            .await?;

        info!(
            token_id = %redeemed.token_id,
            account_id = %redeemed.account.id,
            tenant_id = %context.tenant_id,
            role = %context.target_role,
            activated_existing = redeemed.activated_existing,
            "Invitation redeemed"
        );

        Ok(RedemptionResult {
            account_id: redeemed.account.id,
            tenant_id: context.tenant_id,
            role: redeemed.account.role,
            auth_email,
            auth_password,
            activated_existing: redeemed.activated_existing,
        })
    }
}

// --- Axum Route Handlers ---

#[derive(Deserialize)]
pub struct ContextRequest {
    token: String,
}

#[derive(Serialize)]
struct ContextResponse {
    success: bool,
    #[serde(flatten)]
    context: TokenContext,
}

pub async fn handle_invitation_context(
    State(state): State<AppState>,
    Json(payload): Json<ContextRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let redeemer = TokenRedeemer::new(
        state.tenants.clone(),
        state.invitations.clone(),
        state.config.placeholder_email_domain.clone(),
    );
    let context = redeemer
        .validate(&InvitationSecret::from_presented(&payload.token), Utc::now())
        .await?;
    Ok((
        StatusCode::OK,
        Json(ContextResponse {
            success: true,
            context,
        }),
    ))
}

#[derive(Deserialize)]
pub struct RedeemRequest {
    token: String,
    #[serde(flatten)]
    form: RegistrationForm,
}

pub async fn handle_redeem_invitation(
    State(state): State<AppState>,
    Json(payload): Json<RedeemRequest>,
) -> Result<impl IntoResponse, ApiError> {
    redeem_and_sign_in(&state, payload, InvitationKind::Member).await
}

pub async fn handle_redeem_bootstrap(
    State(state): State<AppState>,
    Json(payload): Json<RedeemRequest>,
) -> Result<impl IntoResponse, ApiError> {
    redeem_and_sign_in(&state, payload, InvitationKind::TenantBootstrap).await
}

async fn redeem_and_sign_in(
    state: &AppState,
    payload: RedeemRequest,
    kind: InvitationKind,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let redeemer = TokenRedeemer::new(
        state.tenants.clone(),
        state.invitations.clone(),
        state.config.placeholder_email_domain.clone(),
    );
    let secret = InvitationSecret::from_presented(&payload.token);
    let result = redeemer
        .redeem(&secret, &payload.form, kind, Utc::now())
        .await?;

    // The redemption is final; a failed sign-in only sends the client to the login page.
    let subdomain = state
        .tenants
        .get_by_id(result.tenant_id)
        .await
        .map(|t| t.subdomain)
        .ok();
    let session = match IdentityResolver::from_state(state)
        .login(subdomain.as_deref(), &result.auth_email, &result.auth_password)
        .await
    {
        Ok(session) => Some(session.token),
        Err(e) => {
            warn!(account_id = %result.account_id, "Sign-in after redemption failed: {}", e);
            None
        }
    };
    let next = if session.is_some() { "home" } else { "login" };

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "accountId": result.account_id,
            "tenantId": result.tenant_id,
            "role": result.role,
            "authEmail": result.auth_email,
            "authPassword": result.auth_password,
            "activatedExisting": result.activated_existing,
            "next": next,
            "sessionToken": session,
        })),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use identity_core::{
        AccountRepository,
        adapters::InMemoryStore,
        domain::{credential::CredentialHasher, invitation::InvitationToken, tenant::Tenant},
    };

    struct Fixture {
        store: InMemoryStore,
        tenant: Tenant,
        redeemer: TokenRedeemer,
    }

    async fn fixture() -> Fixture {
        let store = InMemoryStore::new(CredentialHasher::fast());
        let tenant = store
            .create(Tenant::new("Escola X", "escola-x", "trial", Utc::now()).unwrap())
            .await
            .unwrap();
        let redeemer = TokenRedeemer::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            "learners.invalid".into(),
        );
        Fixture {
            store,
            tenant,
            redeemer,
        }
    }

    async fn invite(f: &Fixture, role: Role, ttl: Duration) -> InvitationSecret {
        let (token, secret) =
            InvitationToken::member(f.tenant.id, role, Uuid::new_v4(), ttl, Utc::now());
        f.store.insert(token).await.unwrap();
        secret
    }

    fn learner_form(enrollment_id: &str) -> RegistrationForm {
        RegistrationForm {
            name: Some("Ana".into()),
            enrollment_id: Some(enrollment_id.into()),
            ..Default::default()
        }
    }

    fn staff_form(email: &str, password: &str, confirm: &str) -> RegistrationForm {
        RegistrationForm {
            name: Some("Rui".into()),
            email: Some(email.into()),
            password: Some(password.into()),
            confirm_password: Some(confirm.into()),
            enrollment_id: None,
        }
    }

    #[tokio::test]
    async fn test_learner_redemption_uses_synthetic_login() {
        let f = fixture().await;
        let secret = invite(&f, Role::Learner, Duration::days(7)).await;

        let result = f
            .redeemer
            .redeem(&secret, &learner_form("2024 0012 3"), InvitationKind::Member, Utc::now())
            .await
            .unwrap();

        assert_eq!(result.auth_email, "202400123@escola-x.learners.invalid");
        assert_eq!(result.auth_password, "202400123");
        assert_eq!(result.role, Role::Learner);
        let profile = AccountRepository::find_by_id(&f.store, result.account_id)
            .await
            .unwrap()
            .unwrap();
        assert!(profile.is_activated());
        assert_eq!(profile.enrollment_id.as_deref(), Some("202400123"));
    }

    #[tokio::test]
    async fn test_short_enrollment_id_leaves_token_untouched() {
        let f = fixture().await;
        let secret = invite(&f, Role::Learner, Duration::days(7)).await;

        let result = f
            .redeemer
            .redeem(&secret, &learner_form("12 34"), InvitationKind::Member, Utc::now())
            .await;

        assert!(matches!(result, Err(CoreError::Validation(_))));
        let token = f.store.find_by_secret_hash(&secret.hash()).await.unwrap().unwrap();
        assert!(token.consumed_by.is_none());
        assert!(f.store.list_by_tenant(f.tenant.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_password_rules_for_staff() {
        let f = fixture().await;
        let secret = invite(&f, Role::Teacher, Duration::days(7)).await;

        for form in [
            staff_form("rui@escola.pt", "12345", "12345"),
            staff_form("rui@escola.pt", "secret1", "secret2"),
        ] {
            let result = f
                .redeemer
                .redeem(&secret, &form, InvitationKind::Member, Utc::now())
                .await;
            assert!(matches!(result, Err(CoreError::Validation(_))));
        }
        assert!(f.store.find_by_secret_hash(&secret.hash()).await.unwrap().unwrap().consumed_by.is_none());
    }

    #[tokio::test]
    async fn test_shape_must_fit_role() {
        let f = fixture().await;
        let secret = invite(&f, Role::Teacher, Duration::days(7)).await;

        let result = f
            .redeemer
            .redeem(&secret, &learner_form("202400123"), InvitationKind::Member, Utc::now())
            .await;

        assert!(matches!(result, Err(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn test_expired_token_rejected_by_validate_and_redeem() {
        let f = fixture().await;
        let secret = invite(&f, Role::Teacher, Duration::hours(1)).await;
        let later = Utc::now() + Duration::hours(2);

        assert!(matches!(
            f.redeemer.validate(&secret, later).await,
            Err(CoreError::Token(TokenError::Expired))
        ));
        assert!(matches!(
            f.redeemer
                .redeem(
                    &secret,
                    &staff_form("rui@escola.pt", "secret1", "secret1"),
                    InvitationKind::Member,
                    later
                )
                .await,
            Err(CoreError::Token(TokenError::Expired))
        ));
    }

    #[tokio::test]
    async fn test_member_endpoint_does_not_accept_bootstrap_token() {
        let f = fixture().await;
        let (token, secret) =
            InvitationToken::bootstrap(f.tenant.id, None, Duration::hours(72), Utc::now());
        f.store.insert(token).await.unwrap();

        let result = f
            .redeemer
            .redeem(
                &secret,
                &staff_form("dir@escola.pt", "secret1", "secret1"),
                InvitationKind::Member,
                Utc::now(),
            )
            .await;

        assert!(matches!(result, Err(CoreError::Token(TokenError::NotFound))));
    }

    #[tokio::test]
    async fn test_bootstrap_bound_to_recipient_email() {
        let f = fixture().await;
        let (token, secret) = InvitationToken::bootstrap(
            f.tenant.id,
            Some("dir@escola.pt".into()),
            Duration::hours(72),
            Utc::now(),
        );
        f.store.insert(token).await.unwrap();

        let wrong = f
            .redeemer
            .redeem(
                &secret,
                &staff_form("other@escola.pt", "secret1", "secret1"),
                InvitationKind::TenantBootstrap,
                Utc::now(),
            )
            .await;
        assert!(matches!(wrong, Err(CoreError::Validation(_))));

        let ok = f
            .redeemer
            .redeem(
                &secret,
                &staff_form(" DIR@escola.pt", "secret1", "secret1"),
                InvitationKind::TenantBootstrap,
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(ok.role, Role::Administrator);
    }

    #[tokio::test]
    async fn test_inactive_tenant_reports_inactive() {
        let f = fixture().await;
        let secret = invite(&f, Role::Teacher, Duration::days(7)).await;
        f.store.set_active(f.tenant.id, false).await.unwrap();

        assert!(matches!(
            f.redeemer.validate(&secret, Utc::now()).await,
            Err(CoreError::Token(TokenError::Inactive))
        ));
    }
}

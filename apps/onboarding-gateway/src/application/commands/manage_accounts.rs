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
use identity_core::{
    AccountRepository, CoreError, TenantRepository,
    domain::{
        account::{
            AccountError, AccountProfile, AccountUpdate, MIN_SECRET_LEN, NewAccount,
            normalize_enrollment_id, parse_email, synthetic_email,
        },
        role::{Capability, Role},
    },
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Staff-side account maintenance: pre-registration, edits and removal.
pub struct AccountManager {
    tenants: Arc<dyn TenantRepository>,
    accounts: Arc<dyn AccountRepository>,
    placeholder_email_domain: String,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PreRegisterAccount {
    pub name: String,
    pub role: Role,
    pub email: Option<String>,
    pub enrollment_id: Option<String>,
}

impl AccountManager {
    pub fn new(
        tenants: Arc<dyn TenantRepository>,
        accounts: Arc<dyn AccountRepository>,
        placeholder_email_domain: String,
    ) -> Self {
        Self {
            tenants,
            accounts,
            placeholder_email_domain,
        }
    }

    /// Creates a profile without an identity. It is activated later by
    /// redeeming an invitation with matching details.
    pub async fn preregister(
        &self,
        actor_id: Uuid,
        command: PreRegisterAccount,
    ) -> Result<AccountProfile, CoreError> {
        let actor = load_actor(self.accounts.as_ref(), actor_id).await?;
        authorize(&actor, Requirement::Capability(Capability::ManageAccounts))?;
        let tenant_id = actor_tenant(&actor)?;
        if !matches!(command.role, Role::Librarian | Role::Teacher | Role::Learner) {
            return Err(CoreError::Validation(format!(
                "{} accounts cannot be pre-registered",
                command.role
            )));
        }
        authorize(
            &actor,
            Requirement::ModifyAccount {
                target_role: command.role,
                target_tenant_id: Some(tenant_id),
            },
        )?;

        let name = command.name.trim();
        if name.is_empty() {
            return Err(AccountError::MissingField("name").into());
        }

        let (email, enrollment_id) = if command.role.is_self_enrolling() {
            let enrollment_id = command
                .enrollment_id
                .as_deref()
                .map(normalize_enrollment_id)
                .filter(|e| !e.is_empty())
                .ok_or(AccountError::MissingField("enrollmentId"))?;
            if enrollment_id.chars().count() < MIN_SECRET_LEN {
                return Err(AccountError::EnrollmentIdTooShort.into());
            }
            let email = match command.email.as_deref().map(str::trim).filter(|e| !e.is_empty()) {
                Some(raw) => parse_email(raw)?,
                None => {
                    let tenant = self.tenants.get_by_id(tenant_id).await?;
                    synthetic_email(&enrollment_id, &tenant.subdomain, &self.placeholder_email_domain)
                }
            };
            (email, Some(enrollment_id))
        } else {
            let raw = command
                .email
                .as_deref()
                .ok_or(AccountError::MissingField("email"))?;
            (parse_email(raw)?, None)
        };

        let profile = self
            .accounts
            .create_account(NewAccount {
                tenant_id: Some(tenant_id),
                role: command.role,
                name: name.to_string(),
                email,
                enrollment_id,
                credential: None,
            })
            .await?;
        info!(account_id = %profile.id, tenant_id = %tenant_id, role = %profile.role, "Account pre-registered");
        Ok(profile)
    }

    /// Loads an account of the actor's tenant that the actor may modify.
    async fn target(&self, actor: &AccountProfile, account_id: Uuid) -> Result<AccountProfile, CoreError> {
        let target = self
            .accounts
            .find_by_id(account_id)
            .await?
            .filter(|t| t.tenant_id.is_some() && t.tenant_id == actor.tenant_id)
            .ok_or_else(|| CoreError::NotFound(format!("account {}", account_id)))?;
        authorize(
            actor,
            Requirement::ModifyAccount {
                target_role: target.role,
                target_tenant_id: target.tenant_id,
            },
        )?;
        Ok(target)
    }

    pub async fn update(
        &self,
        actor_id: Uuid,
        account_id: Uuid,
        update: AccountUpdate,
    ) -> Result<AccountProfile, CoreError> {
        let actor = load_actor(self.accounts.as_ref(), actor_id).await?;
        let target = self.target(&actor, account_id).await?;

        let name = match update.name.as_deref().map(str::trim) {
            Some("") => return Err(AccountError::MissingField("name").into()),
            Some(name) => Some(name.to_string()),
            None => None,
        };
        let email = update.email.as_deref().map(parse_email).transpose()?;
        if let Some(email) = &email {
            if *email != target.email && target.is_activated() {
                return Err(CoreError::Validation(
                    "the email of an activated account cannot be changed".into(),
                ));
            }
        }

        let updated = self
            .accounts
            .update(target.id, AccountUpdate { name, email })
            .await?;
        info!(account_id = %updated.id, actor_id = %actor.id, "Account updated");
        Ok(updated)
    }

    pub async fn remove(&self, actor_id: Uuid, account_id: Uuid) -> Result<(), CoreError> {
        let actor = load_actor(self.accounts.as_ref(), actor_id).await?;
        if actor.id == account_id {
            return Err(CoreError::Validation("you cannot delete your own account".into()));
        }
        let target = self.target(&actor, account_id).await?;
        self.accounts.delete(target.id).await?;
        info!(account_id = %target.id, actor_id = %actor.id, "Account deleted");
        Ok(())
    }
}

// --- Axum Route Handlers ---

fn manager(state: &AppState) -> AccountManager {
    AccountManager::new(
        state.tenants.clone(),
        state.accounts.clone(),
        state.config.placeholder_email_domain.clone(),
    )
}

pub async fn handle_preregister_account_request(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(payload): Json<PreRegisterAccount>,
) -> Result<impl IntoResponse, ApiError> {
    let profile = manager(&state).preregister(user.account_id, payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "account": profile })),
    ))
}

pub async fn handle_update_account_request(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(account_id): Path<Uuid>,
    Json(payload): Json<AccountUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let profile = manager(&state)
        .update(user.account_id, account_id, payload)
        .await?;
    Ok((
        StatusCode::OK,
        Json(json!({ "success": true, "account": profile })),
    ))
}

pub async fn handle_delete_account_request(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(account_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    manager(&state).remove(user.account_id, account_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use identity_core::{
        adapters::InMemoryStore,
        domain::{account::NewCredential, credential::CredentialHasher, tenant::Tenant},
    };

    struct Fixture {
        store: InMemoryStore,
        tenant: Tenant,
        manager: AccountManager,
    }

    async fn fixture() -> Fixture {
        let store = InMemoryStore::new(CredentialHasher::fast());
        let tenant = store
            .create(Tenant::new("Escola X", "escola-x", "trial", Utc::now()).unwrap())
            .await
            .unwrap();
        let manager = AccountManager::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            "learners.invalid".into(),
        );
        Fixture {
            store,
            tenant,
            manager,
        }
    }

    async fn staff(f: &Fixture, role: Role, email: &str) -> AccountProfile {
        f.store
            .create_account(NewAccount {
                tenant_id: Some(f.tenant.id),
                role,
                name: "Staff".into(),
                email: email.into(),
                enrollment_id: None,
                credential: Some(NewCredential {
                    login_email: email.into(),
                    password: "secret1".into(),
                }),
            })
            .await
            .unwrap()
    }

    fn learner(enrollment_id: &str) -> PreRegisterAccount {
        PreRegisterAccount {
            name: "Ana".into(),
            role: Role::Learner,
            email: None,
            enrollment_id: Some(enrollment_id.into()),
        }
    }

    #[tokio::test]
    async fn test_preregistered_learner_gets_synthetic_email() {
        let f = fixture().await;
        let librarian = staff(&f, Role::Librarian, "lib@escola.pt").await;

        let profile = f
            .manager
            .preregister(librarian.id, learner("2024 0012 3"))
            .await
            .unwrap();

        assert_eq!(profile.email, "202400123@escola-x.learners.invalid");
        assert_eq!(profile.enrollment_id.as_deref(), Some("202400123"));
        assert!(!profile.is_activated());
    }

    #[tokio::test]
    async fn test_preregister_rejects_short_enrollment_id() {
        let f = fixture().await;
        let admin = staff(&f, Role::Administrator, "dir@escola.pt").await;
        let result = f.manager.preregister(admin.id, learner("123")).await;
        assert!(matches!(result, Err(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn test_teacher_may_not_manage_accounts() {
        let f = fixture().await;
        let teacher = staff(&f, Role::Teacher, "prof@escola.pt").await;
        let result = f.manager.preregister(teacher.id, learner("202400123")).await;
        assert!(matches!(result, Err(CoreError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_librarian_may_not_touch_administrator() {
        let f = fixture().await;
        let admin = staff(&f, Role::Administrator, "dir@escola.pt").await;
        let librarian = staff(&f, Role::Librarian, "lib@escola.pt").await;

        let update = f
            .manager
            .update(
                librarian.id,
                admin.id,
                AccountUpdate {
                    name: Some("Renamed".into()),
                    email: None,
                },
            )
            .await;
        assert!(matches!(update, Err(CoreError::Forbidden(_))));
        assert!(matches!(
            f.manager.remove(librarian.id, admin.id).await,
            Err(CoreError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_activated_account_email_is_fixed() {
        let f = fixture().await;
        let admin = staff(&f, Role::Administrator, "dir@escola.pt").await;
        let teacher = staff(&f, Role::Teacher, "prof@escola.pt").await;

        let result = f
            .manager
            .update(
                admin.id,
                teacher.id,
                AccountUpdate {
                    name: None,
                    email: Some("new@escola.pt".into()),
                },
            )
            .await;
        assert!(matches!(result, Err(CoreError::Validation(_))));

        let renamed = f
            .manager
            .update(
                admin.id,
                teacher.id,
                AccountUpdate {
                    name: Some(" Rui Costa ".into()),
                    email: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.name, "Rui Costa");
    }

    #[tokio::test]
    async fn test_remove_account() {
        let f = fixture().await;
        let admin = staff(&f, Role::Administrator, "dir@escola.pt").await;
        let teacher = staff(&f, Role::Teacher, "prof@escola.pt").await;

        assert!(matches!(
            f.manager.remove(admin.id, admin.id).await,
            Err(CoreError::Validation(_))
        ));
        f.manager.remove(admin.id, teacher.id).await.unwrap();
        assert!(f.store.find_by_email("prof@escola.pt").await.unwrap().is_none());
    }
}

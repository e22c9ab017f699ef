use axum::{
    Router,
    middleware::{self},
    routing::{delete, get, patch, post, put},
};
use identity_core::{
    AccountRepository, Cache, CoreError, CredentialStore, InvitationRepository, TenantRepository,
    domain::{
        account::{NewAccount, NewCredential, parse_email},
        role::Role,
    },
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

pub mod application;
pub mod config;

use application::{
    commands::{
        issue_invitation::{
            handle_delete_invitation_request, handle_issue_invitation_request,
            handle_revoke_invitation_request,
        },
        login::{handle_login_request, handle_logout_request},
        manage_accounts::{
            handle_delete_account_request, handle_preregister_account_request,
            handle_update_account_request,
        },
        provision_tenant::{
            handle_provision_tenant_request, handle_reissue_bootstrap_request,
            handle_set_tenant_active_request,
        },
        redeem_invitation::{
            handle_invitation_context, handle_redeem_bootstrap, handle_redeem_invitation,
        },
    },
    middleware::session_auth,
    query::{handle_get_tenant, handle_list_invitations, handle_me},
};
pub use config::GatewayConfig;

// Holds shared dependencies
#[derive(Clone)]
pub struct AppState {
    pub tenants: Arc<dyn TenantRepository>,
    pub invitations: Arc<dyn InvitationRepository>,
    pub accounts: Arc<dyn AccountRepository>,
    pub credentials: Arc<dyn CredentialStore>,
    pub cache: Arc<dyn Cache>,
    pub config: Arc<GatewayConfig>,
}

impl AppState {
    /// Wires every store port to the same backing store.
    pub fn from_store<S>(store: S, cache: Arc<dyn Cache>, config: GatewayConfig) -> Self
    where
        S: TenantRepository
            + InvitationRepository
            + AccountRepository
            + CredentialStore
            + Clone
            + 'static,
    {
        Self {
            tenants: Arc::new(store.clone()),
            invitations: Arc::new(store.clone()),
            accounts: Arc::new(store.clone()),
            credentials: Arc::new(store),
            cache,
            config: Arc::new(config),
        }
    }
}

/// Creates the tenant operator named in the configuration, unless an
/// account with that email already exists.
pub async fn seed_operator(state: &AppState) -> Result<(), CoreError> {
    let (Some(email), Some(password)) = (
        state.config.operator_email.as_deref(),
        state.config.operator_password.as_deref(),
    ) else {
        return Ok(());
    };
    let email = parse_email(email)?;
    if state.accounts.find_by_email(&email).await?.is_some() {
        info!("Tenant operator already present");
        return Ok(());
    }

    let operator = state
        .accounts
        .create_account(NewAccount {
            tenant_id: None,
            role: Role::TenantOperator,
            name: "Tenant operator".into(),
            email: email.clone(),
            enrollment_id: None,
            credential: Some(NewCredential {
                login_email: email,
                password: password.to_string(),
            }),
        })
        .await?;
    info!(account_id = %operator.id, "Seeded tenant operator");
    Ok(())
}

// Function to create the main Axum router with state
pub fn create_app(app_state: AppState) -> Router {
    let api_routes = Router::new()
        // Public: tenant lookup, onboarding and sign-in
        .route("/tenants/{tenant}", get(handle_get_tenant))
        .route("/invitations/context", post(handle_invitation_context))
        .route("/invitations/redeem", post(handle_redeem_invitation))
        .route("/invitations/bootstrap/redeem", post(handle_redeem_bootstrap))
        .route("/auth/login", post(handle_login_request))
        // Session required
        .route(
            "/tenants",
            post(handle_provision_tenant_request).route_layer(middleware::from_fn_with_state(
                app_state.clone(),
                session_auth,
            )),
        )
        .route(
            "/tenants/{tenant}/active",
            put(handle_set_tenant_active_request).route_layer(middleware::from_fn_with_state(
                app_state.clone(),
                session_auth,
            )),
        )
        .route(
            "/tenants/{tenant}/bootstrap-invitation",
            post(handle_reissue_bootstrap_request).route_layer(middleware::from_fn_with_state(
                app_state.clone(),
                session_auth,
            )),
        )
        .route(
            "/invitations",
            post(handle_issue_invitation_request)
                .get(handle_list_invitations)
                .route_layer(middleware::from_fn_with_state(
                    app_state.clone(),
                    session_auth,
                )),
        )
        .route(
            "/invitations/{token_id}",
            delete(handle_delete_invitation_request).route_layer(middleware::from_fn_with_state(
                app_state.clone(),
                session_auth,
            )),
        )
        .route(
            "/invitations/{token_id}/revoke",
            post(handle_revoke_invitation_request).route_layer(middleware::from_fn_with_state(
                app_state.clone(),
                session_auth,
            )),
        )
        .route(
            "/auth/logout",
            post(handle_logout_request).route_layer(middleware::from_fn_with_state(
                app_state.clone(),
                session_auth,
            )),
        )
        .route(
            "/me",
            get(handle_me).route_layer(middleware::from_fn_with_state(
                app_state.clone(),
                session_auth,
            )),
        )
        .route(
            "/accounts",
            post(handle_preregister_account_request).route_layer(middleware::from_fn_with_state(
                app_state.clone(),
                session_auth,
            )),
        )
        .route(
            "/accounts/{account_id}",
            patch(handle_update_account_request)
                .delete(handle_delete_account_request)
                .route_layer(middleware::from_fn_with_state(
                    app_state.clone(),
                    session_auth,
                )),
        );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/api", api_routes)
        .layer(cors)
        .with_state(app_state)
}

#![allow(dead_code)]

use axum::Router;
use axum_test::{TestResponse, TestServer};
use http::{HeaderName, HeaderValue, StatusCode};
use identity_core::{
    Cache,
    adapters::{InMemoryCache, InMemoryStore},
    domain::credential::CredentialHasher,
};
use onboarding_gateway::{AppState, GatewayConfig, create_app, seed_operator};
use serde_json::{Value, json};
use std::sync::Arc;

pub const BASE_DOMAIN: &str = "biblio.example";
pub const OPERATOR_EMAIL: &str = "ops@biblio.example";
pub const OPERATOR_PASSWORD: &str = "operator-pass";
pub const ADMIN_EMAIL: &str = "g@x.com";
pub const ADMIN_PASSWORD: &str = "director-pass";

// Helper function to set up the test application with in-memory dependencies
pub async fn setup_test_app() -> (TestServer, InMemoryStore) {
    let store = InMemoryStore::new(CredentialHasher::fast());
    let cache: Arc<dyn Cache> = Arc::new(InMemoryCache::default());
    let config = GatewayConfig {
        base_domain: BASE_DOMAIN.to_string(),
        operator_email: Some(OPERATOR_EMAIL.to_string()),
        operator_password: Some(OPERATOR_PASSWORD.to_string()),
        ..GatewayConfig::default()
    };

    let app_state = AppState::from_store(store.clone(), cache, config);
    seed_operator(&app_state).await.expect("Failed to seed operator");

    let app: Router = create_app(app_state);
    (
        TestServer::new(app).expect("Failed to create TestServer"),
        store,
    )
}

pub fn auth_header() -> HeaderName {
    HeaderName::from_static("authorization")
}

pub fn bearer(token: &str) -> HeaderValue {
    HeaderValue::from_str(&format!("Bearer {}", token)).unwrap()
}

pub fn tenant_header() -> HeaderName {
    HeaderName::from_static("x-tenant-subdomain")
}

pub fn str_field(body: &Value, key: &str) -> String {
    body.get(key)
        .and_then(Value::as_str)
        .unwrap_or_else(|| panic!("response should contain {}: {}", key, body))
        .to_string()
}

pub async fn login(
    server: &TestServer,
    tenant: Option<&str>,
    identifier: &str,
    password: &str,
) -> TestResponse {
    let mut request = server
        .post("/api/auth/login")
        .json(&json!({ "identifier": identifier, "password": password }));
    if let Some(subdomain) = tenant {
        request = request.add_header(tenant_header(), HeaderValue::from_str(subdomain).unwrap());
    }
    request.await
}

pub async fn operator_session(server: &TestServer) -> String {
    let response = login(server, None, OPERATOR_EMAIL, OPERATOR_PASSWORD).await;
    assert_eq!(response.status_code(), StatusCode::OK);
    str_field(&response.json::<Value>(), "sessionToken")
}

/// Provisions a tenant as the seeded operator and returns the response body.
pub async fn provision(server: &TestServer, subdomain: &str) -> Value {
    let operator = operator_session(server).await;
    let response = server
        .post("/api/tenants")
        .add_header(auth_header(), bearer(&operator))
        .json(&json!({
            "name": "Escola X",
            "subdomain": subdomain,
            "plan": "trial",
            "inviteEmail": ADMIN_EMAIL,
            "inviteExpiresHours": 72
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::CREATED);
    response.json::<Value>()
}

pub async fn redeem_bootstrap(server: &TestServer, secret: &str) -> TestResponse {
    server
        .post("/api/invitations/bootstrap/redeem")
        .json(&json!({
            "token": secret,
            "name": "Directora",
            "email": ADMIN_EMAIL,
            "password": ADMIN_PASSWORD,
            "confirmPassword": ADMIN_PASSWORD
        }))
        .await
}

/// Provisions a tenant and claims it. Returns (provision body, administrator redemption body).
pub async fn claimed_tenant(server: &TestServer, subdomain: &str) -> (Value, Value) {
    let provisioned = provision(server, subdomain).await;
    let response = redeem_bootstrap(server, &str_field(&provisioned, "inviteToken")).await;
    assert_eq!(response.status_code(), StatusCode::CREATED);
    (provisioned, response.json::<Value>())
}

pub async fn issue(server: &TestServer, session: &str, role: &str) -> TestResponse {
    server
        .post("/api/invitations")
        .add_header(auth_header(), bearer(session))
        .json(&json!({ "targetRole": role, "expiresInHours": 168 }))
        .await
}

pub async fn redeem_staff(server: &TestServer, secret: &str, email: &str) -> TestResponse {
    server
        .post("/api/invitations/redeem")
        .json(&json!({
            "token": secret,
            "name": "Rui",
            "email": email,
            "password": "secret1",
            "confirmPassword": "secret1"
        }))
        .await
}

mod common;

use common::*;
use http::StatusCode;
use serde_json::{Value, json};

#[tokio::test]
async fn test_protected_routes_require_a_session() {
    let (server, _) = setup_test_app().await;

    let me = server.get("/api/me").await;
    assert_eq!(me.status_code(), StatusCode::UNAUTHORIZED);

    let bogus = server
        .post("/api/invitations")
        .add_header(auth_header(), bearer("not-a-session"))
        .json(&json!({ "targetRole": "teacher" }))
        .await;
    assert_eq!(bogus.status_code(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_public_tenant_card() {
    let (server, _) = setup_test_app().await;
    provision(&server, "escola-x").await;

    let found = server.get("/api/tenants/escola-x").await;
    assert_eq!(found.status_code(), StatusCode::OK);
    let found = found.json::<Value>();
    assert_eq!(found["tenant"]["name"], "Escola X");
    assert_eq!(found["tenant"]["active"], true);

    let missing = server.get("/api/tenants/nowhere").await;
    assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);
    assert_eq!(missing.json::<Value>()["error"], "tenant_not_found");
}

#[tokio::test]
async fn test_wrong_password_is_rejected() {
    let (server, _) = setup_test_app().await;
    let response = login(&server, None, OPERATOR_EMAIL, "wrong-password").await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.json::<Value>()["error"], "invalid_credentials");
}

#[tokio::test]
async fn test_only_operators_provision_tenants() {
    let (server, _) = setup_test_app().await;
    let (_, admin) = claimed_tenant(&server, "escola-x").await;

    let response = server
        .post("/api/tenants")
        .add_header(auth_header(), bearer(&str_field(&admin, "sessionToken")))
        .json(&json!({ "name": "Escola Y", "subdomain": "escola-y", "plan": "trial" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::FORBIDDEN);
    assert_eq!(response.json::<Value>()["error"], "forbidden");

    // Operators manage tenants, not members
    let operator = operator_session(&server).await;
    let invite = issue(&server, &operator, "teacher").await;
    assert_eq!(invite.status_code(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_duplicate_subdomain_is_rejected() {
    let (server, _) = setup_test_app().await;
    provision(&server, "escola-x").await;

    let operator = operator_session(&server).await;
    let response = server
        .post("/api/tenants")
        .add_header(auth_header(), bearer(&operator))
        .json(&json!({ "name": "Outra", "subdomain": "escola-x", "plan": "trial" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::CONFLICT);
    assert_eq!(response.json::<Value>()["error"], "duplicate_subdomain");
}

#[tokio::test]
async fn test_librarian_permissions() {
    let (server, _) = setup_test_app().await;
    let (_, admin) = claimed_tenant(&server, "escola-x").await;
    let admin_session = str_field(&admin, "sessionToken");

    let administrator_invite = issue(&server, &admin_session, "administrator").await;
    assert_eq!(administrator_invite.status_code(), StatusCode::FORBIDDEN);

    let issued = issue(&server, &admin_session, "librarian").await.json::<Value>();
    let librarian = redeem_staff(&server, &str_field(&issued, "token"), "lib@escola.pt")
        .await
        .json::<Value>();
    let librarian_session = str_field(&librarian, "sessionToken");

    let invite = issue(&server, &librarian_session, "learner").await;
    assert_eq!(invite.status_code(), StatusCode::FORBIDDEN);

    let edit_admin = server
        .patch(&format!("/api/accounts/{}", str_field(&admin, "accountId")))
        .add_header(auth_header(), bearer(&librarian_session))
        .json(&json!({ "name": "Renamed" }))
        .await;
    assert_eq!(edit_admin.status_code(), StatusCode::FORBIDDEN);

    // Librarians do manage learner accounts
    let learner = server
        .post("/api/accounts")
        .add_header(auth_header(), bearer(&librarian_session))
        .json(&json!({ "name": "Dora", "role": "learner", "enrollmentId": "20241111" }))
        .await;
    assert_eq!(learner.status_code(), StatusCode::CREATED);
    let learner_id = learner.json::<Value>()["account"]["id"]
        .as_str()
        .unwrap()
        .to_string();

    let renamed = server
        .patch(&format!("/api/accounts/{}", learner_id))
        .add_header(auth_header(), bearer(&librarian_session))
        .json(&json!({ "name": "Dora M." }))
        .await;
    assert_eq!(renamed.status_code(), StatusCode::OK);
    assert_eq!(renamed.json::<Value>()["account"]["name"], "Dora M.");

    let removed = server
        .delete(&format!("/api/accounts/{}", learner_id))
        .add_header(auth_header(), bearer(&librarian_session))
        .await;
    assert_eq!(removed.status_code(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_accounts_are_isolated_between_tenants() {
    let (server, _) = setup_test_app().await;
    let (_, admin_x) = claimed_tenant(&server, "escola-x").await;
    let provisioned_y = provision(&server, "escola-y").await;
    let admin_y = server
        .post("/api/invitations/bootstrap/redeem")
        .json(&json!({
            "token": str_field(&provisioned_y, "inviteToken"),
            "name": "Director Y",
            "email": ADMIN_EMAIL,
            "password": ADMIN_PASSWORD,
            "confirmPassword": ADMIN_PASSWORD
        }))
        .await;
    // One email, one account across all tenants
    assert_eq!(admin_y.status_code(), StatusCode::CONFLICT);
    assert_eq!(admin_y.json::<Value>()["error"], "duplicate_account");

    // Signing in through another tenant's host fails
    let cross = login(&server, Some("escola-y"), ADMIN_EMAIL, ADMIN_PASSWORD).await;
    assert_eq!(cross.status_code(), StatusCode::UNAUTHORIZED);

    let own = login(&server, Some("escola-x"), ADMIN_EMAIL, ADMIN_PASSWORD).await;
    assert_eq!(own.status_code(), StatusCode::OK);
    assert_eq!(own.json::<Value>()["accountId"], admin_x["accountId"]);
}

#[tokio::test]
async fn test_logout_ends_the_session() {
    let (server, _) = setup_test_app().await;
    let session = operator_session(&server).await;

    let me = server
        .get("/api/me")
        .add_header(auth_header(), bearer(&session))
        .await;
    assert_eq!(me.status_code(), StatusCode::OK);
    let me = me.json::<Value>();
    assert_eq!(me["account"]["role"], "tenantOperator");
    assert_eq!(me["capabilities"], json!(["manageTenants"]));

    let logout = server
        .post("/api/auth/logout")
        .add_header(auth_header(), bearer(&session))
        .await;
    assert_eq!(logout.status_code(), StatusCode::NO_CONTENT);

    let after = server
        .get("/api/me")
        .add_header(auth_header(), bearer(&session))
        .await;
    assert_eq!(after.status_code(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_revoked_then_deleted_invitation() {
    let (server, _) = setup_test_app().await;
    let (_, admin) = claimed_tenant(&server, "escola-x").await;
    let admin_session = str_field(&admin, "sessionToken");
    let issued = issue(&server, &admin_session, "teacher").await.json::<Value>();
    let token_id = str_field(&issued, "id");
    let secret = str_field(&issued, "token");

    let revoked = server
        .post(&format!("/api/invitations/{}/revoke", token_id))
        .add_header(auth_header(), bearer(&admin_session))
        .await;
    assert_eq!(revoked.status_code(), StatusCode::NO_CONTENT);

    let context = server
        .post("/api/invitations/context")
        .json(&json!({ "token": secret }))
        .await;
    assert_eq!(context.status_code(), StatusCode::GONE);
    assert_eq!(context.json::<Value>()["error"], "token_inactive");

    let deleted = server
        .delete(&format!("/api/invitations/{}", token_id))
        .add_header(auth_header(), bearer(&admin_session))
        .await;
    assert_eq!(deleted.status_code(), StatusCode::NO_CONTENT);

    let gone = server
        .post("/api/invitations/context")
        .json(&json!({ "token": secret }))
        .await;
    assert_eq!(gone.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_used_invitation_cannot_be_deleted() {
    let (server, _) = setup_test_app().await;
    let (_, admin) = claimed_tenant(&server, "escola-x").await;
    let admin_session = str_field(&admin, "sessionToken");
    let issued = issue(&server, &admin_session, "teacher").await.json::<Value>();
    let redeemed = redeem_staff(&server, &str_field(&issued, "token"), "rui@escola.pt").await;
    assert_eq!(redeemed.status_code(), StatusCode::CREATED);

    let deleted = server
        .delete(&format!("/api/invitations/{}", str_field(&issued, "id")))
        .add_header(auth_header(), bearer(&admin_session))
        .await;
    assert_eq!(deleted.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_deactivated_tenant_blocks_sign_in_and_onboarding() {
    let (server, _) = setup_test_app().await;
    let (provisioned, admin) = claimed_tenant(&server, "escola-x").await;
    let issued = issue(&server, &str_field(&admin, "sessionToken"), "teacher")
        .await
        .json::<Value>();

    let operator = operator_session(&server).await;
    let deactivated = server
        .put(&format!(
            "/api/tenants/{}/active",
            str_field(&provisioned, "tenantId")
        ))
        .add_header(auth_header(), bearer(&operator))
        .json(&json!({ "active": false }))
        .await;
    assert_eq!(deactivated.status_code(), StatusCode::OK);
    assert_eq!(deactivated.json::<Value>()["tenant"]["active"], false);

    let signed_in = login(&server, None, ADMIN_EMAIL, ADMIN_PASSWORD).await;
    assert_eq!(signed_in.status_code(), StatusCode::FORBIDDEN);

    let context = server
        .post("/api/invitations/context")
        .json(&json!({ "token": str_field(&issued, "token") }))
        .await;
    assert_eq!(context.status_code(), StatusCode::GONE);
    assert_eq!(context.json::<Value>()["error"], "token_inactive");
}

#[tokio::test]
async fn test_bootstrap_reissue_until_claimed() {
    let (server, _) = setup_test_app().await;
    let provisioned = provision(&server, "escola-x").await;
    let tenant_id = str_field(&provisioned, "tenantId");
    let first_secret = str_field(&provisioned, "inviteToken");
    let operator = operator_session(&server).await;

    let reissued = server
        .post(&format!("/api/tenants/{}/bootstrap-invitation", tenant_id))
        .add_header(auth_header(), bearer(&operator))
        .json(&json!({ "inviteEmail": ADMIN_EMAIL, "inviteExpiresHours": 24 }))
        .await;
    assert_eq!(reissued.status_code(), StatusCode::CREATED);
    let second_secret = str_field(&reissued.json::<Value>(), "inviteToken");
    assert_ne!(first_secret, second_secret);

    let stale = redeem_bootstrap(&server, &first_secret).await;
    assert_eq!(stale.status_code(), StatusCode::GONE);

    let claimed = redeem_bootstrap(&server, &second_secret).await;
    assert_eq!(claimed.status_code(), StatusCode::CREATED);

    let refused = server
        .post(&format!("/api/tenants/{}/bootstrap-invitation", tenant_id))
        .add_header(auth_header(), bearer(&operator))
        .await;
    assert_eq!(refused.status_code(), StatusCode::BAD_REQUEST);
}

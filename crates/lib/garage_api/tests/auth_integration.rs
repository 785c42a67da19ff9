//! Integration test — build the router over in-memory stores and drive the
//! auth and role endpoints end to end.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use garage_api::{AppState, config::ApiConfig};
use garage_core::auth::refresh_store::MemoryRefreshStore;
use garage_core::auth::service::AuthService;
use garage_core::auth::telegram;
use garage_core::models::auth::TelegramAuthData;
use garage_core::models::role::ROLE_ADMIN;
use garage_core::store::memory::MemoryStore;
use serde_json::{Value, json};
use tower::ServiceExt;

const BOT_TOKEN: &str = "123456:test-bot-token";

async fn setup() -> (Router, Arc<AuthService>) {
    let config = ApiConfig {
        bind_addr: "127.0.0.1:0".into(),
        database_url: "postgres://unused".into(),
        redis_url: None,
        jwt_secret: "test-secret".into(),
        telegram_bot_token: BOT_TOKEN.into(),
        dependency_timeout: Duration::from_secs(2),
    };
    let store = Arc::new(MemoryStore::new());
    let auth = Arc::new(AuthService::new(
        store.clone(),
        store,
        Arc::new(MemoryRefreshStore::new()),
        config.auth_settings(),
    ));
    auth.rbac().ensure_builtin_roles().await.expect("bootstrap roles");

    let app = garage_api::router(AppState {
        auth: auth.clone(),
        config,
    });
    (app, auth)
}

async fn call(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let req = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let resp = app.clone().oneshot(req).await.expect("request");
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("read body");
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("parse JSON")
    };
    (status, json)
}

async fn register(app: &Router, email: &str) -> Value {
    let (status, body) = call(
        app,
        "POST",
        "/auth/register",
        None,
        Some(json!({
            "email": email,
            "password": "secret123",
            "first_name": "Alex",
            "last_name": "Doe"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body
}

#[tokio::test]
async fn register_login_refresh_logout() {
    let (app, _) = setup().await;

    let registered = register(&app, "a@x.com").await;
    assert_eq!(registered["expires_in"], 900);
    assert_eq!(registered["token_type"], "Bearer");
    assert_eq!(registered["user"]["email"], "a@x.com");
    assert!(registered["user"].get("password_hash").is_none());

    let (status, body) = call(
        &app,
        "POST",
        "/auth/login",
        None,
        Some(json!({"email": "a@x.com", "password": "wrong"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_credentials");

    let (status, body) = call(
        &app,
        "POST",
        "/auth/login",
        None,
        Some(json!({"email": "nobody@x.com", "password": "secret123"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_credentials");

    let (status, login) = call(
        &app,
        "POST",
        "/auth/login",
        None,
        Some(json!({"email": "a@x.com", "password": "secret123"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(login["access_token"], registered["access_token"]);
    let access = login["access_token"].as_str().unwrap().to_string();
    let refresh = login["refresh_token"].as_str().unwrap().to_string();

    let (status, me) = call(&app, "GET", "/auth/me", Some(&access), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["user"]["email"], "a@x.com");
    assert_eq!(me["roles"][0]["name"], "client");

    let (status, rotated) = call(
        &app,
        "POST",
        "/auth/refresh",
        None,
        Some(json!({"refresh_token": refresh})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let new_refresh = rotated["refresh_token"].as_str().unwrap().to_string();

    // Replaying the superseded token fails.
    let (status, body) = call(
        &app,
        "POST",
        "/auth/refresh",
        None,
        Some(json!({"refresh_token": refresh})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(
        body["error"] == "token_revoked" || body["error"] == "stale_token",
        "{body}"
    );

    let (status, _) = call(&app, "POST", "/auth/logout", Some(&access), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(
        &app,
        "POST",
        "/auth/refresh",
        None,
        Some(json!({"refresh_token": new_refresh})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "token_revoked");
}

#[tokio::test]
async fn duplicate_email_conflicts() {
    let (app, _) = setup().await;
    register(&app, "a@x.com").await;

    let (status, body) = call(
        &app,
        "POST",
        "/auth/register",
        None,
        Some(json!({
            "email": "a@x.com",
            "password": "secret456",
            "first_name": "Other",
            "last_name": "Person"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "email_taken");
}

#[tokio::test]
async fn protected_routes_need_access_token() {
    let (app, _) = setup().await;
    let registered = register(&app, "a@x.com").await;

    let (status, _) = call(&app, "GET", "/auth/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let refresh = registered["refresh_token"].as_str().unwrap();
    let (status, body) = call(&app, "GET", "/auth/me", Some(refresh), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "wrong_token_type");
}

#[tokio::test]
async fn telegram_login_creates_client() {
    let (app, _) = setup().await;
    let mut data = TelegramAuthData {
        id: 424242,
        first_name: "Ivan".into(),
        last_name: Some("Petrov".into()),
        username: Some("ivan".into()),
        photo_url: None,
        auth_date: chrono::Utc::now().timestamp(),
        hash: String::new(),
    };
    data.hash = telegram::sign(&data, BOT_TOKEN).unwrap();

    let (status, body) = call(
        &app,
        "POST",
        "/auth/telegram",
        None,
        Some(serde_json::to_value(&data).unwrap()),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["user"]["telegram_id"], 424242);
    assert_eq!(body["user"]["auth_method"], "external");

    data.first_name = "Mallory".into();
    let (status, body) = call(
        &app,
        "POST",
        "/auth/telegram",
        None,
        Some(serde_json::to_value(&data).unwrap()),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "auth_invalid");
}

#[tokio::test]
async fn barber_creation_is_admin_only() {
    let (app, auth) = setup().await;

    // Public registration cannot create barbers.
    let (status, _) = call(
        &app,
        "POST",
        "/auth/register",
        None,
        Some(json!({
            "email": "b@x.com",
            "password": "secret123",
            "first_name": "Bob",
            "last_name": "Barber",
            "role": "barber"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let client = register(&app, "c@x.com").await;
    let client_token = client["access_token"].as_str().unwrap().to_string();
    let barber = json!({
        "email": "b@x.com",
        "password": "secret123",
        "first_name": "Bob",
        "last_name": "Barber"
    });
    let (status, _) = call(
        &app,
        "POST",
        "/admin/barbers",
        Some(&client_token),
        Some(barber.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let admin = register(&app, "root@x.com").await;
    let admin_id = admin["user"]["id"].as_i64().unwrap();
    let admin_role = auth.rbac().get_role_by_name(ROLE_ADMIN).await.unwrap();
    auth.rbac()
        .assign_role(admin_id, admin_role.id, admin_id)
        .await
        .unwrap();
    let admin_token = admin["access_token"].as_str().unwrap().to_string();

    let (status, body) = call(&app, "POST", "/admin/barbers", Some(&admin_token), Some(barber)).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert!(
        auth.rbac()
            .is_barber(body["user"]["id"].as_i64().unwrap())
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn admin_manages_roles() {
    let (app, auth) = setup().await;
    let admin = register(&app, "root@x.com").await;
    let admin_id = admin["user"]["id"].as_i64().unwrap();
    let admin_role = auth.rbac().get_role_by_name(ROLE_ADMIN).await.unwrap();
    auth.rbac()
        .assign_role(admin_id, admin_role.id, admin_id)
        .await
        .unwrap();
    let token = admin["access_token"].as_str().unwrap().to_string();

    let (status, roles) = call(&app, "GET", "/roles", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(roles.as_array().unwrap().len(), 3);

    let (status, created) = call(
        &app,
        "POST",
        "/roles",
        Some(&token),
        Some(json!({
            "name": "manager",
            "display_name": "Manager",
            "permissions": {"appointments": ["read"]}
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{created}");
    let role_id = created["id"].as_i64().unwrap();

    let (status, _) = call(
        &app,
        "POST",
        "/roles",
        Some(&token),
        Some(json!({"name": "manager", "display_name": "Again"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, updated) = call(
        &app,
        "PUT",
        &format!("/roles/{role_id}"),
        Some(&token),
        Some(json!({"description": "Runs the shop"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["description"], "Runs the shop");
    assert_eq!(updated["name"], "manager");

    let user = register(&app, "u@x.com").await;
    let user_id = user["user"]["id"].as_i64().unwrap();

    let uri = format!("/users/{user_id}/roles");
    let (status, _) = call(&app, "POST", &uri, Some(&token), Some(json!({"role_id": role_id}))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) =
        call(&app, "POST", &uri, Some(&token), Some(json!({"role_id": role_id}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "already_assigned");

    let (status, holders) = call(
        &app,
        "GET",
        &format!("/roles/{role_id}/users"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(holders[0]["id"], user_id);

    let (status, _) = call(
        &app,
        "DELETE",
        &format!("/users/{user_id}/roles/{role_id}"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, user_roles) = call(&app, "GET", &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = user_roles
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|r| r["name"].as_str())
        .collect();
    assert_eq!(names, vec!["client"]);

    let (status, body) = call(&app, "GET", "/roles/9999", Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "role_not_found");

    let (status, _) = call(
        &app,
        "DELETE",
        &format!("/roles/{role_id}"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

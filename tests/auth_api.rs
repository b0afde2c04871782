mod common;

use axum::http::{Method, StatusCode};
use serde_json::json;

use common::TestApp;
use helpdesk::core::config::AppConfig;
use helpdesk::security::auth_api::Role;
use helpdesk::security::rate_limiter::HttpRateLimitConfig;

async fn register(app: &TestApp, body: serde_json::Value) -> common::TestResponse {
    app.send(Method::POST, "/api/register", None, Some(body), &[])
        .await
}

async fn login(app: &TestApp, email: &str, password: &str) -> common::TestResponse {
    app.send(
        Method::POST,
        "/api/login",
        None,
        Some(json!({ "email": email, "password": password })),
        &[],
    )
    .await
}

#[tokio::test]
async fn test_register_then_use_token() {
    let app = TestApp::new();

    let registered = register(
        &app,
        json!({ "email": "new@example.com", "password": "s3cret", "role": "agent" }),
    )
    .await;
    assert_eq!(registered.status, StatusCode::OK);
    assert_eq!(registered.body["user"]["role"], "agent");
    assert!(registered.body["user"].get("password_hash").is_none());

    let token = registered.body["token"].as_str().expect("token").to_string();
    let listed = app.get("/api/tickets", &token).await;
    assert_eq!(listed.status, StatusCode::OK);
}

#[tokio::test]
async fn test_register_defaults_unknown_role_to_user() {
    let app = TestApp::new();
    let registered = register(
        &app,
        json!({ "email": "who@example.com", "password": "pw", "role": "superuser" }),
    )
    .await;
    assert_eq!(registered.body["user"]["role"], "user");
}

#[tokio::test]
async fn test_register_validation_and_duplicates() {
    let app = TestApp::new();

    let missing = register(&app, json!({ "password": "pw" })).await;
    assert_eq!(missing.error_code(), Some("FIELD_REQUIRED"));
    assert_eq!(missing.body["error"]["field"], "email");

    let missing = register(&app, json!({ "email": "a@example.com" })).await;
    assert_eq!(missing.body["error"]["field"], "password");

    let body = json!({ "email": "dup@example.com", "password": "pw" });
    assert_eq!(register(&app, body.clone()).await.status, StatusCode::OK);
    let duplicate = register(&app, body).await;
    assert_eq!(duplicate.status, StatusCode::CONFLICT);
    assert_eq!(duplicate.body["error"]["message"], "Email already registered");
}

#[tokio::test]
async fn test_login_success_and_failures() {
    let app = TestApp::new();
    register(&app, json!({ "email": "me@example.com", "password": "right" })).await;

    let ok = login(&app, "ME@example.com", "right").await;
    assert_eq!(ok.status, StatusCode::OK);
    assert_eq!(ok.body["user"]["email"], "me@example.com");
    assert!(ok.body["token"].as_str().is_some_and(|t| !t.is_empty()));

    let wrong_password = login(&app, "me@example.com", "wrong").await;
    let unknown_email = login(&app, "nobody@example.com", "right").await;
    assert_eq!(wrong_password.status, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown_email.status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        wrong_password.body["error"]["message"],
        unknown_email.body["error"]["message"]
    );
}

#[tokio::test]
async fn test_rate_limit_per_user() {
    let app = TestApp::with_config(
        AppConfig::default().with_rate_limit(HttpRateLimitConfig::per_minute(3)),
    );
    let (_, alice) = app.login_as("alice@example.com", Role::User).await;
    let (_, bob) = app.login_as("bob@example.com", Role::User).await;

    for _ in 0..3 {
        assert_eq!(app.get("/api/tickets", &alice).await.status, StatusCode::OK);
    }
    let limited = app.get("/api/tickets", &alice).await;
    assert_eq!(limited.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(limited.error_code(), Some("RATE_LIMIT"));
    assert!(limited.header("retry-after").is_some());

    assert_eq!(app.get("/api/tickets", &bob).await.status, StatusCode::OK);

    let health = app.send(Method::GET, "/health", None, None, &[]).await;
    assert_eq!(health.status, StatusCode::OK, "health is not rate limited");
}

#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::{HeaderMap, Method, Request, StatusCode},
    Router,
};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

use helpdesk::auth::users::{NewUser, UserStore};
use helpdesk::core::config::AppConfig;
use helpdesk::security::auth_api::Role;
use helpdesk::security::password::{Argon2Config, PasswordHasher};
use helpdesk::security::rate_limiter::HttpRateLimitConfig;
use helpdesk::storage::MemoryStore;
use helpdesk::{build_router, AppState};

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestResponse {
    pub fn error_code(&self) -> Option<&str> {
        self.body["error"]["code"].as_str()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub store: Arc<MemoryStore>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(
            AppConfig::default().with_rate_limit(HttpRateLimitConfig::per_minute(10_000)),
        )
    }

    pub fn with_config(config: AppConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let hasher = PasswordHasher::new(&Argon2Config::minimal()).expect("hasher");
        let state = Arc::new(
            AppState::with_password_hasher(
                config,
                store.clone(),
                store.clone(),
                store.clone(),
                hasher,
            )
            .expect("state"),
        );

        Self {
            router: build_router(state.clone()),
            state,
            store,
        }
    }

    /// Creates an account directly in the store and returns its id and a bearer token.
    pub async fn login_as(&self, email: &str, role: Role) -> (i64, String) {
        let user = self
            .store
            .insert_user(NewUser {
                email: email.to_string(),
                password_hash: "unused".to_string(),
                role,
                created_at: Utc::now(),
            })
            .await
            .expect("insert user");
        let token = self.state.identity.issue(&user).expect("token");
        (user.id, token)
    }

    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request");

        let response = self.router.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };

        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn get(&self, uri: &str, token: &str) -> TestResponse {
        self.send(Method::GET, uri, Some(token), None, &[]).await
    }

    pub async fn post(&self, uri: &str, token: &str, body: Value) -> TestResponse {
        self.send(Method::POST, uri, Some(token), Some(body), &[]).await
    }

    pub async fn patch(&self, uri: &str, token: &str, body: Value) -> TestResponse {
        self.send(Method::PATCH, uri, Some(token), Some(body), &[]).await
    }

    pub async fn create_ticket(&self, token: &str, title: &str) -> Value {
        let response = self
            .post(
                "/api/tickets",
                token,
                serde_json::json!({ "title": title, "description": "details" }),
            )
            .await;
        assert_eq!(response.status, StatusCode::OK, "create failed: {}", response.body);
        response.body["ticket"].clone()
    }
}

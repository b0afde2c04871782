use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use super::store::{IdempotencyRecord, IdempotencyStore, NewIdempotencyRecord, Reservation};
use super::IdempotencyConfig;
use crate::core::shared::error::ApiError;
use crate::security::auth_api::Identity;
use crate::storage::StoreError;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
pub const REPLAY_HEADER: &str = "x-idempotent";

#[derive(Debug)]
enum Acquired {
    Reserved,
    Replay(IdempotencyRecord),
}

#[derive(Debug, thiserror::Error)]
enum GuardError {
    #[error("request with this idempotency key is still in progress")]
    InProgress,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Reserve-then-execute guard for `POST` requests carrying an `Idempotency-Key`.
///
/// The first request reserves the key before the handler runs, so a
/// concurrent duplicate waits for the stored outcome instead of executing
/// again. Storage trouble never fails the caller; the request simply runs
/// unguarded.
#[derive(Clone)]
pub struct IdempotencyGuard {
    store: Arc<dyn IdempotencyStore>,
    config: IdempotencyConfig,
}

impl IdempotencyGuard {
    pub fn new(store: Arc<dyn IdempotencyStore>, config: IdempotencyConfig) -> Self {
        Self { store, config }
    }

    pub async fn handle(&self, key: String, request: Request, next: Next) -> Response {
        let identity = request
            .extensions()
            .get::<Identity>()
            .copied()
            .unwrap_or_default();

        let reservation = NewIdempotencyRecord {
            key: key.clone(),
            method: request.method().to_string(),
            path: request.uri().path().to_string(),
            user_id: identity.user_id(),
            created_at: Utc::now(),
        };

        match self.acquire(&reservation).await {
            Ok(Acquired::Reserved) => self.execute_detached(key, request, next).await,
            Ok(Acquired::Replay(record)) => {
                debug!(idempotency_key = %key, "Replaying stored response");
                replay(&record)
            }
            Err(GuardError::InProgress) => {
                ApiError::Conflict(GuardError::InProgress.to_string()).into_response()
            }
            Err(GuardError::Store(e)) => {
                warn!(idempotency_key = %key, "Idempotency reservation failed, running unguarded: {e}");
                next.run(request).await
            }
        }
    }

    async fn acquire(&self, reservation: &NewIdempotencyRecord) -> Result<Acquired, GuardError> {
        let deadline = Instant::now() + Duration::from_millis(self.config.wait_timeout_ms);

        loop {
            match self.store.reserve(reservation.clone()).await? {
                Reservation::Reserved => return Ok(Acquired::Reserved),
                Reservation::Existing(record) if record.is_complete() => {
                    return Ok(Acquired::Replay(record))
                }
                // Handlers run on their own task, so a pending record this old
                // means the process died mid-request and its outcome is unknown.
                // Taking over may repeat a write that had already committed.
                Reservation::Existing(record) if self.is_abandoned(&record) => {
                    warn!(idempotency_key = %record.key, "Taking over abandoned idempotency key");
                    self.store.release(&record.key).await?;
                }
                Reservation::Existing(record) => {
                    if let Some(done) = self.wait_for_completion(&record.key, deadline).await? {
                        return Ok(Acquired::Replay(done));
                    }
                }
            }

            if Instant::now() >= deadline {
                return Err(GuardError::InProgress);
            }
        }
    }

    /// `Ok(None)` means the pending record disappeared and the key can be reserved again.
    async fn wait_for_completion(
        &self,
        key: &str,
        deadline: Instant,
    ) -> Result<Option<IdempotencyRecord>, GuardError> {
        let poll = Duration::from_millis(self.config.poll_interval_ms.max(1));

        loop {
            if Instant::now() >= deadline {
                return Err(GuardError::InProgress);
            }
            sleep(poll).await;

            match self.store.find(key).await? {
                Some(record) if record.is_complete() => return Ok(Some(record)),
                Some(_) => continue,
                None => return Ok(None),
            }
        }
    }

    fn is_abandoned(&self, record: &IdempotencyRecord) -> bool {
        let ttl = ChronoDuration::seconds(self.config.pending_ttl_secs as i64);
        !record.is_complete() && record.created_at + ttl < Utc::now()
    }

    /// Runs the handler and records its outcome on a separate task, so a
    /// caller that disconnects still leaves the key completed or released.
    async fn execute_detached(&self, key: String, request: Request, next: Next) -> Response {
        let guard = self.clone();
        let task_key = key.clone();
        let task = tokio::spawn(async move { guard.execute(&task_key, request, next).await });

        match task.await {
            Ok(response) => response,
            Err(e) => {
                self.release_quietly(&key).await;
                ApiError::Internal(format!("Idempotent request task failed: {e}")).into_response()
            }
        }
    }

    async fn execute(&self, key: &str, request: Request, next: Next) -> Response {
        let response = next.run(request).await;
        let (parts, body) = response.into_parts();

        // The request body limit already bounds what a handler can echo back.
        let bytes = match to_bytes(body, usize::MAX).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(idempotency_key = %key, "Failed to capture response body, storing status only: {e}");
                self.record_outcome(key, parts.status, Value::Null).await;
                return Response::from_parts(parts, Body::empty());
            }
        };

        let stored = serde_json::from_slice::<Value>(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        self.record_outcome(key, parts.status, stored).await;

        Response::from_parts(parts, Body::from(bytes))
    }

    /// 5xx outcomes free the key for a retry; everything else is kept for replay.
    async fn record_outcome(&self, key: &str, status: StatusCode, body: Value) {
        if status.is_server_error() {
            self.release_quietly(key).await;
            return;
        }

        if let Err(e) = self.store.complete(key, status.as_u16(), body).await {
            warn!(idempotency_key = %key, "Failed to persist idempotent response: {e}");
            self.release_quietly(key).await;
        }
    }

    async fn release_quietly(&self, key: &str) {
        if let Err(e) = self.store.release(key).await {
            warn!(idempotency_key = %key, "Failed to release idempotency key: {e}");
        }
    }
}

fn replay(record: &IdempotencyRecord) -> Response {
    let status = record
        .status
        .and_then(|s| StatusCode::from_u16(s).ok())
        .unwrap_or(StatusCode::OK);
    let body = record.response_body.clone().unwrap_or(Value::Null);

    let mut response = (status, Json(body)).into_response();
    response
        .headers_mut()
        .insert(REPLAY_HEADER, HeaderValue::from_static("true"));
    response
}

/// Only authenticated `POST`s with a non-blank key are guarded; anything else
/// passes straight through.
pub async fn idempotency_middleware(
    State(guard): State<IdempotencyGuard>,
    request: Request,
    next: Next,
) -> Response {
    if request.method() != Method::POST {
        return next.run(request).await;
    }

    let key = request
        .headers()
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string);

    let authenticated = request
        .extensions()
        .get::<Identity>()
        .is_some_and(Identity::is_authenticated);

    match key {
        Some(key) if authenticated => guard.handle(key, request, next).await,
        _ => next.run(request).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::auth_api::Principal;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use axum::{middleware, routing::post, Router};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    fn fast_config() -> IdempotencyConfig {
        IdempotencyConfig {
            wait_timeout_ms: 200,
            poll_interval_ms: 10,
            pending_ttl_secs: 60,
        }
    }

    fn app(
        store: Arc<dyn IdempotencyStore>,
        calls: Arc<AtomicUsize>,
        status: StatusCode,
        authenticated: bool,
    ) -> Router {
        slow_app(store, calls, status, authenticated, Duration::ZERO)
    }

    fn slow_app(
        store: Arc<dyn IdempotencyStore>,
        calls: Arc<AtomicUsize>,
        status: StatusCode,
        authenticated: bool,
        delay: Duration,
    ) -> Router {
        let guard = IdempotencyGuard::new(store, fast_config());
        let handler = move || {
            let calls = calls.clone();
            async move {
                sleep(delay).await;
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                (status, Json(json!({ "n": n })))
            }
        };

        Router::new()
            .route("/things", post(handler))
            .layer(middleware::from_fn_with_state(guard, idempotency_middleware))
            .layer(middleware::from_fn(move |mut req: Request, next: Next| async move {
                if authenticated {
                    req.extensions_mut().insert(Identity::from(Principal::user(1)));
                }
                next.run(req).await
            }))
    }

    fn post_with_key(key: Option<&str>) -> Request {
        let mut builder = Request::builder().method("POST").uri("/things");
        if let Some(key) = key {
            builder = builder.header(IDEMPOTENCY_KEY_HEADER, key);
        }
        builder.body(Body::empty()).expect("request")
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        serde_json::from_slice(&bytes).expect("json")
    }

    fn pending(key: &str, age_secs: i64) -> NewIdempotencyRecord {
        NewIdempotencyRecord {
            key: key.to_string(),
            method: "POST".into(),
            path: "/things".into(),
            user_id: Some(1),
            created_at: Utc::now() - ChronoDuration::seconds(age_secs),
        }
    }

    #[tokio::test]
    async fn test_second_request_is_replayed() {
        let store = Arc::new(MemoryStore::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let app = app(store, calls.clone(), StatusCode::OK, true);

        let first = app.clone().oneshot(post_with_key(Some("k1"))).await.expect("first");
        assert!(first.headers().get(REPLAY_HEADER).is_none());
        let first_body = body_json(first).await;

        let second = app.oneshot(post_with_key(Some("k1"))).await.expect("second");
        assert_eq!(second.status(), StatusCode::OK);
        assert_eq!(
            second.headers().get(REPLAY_HEADER).and_then(|v| v.to_str().ok()),
            Some("true")
        );
        assert_eq!(body_json(second).await, first_body);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_without_key_runs_every_time() {
        let store = Arc::new(MemoryStore::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let app = app(store, calls.clone(), StatusCode::OK, true);

        app.clone().oneshot(post_with_key(None)).await.expect("first");
        app.clone().oneshot(post_with_key(Some("   "))).await.expect("blank");
        app.oneshot(post_with_key(None)).await.expect("second");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_anonymous_requests_bypass_guard() {
        let store = Arc::new(MemoryStore::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let app = app(store.clone(), calls.clone(), StatusCode::OK, false);

        app.clone().oneshot(post_with_key(Some("anon"))).await.expect("first");
        app.oneshot(post_with_key(Some("anon"))).await.expect("second");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(store.find("anon").await.expect("find").is_none());
    }

    #[tokio::test]
    async fn test_client_errors_are_stored() {
        let store = Arc::new(MemoryStore::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let app = app(store, calls.clone(), StatusCode::BAD_REQUEST, true);

        app.clone().oneshot(post_with_key(Some("bad"))).await.expect("first");
        let replayed = app.oneshot(post_with_key(Some("bad"))).await.expect("second");
        assert_eq!(replayed.status(), StatusCode::BAD_REQUEST);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_server_errors_release_the_key() {
        let store = Arc::new(MemoryStore::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let app = app(store.clone(), calls.clone(), StatusCode::INTERNAL_SERVER_ERROR, true);

        app.clone().oneshot(post_with_key(Some("k5"))).await.expect("first");
        let second = app.oneshot(post_with_key(Some("k5"))).await.expect("second");
        assert!(second.headers().get(REPLAY_HEADER).is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(store.find("k5").await.expect("find").is_none());
    }

    #[tokio::test]
    async fn test_pending_key_conflicts_after_wait() {
        let store = Arc::new(MemoryStore::new());
        store.reserve(pending("busy", 0)).await.expect("reserve");
        let calls = Arc::new(AtomicUsize::new(0));
        let app = app(store, calls.clone(), StatusCode::OK, true);

        let response = app.oneshot(post_with_key(Some("busy"))).await.expect("response");
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "CONFLICT");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_waiter_replays_once_pending_completes() {
        let store = Arc::new(MemoryStore::new());
        store.reserve(pending("slow", 0)).await.expect("reserve");
        let calls = Arc::new(AtomicUsize::new(0));
        let app = app(store.clone(), calls.clone(), StatusCode::OK, true);

        let finisher = {
            let store = store.clone();
            tokio::spawn(async move {
                sleep(Duration::from_millis(30)).await;
                store
                    .complete("slow", 200, json!({ "n": 99 }))
                    .await
                    .expect("complete");
            })
        };

        let response = app.oneshot(post_with_key(Some("slow"))).await.expect("response");
        finisher.await.expect("finisher");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["n"], 99);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_abandoned_pending_key_is_taken_over() {
        let store = Arc::new(MemoryStore::new());
        store.reserve(pending("stale", 600)).await.expect("reserve");
        let calls = Arc::new(AtomicUsize::new(0));
        let app = app(store.clone(), calls.clone(), StatusCode::OK, true);

        let response = app.oneshot(post_with_key(Some("stale"))).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let record = store.find("stale").await.expect("find").expect("stored");
        assert_eq!(record.status, Some(200));
    }

    #[tokio::test]
    async fn test_outcome_recorded_after_caller_disconnects() {
        let store = Arc::new(MemoryStore::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let app = slow_app(
            store.clone(),
            calls.clone(),
            StatusCode::OK,
            true,
            Duration::from_millis(50),
        );

        let gave_up = tokio::time::timeout(
            Duration::from_millis(5),
            app.clone().oneshot(post_with_key(Some("gone"))),
        )
        .await;
        assert!(gave_up.is_err());

        sleep(Duration::from_millis(200)).await;
        let record = store.find("gone").await.expect("find").expect("kept");
        assert_eq!(record.status, Some(200));

        let retry = app.oneshot(post_with_key(Some("gone"))).await.expect("retry");
        assert_eq!(
            retry.headers().get(REPLAY_HEADER).and_then(|v| v.to_str().ok()),
            Some("true")
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    struct BrokenStore;

    #[async_trait]
    impl IdempotencyStore for BrokenStore {
        async fn reserve(&self, _: NewIdempotencyRecord) -> Result<Reservation, StoreError> {
            Err(StoreError::Backend("down".into()))
        }
        async fn find(&self, _: &str) -> Result<Option<IdempotencyRecord>, StoreError> {
            Err(StoreError::Backend("down".into()))
        }
        async fn complete(&self, _: &str, _: u16, _: Value) -> Result<(), StoreError> {
            Err(StoreError::Backend("down".into()))
        }
        async fn release(&self, _: &str) -> Result<(), StoreError> {
            Err(StoreError::Backend("down".into()))
        }
    }

    #[tokio::test]
    async fn test_storage_failure_runs_unguarded() {
        let calls = Arc::new(AtomicUsize::new(0));
        let app = app(Arc::new(BrokenStore), calls.clone(), StatusCode::OK, true);

        let first = app.clone().oneshot(post_with_key(Some("k"))).await.expect("first");
        let second = app.oneshot(post_with_key(Some("k"))).await.expect("second");
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(second.status(), StatusCode::OK);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}

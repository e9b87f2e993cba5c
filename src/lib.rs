pub mod application;
pub mod domain;
pub mod infrastructure;

use application::bootstrap::bootstrap_service;
use application::commands::{
    create_event_impl, create_task_impl, delete_event_impl, delete_task_impl,
    get_settings_impl, list_events_impl, list_tasks_impl, update_event_impl, update_task_impl,
    upsert_settings_impl, AppState, CommandError, CreateEventRequest, CreateTaskRequest,
    DeleteQuery, OkResponse, UpdateEventRequest, UpdateTaskRequest, UpsertSettingsRequest,
};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{FromRequestParts, Query, State};
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use domain::models::{Event, Identity, Settings, Task};
use infrastructure::config::ServiceConfig;
use infrastructure::error::InfraError;
use infrastructure::logging::init_tracing;
use infrastructure::session_gate::Credentials;
use std::sync::Arc;

pub type SharedState = Arc<AppState>;

impl IntoResponse for CommandError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

/// The authenticated owner of a request. Resolved from headers only, so it
/// rejects before any body is read.
pub struct Caller(pub Identity);

impl FromRequestParts<SharedState> for Caller {
    type Rejection = CommandError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let credentials = Credentials::from_headers(&parts.headers);
        state
            .authorize(&credentials)
            .map(Caller)
            .map_err(|error| state.command_error("authorize", &error))
    }
}

fn json_body<T>(
    state: &AppState,
    command: &str,
    body: Result<Json<T>, JsonRejection>,
) -> Result<T, CommandError> {
    body.map(|Json(value)| value).map_err(|rejection| {
        state.command_error(command, &InfraError::Validation(rejection.body_text()))
    })
}

fn query_params<T>(
    state: &AppState,
    command: &str,
    query: Result<Query<T>, QueryRejection>,
) -> Result<T, CommandError> {
    query.map(|Query(value)| value).map_err(|rejection| {
        state.command_error(command, &InfraError::Validation(rejection.body_text()))
    })
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok"
    }))
}

async fn list_tasks(
    State(state): State<SharedState>,
    Caller(identity): Caller,
) -> Result<Json<Vec<Task>>, CommandError> {
    list_tasks_impl(&state, &identity)
        .map(Json)
        .map_err(|error| state.command_error("list_tasks", &error))
}

async fn create_task(
    State(state): State<SharedState>,
    Caller(identity): Caller,
    body: Result<Json<CreateTaskRequest>, JsonRejection>,
) -> Result<Json<Task>, CommandError> {
    let request = json_body(&state, "create_task", body)?;
    create_task_impl(&state, &identity, request)
        .map(Json)
        .map_err(|error| state.command_error("create_task", &error))
}

async fn update_task(
    State(state): State<SharedState>,
    Caller(identity): Caller,
    body: Result<Json<UpdateTaskRequest>, JsonRejection>,
) -> Result<Json<OkResponse>, CommandError> {
    let request = json_body(&state, "update_task", body)?;
    update_task_impl(&state, &identity, request)
        .map(Json)
        .map_err(|error| state.command_error("update_task", &error))
}

async fn delete_task(
    State(state): State<SharedState>,
    Caller(identity): Caller,
    query: Result<Query<DeleteQuery>, QueryRejection>,
) -> Result<Json<OkResponse>, CommandError> {
    let query = query_params(&state, "delete_task", query)?;
    delete_task_impl(&state, &identity, query)
        .map(Json)
        .map_err(|error| state.command_error("delete_task", &error))
}

async fn list_events(
    State(state): State<SharedState>,
    Caller(identity): Caller,
) -> Result<Json<Vec<Event>>, CommandError> {
    list_events_impl(&state, &identity)
        .map(Json)
        .map_err(|error| state.command_error("list_events", &error))
}

async fn create_event(
    State(state): State<SharedState>,
    Caller(identity): Caller,
    body: Result<Json<CreateEventRequest>, JsonRejection>,
) -> Result<Json<Event>, CommandError> {
    let request = json_body(&state, "create_event", body)?;
    create_event_impl(&state, &identity, request)
        .map(Json)
        .map_err(|error| state.command_error("create_event", &error))
}

async fn update_event(
    State(state): State<SharedState>,
    Caller(identity): Caller,
    body: Result<Json<UpdateEventRequest>, JsonRejection>,
) -> Result<Json<OkResponse>, CommandError> {
    let request = json_body(&state, "update_event", body)?;
    update_event_impl(&state, &identity, request)
        .map(Json)
        .map_err(|error| state.command_error("update_event", &error))
}

async fn delete_event(
    State(state): State<SharedState>,
    Caller(identity): Caller,
    query: Result<Query<DeleteQuery>, QueryRejection>,
) -> Result<Json<OkResponse>, CommandError> {
    let query = query_params(&state, "delete_event", query)?;
    delete_event_impl(&state, &identity, query)
        .map(Json)
        .map_err(|error| state.command_error("delete_event", &error))
}

async fn get_settings(
    State(state): State<SharedState>,
    Caller(identity): Caller,
) -> Result<Json<Settings>, CommandError> {
    get_settings_impl(&state, &identity)
        .map(Json)
        .map_err(|error| state.command_error("get_settings", &error))
}

async fn upsert_settings(
    State(state): State<SharedState>,
    Caller(identity): Caller,
    body: Result<Json<UpsertSettingsRequest>, JsonRejection>,
) -> Result<Json<OkResponse>, CommandError> {
    let request = json_body(&state, "upsert_settings", body)?;
    upsert_settings_impl(&state, &identity, request)
        .map(Json)
        .map_err(|error| state.command_error("upsert_settings", &error))
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/tasks",
            get(list_tasks)
                .post(create_task)
                .put(update_task)
                .delete(delete_task),
        )
        .route(
            "/api/events",
            get(list_events)
                .post(create_event)
                .put(update_event)
                .delete(delete_event),
        )
        .route("/api/settings", get(get_settings).post(upsert_settings))
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {error}");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

/// Loads configuration from the environment and serves the API until interrupted.
pub async fn run() -> Result<(), InfraError> {
    let config = ServiceConfig::from_env()?;
    let _log_guard = init_tracing(config.log_dir.as_deref())?;
    tracing::debug!(?config, "loaded service config");

    let bootstrap = bootstrap_service(&config)?;
    let sessions = bootstrap.store.session_gate();
    let state = Arc::new(AppState::new(
        Arc::new(bootstrap.store),
        Arc::new(sessions),
    ));

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!("focusboard listening on http://{local_addr}");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{EventPatch, NewEvent, TaskPatch};
    use crate::infrastructure::record_store::{RecordStore, SqliteRecordStore};
    use crate::infrastructure::session_gate::{InMemorySessionGate, SESSION_COOKIE};
    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    /// Delegates to SQLite and counts every call that reaches the store.
    struct CountingStore {
        inner: SqliteRecordStore,
        calls: AtomicUsize,
    }

    impl CountingStore {
        fn touch(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl RecordStore for CountingStore {
        fn list_tasks(&self, owner: &Identity) -> Result<Vec<Task>, InfraError> {
            self.touch();
            self.inner.list_tasks(owner)
        }

        fn insert_task(
            &self,
            owner: &Identity,
            title: &str,
            created_at: DateTime<Utc>,
        ) -> Result<Task, InfraError> {
            self.touch();
            self.inner.insert_task(owner, title, created_at)
        }

        fn update_task(
            &self,
            owner: &Identity,
            id: i64,
            patch: &TaskPatch,
        ) -> Result<Option<Task>, InfraError> {
            self.touch();
            self.inner.update_task(owner, id, patch)
        }

        fn delete_task(&self, owner: &Identity, id: i64) -> Result<bool, InfraError> {
            self.touch();
            self.inner.delete_task(owner, id)
        }

        fn list_events(&self, owner: &Identity) -> Result<Vec<Event>, InfraError> {
            self.touch();
            self.inner.list_events(owner)
        }

        fn insert_event(&self, owner: &Identity, event: &NewEvent) -> Result<Event, InfraError> {
            self.touch();
            self.inner.insert_event(owner, event)
        }

        fn update_event(
            &self,
            owner: &Identity,
            id: i64,
            patch: &EventPatch,
        ) -> Result<Option<Event>, InfraError> {
            self.touch();
            self.inner.update_event(owner, id, patch)
        }

        fn delete_event(&self, owner: &Identity, id: i64) -> Result<bool, InfraError> {
            self.touch();
            self.inner.delete_event(owner, id)
        }

        fn load_settings(&self, owner: &Identity) -> Result<Option<Settings>, InfraError> {
            self.touch();
            self.inner.load_settings(owner)
        }

        fn upsert_settings(
            &self,
            owner: &Identity,
            accent: &str,
            dark: bool,
        ) -> Result<(), InfraError> {
            self.touch();
            self.inner.upsert_settings(owner, accent, dark)
        }
    }

    struct TestApp {
        router: Router,
        store: Arc<CountingStore>,
    }

    impl TestApp {
        fn new() -> Self {
            let store = Arc::new(CountingStore {
                inner: SqliteRecordStore::open(":memory:", "store-token").expect("open store"),
                calls: AtomicUsize::new(0),
            });
            let sessions = InMemorySessionGate::default();
            sessions
                .insert("alice-token", Identity::new("alice"))
                .expect("insert alice");
            sessions
                .insert("bob-token", Identity::new("bob"))
                .expect("insert bob");
            let state = Arc::new(AppState::new(
                Arc::clone(&store) as Arc<dyn RecordStore>,
                Arc::new(sessions),
            ));
            Self {
                router: router(state),
                store,
            }
        }

        async fn send(&self, request: Request<Body>) -> (StatusCode, serde_json::Value) {
            let response = self
                .router
                .clone()
                .oneshot(request)
                .await
                .expect("router response");
            let status = response.status();
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .expect("response body");
            let body = if bytes.is_empty() {
                serde_json::Value::Null
            } else {
                serde_json::from_slice(&bytes).expect("json body")
            };
            (status, body)
        }

        fn store_calls(&self) -> usize {
            self.store.calls.load(Ordering::SeqCst)
        }
    }

    fn request(method: Method, uri: &str, token: Option<&str>, body: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .expect("request"),
            None => builder.body(Body::empty()).expect("request"),
        }
    }

    #[tokio::test]
    async fn health_needs_no_session() {
        let app = TestApp::new();
        let (status, body) = app.send(request(Method::GET, "/health", None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({ "status": "ok" }));
    }

    #[tokio::test]
    async fn unauthenticated_requests_never_reach_the_store() {
        let app = TestApp::new();
        let cases = [
            (Method::GET, "/api/tasks", None),
            (Method::POST, "/api/tasks", Some(r#"{"title":"Read"}"#)),
            (Method::PUT, "/api/tasks", Some("not json")),
            (Method::DELETE, "/api/tasks?id=1", None),
            (Method::GET, "/api/events", None),
            (Method::POST, "/api/settings", Some(r##"{"accent":"#000000","dark":0}"##)),
        ];
        for (method, uri, body) in cases {
            for token in [None, Some("forged-token")] {
                let (status, payload) = app.send(request(method.clone(), uri, token, body)).await;
                assert_eq!(status, StatusCode::UNAUTHORIZED, "{method} {uri}");
                assert_eq!(payload, serde_json::json!({ "error": "unauthorized" }));
            }
        }
        assert_eq!(app.store_calls(), 0);
    }

    #[tokio::test]
    async fn session_cookie_is_accepted() {
        let app = TestApp::new();
        let request = Request::builder()
            .method(Method::GET)
            .uri("/api/tasks")
            .header(header::COOKIE, format!("{SESSION_COOKIE}=alice-token"))
            .body(Body::empty())
            .expect("request");
        let (status, body) = app.send(request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!([]));
    }

    #[tokio::test]
    async fn task_endpoints_follow_create_toggle_delete() {
        let app = TestApp::new();
        let token = Some("alice-token");

        let (status, created) = app
            .send(request(Method::POST, "/api/tasks", token, Some(r#"{"title":" Read "}"#)))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(created["title"], "Read");
        assert_eq!(created["done"], false);
        assert_eq!(created["user_id"], "alice");
        let id = created["id"].as_i64().expect("numeric id");

        let toggle = format!(r#"{{"id":{id},"done":1}}"#);
        let (status, body) = app
            .send(request(Method::PUT, "/api/tasks", token, Some(&toggle)))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({ "ok": true }));

        let (_, listed) = app.send(request(Method::GET, "/api/tasks", token, None)).await;
        assert_eq!(listed[0]["done"], true);

        let (_, bobs) = app
            .send(request(Method::GET, "/api/tasks", Some("bob-token"), None))
            .await;
        assert_eq!(bobs, serde_json::json!([]));

        let uri = format!("/api/tasks?id={id}");
        for _ in 0..2 {
            let (status, body) = app.send(request(Method::DELETE, &uri, token, None)).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body, serde_json::json!({ "ok": true }));
        }
        let (_, listed) = app.send(request(Method::GET, "/api/tasks", token, None)).await;
        assert_eq!(listed, serde_json::json!([]));
    }

    #[tokio::test]
    async fn validation_failures_are_bad_requests() {
        let app = TestApp::new();
        let token = Some("alice-token");
        let cases = [
            (Method::POST, "/api/tasks", Some(r#"{"title":"   "}"#)),
            (Method::POST, "/api/tasks", Some("{not json")),
            (Method::PUT, "/api/tasks", Some(r#"{"done":true}"#)),
            (Method::DELETE, "/api/tasks", None),
            (Method::DELETE, "/api/events?id=abc", None),
            (
                Method::POST,
                "/api/events",
                Some(r#"{"title":"Standup","start":2000,"end":1000}"#),
            ),
            (Method::POST, "/api/settings", Some(r#"{"accent":"red","dark":true}"#)),
        ];
        for (method, uri, body) in cases {
            let (status, payload) = app.send(request(method.clone(), uri, token, body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{method} {uri}");
            assert!(payload["error"].is_string(), "{method} {uri}");
        }

        let (_, payload) = app
            .send(request(Method::PUT, "/api/tasks", token, Some(r#"{"done":true}"#)))
            .await;
        assert_eq!(payload, serde_json::json!({ "error": "id required" }));
    }

    #[tokio::test]
    async fn events_and_settings_round_trip_over_http() {
        let app = TestApp::new();
        let token = Some("alice-token");

        let (status, created) = app
            .send(request(
                Method::POST,
                "/api/events",
                token,
                Some(r#"{"title":"Standup","start":1771232400000,"end":1771233300000}"#),
            ))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(created["start"], 1_771_232_400_000_i64);
        let id = created["id"].as_i64().expect("numeric id");

        let inverted = format!(r#"{{"id":{id},"end":1771232000000}}"#);
        let (status, _) = app
            .send(request(Method::PUT, "/api/events", token, Some(&inverted)))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, settings) = app.send(request(Method::GET, "/api/settings", token, None)).await;
        assert_eq!(
            settings,
            serde_json::json!({ "user_id": "alice", "accent": "#7c3aed", "dark": false })
        );

        let (status, _) = app
            .send(request(
                Method::POST,
                "/api/settings",
                token,
                Some(r##"{"accent":"#0EA5E9","dark":1}"##),
            ))
            .await;
        assert_eq!(status, StatusCode::OK);
        let (_, settings) = app.send(request(Method::GET, "/api/settings", token, None)).await;
        assert_eq!(
            settings,
            serde_json::json!({ "user_id": "alice", "accent": "#0ea5e9", "dark": true })
        );
    }
}

use crate::domain::models::{
    normalize_accent, optional_flag, validate_non_empty, Event, EventPatch, Identity,
    NewEvent, Settings, Task, TaskPatch,
};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::record_store::RecordStore;
use crate::infrastructure::session_gate::{Credentials, NowProvider, SessionGate};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub struct AppState {
    store: Arc<dyn RecordStore>,
    sessions: Arc<dyn SessionGate>,
    now_provider: NowProvider,
}

/// A failed command as the HTTP layer reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandError {
    pub status: StatusCode,
    pub message: String,
}

impl AppState {
    pub fn new(store: Arc<dyn RecordStore>, sessions: Arc<dyn SessionGate>) -> Self {
        Self {
            store,
            sessions,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn authorize(&self, credentials: &Credentials) -> Result<Identity, InfraError> {
        self.sessions.resolve(credentials)
    }

    fn now(&self) -> DateTime<Utc> {
        (self.now_provider)()
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> CommandError {
        self.log_error(command, &error.to_string());
        let (status, message) = match error {
            InfraError::Unauthenticated => (StatusCode::UNAUTHORIZED, error.to_string()),
            InfraError::Validation(message) => (StatusCode::BAD_REQUEST, message.clone()),
            error if error.is_storage_unavailable() => {
                (StatusCode::SERVICE_UNAVAILABLE, "storage unavailable".to_string())
            }
            InfraError::Http(_) => (StatusCode::BAD_GATEWAY, "upstream error".to_string()),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string()),
        };
        CommandError { status, message }
    }

    pub fn log_info(&self, command: &str, message: &str) {
        tracing::info!(command, "{message}");
    }

    pub fn log_error(&self, command: &str, message: &str) {
        tracing::error!(command, "{message}");
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OkResponse {
    pub ok: bool,
}

impl OkResponse {
    fn ok() -> Self {
        Self { ok: true }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateTaskRequest {
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateTaskRequest {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(flatten)]
    pub patch: TaskPatch,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateEventRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub start: Option<i64>,
    #[serde(default)]
    pub end: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateEventRequest {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(flatten)]
    pub patch: EventPatch,
}

#[derive(Debug, Deserialize)]
pub struct UpsertSettingsRequest {
    #[serde(default)]
    pub accent: Option<String>,
    #[serde(default, deserialize_with = "optional_flag")]
    pub dark: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteQuery {
    #[serde(default)]
    pub id: Option<String>,
}

fn required_id(id: Option<i64>) -> Result<i64, InfraError> {
    id.ok_or_else(|| InfraError::Validation("id required".to_string()))
}

fn parse_query_id(query: &DeleteQuery) -> Result<i64, InfraError> {
    let raw = query
        .id
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| InfraError::Validation("id required".to_string()))?;
    raw.parse::<i64>()
        .map_err(|_| InfraError::Validation("id must be an integer".to_string()))
}

fn millis_field(value: Option<i64>, field_name: &str) -> Result<DateTime<Utc>, InfraError> {
    let millis = value.ok_or_else(|| InfraError::Validation(format!("{field_name} required")))?;
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| InfraError::Validation(format!("{field_name} is out of range")))
}

pub fn list_tasks_impl(state: &AppState, identity: &Identity) -> Result<Vec<Task>, InfraError> {
    state.store.list_tasks(identity)
}

pub fn create_task_impl(
    state: &AppState,
    identity: &Identity,
    request: CreateTaskRequest,
) -> Result<Task, InfraError> {
    let title = request.title.unwrap_or_default();
    validate_non_empty(&title, "title").map_err(InfraError::Validation)?;

    let task = state
        .store
        .insert_task(identity, title.trim(), state.now())?;
    state.log_info("create_task", &format!("created task_id={}", task.id));
    Ok(task)
}

pub fn update_task_impl(
    state: &AppState,
    identity: &Identity,
    request: UpdateTaskRequest,
) -> Result<OkResponse, InfraError> {
    let id = required_id(request.id)?;
    request.patch.validate().map_err(InfraError::Validation)?;
    if request.patch.is_empty() {
        return Ok(OkResponse::ok());
    }

    match state.store.update_task(identity, id, &request.patch)? {
        Some(_) => state.log_info("update_task", &format!("updated task_id={id}")),
        None => state.log_info("update_task", &format!("ignored unowned task_id={id}")),
    }
    Ok(OkResponse::ok())
}

pub fn delete_task_impl(
    state: &AppState,
    identity: &Identity,
    query: DeleteQuery,
) -> Result<OkResponse, InfraError> {
    let id = parse_query_id(&query)?;
    if state.store.delete_task(identity, id)? {
        state.log_info("delete_task", &format!("deleted task_id={id}"));
    }
    Ok(OkResponse::ok())
}

pub fn list_events_impl(state: &AppState, identity: &Identity) -> Result<Vec<Event>, InfraError> {
    state.store.list_events(identity)
}

pub fn create_event_impl(
    state: &AppState,
    identity: &Identity,
    request: CreateEventRequest,
) -> Result<Event, InfraError> {
    let title = request
        .title
        .ok_or_else(|| InfraError::Validation("title required".to_string()))?;
    let event = NewEvent {
        title: title.trim().to_string(),
        start: millis_field(request.start, "start")?,
        end: millis_field(request.end, "end")?,
    };
    event.validate().map_err(InfraError::Validation)?;

    let created = state.store.insert_event(identity, &event)?;
    state.log_info("create_event", &format!("created event_id={}", created.id));
    Ok(created)
}

pub fn update_event_impl(
    state: &AppState,
    identity: &Identity,
    request: UpdateEventRequest,
) -> Result<OkResponse, InfraError> {
    let id = required_id(request.id)?;
    request.patch.validate().map_err(InfraError::Validation)?;
    if request.patch.is_empty() {
        return Ok(OkResponse::ok());
    }

    match state.store.update_event(identity, id, &request.patch)? {
        Some(_) => state.log_info("update_event", &format!("updated event_id={id}")),
        None => state.log_info("update_event", &format!("ignored unowned event_id={id}")),
    }
    Ok(OkResponse::ok())
}

pub fn delete_event_impl(
    state: &AppState,
    identity: &Identity,
    query: DeleteQuery,
) -> Result<OkResponse, InfraError> {
    let id = parse_query_id(&query)?;
    if state.store.delete_event(identity, id)? {
        state.log_info("delete_event", &format!("deleted event_id={id}"));
    }
    Ok(OkResponse::ok())
}

/// Stored settings, or the defaults when the owner never saved any.
pub fn get_settings_impl(state: &AppState, identity: &Identity) -> Result<Settings, InfraError> {
    Ok(state
        .store
        .load_settings(identity)?
        .unwrap_or_else(|| Settings::default_for(identity)))
}

pub fn upsert_settings_impl(
    state: &AppState,
    identity: &Identity,
    request: UpsertSettingsRequest,
) -> Result<OkResponse, InfraError> {
    let accent = request
        .accent
        .ok_or_else(|| InfraError::Validation("accent required".to_string()))?;
    let accent = normalize_accent(&accent).map_err(InfraError::Validation)?;
    let dark = request.dark.unwrap_or(false);

    state.store.upsert_settings(identity, &accent, dark)?;
    state.log_info(
        "upsert_settings",
        &format!("saved settings accent={accent} dark={dark}"),
    );
    Ok(OkResponse::ok())
}

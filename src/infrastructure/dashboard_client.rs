use crate::domain::models::{Event, EventPatch, NewEvent, Settings, Task, TaskPatch, ThemeSettings};
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

/// Client half of the dashboard API.
#[async_trait]
pub trait DashboardClient: Send + Sync {
    async fn list_tasks(&self) -> Result<Vec<Task>, InfraError>;
    async fn create_task(&self, title: &str) -> Result<Task, InfraError>;
    async fn update_task(&self, id: i64, patch: &TaskPatch) -> Result<(), InfraError>;
    async fn delete_task(&self, id: i64) -> Result<(), InfraError>;

    async fn list_events(&self) -> Result<Vec<Event>, InfraError>;
    async fn create_event(&self, event: &NewEvent) -> Result<Event, InfraError>;
    async fn update_event(&self, id: i64, patch: &EventPatch) -> Result<(), InfraError>;
    async fn delete_event(&self, id: i64) -> Result<(), InfraError>;

    async fn get_settings(&self) -> Result<Settings, InfraError>;
    async fn save_settings(&self, settings: &ThemeSettings) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestDashboardClient {
    client: Client,
    base_url: Url,
    session_token: String,
}

#[derive(Debug, Serialize)]
struct CreateTaskBody<'a> {
    title: &'a str,
}

#[derive(Debug, Serialize)]
struct UpdateBody<'a, P: Serialize> {
    id: i64,
    #[serde(flatten)]
    patch: &'a P,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
struct OkBody {
    ok: bool,
}

impl ReqwestDashboardClient {
    pub fn new(base_url: Url, session_token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url,
            session_token: session_token.into(),
        }
    }

    fn endpoint(&self, resource: &str) -> Result<Url, InfraError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                InfraError::InvalidConfig("dashboard api url cannot be a base".to_string())
            })?;
            segments.pop_if_empty().push("api").push(resource);
        }
        Ok(url)
    }

    fn request(&self, method: Method, resource: &str) -> Result<RequestBuilder, InfraError> {
        let url = self.endpoint(resource)?;
        Ok(self
            .client
            .request(method, url)
            .bearer_auth(&self.session_token))
    }

    fn status_error(status: StatusCode, body: &str) -> InfraError {
        let message = serde_json::from_str::<ErrorBody>(body)
            .map(|parsed| parsed.error)
            .unwrap_or_else(|_| body.trim().to_string());
        match status {
            StatusCode::UNAUTHORIZED => InfraError::Unauthenticated,
            StatusCode::BAD_REQUEST => InfraError::Validation(message),
            status if status.is_server_error() => InfraError::StorageUnavailable(if message.is_empty() {
                format!("dashboard api error: http {}", status.as_u16())
            } else {
                message
            }),
            status if message.is_empty() => {
                InfraError::Http(format!("dashboard api error: http {}", status.as_u16()))
            }
            status => InfraError::Http(format!(
                "dashboard api error: http {}; body={message}",
                status.as_u16()
            )),
        }
    }

    async fn send<T>(&self, request: RequestBuilder, action: &str) -> Result<T, InfraError>
    where
        T: DeserializeOwned,
    {
        let response = request
            .send()
            .await
            .map_err(|error| InfraError::Http(format!("network error while {action}: {error}")))?;

        let status = response.status();
        let body = response.text().await.map_err(|error| {
            InfraError::Http(format!("network error while reading {action} response: {error}"))
        })?;

        if !status.is_success() {
            return Err(Self::status_error(status, &body));
        }

        serde_json::from_str(&body).map_err(|error| {
            InfraError::Http(format!("invalid {action} payload: {error}; body={body}"))
        })
    }

    async fn send_ok(&self, request: RequestBuilder, action: &str) -> Result<(), InfraError> {
        let parsed: OkBody = self.send(request, action).await?;
        if !parsed.ok {
            return Err(InfraError::Http(format!("{action} was not acknowledged")));
        }
        Ok(())
    }
}

#[async_trait]
impl DashboardClient for ReqwestDashboardClient {
    async fn list_tasks(&self) -> Result<Vec<Task>, InfraError> {
        let request = self.request(Method::GET, "tasks")?;
        self.send(request, "listing tasks").await
    }

    async fn create_task(&self, title: &str) -> Result<Task, InfraError> {
        let request = self
            .request(Method::POST, "tasks")?
            .json(&CreateTaskBody { title });
        self.send(request, "creating task").await
    }

    async fn update_task(&self, id: i64, patch: &TaskPatch) -> Result<(), InfraError> {
        let request = self
            .request(Method::PUT, "tasks")?
            .json(&UpdateBody { id, patch });
        self.send_ok(request, "updating task").await
    }

    async fn delete_task(&self, id: i64) -> Result<(), InfraError> {
        let request = self
            .request(Method::DELETE, "tasks")?
            .query(&[("id", id)]);
        self.send_ok(request, "deleting task").await
    }

    async fn list_events(&self) -> Result<Vec<Event>, InfraError> {
        let request = self.request(Method::GET, "events")?;
        self.send(request, "listing events").await
    }

    async fn create_event(&self, event: &NewEvent) -> Result<Event, InfraError> {
        let request = self.request(Method::POST, "events")?.json(event);
        self.send(request, "creating event").await
    }

    async fn update_event(&self, id: i64, patch: &EventPatch) -> Result<(), InfraError> {
        let request = self
            .request(Method::PUT, "events")?
            .json(&UpdateBody { id, patch });
        self.send_ok(request, "updating event").await
    }

    async fn delete_event(&self, id: i64) -> Result<(), InfraError> {
        let request = self
            .request(Method::DELETE, "events")?
            .query(&[("id", id)]);
        self.send_ok(request, "deleting event").await
    }

    async fn get_settings(&self) -> Result<Settings, InfraError> {
        let request = self.request(Method::GET, "settings")?;
        self.send(request, "loading settings").await
    }

    async fn save_settings(&self, settings: &ThemeSettings) -> Result<(), InfraError> {
        let request = self.request(Method::POST, "settings")?.json(settings);
        self.send_ok(request, "saving settings").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> ReqwestDashboardClient {
        ReqwestDashboardClient::new(Url::parse(base).expect("valid url"), "token")
    }

    #[test]
    fn endpoints_are_rooted_under_api() {
        assert_eq!(
            client("http://127.0.0.1:8080").endpoint("tasks").expect("url").as_str(),
            "http://127.0.0.1:8080/api/tasks"
        );
        assert_eq!(
            client("https://example.test/board/").endpoint("settings").expect("url").as_str(),
            "https://example.test/board/api/settings"
        );
    }

    #[test]
    fn status_codes_map_to_error_kinds() {
        assert!(matches!(
            ReqwestDashboardClient::status_error(StatusCode::UNAUTHORIZED, r#"{"error":"unauthorized"}"#),
            InfraError::Unauthenticated
        ));
        match ReqwestDashboardClient::status_error(StatusCode::BAD_REQUEST, r#"{"error":"id required"}"#) {
            InfraError::Validation(message) => assert_eq!(message, "id required"),
            other => panic!("expected validation error, got {other:?}"),
        }
        let unavailable =
            ReqwestDashboardClient::status_error(StatusCode::SERVICE_UNAVAILABLE, "");
        assert!(unavailable.is_storage_unavailable());
        assert!(unavailable.is_retryable());
        assert!(matches!(
            ReqwestDashboardClient::status_error(StatusCode::NOT_FOUND, ""),
            InfraError::Http(_)
        ));
    }

    #[test]
    fn update_body_flattens_the_patch() {
        let patch = TaskPatch {
            title: None,
            done: Some(true),
        };
        let body = serde_json::to_value(UpdateBody { id: 4, patch: &patch }).expect("serialize");
        assert_eq!(body, serde_json::json!({ "id": 4, "done": true }));
    }
}

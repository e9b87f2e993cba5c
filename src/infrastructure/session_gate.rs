use crate::domain::models::Identity;
use crate::infrastructure::error::InfraError;
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub const SESSION_COOKIE: &str = "focusboard.session_token";

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Session material pulled off an incoming request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub bearer_token: Option<String>,
    pub session_cookie: Option<String>,
}

impl Credentials {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let bearer_token = headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(ToOwned::to_owned);

        let session_cookie = headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|raw| raw.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == SESSION_COOKIE)
            .map(|(_, value)| value.trim().to_string())
            .filter(|token| !token.is_empty());

        Self {
            bearer_token,
            session_cookie,
        }
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            bearer_token: Some(token.into()),
            session_cookie: None,
        }
    }

    /// Bearer wins over the cookie when both are present.
    pub fn token(&self) -> Option<&str> {
        self.bearer_token
            .as_deref()
            .or(self.session_cookie.as_deref())
    }
}

pub trait SessionGate: Send + Sync {
    fn resolve(&self, credentials: &Credentials) -> Result<Identity, InfraError>;
}

pub struct SqliteSessionGate {
    connection: Arc<Mutex<Connection>>,
    now_provider: NowProvider,
}

impl SqliteSessionGate {
    pub fn new(connection: Arc<Mutex<Connection>>) -> Self {
        Self {
            connection,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn insert_session(
        &self,
        token: &str,
        identity: &Identity,
        expires_at: DateTime<Utc>,
    ) -> Result<(), InfraError> {
        let connection = self.connection.lock().map_err(|error| {
            InfraError::StorageUnavailable(format!("store lock poisoned: {error}"))
        })?;
        connection.execute(
            "INSERT INTO session (token, user_id, expires_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(token) DO UPDATE SET
               user_id = excluded.user_id,
               expires_at = excluded.expires_at",
            params![token, identity.user_id(), expires_at.timestamp_millis()],
        )?;
        Ok(())
    }
}

impl SessionGate for SqliteSessionGate {
    fn resolve(&self, credentials: &Credentials) -> Result<Identity, InfraError> {
        let Some(token) = credentials.token() else {
            return Err(InfraError::Unauthenticated);
        };
        let now = (self.now_provider)().timestamp_millis();
        let connection = self.connection.lock().map_err(|error| {
            InfraError::StorageUnavailable(format!("store lock poisoned: {error}"))
        })?;
        let user_id: Option<String> = connection
            .query_row(
                "SELECT user_id FROM session WHERE token = ?1 AND expires_at > ?2",
                params![token, now],
                |row| row.get(0),
            )
            .optional()?;
        user_id
            .map(Identity::new)
            .ok_or(InfraError::Unauthenticated)
    }
}

#[derive(Debug, Default)]
pub struct InMemorySessionGate {
    sessions: Mutex<HashMap<String, Identity>>,
}

impl InMemorySessionGate {
    pub fn insert(&self, token: impl Into<String>, identity: Identity) -> Result<(), InfraError> {
        let mut sessions = self.sessions.lock().map_err(|error| {
            InfraError::StorageUnavailable(format!("session lock poisoned: {error}"))
        })?;
        sessions.insert(token.into(), identity);
        Ok(())
    }
}

impl SessionGate for InMemorySessionGate {
    fn resolve(&self, credentials: &Credentials) -> Result<Identity, InfraError> {
        let token = credentials.token().ok_or(InfraError::Unauthenticated)?;
        let sessions = self.sessions.lock().map_err(|error| {
            InfraError::StorageUnavailable(format!("session lock poisoned: {error}"))
        })?;
        sessions
            .get(token)
            .cloned()
            .ok_or(InfraError::Unauthenticated)
    }
}

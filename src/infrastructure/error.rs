use crate::domain::timer::TimerError;
use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("unauthorized")]
    Unauthenticated,
    #[error("{0}")]
    Validation(String),
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("timer error: {0}")]
    Timer(#[from] TimerError),
}

impl InfraError {
    /// Connectivity-class store failures, surfaced to callers as 503.
    pub fn is_storage_unavailable(&self) -> bool {
        match self {
            Self::StorageUnavailable(_) => true,
            Self::Sqlite(rusqlite::Error::SqliteFailure(failure, _)) => matches!(
                failure.code,
                ErrorCode::DatabaseBusy
                    | ErrorCode::DatabaseLocked
                    | ErrorCode::CannotOpen
                    | ErrorCode::SystemIoFailure
                    | ErrorCode::DiskFull
            ),
            _ => false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(message) => {
                let message = message.to_ascii_lowercase();
                message.contains("network error")
                    || message.contains("timeout")
                    || message.contains("timed out")
                    || message.contains("connection reset")
            }
            _ => self.is_storage_unavailable(),
        }
    }
}

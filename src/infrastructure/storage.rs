use crate::infrastructure::error::InfraError;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::time::Duration;

const SCHEMA_SQL: &str = include_str!("../../sql/schema.sql");
const MEMORY_URL: &str = ":memory:";
const CREDENTIAL_FINGERPRINT_KEY: &str = "store_credential_sha256";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Local file backing a store URL, if any.
pub fn database_file_path(store_url: &str) -> Result<Option<PathBuf>, InfraError> {
    let store_url = store_url.trim();
    if store_url.is_empty() {
        return Err(InfraError::InvalidConfig(
            "store url must not be empty".to_string(),
        ));
    }
    if store_url == MEMORY_URL {
        return Ok(None);
    }
    if let Some(rest) = store_url.strip_prefix("file:") {
        let path = rest.split('?').next().unwrap_or_default();
        if path.is_empty() || path == MEMORY_URL {
            return Ok(None);
        }
        return Ok(Some(PathBuf::from(path)));
    }
    if store_url.contains("://") {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported store url scheme: {store_url}"
        )));
    }
    Ok(Some(PathBuf::from(store_url)))
}

pub fn open_store_connection(store_url: &str) -> Result<Connection, InfraError> {
    let connection = match database_file_path(store_url)? {
        None if store_url.trim() == MEMORY_URL => Connection::open_in_memory(),
        _ => Connection::open(store_url.trim()),
    }
    .map_err(|error| InfraError::StorageUnavailable(format!("cannot open store: {error}")))?;
    connection.busy_timeout(BUSY_TIMEOUT)?;
    Ok(connection)
}

pub fn initialize_database(connection: &Connection) -> Result<(), InfraError> {
    connection.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

/// Pins the store to the first credential it was opened with.
pub fn verify_store_credential(connection: &Connection, credential: &str) -> Result<(), InfraError> {
    if credential.trim().is_empty() {
        return Err(InfraError::InvalidConfig(
            "store credential must not be empty".to_string(),
        ));
    }
    let fingerprint = hex::encode(Sha256::digest(credential.trim().as_bytes()));
    let stored: Option<String> = connection
        .query_row(
            "SELECT value FROM store_meta WHERE key = ?1",
            params![CREDENTIAL_FINGERPRINT_KEY],
            |row| row.get(0),
        )
        .optional()?;

    match stored {
        Some(existing) if existing == fingerprint => Ok(()),
        Some(_) => Err(InfraError::StorageUnavailable(
            "store credential rejected".to_string(),
        )),
        None => {
            connection.execute(
                "INSERT INTO store_meta (key, value) VALUES (?1, ?2)",
                params![CREDENTIAL_FINGERPRINT_KEY, fingerprint],
            )?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_urls_resolve_to_files() {
        assert_eq!(database_file_path(":memory:").expect("memory"), None);
        assert_eq!(
            database_file_path("file:state/focusboard.sqlite?mode=rwc").expect("uri"),
            Some(PathBuf::from("state/focusboard.sqlite"))
        );
        assert_eq!(
            database_file_path("state/focusboard.sqlite").expect("path"),
            Some(PathBuf::from("state/focusboard.sqlite"))
        );
        assert!(database_file_path("libsql://example.turso.io").is_err());
        assert!(database_file_path("  ").is_err());
    }

    #[test]
    fn store_rejects_a_different_credential() {
        let connection = open_store_connection(":memory:").expect("open");
        initialize_database(&connection).expect("schema");

        verify_store_credential(&connection, "first-token").expect("first open pins credential");
        verify_store_credential(&connection, "first-token").expect("same credential accepted");
        match verify_store_credential(&connection, "other-token") {
            Err(InfraError::StorageUnavailable(message)) => {
                assert!(message.contains("credential"));
            }
            other => panic!("expected storage unavailable, got {other:?}"),
        }
    }

    #[test]
    fn schema_is_idempotent() {
        let connection = open_store_connection(":memory:").expect("open");
        initialize_database(&connection).expect("first");
        initialize_database(&connection).expect("second");
    }
}

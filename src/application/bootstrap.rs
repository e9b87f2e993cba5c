use crate::infrastructure::config::ServiceConfig;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::record_store::SqliteRecordStore;
use crate::infrastructure::storage::database_file_path;
use std::fs;
use std::path::PathBuf;

#[derive(Debug)]
pub struct BootstrapResult {
    pub store: SqliteRecordStore,
    pub database_path: Option<PathBuf>,
}

/// Prepares the store directory, applies the schema and checks the store credential.
pub fn bootstrap_service(config: &ServiceConfig) -> Result<BootstrapResult, InfraError> {
    let database_path = database_file_path(&config.store_url)?;
    if let Some(parent) = database_path
        .as_deref()
        .and_then(|path| path.parent())
        .filter(|parent| !parent.as_os_str().is_empty())
    {
        fs::create_dir_all(parent)?;
    }

    let store = SqliteRecordStore::open(&config.store_url, &config.store_token)?;
    Ok(BootstrapResult {
        store,
        database_path,
    })
}

pub mod config;
pub mod dashboard_client;
pub mod error;
pub mod logging;
pub mod record_store;
pub mod session_gate;
pub mod settings_cache;
pub mod storage;

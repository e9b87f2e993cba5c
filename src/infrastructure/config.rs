use crate::infrastructure::error::InfraError;
use chrono_tz::Tz;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use url::Url;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";

const STORE_URL_KEYS: &[&str] = &["FOCUSBOARD_STORE_URL", "TURSO_CONNECTION_URL"];
const STORE_TOKEN_KEYS: &[&str] = &["FOCUSBOARD_STORE_TOKEN", "TURSO_AUTH_TOKEN"];
const BIND_ADDR_KEYS: &[&str] = &["FOCUSBOARD_BIND_ADDR"];
const LOG_DIR_KEYS: &[&str] = &["FOCUSBOARD_LOG_DIR"];
const API_URL_KEYS: &[&str] = &["FOCUSBOARD_API_URL"];
const SESSION_TOKEN_KEYS: &[&str] = &["FOCUSBOARD_SESSION_TOKEN"];
const TIMEZONE_KEYS: &[&str] = &["FOCUSBOARD_TIMEZONE"];
const CACHE_DIR_KEYS: &[&str] = &["FOCUSBOARD_CACHE_DIR"];

/// Server-side settings.
#[derive(Clone)]
pub struct ServiceConfig {
    pub store_url: String,
    pub store_token: String,
    pub bind_addr: SocketAddr,
    pub log_dir: Option<PathBuf>,
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ServiceConfig")
            .field("store_url", &self.store_url)
            .field("store_token", &"<redacted>")
            .field("bind_addr", &self.bind_addr)
            .field("log_dir", &self.log_dir)
            .finish()
    }
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, InfraError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, InfraError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let store_url = required_lookup_value(&lookup, STORE_URL_KEYS, "store url")?;
        let store_token = required_lookup_value(&lookup, STORE_TOKEN_KEYS, "store token")?;
        let raw_bind_addr = optional_lookup_value(&lookup, BIND_ADDR_KEYS)
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = raw_bind_addr.parse::<SocketAddr>().map_err(|error| {
            InfraError::InvalidConfig(format!("invalid bind address {raw_bind_addr}: {error}"))
        })?;
        let log_dir = optional_lookup_value(&lookup, LOG_DIR_KEYS).map(PathBuf::from);

        Ok(Self {
            store_url,
            store_token,
            bind_addr,
            log_dir,
        })
    }
}

/// Settings for a dashboard client process.
#[derive(Clone)]
pub struct ClientConfig {
    pub api_url: Url,
    pub session_token: String,
    pub timezone: Tz,
    pub cache_dir: Option<PathBuf>,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ClientConfig")
            .field("api_url", &self.api_url.as_str())
            .field("session_token", &"<redacted>")
            .field("timezone", &self.timezone)
            .field("cache_dir", &self.cache_dir)
            .finish()
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, InfraError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, InfraError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw_api_url = required_lookup_value(&lookup, API_URL_KEYS, "api url")?;
        let api_url = Url::parse(&raw_api_url).map_err(|error| {
            InfraError::InvalidConfig(format!("invalid api url {raw_api_url}: {error}"))
        })?;
        let session_token =
            required_lookup_value(&lookup, SESSION_TOKEN_KEYS, "session token")?;
        let timezone = match optional_lookup_value(&lookup, TIMEZONE_KEYS) {
            Some(name) => name.parse::<Tz>().map_err(|error| {
                InfraError::InvalidConfig(format!("invalid timezone {name}: {error}"))
            })?,
            None => chrono_tz::UTC,
        };
        let cache_dir = optional_lookup_value(&lookup, CACHE_DIR_KEYS).map(PathBuf::from);

        Ok(Self {
            api_url,
            session_token,
            timezone,
            cache_dir,
        })
    }
}

fn required_lookup_value<F>(
    lookup: &F,
    keys: &[&str],
    field_name: &str,
) -> Result<String, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    optional_lookup_value(lookup, keys).ok_or_else(|| {
        InfraError::InvalidConfig(format!(
            "missing {} (set one of: {})",
            field_name,
            keys.join(", ")
        ))
    })
}

fn optional_lookup_value<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    keys.iter()
        .filter_map(|key| lookup(key))
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_config_falls_back_to_turso_keys() {
        let config = ServiceConfig::from_lookup(|key| match key {
            "TURSO_CONNECTION_URL" => Some("state/focusboard.sqlite".to_string()),
            "TURSO_AUTH_TOKEN" => Some(" secret ".to_string()),
            _ => None,
        })
        .expect("config");

        assert_eq!(config.store_url, "state/focusboard.sqlite");
        assert_eq!(config.store_token, "secret");
        assert_eq!(config.bind_addr, "127.0.0.1:8080".parse().expect("addr"));
        assert_eq!(config.log_dir, None);
        assert!(!format!("{config:?}").contains("secret"));
    }

    #[test]
    fn primary_keys_win_over_fallbacks() {
        let config = ServiceConfig::from_lookup(|key| match key {
            "FOCUSBOARD_STORE_URL" => Some(":memory:".to_string()),
            "TURSO_CONNECTION_URL" => Some("ignored.sqlite".to_string()),
            "FOCUSBOARD_STORE_TOKEN" => Some("primary".to_string()),
            "FOCUSBOARD_BIND_ADDR" => Some("0.0.0.0:9000".to_string()),
            "FOCUSBOARD_LOG_DIR" => Some("logs".to_string()),
            _ => None,
        })
        .expect("config");

        assert_eq!(config.store_url, ":memory:");
        assert_eq!(config.store_token, "primary");
        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.log_dir, Some(PathBuf::from("logs")));
    }

    #[test]
    fn service_config_reports_missing_store_token() {
        let result = ServiceConfig::from_lookup(|key| match key {
            "FOCUSBOARD_STORE_URL" => Some(":memory:".to_string()),
            "TURSO_AUTH_TOKEN" => Some("   ".to_string()),
            _ => None,
        });
        match result {
            Err(InfraError::InvalidConfig(message)) => {
                assert!(message.contains("store token"));
                assert!(message.contains("TURSO_AUTH_TOKEN"));
            }
            other => panic!("expected invalid config error, got {other:?}"),
        }
    }

    #[test]
    fn client_config_parses_timezone() {
        let config = ClientConfig::from_lookup(|key| match key {
            "FOCUSBOARD_API_URL" => Some("http://127.0.0.1:8080".to_string()),
            "FOCUSBOARD_SESSION_TOKEN" => Some("token".to_string()),
            "FOCUSBOARD_TIMEZONE" => Some("Asia/Tokyo".to_string()),
            _ => None,
        })
        .expect("config");
        assert_eq!(config.timezone, chrono_tz::Asia::Tokyo);

        let invalid = ClientConfig::from_lookup(|key| match key {
            "FOCUSBOARD_API_URL" => Some("http://127.0.0.1:8080".to_string()),
            "FOCUSBOARD_SESSION_TOKEN" => Some("token".to_string()),
            "FOCUSBOARD_TIMEZONE" => Some("Mars/Olympus".to_string()),
            _ => None,
        });
        assert!(matches!(invalid, Err(InfraError::InvalidConfig(_))));
    }
}

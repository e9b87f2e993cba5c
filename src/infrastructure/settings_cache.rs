use crate::domain::models::ThemeSettings;
use crate::infrastructure::error::InfraError;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const SETTINGS_CACHE_KEY: &str = "theme_settings_v1";

/// Device-local copy of the display preferences, read before any network call.
pub trait SettingsCache: Send + Sync {
    fn load(&self) -> Result<Option<ThemeSettings>, InfraError>;
    fn save(&self, settings: &ThemeSettings) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct JsonFileSettingsCache {
    path: PathBuf,
}

impl JsonFileSettingsCache {
    pub fn new(cache_dir: &Path) -> Self {
        Self {
            path: cache_dir.join(format!("{SETTINGS_CACHE_KEY}.json")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsCache for JsonFileSettingsCache {
    fn load(&self) -> Result<Option<ThemeSettings>, InfraError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)?;
        // A corrupt cache is treated as empty; the server copy will replace it.
        Ok(serde_json::from_str(&raw).ok())
    }

    fn save(&self, settings: &ThemeSettings) -> Result<(), InfraError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let formatted = serde_json::to_string_pretty(settings)?;
        fs::write(&self.path, format!("{formatted}\n"))?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemorySettingsCache {
    value: Mutex<Option<ThemeSettings>>,
}

impl InMemorySettingsCache {
    pub fn with_value(settings: ThemeSettings) -> Self {
        Self {
            value: Mutex::new(Some(settings)),
        }
    }
}

impl SettingsCache for InMemorySettingsCache {
    fn load(&self) -> Result<Option<ThemeSettings>, InfraError> {
        let value = self.value.lock().map_err(|error| {
            InfraError::InvalidConfig(format!("settings cache lock poisoned: {error}"))
        })?;
        Ok(value.clone())
    }

    fn save(&self, settings: &ThemeSettings) -> Result<(), InfraError> {
        let mut value = self.value.lock().map_err(|error| {
            InfraError::InvalidConfig(format!("settings cache lock poisoned: {error}"))
        })?;
        *value = Some(settings.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_TEMP_DIR: AtomicUsize = AtomicUsize::new(0);

    struct TempDir {
        path: PathBuf,
    }

    impl TempDir {
        fn new() -> Self {
            let sequence = NEXT_TEMP_DIR.fetch_add(1, Ordering::Relaxed);
            let path = std::env::temp_dir().join(format!(
                "focusboard-settings-cache-tests-{}-{}",
                std::process::id(),
                sequence
            ));
            fs::create_dir_all(&path).expect("create temp dir");
            Self { path }
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.path);
        }
    }

    #[test]
    fn file_cache_persists_under_fixed_key() {
        let dir = TempDir::new();
        let cache = JsonFileSettingsCache::new(&dir.path);
        assert_eq!(cache.load().expect("empty load"), None);
        assert!(cache.path().ends_with("theme_settings_v1.json"));

        let theme = ThemeSettings {
            accent: "#112233".to_string(),
            dark: true,
        };
        cache.save(&theme).expect("save");

        let reopened = JsonFileSettingsCache::new(&dir.path);
        assert_eq!(reopened.load().expect("load"), Some(theme));
    }

    #[test]
    fn file_cache_accepts_integer_dark_flag_and_ignores_garbage() {
        let dir = TempDir::new();
        let cache = JsonFileSettingsCache::new(&dir.path);

        fs::write(cache.path(), r##"{"accent":"#abcdef","dark":1}"##).expect("write");
        assert_eq!(
            cache.load().expect("load"),
            Some(ThemeSettings {
                accent: "#abcdef".to_string(),
                dark: true,
            })
        );

        fs::write(cache.path(), "not json").expect("write");
        assert_eq!(cache.load().expect("load"), None);
    }

    #[test]
    fn in_memory_cache_replaces_value() {
        let cache = InMemorySettingsCache::default();
        assert_eq!(cache.load().expect("load"), None);
        cache.save(&ThemeSettings::default()).expect("save");
        assert_eq!(cache.load().expect("load"), Some(ThemeSettings::default()));
    }
}

// SPDX-License-Identifier: AGPL-3.0
// DataSync Core - Settings persistence
//
// Service settings, the last connection and the last filters are stored as
// plain JSON files in the platform config directory.

use crate::retry::RetryPolicy;
use crate::scheduler::ScheduleSettings;
use crate::types::AppError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;

/// Overrides the platform config directory when set
pub const CONFIG_DIR_ENV: &str = "DATASYNC_CONFIG_DIR";

pub const SERVICE_FILE: &str = "service.json";
pub const CONNECTION_FILE: &str = "connection.json";
pub const FILTERS_FILE: &str = "filters.json";
pub const LOGS_DIR: &str = "logs";

/// Daemon configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ServiceSettings {
    /// Logical IPC endpoint name shared by the service and its controllers
    pub pipe_name: String,
    /// Directory holding the Unix socket; the temp dir when unset
    pub socket_dir: Option<PathBuf>,
    pub schedule: ScheduleSettings,
    /// Transfer log directory; `<config dir>/logs` when unset
    pub logs_dir: Option<PathBuf>,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub ipc_timeout_ms: u64,
    pub max_message_bytes: usize,
    pub shutdown_timeout_secs: u64,
    pub default_max_results: usize,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            pipe_name: "DataSyncerPipe".to_string(),
            socket_dir: None,
            schedule: ScheduleSettings::default(),
            logs_dir: None,
            max_retries: 3,
            retry_delay_ms: 1000,
            ipc_timeout_ms: 5000,
            max_message_bytes: 1024 * 1024,
            shutdown_timeout_secs: 30,
            default_max_results: 100,
        }
    }
}

impl ServiceSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.retry_delay_ms))
    }

    pub fn ipc_timeout(&self) -> Duration {
        Duration::from_millis(self.ipc_timeout_ms.max(1))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Resolve the config directory and make sure it exists
pub fn config_dir() -> Result<PathBuf, AppError> {
    let config_dir = match std::env::var_os(CONFIG_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => directories::ProjectDirs::from("com", "datasync", "datasync")
            .ok_or_else(|| AppError::FileIo("Could not determine config directory".to_string()))?
            .config_dir()
            .to_path_buf(),
    };

    fs::create_dir_all(&config_dir)
        .map_err(|e| AppError::FileIo(format!("Failed to create config dir: {}", e)))?;

    Ok(config_dir)
}

/// Write `value` as pretty JSON, creating parent directories
pub fn save_json<T: Serialize>(value: &T, path: &Path) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| AppError::FileIo(format!("Failed to create {:?}: {}", parent, e)))?;
    }

    let content = serde_json::to_string_pretty(value)
        .map_err(|e| AppError::Serialization(format!("Failed to serialize {:?}: {}", path, e)))?;

    fs::write(path, content)
        .map_err(|e| AppError::FileIo(format!("Failed to write {:?}: {}", path, e)))
}

/// Read a JSON file. Missing or unreadable files yield `None`.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    if !path.exists() {
        return None;
    }

    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            tracing::warn!("Failed to read {:?}: {}", path, e);
            return None;
        }
    };

    match serde_json::from_str(&content) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("Failed to parse {:?}: {}", path, e);
            None
        }
    }
}

/// In-memory cache of service settings, persisted to disk on changes
pub struct SettingsStore {
    settings: RwLock<ServiceSettings>,
    config_dir: PathBuf,
    file_path: PathBuf,
}

impl SettingsStore {
    /// Open the store in the resolved config directory
    pub fn new() -> Result<Self, AppError> {
        Self::open(config_dir()?)
    }

    /// Open the store in an explicit directory
    pub fn open(config_dir: impl Into<PathBuf>) -> Result<Self, AppError> {
        let config_dir = config_dir.into();
        fs::create_dir_all(&config_dir)
            .map_err(|e| AppError::FileIo(format!("Failed to create config dir: {}", e)))?;

        let file_path = config_dir.join(SERVICE_FILE);
        tracing::info!("Settings file path: {:?}", file_path);

        let settings = if file_path.exists() {
            tracing::info!("Loading settings from disk");
            load_json(&file_path).unwrap_or_else(|| {
                tracing::warn!("Using default settings");
                ServiceSettings::default()
            })
        } else {
            tracing::info!("No settings file found, using defaults");
            ServiceSettings::default()
        };

        let store = Self {
            settings: RwLock::new(settings),
            config_dir,
            file_path,
        };

        if !store.file_path.exists() {
            tracing::info!("Creating initial settings file");
            store.persist()?;
        }

        Ok(store)
    }

    fn persist(&self) -> Result<(), AppError> {
        save_json(&self.get(), &self.file_path)
    }

    /// Get current settings
    pub fn get(&self) -> ServiceSettings {
        self.settings
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Update settings and persist to disk
    pub fn update(&self, new_settings: ServiceSettings) -> Result<(), AppError> {
        tracing::info!("Updating settings, pipe name: {}", new_settings.pipe_name);
        {
            let mut settings = self
                .settings
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *settings = new_settings;
        }

        let result = self.persist();
        if result.is_ok() {
            tracing::info!("Settings persisted successfully");
        } else {
            tracing::error!("Failed to persist settings: {:?}", result);
        }
        result
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.get()
            .logs_dir
            .unwrap_or_else(|| self.config_dir.join(LOGS_DIR))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ScheduleKind;

    #[test]
    fn test_default_settings() {
        let settings = ServiceSettings::default();
        assert_eq!(settings.pipe_name, "DataSyncerPipe");
        assert_eq!(settings.max_retries, 3);
        assert_eq!(settings.default_max_results, 100);
        assert_eq!(settings.max_message_bytes, 1024 * 1024);
        assert_eq!(settings.ipc_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_store_writes_initial_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::open(dir.path()).unwrap();

        assert!(dir.path().join(SERVICE_FILE).exists());
        assert_eq!(store.get(), ServiceSettings::default());
        assert_eq!(store.logs_dir(), dir.path().join(LOGS_DIR));
    }

    #[test]
    fn test_store_update_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::open(dir.path()).unwrap();

        let mut settings = store.get();
        settings.pipe_name = "OtherPipe".to_string();
        settings.schedule.kind = ScheduleKind::Interval { minutes: 15 };
        store.update(settings.clone()).unwrap();

        let reopened = SettingsStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get(), settings);
    }

    #[test]
    fn test_unparsable_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(SERVICE_FILE), "{ not json").unwrap();

        let store = SettingsStore::open(dir.path()).unwrap();
        assert_eq!(store.get(), ServiceSettings::default());
    }

    #[test]
    fn test_json_helpers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("value.json");

        assert_eq!(load_json::<Vec<u32>>(&path), None);
        save_json(&vec![1u32, 2, 3], &path).unwrap();
        assert_eq!(load_json::<Vec<u32>>(&path), Some(vec![1, 2, 3]));

        fs::write(&path, "garbage").unwrap();
        assert_eq!(load_json::<Vec<u32>>(&path), None);
    }
}

// SPDX-License-Identifier: AGPL-3.0
// DataSync Core - Current settings slot
//
// The connection and filters the service works with. Owned by the
// dispatcher and shared with the scheduled transfer job.

use crate::settings::{load_json, save_json, CONNECTION_FILE, FILTERS_FILE};
use crate::types::{AppError, ConnectionSettings, FilterSettings};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// A consistent snapshot of the slot
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CurrentSettings {
    pub connection: Option<ConnectionSettings>,
    pub filters: FilterSettings,
}

#[derive(Clone)]
pub struct SettingsSlot {
    current: Arc<RwLock<CurrentSettings>>,
    persist_dir: Option<PathBuf>,
    /// Serializes updates so the files match the last completed update
    updates: Arc<Mutex<()>>,
}

impl SettingsSlot {
    /// In-memory slot
    pub fn new(initial: CurrentSettings) -> Self {
        Self {
            current: Arc::new(RwLock::new(initial)),
            persist_dir: None,
            updates: Arc::default(),
        }
    }

    /// Slot seeded from, and saved to, `connection.json` / `filters.json` in `dir`
    pub fn load(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let initial = CurrentSettings {
            connection: load_json(&dir.join(CONNECTION_FILE)),
            filters: load_json(&dir.join(FILTERS_FILE)).unwrap_or_default(),
        };
        tracing::info!(
            "Settings slot loaded (connection configured: {})",
            initial.connection.is_some()
        );

        Self {
            current: Arc::new(RwLock::new(initial)),
            persist_dir: Some(dir),
            updates: Arc::default(),
        }
    }

    pub async fn snapshot(&self) -> CurrentSettings {
        self.current.read().await.clone()
    }

    pub async fn connection(&self) -> Option<ConnectionSettings> {
        self.current.read().await.connection.clone()
    }

    /// Replace the connection. The file is written before the swap, off the
    /// runtime and without holding the read/write lock.
    pub async fn update_connection(&self, connection: ConnectionSettings) {
        let _update = self.updates.lock().await;
        if let Err(e) = self.persist(connection.clone(), CONNECTION_FILE).await {
            tracing::warn!("Failed to persist connection settings: {}", e);
        }
        self.current.write().await.connection = Some(connection);
    }

    pub async fn update_filters(&self, filters: FilterSettings) {
        let _update = self.updates.lock().await;
        if let Err(e) = self.persist(filters.clone(), FILTERS_FILE).await {
            tracing::warn!("Failed to persist filter settings: {}", e);
        }
        self.current.write().await.filters = filters;
    }

    async fn persist<T>(&self, value: T, file: &str) -> Result<(), AppError>
    where
        T: Serialize + Send + 'static,
    {
        let Some(dir) = &self.persist_dir else {
            return Ok(());
        };
        let path = dir.join(file);
        tokio::task::spawn_blocking(move || save_json(&value, &path))
            .await
            .map_err(|e| AppError::FileIo(format!("Settings save task failed: {}", e)))?
    }
}

impl Default for SettingsSlot {
    fn default() -> Self {
        Self::new(CurrentSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Protocol;

    #[tokio::test]
    async fn test_updates_replace_whole_value() {
        let slot = SettingsSlot::default();
        assert!(slot.connection().await.is_none());

        let first = ConnectionSettings {
            protocol: Protocol::Ftp,
            host: "one".to_string(),
            ..ConnectionSettings::default()
        };
        let second = ConnectionSettings::local("/a", "/b");
        slot.update_connection(first).await;
        slot.update_connection(second.clone()).await;

        assert_eq!(slot.connection().await, Some(second));
    }

    #[tokio::test]
    async fn test_persisted_slot_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let slot = SettingsSlot::load(dir.path());
        let connection = ConnectionSettings::local("/in", "/out");
        let filters = FilterSettings {
            allowed_extensions: vec!["csv".to_string()],
            ..FilterSettings::default()
        };
        slot.update_connection(connection.clone()).await;
        slot.update_filters(filters.clone()).await;

        let reloaded = SettingsSlot::load(dir.path()).snapshot().await;
        assert_eq!(reloaded.connection, Some(connection));
        assert_eq!(reloaded.filters, filters);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_leave_file_matching_memory() {
        let dir = tempfile::tempdir().unwrap();
        let slot = SettingsSlot::load(dir.path());

        let mut tasks = Vec::new();
        for i in 0..16 {
            let slot = slot.clone();
            tasks.push(tokio::spawn(async move {
                let connection = ConnectionSettings::local(format!("/in/{}", i), "/out");
                slot.update_connection(connection).await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let reloaded = SettingsSlot::load(dir.path()).snapshot().await;
        assert_eq!(reloaded.connection, slot.connection().await);
    }
}

// SPDX-License-Identifier: AGPL-3.0
// DataSync Core - Local filesystem engine

use super::{apply_post_action, join_failure, resolve_single_destination, BatchRecorder, TransferEngine};
use crate::retry::RetryPolicy;
use crate::types::{AppError, ConnectionSettings, FileItem, FilterSettings, Protocol, TransferResult};
use async_trait::async_trait;
use std::fs;
use std::path::Path;
use std::time::Instant;
use uuid::Uuid;

/// Copies files on the same machine, mirroring the source layout
#[derive(Debug, Clone, Default)]
pub struct LocalEngine {
    retry: RetryPolicy,
}

impl LocalEngine {
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry }
    }

    fn copy_file(source: &Path, target: &Path, overwrite: bool) -> Result<u64, AppError> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| AppError::FileIo(format!("Failed to create {:?}: {}", parent, e)))?;
        }
        if !overwrite && target.exists() {
            return Err(AppError::AlreadyExists(target.display().to_string()));
        }
        fs::copy(source, target)
            .map_err(|e| AppError::FileIo(format!("Failed to copy {:?}: {}", source, e)))
    }

    fn copy_batch(
        retry: RetryPolicy,
        files: &[FileItem],
        connection: &ConnectionSettings,
        filters: &FilterSettings,
    ) -> TransferResult {
        let mut recorder = BatchRecorder::new(Protocol::Local);
        let root = Path::new(connection.destination());

        for file in files {
            let started = Instant::now();
            let target = root.join(&file.relative_path);
            let destination = target.to_string_lossy().to_string();

            let outcome = retry.run_blocking(&format!("copy {}", file.file_name), || {
                Self::copy_file(&file.full_path, &target, connection.overwrite_existing)
            });
            match outcome {
                Ok(bytes) => {
                    recorder.record_success(file, &destination, bytes, started);
                    apply_post_action(file, filters);
                }
                Err(e) => recorder.record_failure(file, &destination, &e, started),
            }
        }

        recorder.finish(connection)
    }

    /// Source must exist; destination must be writable or creatable
    fn check_writable(connection: &ConnectionSettings) -> Result<(), AppError> {
        let source = Path::new(connection.source());
        if !source.exists() {
            return Err(AppError::NotFound(format!(
                "Source path not found: {}",
                source.display()
            )));
        }

        let destination = Path::new(connection.destination());
        let created = Self::first_missing_ancestor(destination);
        fs::create_dir_all(destination)?;

        let marker = destination.join(format!("test_{}.tmp", Uuid::new_v4()));
        let written = fs::write(&marker, b"datasync").and_then(|_| fs::remove_file(&marker));

        // Leave the destination as it was found
        if let Some(created) = created {
            if let Err(e) = fs::remove_dir_all(&created) {
                tracing::debug!("Failed to remove test directory {:?}: {}", created, e);
            }
        }
        written.map_err(AppError::from)
    }

    /// Topmost directory that `create_dir_all(path)` would create
    fn first_missing_ancestor(path: &Path) -> Option<std::path::PathBuf> {
        let mut missing = None;
        let mut current = Some(path);
        while let Some(dir) = current {
            if dir.as_os_str().is_empty() || dir.exists() {
                break;
            }
            missing = Some(dir.to_path_buf());
            current = dir.parent();
        }
        missing
    }
}

#[async_trait]
impl TransferEngine for LocalEngine {
    fn protocol(&self) -> Protocol {
        Protocol::Local
    }

    async fn transfer_files(
        &self,
        files: &[FileItem],
        connection: &ConnectionSettings,
        filters: &FilterSettings,
    ) -> TransferResult {
        let retry = self.retry;
        let files = files.to_vec();
        let task_connection = connection.clone();
        let filters = filters.clone();

        tokio::task::spawn_blocking(move || {
            Self::copy_batch(retry, &files, &task_connection, &filters)
        })
        .await
        .unwrap_or_else(|e| join_failure(connection, Protocol::Local, e))
    }

    async fn test_connection(&self, connection: &ConnectionSettings) -> bool {
        let connection = connection.clone();
        match tokio::task::spawn_blocking(move || Self::check_writable(&connection)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::warn!("Local connection test failed: {}", e);
                false
            }
            Err(e) => {
                tracing::error!("Local connection test task failed: {}", e);
                false
            }
        }
    }

    async fn transfer_file(
        &self,
        connection: &ConnectionSettings,
        source: &str,
        destination: &str,
    ) -> bool {
        let retry = self.retry;
        let overwrite = connection.overwrite_existing;
        let source = crate::types::clean_path(source).to_string();
        let destination = crate::types::clean_path(destination).to_string();

        let outcome = tokio::task::spawn_blocking(move || {
            if !Path::new(&source).is_file() {
                return Err(AppError::NotFound(format!("Source file not found: {}", source)));
            }
            let target =
                resolve_single_destination(&source, &destination, Path::new(&destination).is_dir());
            retry.run_blocking("copy", || Self::copy_file(Path::new(&source), Path::new(&target), overwrite))
        })
        .await;

        match outcome {
            Ok(Ok(bytes)) => {
                tracing::info!("Copied single file ({} bytes)", bytes);
                true
            }
            Ok(Err(e)) => {
                tracing::error!("Single file copy failed: {}", e);
                false
            }
            Err(e) => {
                tracing::error!("Single file copy task failed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(root: &Path, relative: &str, content: &[u8]) -> FileItem {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        FileItem::from_metadata(&path, root, &fs::metadata(&path).unwrap())
    }

    #[tokio::test]
    async fn test_copies_and_preserves_relative_paths() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let files = vec![
            item(src.path(), "a.txt", b"0123456789"),
            item(src.path(), "nested/b.txt", b"abc"),
        ];
        let connection = ConnectionSettings::local(
            src.path().to_string_lossy(),
            dst.path().join("out").to_string_lossy(),
        );

        let result = LocalEngine::default()
            .transfer_files(&files, &connection, &FilterSettings::default())
            .await;

        assert!(result.success);
        assert_eq!(result.total_bytes, 13);
        assert_eq!(fs::read(dst.path().join("out/a.txt")).unwrap(), b"0123456789");
        assert_eq!(fs::read(dst.path().join("out/nested/b.txt")).unwrap(), b"abc");
    }

    #[tokio::test]
    async fn test_missing_source_file_fails_only_that_entry() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let good = item(src.path(), "good.txt", b"1");
        let gone = item(src.path(), "gone.txt", b"2");
        fs::remove_file(&gone.full_path).unwrap();

        let connection =
            ConnectionSettings::local(src.path().to_string_lossy(), dst.path().to_string_lossy());
        let engine = LocalEngine::new(RetryPolicy::once());
        let result = engine
            .transfer_files(&[gone, good], &connection, &FilterSettings::default())
            .await;

        assert!(!result.success);
        assert_eq!(result.files_failed, 1);
        assert_eq!(result.files_transferred, 1);
        assert!(dst.path().join("good.txt").exists());
    }

    #[tokio::test]
    async fn test_nested_test_directories_are_removed() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let connection = ConnectionSettings::local(
            src.path().to_string_lossy(),
            dst.path().join("a/b/c").to_string_lossy(),
        );

        assert!(LocalEngine::default().test_connection(&connection).await);
        assert!(!dst.path().join("a").exists());
    }

    #[tokio::test]
    async fn test_existing_target_fails_without_retrying() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let file = item(src.path(), "a.txt", b"new");
        fs::write(dst.path().join("a.txt"), b"old").unwrap();

        let connection = ConnectionSettings {
            overwrite_existing: false,
            ..ConnectionSettings::local(src.path().to_string_lossy(), dst.path().to_string_lossy())
        };
        let engine = LocalEngine::new(RetryPolicy::new(3, std::time::Duration::from_secs(5)));

        let started = Instant::now();
        let result = engine
            .transfer_files(&[file], &connection, &FilterSettings::default())
            .await;

        assert!(started.elapsed() < std::time::Duration::from_secs(5));
        assert_eq!(result.files_failed, 1);
        assert!(result.logs[0]
            .error_message
            .as_deref()
            .unwrap()
            .contains("already exists"));
        assert_eq!(fs::read(dst.path().join("a.txt")).unwrap(), b"old");
    }

    #[tokio::test]
    async fn test_connection_leaves_no_trace() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let engine = LocalEngine::default();

        let ok = ConnectionSettings::local(
            src.path().to_string_lossy(),
            dst.path().join("new").to_string_lossy(),
        );
        assert!(engine.test_connection(&ok).await);
        assert!(!dst.path().join("new").exists());

        let existing =
            ConnectionSettings::local(src.path().to_string_lossy(), dst.path().to_string_lossy());
        assert!(engine.test_connection(&existing).await);
        assert!(dst.path().exists());
        assert_eq!(fs::read_dir(dst.path()).unwrap().count(), 0);

        let missing = ConnectionSettings::local(
            src.path().join("nope").to_string_lossy(),
            dst.path().to_string_lossy(),
        );
        assert!(!engine.test_connection(&missing).await);
    }

    #[tokio::test]
    async fn test_single_file_into_directory() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let file = item(src.path(), "report.csv", b"a,b");
        let engine = LocalEngine::default();
        let connection = ConnectionSettings::default();

        assert!(
            engine
                .transfer_file(
                    &connection,
                    &file.full_path.to_string_lossy(),
                    &dst.path().to_string_lossy()
                )
                .await
        );
        assert!(dst.path().join("report.csv").exists());

        assert!(
            !engine
                .transfer_file(&connection, "/definitely/not/here.csv", &dst.path().to_string_lossy())
                .await
        );
    }
}

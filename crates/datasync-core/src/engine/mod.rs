// SPDX-License-Identifier: AGPL-3.0
// DataSync Core - Transfer engines
//
// One engine per protocol behind a common trait. Remote engines share the
// batch loop in this module and differ only in their blocking session.

pub mod ftp;
pub mod local;
pub mod sftp;

use crate::retry::RetryPolicy;
use crate::types::{
    AppError, ConnectionSettings, FileItem, FilterSettings, PostTransferAction, Protocol,
    TransferDirection, TransferLog, TransferResult,
};
use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

pub use ftp::FtpEngine;
pub use local::LocalEngine;
pub use sftp::SftpEngine;

/// A transfer backend
#[async_trait]
pub trait TransferEngine: Send + Sync {
    fn protocol(&self) -> Protocol;

    /// Transfer a batch sequentially. Per-file failures never abort the batch.
    async fn transfer_files(
        &self,
        files: &[FileItem],
        connection: &ConnectionSettings,
        filters: &FilterSettings,
    ) -> TransferResult;

    /// Minimal round trip without moving data
    async fn test_connection(&self, connection: &ConnectionSettings) -> bool;

    /// Transfer one file on demand. Diagnostics go to the log, not the caller.
    async fn transfer_file(
        &self,
        connection: &ConnectionSettings,
        source: &str,
        destination: &str,
    ) -> bool;

    /// Top-level listing of the remote source directory
    async fn list_remote(&self, _connection: &ConnectionSettings) -> Result<Vec<FileItem>, AppError> {
        Err(AppError::InvalidConfig(format!(
            "{} does not support remote listing",
            self.protocol()
        )))
    }
}

/// Collects per-file outcomes for one batch
pub(crate) struct BatchRecorder {
    protocol: Protocol,
    started: Instant,
    logs: Vec<TransferLog>,
}

impl BatchRecorder {
    pub(crate) fn new(protocol: Protocol) -> Self {
        Self {
            protocol,
            started: Instant::now(),
            logs: Vec::new(),
        }
    }

    pub(crate) fn record_success(&mut self, file: &FileItem, destination: &str, bytes: u64, started: Instant) {
        tracing::info!("Transferred {} -> {}", file.full_path.display(), destination);
        self.logs.push(TransferLog::success(
            &file.file_name,
            file.full_path.to_string_lossy(),
            destination,
            self.protocol,
            bytes,
            started.elapsed(),
            "File transferred successfully",
        ));
    }

    pub(crate) fn record_failure(&mut self, file: &FileItem, destination: &str, error: &AppError, started: Instant) {
        tracing::error!("Failed to transfer {}: {}", file.full_path.display(), error);
        self.logs.push(TransferLog::failure(
            &file.file_name,
            file.full_path.to_string_lossy(),
            destination,
            self.protocol,
            error.to_string(),
            started.elapsed(),
        ));
    }

    /// Mark every file failed, used when the session itself could not be opened
    pub(crate) fn fail_all(&mut self, files: &[FileItem], connection: &ConnectionSettings, error: &AppError) {
        for file in files {
            let destination = destination_for(file, connection);
            self.record_failure(file, &destination, error, Instant::now());
        }
    }

    pub(crate) fn finish(self, connection: &ConnectionSettings) -> TransferResult {
        let result = TransferResult::from_logs(
            connection,
            self.protocol,
            self.logs,
            0,
            self.started.elapsed(),
        );
        tracing::info!("{} batch finished: {}", self.protocol, result.message);
        result
    }
}

/// Failed result for a batch whose blocking task died
pub(crate) fn join_failure(
    connection: &ConnectionSettings,
    protocol: Protocol,
    err: tokio::task::JoinError,
) -> TransferResult {
    tracing::error!("{} transfer task failed: {}", protocol, err);
    TransferResult::failed(
        connection,
        protocol,
        format!("Transfer task failed: {}", err),
        std::time::Duration::ZERO,
    )
}

/// Where a batch item lands, as a display/remote path
pub(crate) fn destination_for(file: &FileItem, connection: &ConnectionSettings) -> String {
    let remote_target = connection.protocol.is_remote() && connection.direction == TransferDirection::Upload;
    if remote_target {
        remote_join(connection.destination(), &file.relative_path)
    } else {
        Path::new(connection.destination())
            .join(&file.relative_path)
            .to_string_lossy()
            .to_string()
    }
}

/// Join a relative path onto a remote directory using '/' separators
pub(crate) fn remote_join(base: &str, relative: &Path) -> String {
    let mut joined = base.trim_end_matches(['/', '\\']).to_string();
    for part in relative.components() {
        let part = part.as_os_str().to_string_lossy();
        if part.is_empty() || part == "/" {
            continue;
        }
        joined.push('/');
        joined.push_str(&part);
    }
    if joined.is_empty() {
        joined.push('/');
    }
    joined
}

/// Parent directory of a '/'-separated remote path
pub(crate) fn remote_parent(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    trimmed.rfind('/').map(|idx| &trimmed[..idx]).filter(|p| !p.is_empty())
}

/// Append the source file name when the destination names a directory
pub(crate) fn resolve_single_destination(source: &str, destination: &str, is_dir: bool) -> String {
    let ends_with_separator = destination.ends_with('/') || destination.ends_with('\\');
    if !(is_dir || ends_with_separator) {
        return destination.to_string();
    }

    let file_name = source
        .rsplit(['/', '\\'])
        .find(|s| !s.is_empty())
        .unwrap_or(source);
    format!("{}/{}", destination.trim_end_matches(['/', '\\']), file_name)
}

/// Delete or archive a local source after a successful transfer.
/// Failures are logged and never change the entry's status.
pub(crate) fn apply_post_action(file: &FileItem, filters: &FilterSettings) {
    let outcome = match filters.post_action {
        PostTransferAction::None => return,
        PostTransferAction::Delete => fs::remove_file(&file.full_path).map_err(AppError::from),
        PostTransferAction::Archive => {
            archive_file(&file.full_path, &Path::new(filters.archive_path.trim()).join(&file.relative_path))
        }
    };

    if let Err(e) = outcome {
        tracing::warn!(
            "Post-transfer {:?} failed for {}: {}",
            filters.post_action,
            file.full_path.display(),
            e
        );
    }
}

fn archive_file(source: &Path, target: &Path) -> Result<(), AppError> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    if fs::rename(source, target).is_ok() {
        return Ok(());
    }
    // Rename fails across filesystems
    fs::copy(source, target)?;
    fs::remove_file(source)?;
    Ok(())
}

/// A connected, authenticated remote session. Runs on a blocking thread.
pub(crate) trait RemoteSession {
    fn upload(&mut self, local: &Path, remote: &str) -> Result<u64, AppError>;

    fn download(&mut self, remote: &str, local: &Path) -> Result<u64, AppError>;

    fn exists(&mut self, remote: &str) -> bool;

    /// Create `dir` and any missing parents; existing directories are fine
    fn ensure_dir(&mut self, dir: &str);

    fn list(&mut self, dir: &str) -> Result<Vec<FileItem>, AppError>;

    fn close(&mut self);
}

/// Shared sequential batch loop for remote protocols
pub(crate) fn run_remote_batch<S: RemoteSession>(
    protocol: Protocol,
    session: Result<S, AppError>,
    files: &[FileItem],
    connection: &ConnectionSettings,
    filters: &FilterSettings,
    retry: RetryPolicy,
) -> TransferResult {
    let mut recorder = BatchRecorder::new(protocol);

    let mut session = match session {
        Ok(session) => session,
        Err(e) => {
            recorder.fail_all(files, connection, &e);
            return recorder.finish(connection);
        }
    };

    for file in files {
        let started = Instant::now();
        let destination = destination_for(file, connection);
        let outcome = retry.run_blocking(&format!("{} {}", protocol, file.file_name), || {
            move_one(&mut session, file, &destination, connection)
        });

        match outcome {
            Ok(bytes) => {
                recorder.record_success(file, &destination, bytes, started);
                if connection.direction == TransferDirection::Upload {
                    apply_post_action(file, filters);
                }
            }
            Err(e) => recorder.record_failure(file, &destination, &e, started),
        }
    }

    session.close();
    recorder.finish(connection)
}

fn move_one<S: RemoteSession>(
    session: &mut S,
    file: &FileItem,
    destination: &str,
    connection: &ConnectionSettings,
) -> Result<u64, AppError> {
    match connection.direction {
        TransferDirection::Upload => {
            if !connection.overwrite_existing && session.exists(destination) {
                return Err(AppError::AlreadyExists(destination.to_string()));
            }
            if let Some(parent) = remote_parent(destination) {
                session.ensure_dir(parent);
            }
            session.upload(&file.full_path, destination)
        }
        TransferDirection::Download => {
            let target = PathBuf::from(destination);
            if !connection.overwrite_existing && target.exists() {
                return Err(AppError::AlreadyExists(destination.to_string()));
            }
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            session.download(&file.full_path.to_string_lossy(), &target)
        }
    }
}

/// Single-file transfer over an already opened session
pub(crate) fn run_remote_single<S: RemoteSession>(
    session: Result<S, AppError>,
    connection: &ConnectionSettings,
    source: &str,
    destination: &str,
    retry: RetryPolicy,
) -> Result<u64, AppError> {
    let mut session = session?;
    let outcome = retry.run_blocking("single file transfer", || match connection.direction {
        TransferDirection::Upload => {
            let local = Path::new(source);
            if !local.is_file() {
                return Err(AppError::NotFound(format!("Source file not found: {}", source)));
            }
            let target = resolve_single_destination(source, destination, false);
            if let Some(parent) = remote_parent(&target) {
                session.ensure_dir(parent);
            }
            session.upload(local, &target)
        }
        TransferDirection::Download => {
            let target = resolve_single_destination(source, destination, Path::new(destination).is_dir());
            let target = PathBuf::from(target);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            session.download(source, &target)
        }
    });
    session.close();
    outcome
}

/// Build a FileItem for a remote listing entry
pub(crate) fn remote_item(
    dir: &str,
    name: &str,
    size: u64,
    modified: Option<chrono::DateTime<chrono::Utc>>,
) -> FileItem {
    FileItem {
        file_name: name.to_string(),
        full_path: PathBuf::from(remote_join(dir, Path::new(name))),
        relative_path: PathBuf::from(name),
        depth: 0,
        size_bytes: size,
        last_modified: modified.unwrap_or_else(chrono::Utc::now),
    }
}

// SPDX-License-Identifier: AGPL-3.0
// DataSync Core - SFTP engine

use super::ftp::resolve;
use super::{join_failure, remote_item, run_remote_batch, run_remote_single, RemoteSession, TransferEngine};
use crate::retry::RetryPolicy;
use crate::types::{AppError, ConnectionSettings, FileItem, FilterSettings, Protocol, TransferResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ssh2::{HashType, Session, Sftp};
use std::fs::File;
use std::io;
use std::net::TcpStream;
use std::path::Path;

/// SFTP backend built on libssh2
#[derive(Debug, Clone, Default)]
pub struct SftpEngine {
    retry: RetryPolicy,
}

impl SftpEngine {
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry }
    }
}

fn ssh_error(err: ssh2::Error) -> AppError {
    AppError::Remote(err.to_string())
}

/// Lowercase hex without separators
fn fingerprint_hex(hash: &[u8]) -> String {
    hash.iter().map(|b| format!("{:02x}", b)).collect()
}

fn normalize_fingerprint(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| *c != ':')
        .collect::<String>()
        .to_lowercase()
}

pub(crate) struct SftpSession {
    session: Session,
    sftp: Sftp,
}

impl SftpSession {
    pub(crate) fn connect(connection: &ConnectionSettings) -> Result<Self, AppError> {
        let addr = resolve(connection)?;
        let timeout = connection.timeout();

        let tcp = TcpStream::connect_timeout(&addr, timeout).map_err(AppError::from)?;
        tcp.set_read_timeout(Some(timeout)).map_err(AppError::from)?;

        let mut session = Session::new().map_err(ssh_error)?;
        session.set_tcp_stream(tcp);
        session.set_timeout(u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX));
        session
            .handshake()
            .map_err(|e| AppError::Network(format!("SSH handshake failed: {}", e)))?;

        if let Some(expected) = connection.host_key_fingerprint.as_deref() {
            let actual = session
                .host_key_hash(HashType::Sha256)
                .map(fingerprint_hex)
                .ok_or_else(|| AppError::Authentication("Server sent no host key".to_string()))?;
            if normalize_fingerprint(expected) != actual {
                return Err(AppError::Authentication(format!(
                    "Host key mismatch for {}: got {}",
                    addr, actual
                )));
            }
        }

        session
            .userauth_password(&connection.username, &connection.password)
            .map_err(|e| AppError::Authentication(e.to_string()))?;
        if !session.authenticated() {
            return Err(AppError::Authentication(
                "Server rejected the credentials".to_string(),
            ));
        }

        let sftp = session.sftp().map_err(ssh_error)?;
        tracing::debug!("SFTP session open to {}", addr);
        Ok(Self { session, sftp })
    }

    pub(crate) fn stat_root(&self) -> Result<(), AppError> {
        self.sftp.stat(Path::new(".")).map(|_| ()).map_err(ssh_error)
    }
}

impl RemoteSession for SftpSession {
    fn upload(&mut self, local: &Path, remote: &str) -> Result<u64, AppError> {
        let mut source = File::open(local)?;
        let mut target = self.sftp.create(Path::new(remote)).map_err(ssh_error)?;
        io::copy(&mut source, &mut target).map_err(AppError::from)
    }

    fn download(&mut self, remote: &str, local: &Path) -> Result<u64, AppError> {
        let mut source = self.sftp.open(Path::new(remote)).map_err(ssh_error)?;
        let mut target = File::create(local)?;
        io::copy(&mut source, &mut target).map_err(AppError::from)
    }

    fn exists(&mut self, remote: &str) -> bool {
        self.sftp.stat(Path::new(remote)).is_ok()
    }

    fn ensure_dir(&mut self, dir: &str) {
        let mut current = String::new();
        if dir.starts_with('/') {
            current.push('/');
        }
        for part in dir.split('/').filter(|p| !p.is_empty()) {
            if !current.is_empty() && !current.ends_with('/') {
                current.push('/');
            }
            current.push_str(part);
            let path = Path::new(&current);
            if self.sftp.stat(path).is_err() {
                if let Err(e) = self.sftp.mkdir(path, 0o755) {
                    tracing::debug!("SFTP mkdir {} failed: {}", current, e);
                }
            }
        }
    }

    fn list(&mut self, dir: &str) -> Result<Vec<FileItem>, AppError> {
        let entries = self.sftp.readdir(Path::new(dir)).map_err(ssh_error)?;

        Ok(entries
            .into_iter()
            .filter(|(_, stat)| stat.is_file())
            .filter_map(|(path, stat)| {
                let name = path.file_name()?.to_string_lossy().to_string();
                let modified = stat
                    .mtime
                    .and_then(|t| i64::try_from(t).ok())
                    .and_then(|t| DateTime::<Utc>::from_timestamp(t, 0));
                Some(remote_item(dir, &name, stat.size.unwrap_or(0), modified))
            })
            .collect())
    }

    fn close(&mut self) {
        if let Err(e) = self.session.disconnect(None, "closing", None) {
            tracing::debug!("SFTP disconnect failed: {}", e);
        }
    }
}

#[async_trait]
impl TransferEngine for SftpEngine {
    fn protocol(&self) -> Protocol {
        Protocol::Sftp
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
            let session = SftpSession::connect(&task_connection);
            run_remote_batch(Protocol::Sftp, session, &files, &task_connection, &filters, retry)
        })
        .await
        .unwrap_or_else(|e| join_failure(connection, Protocol::Sftp, e))
    }

    async fn test_connection(&self, connection: &ConnectionSettings) -> bool {
        let connection = connection.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            let mut session = SftpSession::connect(&connection)?;
            let stat = session.stat_root();
            session.close();
            stat
        })
        .await;

        match outcome {
            Ok(Ok(())) => {
                tracing::info!("SFTP connection test succeeded");
                true
            }
            Ok(Err(e)) => {
                tracing::warn!("SFTP connection test failed: {}", e);
                false
            }
            Err(e) => {
                tracing::error!("SFTP connection test task failed: {}", e);
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
        let connection = connection.clone();
        let source = crate::types::clean_path(source).to_string();
        let destination = crate::types::clean_path(destination).to_string();

        let outcome = tokio::task::spawn_blocking(move || {
            run_remote_single(SftpSession::connect(&connection), &connection, &source, &destination, retry)
        })
        .await;

        match outcome {
            Ok(Ok(bytes)) => {
                tracing::info!("SFTP single file transfer finished ({} bytes)", bytes);
                true
            }
            Ok(Err(e)) => {
                tracing::error!("SFTP single file transfer failed: {}", e);
                false
            }
            Err(e) => {
                tracing::error!("SFTP single file transfer task failed: {}", e);
                false
            }
        }
    }

    async fn list_remote(&self, connection: &ConnectionSettings) -> Result<Vec<FileItem>, AppError> {
        let connection = connection.clone();
        tokio::task::spawn_blocking(move || {
            let mut session = SftpSession::connect(&connection)?;
            let listed = session.list(connection.source());
            session.close();
            listed
        })
        .await
        .map_err(|e| AppError::Remote(format!("SFTP listing task failed: {}", e)))?
    }
}

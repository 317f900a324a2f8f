// SPDX-License-Identifier: AGPL-3.0
// DataSync Core - FTP engine

use super::{join_failure, remote_item, run_remote_batch, run_remote_single, RemoteSession, TransferEngine};
use crate::retry::RetryPolicy;
use crate::types::{AppError, ConnectionSettings, FileItem, FilterSettings, Protocol, TransferResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fs::{self, File};
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;
use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream, Mode};

/// FTP backend built on suppaftp's blocking client
#[derive(Debug, Clone, Default)]
pub struct FtpEngine {
    retry: RetryPolicy,
}

impl FtpEngine {
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry }
    }
}

/// Resolve host and port to the first socket address
pub(crate) fn resolve(connection: &ConnectionSettings) -> Result<SocketAddr, AppError> {
    let port = connection.socket_port()?;
    let host = connection.host.trim();
    (host, port)
        .to_socket_addrs()
        .map_err(|e| AppError::Network(format!("Cannot resolve {}: {}", host, e)))?
        .next()
        .ok_or_else(|| AppError::Network(format!("No address found for {}", host)))
}

fn ftp_error(err: FtpError) -> AppError {
    match err {
        FtpError::ConnectionError(e) => AppError::from(e),
        other => AppError::Remote(other.to_string()),
    }
}

pub(crate) struct FtpSession {
    stream: FtpStream,
}

impl FtpSession {
    pub(crate) fn connect(connection: &ConnectionSettings) -> Result<Self, AppError> {
        let addr = resolve(connection)?;
        let timeout = connection.timeout();

        let mut stream = FtpStream::connect_timeout(addr, timeout).map_err(ftp_error)?;
        stream
            .get_ref()
            .set_read_timeout(Some(timeout))
            .map_err(AppError::from)?;

        stream
            .login(connection.username.as_str(), connection.password.as_str())
            .map_err(|e| AppError::Authentication(e.to_string()))?;

        stream.set_mode(if connection.use_passive_mode {
            Mode::Passive
        } else {
            Mode::Active
        });
        stream.transfer_type(FileType::Binary).map_err(ftp_error)?;

        tracing::debug!("FTP session open to {}", addr);
        Ok(Self { stream })
    }

    pub(crate) fn working_dir(&mut self) -> Result<String, AppError> {
        self.stream.pwd().map_err(ftp_error)
    }
}

impl RemoteSession for FtpSession {
    fn upload(&mut self, local: &Path, remote: &str) -> Result<u64, AppError> {
        let mut file = File::open(local)?;
        self.stream.put_file(remote, &mut file).map_err(ftp_error)
    }

    fn download(&mut self, remote: &str, local: &Path) -> Result<u64, AppError> {
        let buffer = self.stream.retr_as_buffer(remote).map_err(ftp_error)?;
        let bytes = buffer.into_inner();
        fs::write(local, &bytes)?;
        Ok(bytes.len() as u64)
    }

    fn exists(&mut self, remote: &str) -> bool {
        self.stream.size(remote).is_ok()
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
            // Fails with 550 when the directory already exists
            let _ = self.stream.mkdir(&current);
        }
    }

    fn list(&mut self, dir: &str) -> Result<Vec<FileItem>, AppError> {
        let names = self.stream.nlst(Some(dir)).map_err(ftp_error)?;
        let mut items = Vec::new();

        for entry in names {
            let name = entry.rsplit('/').next().unwrap_or(&entry).to_string();
            if name.is_empty() || name == "." || name == ".." {
                continue;
            }
            let path = super::remote_join(dir, Path::new(&name));
            // SIZE fails for directories, which keeps the listing to plain files
            let Ok(size) = self.stream.size(&path) else {
                continue;
            };
            let modified = self
                .stream
                .mdtm(&path)
                .ok()
                .map(|t| DateTime::<Utc>::from_naive_utc_and_offset(t, Utc));
            items.push(remote_item(dir, &name, size as u64, modified));
        }

        Ok(items)
    }

    fn close(&mut self) {
        if let Err(e) = self.stream.quit() {
            tracing::debug!("FTP quit failed: {}", e);
        }
    }
}

#[async_trait]
impl TransferEngine for FtpEngine {
    fn protocol(&self) -> Protocol {
        Protocol::Ftp
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
            let session = FtpSession::connect(&task_connection);
            run_remote_batch(Protocol::Ftp, session, &files, &task_connection, &filters, retry)
        })
        .await
        .unwrap_or_else(|e| join_failure(connection, Protocol::Ftp, e))
    }

    async fn test_connection(&self, connection: &ConnectionSettings) -> bool {
        let connection = connection.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            let mut session = FtpSession::connect(&connection)?;
            let pwd = session.working_dir();
            session.close();
            pwd
        })
        .await;

        match outcome {
            Ok(Ok(pwd)) => {
                tracing::info!("FTP connection test succeeded, working directory {}", pwd);
                true
            }
            Ok(Err(e)) => {
                tracing::warn!("FTP connection test failed: {}", e);
                false
            }
            Err(e) => {
                tracing::error!("FTP connection test task failed: {}", e);
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
            run_remote_single(FtpSession::connect(&connection), &connection, &source, &destination, retry)
        })
        .await;

        match outcome {
            Ok(Ok(bytes)) => {
                tracing::info!("FTP single file transfer finished ({} bytes)", bytes);
                true
            }
            Ok(Err(e)) => {
                tracing::error!("FTP single file transfer failed: {}", e);
                false
            }
            Err(e) => {
                tracing::error!("FTP single file transfer task failed: {}", e);
                false
            }
        }
    }

    async fn list_remote(&self, connection: &ConnectionSettings) -> Result<Vec<FileItem>, AppError> {
        let connection = connection.clone();
        tokio::task::spawn_blocking(move || {
            let mut session = FtpSession::connect(&connection)?;
            let listed = session.list(connection.source());
            session.close();
            listed
        })
        .await
        .map_err(|e| AppError::Remote(format!("FTP listing task failed: {}", e)))?
    }
}

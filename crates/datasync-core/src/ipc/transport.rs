// SPDX-License-Identifier: AGPL-3.0
// DataSync Core - IPC transport
//
// Unix domain sockets on Unix, named pipes on Windows. Both sides exchange
// length-prefixed frames over a boxed byte stream.

use crate::types::AppError;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

pub trait IpcIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> IpcIo for T {}

pub type IpcStream = Box<dyn IpcIo>;

/// 4-byte big-endian length prefix, bounded frame size
pub fn framed(stream: IpcStream, max_frame_bytes: usize) -> Framed<IpcStream, LengthDelimitedCodec> {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .big_endian()
        .max_frame_length(max_frame_bytes)
        .new_framed(stream)
}

/// Where the service listens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpcEndpoint {
    name: String,
    path: PathBuf,
}

impl IpcEndpoint {
    /// Endpoint for a logical name. On Unix the socket lives in `socket_dir`,
    /// or the temp dir when none is given.
    pub fn new(name: &str, socket_dir: Option<&Path>) -> Self {
        Self {
            name: name.to_string(),
            path: Self::default_path(name, socket_dir),
        }
    }

    /// Endpoint at an explicit socket or pipe path
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        Self { name, path }
    }

    #[cfg(unix)]
    fn default_path(name: &str, socket_dir: Option<&Path>) -> PathBuf {
        socket_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(std::env::temp_dir)
            .join(format!("{}.sock", name))
    }

    #[cfg(windows)]
    fn default_path(name: &str, _socket_dir: Option<&Path>) -> PathBuf {
        PathBuf::from(format!(r"\\.\pipe\{}", name))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
pub use unix::{connect, IpcListener};

#[cfg(windows)]
pub use windows::{connect, IpcListener};

#[cfg(unix)]
mod unix {
    use super::*;
    use tokio::net::{UnixListener, UnixStream};

    pub struct IpcListener {
        listener: UnixListener,
        path: PathBuf,
    }

    impl IpcListener {
        /// Bind the socket, replacing a stale file left by a dead service
        pub fn bind(endpoint: &IpcEndpoint) -> Result<Self, AppError> {
            let path = endpoint.path().to_path_buf();

            if path.exists() {
                if std::os::unix::net::UnixStream::connect(&path).is_ok() {
                    return Err(AppError::Ipc(format!(
                        "Another service is already listening on {:?}",
                        path
                    )));
                }
                tracing::warn!("Removing stale socket {:?}", path);
                std::fs::remove_file(&path)?;
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let listener = UnixListener::bind(&path)
                .map_err(|e| AppError::Ipc(format!("Failed to bind {:?}: {}", path, e)))?;
            tracing::info!("IPC listening on {:?}", path);
            Ok(Self { listener, path })
        }

        pub async fn accept(&mut self) -> Result<IpcStream, AppError> {
            let (stream, _) = self
                .listener
                .accept()
                .await
                .map_err(|e| AppError::Ipc(format!("Accept failed: {}", e)))?;
            Ok(Box::new(stream))
        }
    }

    impl Drop for IpcListener {
        fn drop(&mut self) {
            if let Err(e) = std::fs::remove_file(&self.path) {
                tracing::debug!("Failed to remove socket {:?}: {}", self.path, e);
            }
        }
    }

    pub async fn connect(endpoint: &IpcEndpoint, timeout: Duration) -> Result<IpcStream, AppError> {
        let stream = tokio::time::timeout(timeout, UnixStream::connect(endpoint.path()))
            .await
            .map_err(|_| AppError::Timeout(format!("Connecting to {:?}", endpoint.path())))?
            .map_err(|e| AppError::Ipc(format!("Cannot reach service at {:?}: {}", endpoint.path(), e)))?;
        Ok(Box::new(stream))
    }
}

#[cfg(windows)]
mod windows {
    use super::*;
    use tokio::net::windows::named_pipe::{ClientOptions, NamedPipeServer, ServerOptions};
    use tokio::time::Instant;

    const ERROR_PIPE_BUSY: i32 = 231;

    pub struct IpcListener {
        path: PathBuf,
        next: NamedPipeServer,
    }

    impl IpcListener {
        pub fn bind(endpoint: &IpcEndpoint) -> Result<Self, AppError> {
            let path = endpoint.path().to_path_buf();
            let next = ServerOptions::new()
                .first_pipe_instance(true)
                .create(&path)
                .map_err(|e| AppError::Ipc(format!("Failed to create pipe {:?}: {}", path, e)))?;
            tracing::info!("IPC listening on {:?}", path);
            Ok(Self { path, next })
        }

        /// Hand out the connected instance and open the next one
        pub async fn accept(&mut self) -> Result<IpcStream, AppError> {
            self.next
                .connect()
                .await
                .map_err(|e| AppError::Ipc(format!("Pipe connect failed: {}", e)))?;
            let fresh = ServerOptions::new()
                .create(&self.path)
                .map_err(|e| AppError::Ipc(format!("Failed to create pipe: {}", e)))?;
            let connected = std::mem::replace(&mut self.next, fresh);
            Ok(Box::new(connected))
        }
    }

    pub async fn connect(endpoint: &IpcEndpoint, timeout: Duration) -> Result<IpcStream, AppError> {
        let deadline = Instant::now() + timeout;
        loop {
            match ClientOptions::new().open(endpoint.path()) {
                Ok(client) => return Ok(Box::new(client)),
                Err(e)
                    if e.raw_os_error() == Some(ERROR_PIPE_BUSY)
                        || e.kind() == std::io::ErrorKind::NotFound =>
                {
                    if Instant::now() >= deadline {
                        return Err(AppError::Timeout(format!(
                            "Connecting to {:?}",
                            endpoint.path()
                        )));
                    }
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                Err(e) => {
                    return Err(AppError::Ipc(format!(
                        "Cannot reach service at {:?}: {}",
                        endpoint.path(),
                        e
                    )))
                }
            }
        }
    }
}

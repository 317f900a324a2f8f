// SPDX-License-Identifier: AGPL-3.0
// DataSync Core - Command channel
//
// One request frame and one response frame per connection.

pub mod envelope;
pub mod transport;

pub use envelope::{CommandEnvelope, ResponseEnvelope};
pub use transport::{IpcEndpoint, IpcListener, IpcStream};

use crate::types::AppError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Turns one request frame into a response
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, frame: &[u8]) -> ResponseEnvelope;
}

/// Connection lifecycle, traced at debug level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Reading,
    Dispatching,
    Responding,
    Closed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Reading => "reading",
            Self::Dispatching => "dispatching",
            Self::Responding => "responding",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Server side of the channel
pub struct IpcServer {
    listener: IpcListener,
    handler: Arc<dyn CommandHandler>,
    timeout: Duration,
    max_message_bytes: usize,
    connections: TaskTracker,
}

impl IpcServer {
    pub fn bind(
        endpoint: &IpcEndpoint,
        handler: Arc<dyn CommandHandler>,
        timeout: Duration,
        max_message_bytes: usize,
    ) -> Result<Self, AppError> {
        Ok(Self {
            listener: IpcListener::bind(endpoint)?,
            handler,
            timeout,
            max_message_bytes,
            connections: TaskTracker::new(),
        })
    }

    /// Accept until `shutdown` fires. Accept errors are logged and never end
    /// the loop.
    pub async fn run(&mut self, shutdown: CancellationToken) {
        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok(stream) => {
                    let handler = self.handler.clone();
                    let timeout = self.timeout;
                    let max = self.max_message_bytes;
                    self.connections
                        .spawn(async move { serve_connection(stream, handler, timeout, max).await });
                }
                Err(e) => {
                    tracing::error!("IPC accept failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
        tracing::info!("IPC listener stopped accepting");
    }

    /// Wait for in-flight connections. False when the deadline passed first.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.connections.close();
        tokio::time::timeout(timeout, self.connections.wait())
            .await
            .is_ok()
    }
}

async fn serve_connection(
    stream: IpcStream,
    handler: Arc<dyn CommandHandler>,
    timeout: Duration,
    max_message_bytes: usize,
) {
    let mut phase = Phase::Idle;
    tracing::debug!("IPC connection {}", phase);
    let mut framed = transport::framed(stream, max_message_bytes);

    phase = Phase::Reading;
    tracing::debug!("IPC connection {}", phase);
    let frame = match tokio::time::timeout(timeout, framed.next()).await {
        Ok(Some(Ok(frame))) => frame,
        Ok(Some(Err(e))) => {
            tracing::warn!("IPC read failed: {}", e);
            return;
        }
        Ok(None) => {
            tracing::debug!("IPC client closed before sending");
            return;
        }
        Err(_) => {
            tracing::warn!("IPC read timed out after {:?}", timeout);
            return;
        }
    };

    phase = Phase::Dispatching;
    tracing::debug!("IPC connection {} ({} bytes)", phase, frame.len());
    let response = handler.handle(&frame).await;

    phase = Phase::Responding;
    tracing::debug!("IPC connection {}", phase);
    match response.to_bytes() {
        Ok(bytes) => {
            if let Err(e) = framed.send(Bytes::from(bytes)).await {
                tracing::warn!("IPC write failed: {}", e);
            }
        }
        Err(e) => tracing::error!("Failed to encode response: {}", e),
    }

    phase = Phase::Closed;
    tracing::debug!("IPC connection {}", phase);
}

/// Client side of the channel
#[derive(Debug, Clone)]
pub struct IpcClient {
    endpoint: IpcEndpoint,
    timeout: Duration,
    max_message_bytes: usize,
}

impl IpcClient {
    pub fn new(endpoint: IpcEndpoint, timeout: Duration) -> Self {
        Self {
            endpoint,
            timeout,
            max_message_bytes: 1024 * 1024,
        }
    }

    pub fn with_max_message_bytes(mut self, max_message_bytes: usize) -> Self {
        self.max_message_bytes = max_message_bytes;
        self
    }

    /// Open a connection. Nothing has been sent yet, so this step is safe to
    /// retry.
    pub async fn connect(&self) -> Result<IpcConnection, AppError> {
        let stream = transport::connect(&self.endpoint, self.timeout).await?;
        Ok(IpcConnection {
            framed: transport::framed(stream, self.max_message_bytes),
        })
    }

    /// Send one command and wait for its response
    pub async fn send(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope, AppError> {
        self.connect().await?.exchange(envelope, self.timeout).await
    }

    pub async fn command(&self, name: &str) -> Result<ResponseEnvelope, AppError> {
        self.send(&CommandEnvelope::new(name)).await
    }
}

/// A connected channel carrying a single request
pub struct IpcConnection {
    framed: Framed<IpcStream, LengthDelimitedCodec>,
}

impl IpcConnection {
    /// Write the request and wait up to `response_timeout` for the answer.
    /// The service may have acted on the request even when this fails.
    pub async fn exchange(
        mut self,
        envelope: &CommandEnvelope,
        response_timeout: Duration,
    ) -> Result<ResponseEnvelope, AppError> {
        self.framed
            .send(Bytes::from(envelope.to_bytes()?))
            .await
            .map_err(|e| AppError::Ipc(format!("Failed to send command: {}", e)))?;

        let frame = tokio::time::timeout(response_timeout, self.framed.next())
            .await
            .map_err(|_| AppError::Timeout(format!("No response within {:?}", response_timeout)))?
            .ok_or_else(|| AppError::Ipc("Service closed the connection".to_string()))?
            .map_err(|e| AppError::Ipc(format!("Failed to read response: {}", e)))?;

        ResponseEnvelope::from_slice(&frame)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl CommandHandler for Echo {
        async fn handle(&self, frame: &[u8]) -> ResponseEnvelope {
            match CommandEnvelope::from_slice(frame) {
                Ok(envelope) => ResponseEnvelope::ok(envelope.command),
                Err(e) => ResponseEnvelope::failure(e.to_string()),
            }
        }
    }

    fn spawn_server(endpoint: &IpcEndpoint, timeout: Duration) -> (CancellationToken, tokio::task::JoinHandle<IpcServer>) {
        let mut server = IpcServer::bind(endpoint, Arc::new(Echo), timeout, 64 * 1024).unwrap();
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let handle = tokio::spawn(async move {
            server.run(token).await;
            server
        });
        (shutdown, handle)
    }

    #[tokio::test]
    async fn test_request_response_over_socket() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = IpcEndpoint::new("echo", Some(dir.path()));
        let (shutdown, handle) = spawn_server(&endpoint, Duration::from_secs(2));

        let client = IpcClient::new(endpoint.clone(), Duration::from_secs(2));
        for name in ["PING", "GET_LOGS"] {
            let response = client.command(name).await.unwrap();
            assert!(response.success);
            assert_eq!(response.message, name);
        }

        shutdown.cancel();
        let server = handle.await.unwrap();
        assert!(server.drain(Duration::from_secs(1)).await);
        drop(server);
        assert!(!endpoint.path().exists());
    }

    #[tokio::test]
    async fn test_garbage_frame_gets_failure_response() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = IpcEndpoint::new("garbage", Some(dir.path()));
        let (shutdown, _handle) = spawn_server(&endpoint, Duration::from_secs(2));

        let stream = transport::connect(&endpoint, Duration::from_secs(1)).await.unwrap();
        let mut framed = transport::framed(stream, 64 * 1024);
        framed.send(Bytes::from_static(b"not json")).await.unwrap();
        let frame = framed.next().await.unwrap().unwrap();
        let response = ResponseEnvelope::from_slice(&frame).unwrap();
        assert!(!response.success);

        // The listener survives a bad client
        let client = IpcClient::new(endpoint, Duration::from_secs(2));
        assert!(client.command("PING").await.unwrap().success);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_silent_client_is_dropped_after_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = IpcEndpoint::new("silent", Some(dir.path()));
        let (shutdown, _handle) = spawn_server(&endpoint, Duration::from_millis(100));

        let stream = transport::connect(&endpoint, Duration::from_secs(1)).await.unwrap();
        let mut framed = transport::framed(stream, 64 * 1024);
        let next = tokio::time::timeout(Duration::from_secs(2), framed.next()).await.unwrap();
        assert!(next.is_none());
        shutdown.cancel();
    }

    struct Slow;

    #[async_trait]
    impl CommandHandler for Slow {
        async fn handle(&self, _frame: &[u8]) -> ResponseEnvelope {
            tokio::time::sleep(Duration::from_millis(300)).await;
            ResponseEnvelope::ok("done")
        }
    }

    #[tokio::test]
    async fn test_response_timeout_is_separate_from_connect_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = IpcEndpoint::new("slow", Some(dir.path()));
        let mut server =
            IpcServer::bind(&endpoint, Arc::new(Slow), Duration::from_secs(2), 64 * 1024).unwrap();
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        tokio::spawn(async move { server.run(token).await });

        let client = IpcClient::new(endpoint, Duration::from_millis(50));
        assert!(matches!(
            client.command("START_TRANSFER").await,
            Err(AppError::Timeout(_))
        ));

        let connection = client.connect().await.unwrap();
        let response = connection
            .exchange(&CommandEnvelope::new("START_TRANSFER"), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(response.message, "done");
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_client_reports_missing_service() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = IpcEndpoint::new("nobody", Some(dir.path()));
        let client = IpcClient::new(endpoint, Duration::from_millis(200));
        assert!(matches!(client.command("PING").await, Err(AppError::Ipc(_))));
    }

    #[tokio::test]
    async fn test_second_bind_is_rejected_and_stale_socket_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = IpcEndpoint::new("single", Some(dir.path()));
        let first = IpcListener::bind(&endpoint).unwrap();
        assert!(matches!(IpcListener::bind(&endpoint), Err(AppError::Ipc(_))));
        drop(first);

        std::fs::write(endpoint.path(), b"").unwrap();
        assert!(IpcListener::bind(&endpoint).is_ok());
    }
}

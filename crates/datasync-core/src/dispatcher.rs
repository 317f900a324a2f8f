// SPDX-License-Identifier: AGPL-3.0
// DataSync Core - Command dispatcher
//
// Decodes a request frame into a Command and runs it against the settings
// slot, executor, log store and scheduler. Every request gets a response.

use crate::executor::TransferExecutor;
use crate::history::LogQuery;
use crate::ipc::{CommandEnvelope, CommandHandler, ResponseEnvelope};
use crate::scheduler::{JobId, Scheduler, SchedulerStatus};
use crate::selector::normalize_protocol;
use crate::slot::SettingsSlot;
use crate::types::{ConnectionSettings, FilterSettings};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Payload of TRANSFER_FILE
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TransferFileRequest {
    pub source_path: String,
    pub destination_path: String,
    #[serde(default)]
    pub connection: Option<ConnectionSettings>,
}

/// A decoded controller request
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Ping,
    TestConnection(Option<ConnectionSettings>),
    UpdateConnection(ConnectionSettings),
    UpdateFilters(FilterSettings),
    StartTransfer(Option<ConnectionSettings>),
    StopService,
    GetLogs(LogQuery),
    ClearLogs,
    TransferFile(TransferFileRequest),
    PauseSchedule,
    ResumeSchedule,
    GetStatus,
    /// Unparsable frame or unrecognised command name
    Unknown(String),
    /// Known command whose Data did not decode
    InvalidPayload {
        command: &'static str,
        reason: String,
    },
}

impl Command {
    pub fn parse(frame: &[u8]) -> Self {
        match CommandEnvelope::from_slice(frame) {
            Ok(envelope) => Self::from_envelope(&envelope),
            Err(e) => Self::Unknown(format!("Invalid command message: {}", e)),
        }
    }

    /// Command names are matched case-insensitively
    pub fn from_envelope(envelope: &CommandEnvelope) -> Self {
        decode_command(envelope).unwrap_or_else(|invalid| invalid)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Ping => "PING",
            Self::TestConnection(_) => "TEST_CONNECTION",
            Self::UpdateConnection(_) => "UPDATE_CONNECTION",
            Self::UpdateFilters(_) => "UPDATE_FILTERS",
            Self::StartTransfer(_) => "START_TRANSFER",
            Self::StopService => "STOP_SERVICE",
            Self::GetLogs(_) => "GET_LOGS",
            Self::ClearLogs => "CLEAR_LOGS",
            Self::TransferFile(_) => "TRANSFER_FILE",
            Self::PauseSchedule => "PAUSE_SCHEDULE",
            Self::ResumeSchedule => "RESUME_SCHEDULE",
            Self::GetStatus => "GET_STATUS",
            Self::Unknown(_) => "UNKNOWN",
            Self::InvalidPayload { command, .. } => *command,
        }
    }
}

fn optional<T: DeserializeOwned>(
    envelope: &CommandEnvelope,
    command: &'static str,
) -> Result<Option<T>, Command> {
    match envelope.payload::<T>() {
        None => Ok(None),
        Some(Ok(value)) => Ok(Some(value)),
        Some(Err(e)) => Err(Command::InvalidPayload {
            command,
            reason: e.to_string(),
        }),
    }
}

fn required<T: DeserializeOwned>(
    envelope: &CommandEnvelope,
    command: &'static str,
) -> Result<T, Command> {
    optional(envelope, command)?.ok_or_else(|| Command::InvalidPayload {
        command,
        reason: "Data is required".to_string(),
    })
}

fn decode_command(envelope: &CommandEnvelope) -> Result<Command, Command> {
    let command = match envelope.command.trim().to_ascii_uppercase().as_str() {
        "PING" => Command::Ping,
        "TEST_CONNECTION" => Command::TestConnection(optional(envelope, "TEST_CONNECTION")?),
        "UPDATE_CONNECTION" => Command::UpdateConnection(required(envelope, "UPDATE_CONNECTION")?),
        "UPDATE_FILTERS" => Command::UpdateFilters(required(envelope, "UPDATE_FILTERS")?),
        "START_TRANSFER" => Command::StartTransfer(optional(envelope, "START_TRANSFER")?),
        "STOP_SERVICE" => Command::StopService,
        "GET_LOGS" => Command::GetLogs(optional(envelope, "GET_LOGS")?.unwrap_or_default()),
        "CLEAR_LOGS" => Command::ClearLogs,
        "TRANSFER_FILE" => Command::TransferFile(required(envelope, "TRANSFER_FILE")?),
        "PAUSE_SCHEDULE" => Command::PauseSchedule,
        "RESUME_SCHEDULE" => Command::ResumeSchedule,
        "GET_STATUS" => Command::GetStatus,
        _ => Command::Unknown(format!("Unknown command: {}", envelope.command)),
    };
    Ok(command)
}

/// GET_STATUS payload
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceStatus {
    pub connection: Option<ConnectionSettings>,
    pub filters: FilterSettings,
    pub transfer_running: bool,
    pub scheduler: SchedulerStatus,
    pub logs_dir: PathBuf,
    pub version: String,
}

pub struct Dispatcher {
    slot: SettingsSlot,
    executor: Arc<TransferExecutor>,
    scheduler: Scheduler,
    shutdown: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        slot: SettingsSlot,
        executor: Arc<TransferExecutor>,
        scheduler: Scheduler,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            slot,
            executor,
            scheduler,
            shutdown,
        }
    }

    pub fn slot(&self) -> &SettingsSlot {
        &self.slot
    }

    pub async fn dispatch(&self, command: Command) -> ResponseEnvelope {
        tracing::debug!("Dispatching {}", command.name());
        match command {
            Command::Ping => ResponseEnvelope::ok("Pong"),
            Command::TestConnection(connection) => self.test_connection(connection).await,
            Command::UpdateConnection(connection) => {
                tracing::info!(
                    "Connection updated: {} {}",
                    connection.protocol,
                    connection.host
                );
                self.slot.update_connection(connection).await;
                ResponseEnvelope::ok("Connection settings updated")
            }
            Command::UpdateFilters(filters) => {
                if let Err(e) = filters.validate() {
                    return ResponseEnvelope::failure(e.to_string());
                }
                self.slot.update_filters(filters).await;
                ResponseEnvelope::ok("Filter settings updated")
            }
            Command::StartTransfer(connection) => self.start_transfer(connection).await,
            Command::StopService => {
                tracing::info!("Stop requested over IPC");
                self.shutdown.cancel();
                ResponseEnvelope::ok("Service is stopping")
            }
            Command::GetLogs(query) => match self.executor.log_store().query(query).await {
                Ok(logs) => {
                    ResponseEnvelope::ok(format!("{} log entries", logs.len())).with_data(&logs)
                }
                Err(e) => ResponseEnvelope::failure(e.to_string()),
            },
            Command::ClearLogs => match self.executor.log_store().clear().await {
                Ok(()) => ResponseEnvelope::ok("Logs cleared"),
                Err(e) => ResponseEnvelope::failure(e.to_string()),
            },
            Command::TransferFile(request) => self.transfer_file(request).await,
            Command::PauseSchedule => {
                self.scheduler.pause();
                ResponseEnvelope::ok("Schedule paused")
            }
            Command::ResumeSchedule => {
                self.scheduler.resume();
                ResponseEnvelope::ok("Schedule resumed")
            }
            Command::GetStatus => self.status().await,
            Command::Unknown(reason) => {
                tracing::warn!("{}", reason);
                ResponseEnvelope::failure(reason)
            }
            Command::InvalidPayload { command, reason } => {
                tracing::warn!("Invalid data for {}: {}", command, reason);
                ResponseEnvelope::failure(format!("Invalid data for {}: {}", command, reason))
            }
        }
    }

    /// Supplied settings win; otherwise the slot; otherwise an explanation
    async fn resolve_connection(
        &self,
        supplied: Option<ConnectionSettings>,
    ) -> Result<ConnectionSettings, ResponseEnvelope> {
        match supplied {
            Some(connection) => Ok(connection),
            None => self.slot.connection().await.ok_or_else(|| {
                ResponseEnvelope::failure(
                    "No connection settings configured; send UPDATE_CONNECTION first",
                )
            }),
        }
    }

    async fn test_connection(&self, supplied: Option<ConnectionSettings>) -> ResponseEnvelope {
        let connection = match self.resolve_connection(supplied).await {
            Ok(connection) => connection,
            Err(response) => return response,
        };
        if let Err(e) = connection.validate_for(normalize_protocol(&connection)) {
            return ResponseEnvelope::failure(e.to_string());
        }

        if self.executor.test_connection(&connection).await {
            ResponseEnvelope::ok("Connection test succeeded")
        } else {
            ResponseEnvelope::failure(format!(
                "Connection test failed for {}",
                connection.protocol
            ))
        }
    }

    async fn start_transfer(&self, supplied: Option<ConnectionSettings>) -> ResponseEnvelope {
        let connection = match self.resolve_connection(supplied).await {
            Ok(connection) => connection,
            Err(response) => return response,
        };
        let filters = self.slot.snapshot().await.filters;
        let protocol = normalize_protocol(&connection);
        if let Err(e) = connection
            .validate_for(protocol)
            .and_then(|_| filters.validate())
        {
            return ResponseEnvelope::failure(e.to_string());
        }

        // Manual runs share the scheduled job's guard
        let Some(_permit) = self.scheduler.locks().try_begin(&JobId::transfer()) else {
            return ResponseEnvelope::failure("A transfer is already in progress");
        };

        let result = self.executor.execute(&connection, &filters).await;
        let response = if result.success {
            ResponseEnvelope::ok(result.message.clone())
        } else {
            ResponseEnvelope::failure(result.message.clone())
        };
        response.with_data(&result)
    }

    async fn transfer_file(&self, request: TransferFileRequest) -> ResponseEnvelope {
        if request.source_path.trim().is_empty() || request.destination_path.trim().is_empty() {
            return ResponseEnvelope::failure("SourcePath and DestinationPath are required");
        }

        let connection = match request.connection {
            Some(connection) => connection,
            None => self.slot.connection().await.unwrap_or_default(),
        };
        let protocol = normalize_protocol(&connection);
        if protocol.is_remote() {
            if let Err(e) = connection.validate_for(protocol) {
                return ResponseEnvelope::failure(e.to_string());
            }
        }

        let ok = self
            .executor
            .transfer_file(&connection, &request.source_path, &request.destination_path)
            .await;
        if ok {
            ResponseEnvelope::ok("File transferred successfully")
        } else {
            ResponseEnvelope::failure(format!(
                "Failed to transfer {}",
                request.source_path.trim()
            ))
        }
    }

    async fn status(&self) -> ResponseEnvelope {
        let current = self.slot.snapshot().await;
        let connection = current.connection.map(|mut c| {
            if !c.password.is_empty() {
                c.password = "********".to_string();
            }
            c
        });

        let status = ServiceStatus {
            connection,
            filters: current.filters,
            transfer_running: self.scheduler.locks().is_running(&JobId::transfer()),
            scheduler: self.scheduler.status(),
            logs_dir: self.executor.log_store().dir().to_path_buf(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        };
        ResponseEnvelope::ok("Service is running").with_data(&status)
    }
}

#[async_trait]
impl CommandHandler for Dispatcher {
    async fn handle(&self, frame: &[u8]) -> ResponseEnvelope {
        tracing::debug!("IPC connection parsing");
        let command = Command::parse(frame);
        self.dispatch(command).await
    }
}

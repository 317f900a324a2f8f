// SPDX-License-Identifier: AGPL-3.0
// DataSync Core - Shared logic for the service and its controllers
//
// This crate provides:
// - The data model and AppError
// - SettingsStore and JSON persistence helpers
// - Local, FTP and SFTP transfer engines plus the selector and executor
// - TransferLogStore for the per-day transfer log
// - The job scheduler
// - The IPC command channel and the dispatcher behind it
//
// Binaries live in separate crates.

pub mod dispatcher;
pub mod engine;
pub mod executor;
pub mod history;
pub mod ipc;
pub mod retry;
pub mod scheduler;
pub mod selector;
pub mod settings;
pub mod slot;
pub mod types;

// Re-export commonly used items
pub use dispatcher::{Command, Dispatcher, ServiceStatus, TransferFileRequest};
pub use engine::{FtpEngine, LocalEngine, SftpEngine, TransferEngine};
pub use executor::{TransferExecutor, TransferJob};
pub use history::{LogQuery, TransferLogStore};
pub use ipc::{
    CommandEnvelope, CommandHandler, IpcClient, IpcConnection, IpcEndpoint, IpcServer,
    ResponseEnvelope,
};
pub use retry::RetryPolicy;
pub use scheduler::{
    Job, JobId, JobLocks, ScheduleKind, ScheduleSettings, Scheduler, SchedulerStatus, Trigger,
    TriggerOutcome,
};
pub use selector::{normalize_protocol, EngineSelector};
pub use settings::{config_dir, load_json, save_json, ServiceSettings, SettingsStore};
pub use slot::{CurrentSettings, SettingsSlot};
pub use types::{
    AppError, ConnectionSettings, FileItem, FilterSettings, PostTransferAction, Protocol,
    TransferDirection, TransferLog, TransferResult, TransferStatus,
};

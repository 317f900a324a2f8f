// SPDX-License-Identifier: AGPL-3.0
// DataSync Core - Transfer execution
//
// Resolves the source, applies filters, runs the selected engine and records
// the outcome. Shared by START_TRANSFER and the scheduled job.

use crate::engine::TransferEngine;
use crate::history::TransferLogStore;
use crate::scheduler::Job;
use crate::selector::{normalize_protocol, EngineSelector};
use crate::slot::SettingsSlot;
use crate::types::{
    AppError, ConnectionSettings, FileItem, FilterSettings, Protocol, TransferDirection,
    TransferLog, TransferResult,
};
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use walkdir::WalkDir;

enum SourceScan {
    Files(Vec<FileItem>),
    Missing,
}

pub struct TransferExecutor {
    selector: EngineSelector,
    log_store: TransferLogStore,
}

impl TransferExecutor {
    pub fn new(selector: EngineSelector, log_store: TransferLogStore) -> Self {
        Self {
            selector,
            log_store,
        }
    }

    pub fn log_store(&self) -> &TransferLogStore {
        &self.log_store
    }

    /// Run one batch. Never fails: every problem ends up in the result.
    pub async fn execute(
        &self,
        connection: &ConnectionSettings,
        filters: &FilterSettings,
    ) -> TransferResult {
        let started = Instant::now();
        let protocol = normalize_protocol(connection);
        let engine = self.selector.select(protocol);
        tracing::info!(
            "Starting {} transfer: {} -> {}",
            protocol,
            connection.source(),
            connection.destination()
        );

        let scan = self
            .resolve_source(engine.as_ref(), protocol, connection, filters.include_subfolders)
            .await;
        let result = match scan {
            Ok(SourceScan::Missing) => source_missing(connection, protocol, started),
            Ok(SourceScan::Files(found)) => {
                let now = Utc::now();
                let total = found.len();
                let files: Vec<FileItem> =
                    found.into_iter().filter(|f| filters.matches(f, now)).collect();
                let skipped = total - files.len();

                if files.is_empty() {
                    tracing::info!("No files found to transfer ({} skipped)", skipped);
                    TransferResult::nothing_to_do(connection, protocol, skipped, started.elapsed())
                } else {
                    let mut result = run_engine(engine, files, connection, filters, protocol).await;
                    result.set_skipped(skipped);
                    result
                }
            }
            Err(e) => {
                tracing::error!("Failed to resolve transfer source: {}", e);
                TransferResult::failed(connection, protocol, e.to_string(), started.elapsed())
            }
        };

        if let Err(e) = self.log_store.append(result.logs.clone()).await {
            tracing::error!("Failed to record transfer logs: {}", e);
        }
        result
    }

    pub async fn test_connection(&self, connection: &ConnectionSettings) -> bool {
        let protocol = normalize_protocol(connection);
        self.selector.select(protocol).test_connection(connection).await
    }

    pub async fn transfer_file(
        &self,
        connection: &ConnectionSettings,
        source: &str,
        destination: &str,
    ) -> bool {
        let protocol = normalize_protocol(connection);
        self.selector
            .select(protocol)
            .transfer_file(connection, source, destination)
            .await
    }

    async fn resolve_source(
        &self,
        engine: &dyn TransferEngine,
        protocol: Protocol,
        connection: &ConnectionSettings,
        recursive: bool,
    ) -> Result<SourceScan, AppError> {
        if protocol.is_remote() && connection.direction == TransferDirection::Download {
            return engine.list_remote(connection).await.map(SourceScan::Files);
        }

        let source = PathBuf::from(connection.source());
        tokio::task::spawn_blocking(move || scan_local(&source, recursive))
            .await
            .map_err(|e| AppError::FileIo(format!("Source scan task failed: {}", e)))?
    }
}

async fn run_engine(
    engine: Arc<dyn TransferEngine>,
    files: Vec<FileItem>,
    connection: &ConnectionSettings,
    filters: &FilterSettings,
    protocol: Protocol,
) -> TransferResult {
    let started = Instant::now();
    let task_connection = connection.clone();
    let task_filters = filters.clone();

    let handle = tokio::spawn(async move {
        engine
            .transfer_files(&files, &task_connection, &task_filters)
            .await
    });

    match handle.await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!("{} engine task failed: {}", protocol, e);
            TransferResult::failed(
                connection,
                protocol,
                format!("Transfer task failed: {}", e),
                started.elapsed(),
            )
        }
    }
}

fn source_missing(
    connection: &ConnectionSettings,
    protocol: Protocol,
    started: Instant,
) -> TransferResult {
    let source = connection.source();
    let error = format!("Source path not found: {}", source);
    tracing::error!("{}", error);

    let file_name = Path::new(source)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| source.to_string());
    let entry = TransferLog::failure(
        file_name,
        source,
        connection.destination(),
        protocol,
        &error,
        started.elapsed(),
    );

    let mut result = TransferResult::failed(connection, protocol, error, started.elapsed());
    result.logs.push(entry);
    result.files_failed = 1;
    result
}

/// Enumerate a local source. Unreadable entries below the root are skipped.
fn scan_local(source: &Path, recursive: bool) -> Result<SourceScan, AppError> {
    if source.is_file() {
        let metadata = source.metadata()?;
        let root = source.parent().unwrap_or(source);
        return Ok(SourceScan::Files(vec![FileItem::from_metadata(
            source, root, &metadata,
        )]));
    }
    if !source.is_dir() {
        return Ok(SourceScan::Missing);
    }

    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut files = Vec::new();

    for entry in WalkDir::new(source).min_depth(1).max_depth(max_depth) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => {
                return Err(AppError::FileIo(format!("Failed to read {:?}: {}", source, e)));
            }
            Err(e) => {
                tracing::warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        match entry.metadata() {
            Ok(metadata) => files.push(FileItem::from_metadata(entry.path(), source, &metadata)),
            Err(e) => tracing::warn!("Skipping {:?}: {}", entry.path(), e),
        }
    }

    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(SourceScan::Files(files))
}

/// The default scheduled job: run the slot's current settings
pub struct TransferJob {
    slot: SettingsSlot,
    executor: Arc<TransferExecutor>,
}

impl TransferJob {
    pub fn new(slot: SettingsSlot, executor: Arc<TransferExecutor>) -> Self {
        Self { slot, executor }
    }
}

#[async_trait]
impl Job for TransferJob {
    async fn run(&self) -> Result<(), AppError> {
        let current = self.slot.snapshot().await;
        let connection = current.connection.ok_or_else(|| {
            AppError::InvalidConfig("No connection settings configured".to_string())
        })?;
        connection.validate_for(normalize_protocol(&connection))?;
        current.filters.validate()?;

        let result = self.executor.execute(&connection, &current.filters).await;
        if result.success {
            tracing::info!("Scheduled transfer finished: {}", result.message);
        } else {
            tracing::warn!("Scheduled transfer failed: {}", result.message);
        }
        Ok(())
    }
}

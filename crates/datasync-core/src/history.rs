// SPDX-License-Identifier: AGPL-3.0
// DataSync Core - Transfer log persistence
//
// One JSON document per UTC day, owned by a single writer thread. Every
// operation goes through the same queue, so a query observes all earlier
// appends and a clear never interleaves with a write.

use crate::types::{AppError, TransferLog};
use async_channel::{Receiver, Sender};
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

const FILE_PREFIX: &str = "transfer_log_";
const FILE_SUFFIX: &str = ".json";

/// Parameters of a GET_LOGS query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct LogQuery {
    /// Case-insensitive substring; empty matches everything
    pub filter: Option<String>,
    pub max_results: Option<usize>,
    /// Restrict to one UTC day. Accepts a date or a full timestamp.
    #[serde(deserialize_with = "deserialize_day")]
    pub date: Option<NaiveDate>,
}

fn deserialize_day<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveDate>, D::Error> {
    let raw: Option<String> = Option::deserialize(d)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => {
            let day = s.get(..10).unwrap_or(s);
            NaiveDate::parse_from_str(day, "%Y-%m-%d")
                .map(Some)
                .map_err(serde::de::Error::custom)
        }
    }
}

enum LogOp {
    Append(Vec<TransferLog>),
    Query(LogQuery, Sender<Vec<TransferLog>>),
    Clear(Sender<Result<(), AppError>>),
    Flush(Sender<()>),
}

/// Handle to the transfer log. Cheap to clone.
#[derive(Clone)]
pub struct TransferLogStore {
    ops: Sender<LogOp>,
    dir: PathBuf,
}

impl TransferLogStore {
    /// Load existing day files and start the writer thread
    pub fn open(dir: impl Into<PathBuf>, default_max_results: usize) -> Result<Self, AppError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| AppError::FileIo(format!("Failed to create log dir: {}", e)))?;

        let days = load_days(&dir)?;
        tracing::info!(
            "Transfer log opened at {:?} ({} day files)",
            dir,
            days.len()
        );

        let (ops, rx) = async_channel::unbounded();
        let writer = LogWriter {
            dir: dir.clone(),
            days,
            default_max_results: default_max_results.max(1),
        };
        std::thread::Builder::new()
            .name("datasync-log-writer".to_string())
            .spawn(move || writer.run(rx))
            .map_err(|e| AppError::FileIo(format!("Failed to start log writer: {}", e)))?;

        Ok(Self { ops, dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Queue entries for persistence
    pub async fn append(&self, entries: Vec<TransferLog>) -> Result<(), AppError> {
        if entries.is_empty() {
            return Ok(());
        }
        self.ops
            .send(LogOp::Append(entries))
            .await
            .map_err(|_| closed())
    }

    pub async fn query(&self, query: LogQuery) -> Result<Vec<TransferLog>, AppError> {
        let (tx, rx) = async_channel::bounded(1);
        self.ops
            .send(LogOp::Query(query, tx))
            .await
            .map_err(|_| closed())?;
        rx.recv().await.map_err(|_| closed())
    }

    /// Remove every entry and every day file
    pub async fn clear(&self) -> Result<(), AppError> {
        let (tx, rx) = async_channel::bounded(1);
        self.ops.send(LogOp::Clear(tx)).await.map_err(|_| closed())?;
        rx.recv().await.map_err(|_| closed())?
    }

    /// Resolves once every earlier operation has reached disk
    pub async fn flush(&self) -> Result<(), AppError> {
        let (tx, rx) = async_channel::bounded(1);
        self.ops.send(LogOp::Flush(tx)).await.map_err(|_| closed())?;
        rx.recv().await.map_err(|_| closed())
    }
}

fn closed() -> AppError {
    AppError::FileIo("Transfer log writer has stopped".to_string())
}

fn day_file_name(day: NaiveDate) -> String {
    format!("{}{}{}", FILE_PREFIX, day.format("%Y%m%d"), FILE_SUFFIX)
}

fn parse_day_file_name(name: &str) -> Option<NaiveDate> {
    let stamp = name.strip_prefix(FILE_PREFIX)?.strip_suffix(FILE_SUFFIX)?;
    NaiveDate::parse_from_str(stamp, "%Y%m%d").ok()
}

fn load_days(dir: &Path) -> Result<BTreeMap<NaiveDate, Vec<TransferLog>>, AppError> {
    let mut days = BTreeMap::new();

    let entries = fs::read_dir(dir)
        .map_err(|e| AppError::FileIo(format!("Failed to read log dir: {}", e)))?;

    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        let Some(day) = parse_day_file_name(&name) else {
            continue;
        };

        let parsed = fs::read_to_string(entry.path())
            .map_err(|e| e.to_string())
            .and_then(|content| {
                serde_json::from_str::<Vec<TransferLog>>(&content).map_err(|e| e.to_string())
            });

        match parsed {
            Ok(logs) => {
                days.insert(day, logs);
            }
            Err(e) => tracing::warn!("Skipping corrupt log file {}: {}", name, e),
        }
    }

    Ok(days)
}

struct LogWriter {
    dir: PathBuf,
    days: BTreeMap<NaiveDate, Vec<TransferLog>>,
    default_max_results: usize,
}

impl LogWriter {
    fn run(mut self, rx: Receiver<LogOp>) {
        while let Ok(op) = rx.recv_blocking() {
            match op {
                LogOp::Append(entries) => self.append(entries),
                LogOp::Query(query, reply) => {
                    let _ = reply.send_blocking(self.query(&query));
                }
                LogOp::Clear(reply) => {
                    let _ = reply.send_blocking(self.clear());
                }
                LogOp::Flush(reply) => {
                    let _ = reply.send_blocking(());
                }
            }
        }
        tracing::debug!("Transfer log writer stopped");
    }

    fn append(&mut self, entries: Vec<TransferLog>) {
        let mut touched = Vec::new();
        for entry in entries {
            let day = entry.timestamp.date_naive();
            self.days.entry(day).or_default().push(entry);
            if !touched.contains(&day) {
                touched.push(day);
            }
        }

        for day in touched {
            if let Err(e) = self.persist_day(day) {
                tracing::error!("Failed to persist transfer log: {}", e);
            }
        }
    }

    /// Write through a temp file so a crash never leaves a half-written day
    fn persist_day(&self, day: NaiveDate) -> Result<(), AppError> {
        let logs = self.days.get(&day).map(Vec::as_slice).unwrap_or(&[]);
        let path = self.dir.join(day_file_name(day));
        let tmp = path.with_extension("json.tmp");

        let content = serde_json::to_string_pretty(logs)
            .map_err(|e| AppError::Serialization(format!("Failed to serialize logs: {}", e)))?;
        fs::write(&tmp, content)
            .map_err(|e| AppError::FileIo(format!("Failed to write {:?}: {}", tmp, e)))?;
        fs::rename(&tmp, &path)
            .map_err(|e| AppError::FileIo(format!("Failed to replace {:?}: {}", path, e)))
    }

    fn query(&self, query: &LogQuery) -> Vec<TransferLog> {
        let needle = query
            .filter
            .as_deref()
            .map(|f| f.trim().to_lowercase())
            .unwrap_or_default();
        let limit = query.max_results.unwrap_or(self.default_max_results);

        let mut matched: Vec<TransferLog> = self
            .days
            .iter()
            .filter(|(day, _)| query.date.map_or(true, |d| d == **day))
            .flat_map(|(_, logs)| logs.iter())
            .filter(|log| needle.is_empty() || log.matches_filter(&needle))
            .cloned()
            .collect();

        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matched.truncate(limit);
        matched
    }

    /// Days leave memory only once their file is gone, so a failed clear
    /// keeps memory and disk in agreement
    fn clear(&mut self) -> Result<(), AppError> {
        let entries = fs::read_dir(&self.dir)
            .map_err(|e| AppError::FileIo(format!("Failed to read log dir: {}", e)))?;
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(day) = parse_day_file_name(&name) else {
                continue;
            };
            fs::remove_file(entry.path())
                .map_err(|e| AppError::FileIo(format!("Failed to remove {}: {}", name, e)))?;
            self.days.remove(&day);
        }

        // Whatever remains never reached disk
        self.days.clear();
        tracing::info!("Transfer log cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Protocol;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    fn success(name: &str) -> TransferLog {
        TransferLog::success(
            name,
            format!("/src/{}", name),
            format!("/dst/{}", name),
            Protocol::Local,
            10,
            Duration::from_millis(3),
            "File transferred successfully",
        )
    }

    fn failure(name: &str) -> TransferLog {
        TransferLog::failure(
            name,
            format!("/src/{}", name),
            format!("/dst/{}", name),
            Protocol::Ftp,
            "Connection refused",
            Duration::from_millis(3),
        )
    }

    fn on_day(mut log: TransferLog, y: i32, m: u32, d: u32) -> TransferLog {
        log.timestamp = Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap();
        log
    }

    #[test]
    fn test_day_file_names() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        assert_eq!(day_file_name(day), "transfer_log_20240307.json");
        assert_eq!(parse_day_file_name("transfer_log_20240307.json"), Some(day));
        assert_eq!(parse_day_file_name("transfer_log_2024.json"), None);
        assert_eq!(parse_day_file_name("service.json"), None);
    }

    #[test]
    fn test_query_wire_format() {
        let query: LogQuery = serde_json::from_str(
            r#"{"Filter":"fail","MaxResults":1000,"Date":"2024-05-01T00:00:00"}"#,
        )
        .unwrap();
        assert_eq!(query.filter.as_deref(), Some("fail"));
        assert_eq!(query.max_results, Some(1000));
        assert_eq!(query.date, NaiveDate::from_ymd_opt(2024, 5, 1));

        let empty: LogQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, LogQuery::default());
    }

    #[tokio::test]
    async fn test_append_then_query_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = TransferLogStore::open(dir.path(), 100).unwrap();

        let first = on_day(success("a.txt"), 2024, 1, 1);
        let second = on_day(success("b.txt"), 2024, 1, 2);
        let third = on_day(failure("c.txt"), 2024, 1, 3);
        store.append(vec![first.clone(), third.clone()]).await.unwrap();
        store.append(vec![second.clone()]).await.unwrap();

        let all = store.query(LogQuery::default()).await.unwrap();
        assert_eq!(all, vec![third, second, first]);
    }

    #[tokio::test]
    async fn test_filter_limit_and_date() {
        let dir = tempfile::tempdir().unwrap();
        let store = TransferLogStore::open(dir.path(), 100).unwrap();

        store
            .append(vec![
                on_day(success("a.txt"), 2024, 2, 1),
                on_day(failure("b.txt"), 2024, 2, 1),
                on_day(failure("c.txt"), 2024, 2, 2),
            ])
            .await
            .unwrap();

        let failed = store
            .query(LogQuery {
                filter: Some("FAIL".to_string()),
                ..LogQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(failed.len(), 2);
        assert_eq!(failed[0].file_name, "c.txt");

        let limited = store
            .query(LogQuery {
                max_results: Some(1),
                ..LogQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);

        let one_day = store
            .query(LogQuery {
                date: NaiveDate::from_ymd_opt(2024, 2, 1),
                ..LogQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(one_day.len(), 2);
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = TransferLogStore::open(dir.path(), 100).unwrap();
            store
                .append(vec![on_day(success("a.txt"), 2024, 4, 9)])
                .await
                .unwrap();
            store.flush().await.unwrap();
        }

        assert!(dir.path().join("transfer_log_20240409.json").exists());
        let store = TransferLogStore::open(dir.path(), 100).unwrap();
        let logs = store.query(LogQuery::default()).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].file_name, "a.txt");
    }

    #[tokio::test]
    async fn test_clear_removes_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = TransferLogStore::open(dir.path(), 100).unwrap();
        store
            .append(vec![
                on_day(success("a.txt"), 2024, 1, 1),
                on_day(success("b.txt"), 2024, 1, 2),
            ])
            .await
            .unwrap();

        store.clear().await.unwrap();
        assert!(store.query(LogQuery::default()).await.unwrap().is_empty());
        assert!(!dir.path().join("transfer_log_20240101.json").exists());
        assert!(!dir.path().join("transfer_log_20240102.json").exists());
    }

    #[tokio::test]
    async fn test_failed_clear_keeps_memory_in_line_with_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = TransferLogStore::open(dir.path(), 100).unwrap();
        store
            .append(vec![
                on_day(success("a.txt"), 2024, 1, 1),
                on_day(failure("b.txt"), 2024, 1, 2),
            ])
            .await
            .unwrap();
        // A directory under a day file name cannot be removed as a file
        fs::create_dir(dir.path().join("transfer_log_20240103.json")).unwrap();

        assert!(store.clear().await.is_err());

        let in_memory = store.query(LogQuery::default()).await.unwrap();
        let reopened = TransferLogStore::open(dir.path(), 100).unwrap();
        let on_disk = reopened.query(LogQuery::default()).await.unwrap();
        assert_eq!(in_memory, on_disk);
    }

    #[tokio::test]
    async fn test_corrupt_documents_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("transfer_log_20240101.json"), "[{ broken").unwrap();
        let good = vec![on_day(success("ok.txt"), 2024, 1, 2)];
        fs::write(
            dir.path().join("transfer_log_20240102.json"),
            serde_json::to_string(&good).unwrap(),
        )
        .unwrap();

        let store = TransferLogStore::open(dir.path(), 100).unwrap();
        let logs = store.query(LogQuery::default()).await.unwrap();
        assert_eq!(logs, good);
    }
}

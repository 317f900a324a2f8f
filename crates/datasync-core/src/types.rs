// SPDX-License-Identifier: AGPL-3.0
// DataSync Core - Type definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// Transfer backend selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Protocol {
    #[default]
    Local,
    Ftp,
    Sftp,
}

impl Protocol {
    /// Wire label, also used as the protocol column of transfer logs
    pub fn label(&self) -> &'static str {
        match self {
            Self::Local => "LOCAL",
            Self::Ftp => "FTP",
            Self::Sftp => "SFTP",
        }
    }

    /// Parse a protocol label. Unrecognised labels fall back to Local.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_uppercase().as_str() {
            "LOCAL" => Self::Local,
            "FTP" => Self::Ftp,
            "SFTP" => Self::Sftp,
            other => {
                tracing::warn!("Unknown protocol {:?}, falling back to LOCAL", other);
                Self::Local
            }
        }
    }

    pub fn is_remote(&self) -> bool {
        !matches!(self, Self::Local)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for Protocol {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

impl<'de> Deserialize<'de> for Protocol {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        Ok(Self::from_label(&label))
    }
}

/// Which side of a remote connection holds the source files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransferDirection {
    #[default]
    Upload,
    Download,
}

/// What to do with a local source file once it has been transferred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PostTransferAction {
    #[default]
    None,
    Delete,
    Archive,
}

/// Where and how to transfer files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ConnectionSettings {
    pub protocol: Protocol,
    pub host: String,
    /// Kept wider than u16 so out-of-range values reach validation
    pub port: u32,
    pub username: String,
    pub password: String,
    pub source_path: String,
    pub destination_path: String,
    /// FTP only: passive (PASV) data connections instead of active (PORT)
    pub use_passive_mode: bool,
    pub timeout_seconds: u64,
    /// Remote protocols only
    pub direction: TransferDirection,
    pub overwrite_existing: bool,
    /// SFTP only: expected SHA-256 host key fingerprint, hex encoded
    pub host_key_fingerprint: Option<String>,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            protocol: Protocol::Local,
            host: String::new(),
            port: 0,
            username: String::new(),
            password: String::new(),
            source_path: String::new(),
            destination_path: String::new(),
            use_passive_mode: true,
            timeout_seconds: 30,
            direction: TransferDirection::Upload,
            overwrite_existing: true,
            host_key_fingerprint: None,
        }
    }
}

impl ConnectionSettings {
    /// Local-to-local settings
    pub fn local(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source_path: source.into(),
            destination_path: destination.into(),
            ..Self::default()
        }
    }

    /// Check the settings before any engine is invoked
    pub fn validate(&self) -> Result<(), AppError> {
        self.validate_for(self.protocol)
    }

    /// Check the settings against the protocol that will actually run, which
    /// differs from the declared one when a remote job has two local paths
    pub fn validate_for(&self, protocol: Protocol) -> Result<(), AppError> {
        if protocol.is_remote() {
            if self.host.trim().is_empty() {
                return Err(AppError::InvalidConfig("Host is required".to_string()));
            }
            if self.port == 0 || self.port > u32::from(u16::MAX) {
                return Err(AppError::InvalidConfig(
                    "Port must be between 1 and 65535".to_string(),
                ));
            }
            if self.username.trim().is_empty() {
                return Err(AppError::InvalidConfig("Username is required".to_string()));
            }
            if self.password.is_empty() {
                return Err(AppError::InvalidConfig("Password is required".to_string()));
            }
            return Ok(());
        }

        if self.source().is_empty() {
            return Err(AppError::InvalidConfig("Source path is required".to_string()));
        }
        if self.destination().is_empty() {
            return Err(AppError::InvalidConfig(
                "Destination path is required".to_string(),
            ));
        }
        if !Path::new(self.source()).exists() {
            return Err(AppError::InvalidConfig(format!(
                "Source path does not exist: {}",
                self.source()
            )));
        }
        Ok(())
    }

    /// Source path with surrounding whitespace and quotes removed
    pub fn source(&self) -> &str {
        clean_path(&self.source_path)
    }

    /// Destination path with surrounding whitespace and quotes removed
    pub fn destination(&self) -> &str {
        clean_path(&self.destination_path)
    }

    /// Port as a socket port; only meaningful after `validate`
    pub fn socket_port(&self) -> Result<u16, AppError> {
        u16::try_from(self.port)
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| AppError::InvalidConfig(format!("Invalid port: {}", self.port)))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.max(1))
    }
}

/// Strip whitespace and quote characters pasted around a path
pub fn clean_path(path: &str) -> &str {
    path.trim().trim_matches('"')
}

/// Which files a job picks up and what happens to them afterwards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
pub struct FilterSettings {
    /// Empty means every extension is allowed
    #[serde(alias = "IncludeFileTypes")]
    pub allowed_extensions: Vec<String>,
    #[serde(alias = "MinFileSizeBytes")]
    pub min_size_bytes: u64,
    /// Zero means unbounded
    #[serde(alias = "MaxFileSizeBytes")]
    pub max_size_bytes: u64,
    #[serde(alias = "MinAgeMinutes")]
    pub min_age_minutes: u64,
    pub include_subfolders: bool,
    pub post_action: PostTransferAction,
    pub archive_path: String,
}

impl FilterSettings {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.post_action == PostTransferAction::Archive && self.archive_path.trim().is_empty()
        {
            return Err(AppError::InvalidConfig(
                "Archive path is required when the post-transfer action is Archive".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply extension, size, age and depth rules, in that order
    pub fn matches(&self, file: &FileItem, now: DateTime<Utc>) -> bool {
        self.extension_allowed(&file.file_name)
            && self.size_allowed(file.size_bytes)
            && self.age_allowed(file.last_modified, now)
            && (file.depth == 0 || self.include_subfolders)
    }

    pub fn extension_allowed(&self, file_name: &str) -> bool {
        if self.allowed_extensions.is_empty() {
            return true;
        }

        let extension = Path::new(file_name)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        self.allowed_extensions.iter().any(|allowed| {
            let allowed = normalize_extension(allowed);
            allowed == "*" || allowed == extension
        })
    }

    pub fn size_allowed(&self, size: u64) -> bool {
        size >= self.min_size_bytes && (self.max_size_bytes == 0 || size <= self.max_size_bytes)
    }

    pub fn age_allowed(&self, last_modified: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        if self.min_age_minutes == 0 {
            return true;
        }
        let min_age = chrono::Duration::minutes(i64::try_from(self.min_age_minutes).unwrap_or(i64::MAX));
        now.signed_duration_since(last_modified) >= min_age
    }
}

/// "*.TXT", ".txt" and "txt" all normalize to "txt"
fn normalize_extension(raw: &str) -> String {
    raw.trim()
        .trim_start_matches("*.")
        .trim_start_matches('.')
        .to_lowercase()
}

/// A file picked up from a source location. Lives for one batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FileItem {
    pub file_name: String,
    pub full_path: PathBuf,
    /// Path below the source root, used to mirror subfolders at the destination
    pub relative_path: PathBuf,
    /// Zero for files directly inside the source root
    pub depth: usize,
    pub size_bytes: u64,
    pub last_modified: DateTime<Utc>,
}

impl FileItem {
    /// Build an item from filesystem metadata; `root` is the enumerated directory
    pub fn from_metadata(path: &Path, root: &Path, metadata: &std::fs::Metadata) -> Self {
        let relative_path = path
            .strip_prefix(root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| PathBuf::from(path.file_name().unwrap_or_default()));
        let depth = relative_path.components().count().saturating_sub(1);
        let last_modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        Self {
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            full_path: path.to_path_buf(),
            relative_path,
            depth,
            size_bytes: metadata.len(),
            last_modified,
        }
    }
}

/// Outcome of a single file transfer attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferStatus {
    Success,
    Failed,
}

impl TransferStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::Failed => "Failed",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One transfer attempt, as recorded in the transfer log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TransferLog {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub file_name: String,
    #[serde(default)]
    pub source_path: String,
    #[serde(default)]
    pub destination_path: String,
    pub status: TransferStatus,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default)]
    pub duration_ms: u64,
}

impl TransferLog {
    pub fn success(
        file_name: impl Into<String>,
        source_path: impl Into<String>,
        destination_path: impl Into<String>,
        protocol: Protocol,
        file_size: u64,
        duration: Duration,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            file_name: file_name.into(),
            source_path: source_path.into(),
            destination_path: destination_path.into(),
            status: TransferStatus::Success,
            message: message.into(),
            error_message: None,
            protocol: protocol.label().to_string(),
            file_size,
            duration_ms: duration_millis(duration),
        }
    }

    pub fn failure(
        file_name: impl Into<String>,
        source_path: impl Into<String>,
        destination_path: impl Into<String>,
        protocol: Protocol,
        error: impl Into<String>,
        duration: Duration,
    ) -> Self {
        let error = error.into();
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            file_name: file_name.into(),
            source_path: source_path.into(),
            destination_path: destination_path.into(),
            status: TransferStatus::Failed,
            message: format!("Transfer failed: {}", error),
            error_message: Some(error),
            protocol: protocol.label().to_string(),
            file_size: 0,
            duration_ms: duration_millis(duration),
        }
    }

    /// Case-insensitive substring match; `needle` must already be lowercase
    pub fn matches_filter(&self, needle: &str) -> bool {
        let fields = [
            self.file_name.as_str(),
            self.source_path.as_str(),
            self.destination_path.as_str(),
            self.status.label(),
            self.protocol.as_str(),
            self.error_message.as_deref().unwrap_or(""),
        ];
        fields.iter().any(|f| f.to_lowercase().contains(needle))
    }
}

pub(crate) fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Aggregate outcome of one batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TransferResult {
    pub success: bool,
    pub message: String,
    pub logs: Vec<TransferLog>,
    pub source_path: String,
    pub destination_path: String,
    pub protocol: Protocol,
    pub total_bytes: u64,
    pub duration_ms: u64,
    pub files_transferred: usize,
    pub files_failed: usize,
    pub files_skipped: usize,
    pub error_message: Option<String>,
}

impl TransferResult {
    fn base(connection: &ConnectionSettings, protocol: Protocol) -> Self {
        Self {
            success: true,
            message: String::new(),
            logs: Vec::new(),
            source_path: connection.source().to_string(),
            destination_path: connection.destination().to_string(),
            protocol,
            total_bytes: 0,
            duration_ms: 0,
            files_transferred: 0,
            files_failed: 0,
            files_skipped: 0,
            error_message: None,
        }
    }

    /// Successful result for a batch with nothing to do
    pub fn nothing_to_do(
        connection: &ConnectionSettings,
        protocol: Protocol,
        files_skipped: usize,
        duration: Duration,
    ) -> Self {
        Self {
            message: "No files found to transfer".to_string(),
            files_skipped,
            duration_ms: duration_millis(duration),
            ..Self::base(connection, protocol)
        }
    }

    /// Failed result for a batch that never reached the per-file stage
    pub fn failed(
        connection: &ConnectionSettings,
        protocol: Protocol,
        error: impl Into<String>,
        duration: Duration,
    ) -> Self {
        let error = error.into();
        Self {
            success: false,
            message: format!("Transfer failed: {}", error),
            duration_ms: duration_millis(duration),
            error_message: Some(error),
            ..Self::base(connection, protocol)
        }
    }

    /// Build a result from per-file entries
    pub fn from_logs(
        connection: &ConnectionSettings,
        protocol: Protocol,
        logs: Vec<TransferLog>,
        files_skipped: usize,
        duration: Duration,
    ) -> Self {
        let files_failed = logs
            .iter()
            .filter(|l| l.status == TransferStatus::Failed)
            .count();
        let files_transferred = logs.len() - files_failed;
        let total_bytes = logs
            .iter()
            .filter(|l| l.status == TransferStatus::Success)
            .map(|l| l.file_size)
            .sum();
        let error_message = logs
            .iter()
            .find_map(|l| l.error_message.clone())
            .filter(|_| files_failed > 0);

        Self {
            success: files_failed == 0,
            message: summary(files_transferred, files_failed, files_skipped),
            logs,
            total_bytes,
            duration_ms: duration_millis(duration),
            files_transferred,
            files_failed,
            files_skipped,
            error_message,
            ..Self::base(connection, protocol)
        }
    }

    /// Account for files the filters dropped before the engine ran
    pub fn set_skipped(&mut self, files_skipped: usize) {
        self.files_skipped = files_skipped;
        if !self.logs.is_empty() {
            self.message = summary(self.files_transferred, self.files_failed, files_skipped);
        }
    }
}

fn summary(transferred: usize, failed: usize, skipped: usize) -> String {
    format!(
        "Transfer completed. Files: {} transferred, {} failed, {} skipped",
        transferred, failed, skipped
    )
}

/// Error types for the service
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AppError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("File I/O error: {0}")]
    FileIo(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Remote server error: {0}")]
    Remote(String),

    #[error("IPC error: {0}")]
    Ipc(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Destination file already exists: {0}")]
    AlreadyExists(String),

    #[error("Busy: {0}")]
    Busy(String),
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::ConnectionRefused => AppError::ConnectionRefused(err.to_string()),
            std::io::ErrorKind::TimedOut => AppError::Timeout(err.to_string()),
            std::io::ErrorKind::NotFound => AppError::NotFound(err.to_string()),
            _ => AppError::FileIo(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str, size: u64, age_minutes: i64, depth: usize) -> (FileItem, DateTime<Utc>) {
        let now = Utc::now();
        let item = FileItem {
            file_name: name.to_string(),
            full_path: PathBuf::from("/src").join(name),
            relative_path: PathBuf::from(name),
            depth,
            size_bytes: size,
            last_modified: now - chrono::Duration::minutes(age_minutes),
        };
        (item, now)
    }

    #[test]
    fn test_protocol_labels() {
        assert_eq!(Protocol::from_label("ftp"), Protocol::Ftp);
        assert_eq!(Protocol::from_label(" SFTP "), Protocol::Sftp);
        assert_eq!(Protocol::from_label("gopher"), Protocol::Local);

        let json = serde_json::to_string(&Protocol::Sftp).unwrap();
        assert_eq!(json, "\"SFTP\"");
        let parsed: Protocol = serde_json::from_str("\"Ftp\"").unwrap();
        assert_eq!(parsed, Protocol::Ftp);
    }

    #[test]
    fn test_remote_validation() {
        let mut settings = ConnectionSettings {
            protocol: Protocol::Ftp,
            host: "ftp.example.com".to_string(),
            port: 21,
            username: "user".to_string(),
            password: "secret".to_string(),
            ..ConnectionSettings::default()
        };
        assert!(settings.validate().is_ok());

        settings.port = 70000;
        assert_eq!(
            settings.validate(),
            Err(AppError::InvalidConfig("Port must be between 1 and 65535".to_string()))
        );

        settings.port = 22;
        settings.host = "  ".to_string();
        assert!(matches!(settings.validate(), Err(AppError::InvalidConfig(m)) if m == "Host is required"));
    }

    #[test]
    fn test_validation_follows_effective_protocol() {
        let dir = tempfile::tempdir().unwrap();
        let settings = ConnectionSettings {
            protocol: Protocol::Sftp,
            ..ConnectionSettings::local(dir.path().to_string_lossy(), "/tmp/out")
        };
        assert!(settings.validate().is_err());
        assert!(settings.validate_for(Protocol::Local).is_ok());
    }

    #[test]
    fn test_local_validation() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().to_string_lossy().to_string();

        assert!(ConnectionSettings::local(&source, "/tmp/out").validate().is_ok());
        assert!(ConnectionSettings::local("", "/tmp/out").validate().is_err());
        assert!(ConnectionSettings::local(&source, "").validate().is_err());

        let missing = dir.path().join("missing").to_string_lossy().to_string();
        assert!(ConnectionSettings::local(missing, "/tmp/out").validate().is_err());

        let quoted = format!("\"{}\"", source);
        assert!(ConnectionSettings::local(quoted, "/tmp/out").validate().is_ok());
    }

    #[test]
    fn test_connection_settings_defaults_from_partial_json() {
        let settings: ConnectionSettings =
            serde_json::from_str(r#"{"Protocol":"SFTP","Host":"h","Port":22}"#).unwrap();
        assert_eq!(settings.protocol, Protocol::Sftp);
        assert!(settings.use_passive_mode);
        assert!(settings.overwrite_existing);
        assert_eq!(settings.timeout_seconds, 30);
        assert_eq!(settings.direction, TransferDirection::Upload);
    }

    #[test]
    fn test_filter_rules() {
        let filters = FilterSettings {
            allowed_extensions: vec![".TXT".to_string(), "csv".to_string()],
            min_size_bytes: 10,
            max_size_bytes: 100,
            min_age_minutes: 5,
            ..FilterSettings::default()
        };

        let (f, now) = item("a.txt", 50, 10, 0);
        assert!(filters.matches(&f, now));

        let (f, now) = item("a.log", 50, 10, 0);
        assert!(!filters.matches(&f, now));

        let (f, now) = item("a.csv", 9, 10, 0);
        assert!(!filters.matches(&f, now));

        let (f, now) = item("a.csv", 101, 10, 0);
        assert!(!filters.matches(&f, now));

        let (f, now) = item("a.csv", 100, 1, 0);
        assert!(!filters.matches(&f, now));

        let (f, now) = item("a.csv", 100, 10, 2);
        assert!(!filters.matches(&f, now));
    }

    #[test]
    fn test_filter_property_grid() {
        let extensions = ["txt", "bin", ""];
        let sizes = [0u64, 5, 10, 1000];
        let ages = [0i64, 3, 60];
        let depths = [0usize, 1];

        for allowlist in [vec![], vec!["txt".to_string()]] {
            for max in [0u64, 10] {
                for include_subfolders in [false, true] {
                    let filters = FilterSettings {
                        allowed_extensions: allowlist.clone(),
                        min_size_bytes: 5,
                        max_size_bytes: max,
                        min_age_minutes: 3,
                        include_subfolders,
                        ..FilterSettings::default()
                    };

                    for ext in extensions {
                        for size in sizes {
                            for age in ages {
                                for depth in depths {
                                    let name = if ext.is_empty() {
                                        "file".to_string()
                                    } else {
                                        format!("file.{}", ext)
                                    };
                                    let (f, now) = item(&name, size, age, depth);
                                    let expected = (allowlist.is_empty()
                                        || allowlist.iter().any(|a| a == ext))
                                        && size >= 5
                                        && (max == 0 || size <= max)
                                        && age >= 3
                                        && (depth == 0 || include_subfolders);
                                    assert_eq!(
                                        filters.matches(&f, now),
                                        expected,
                                        "{} size={} age={} depth={} max={} sub={}",
                                        name,
                                        size,
                                        age,
                                        depth,
                                        max,
                                        include_subfolders
                                    );
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_filter_wildcard_and_aliases() {
        let filters: FilterSettings =
            serde_json::from_str(r#"{"IncludeFileTypes":["*.*"],"MaxFileSizeBytes":0}"#).unwrap();
        assert!(filters.extension_allowed("anything.dat"));
        assert!(filters.size_allowed(u64::MAX));

        let archive = FilterSettings {
            post_action: PostTransferAction::Archive,
            ..FilterSettings::default()
        };
        assert!(archive.validate().is_err());
    }

    #[test]
    fn test_result_aggregation() {
        let settings = ConnectionSettings::local("/src", "/dst");
        let logs = vec![
            TransferLog::success("a", "/src/a", "/dst/a", Protocol::Local, 10, Duration::ZERO, "ok"),
            TransferLog::failure("b", "/src/b", "/dst/b", Protocol::Local, "denied", Duration::ZERO),
        ];
        let result = TransferResult::from_logs(&settings, Protocol::Local, logs, 3, Duration::ZERO);

        assert!(!result.success);
        assert_eq!(result.files_transferred, 1);
        assert_eq!(result.files_failed, 1);
        assert_eq!(result.files_skipped, 3);
        assert_eq!(result.total_bytes, 10);
        assert_eq!(result.error_message.as_deref(), Some("denied"));
    }

    #[test]
    fn test_log_filter_matching() {
        let log = TransferLog::failure(
            "Report.PDF",
            "/src/Report.PDF",
            "/dst/Report.PDF",
            Protocol::Sftp,
            "Permission denied",
            Duration::ZERO,
        );
        assert!(log.matches_filter("report"));
        assert!(log.matches_filter("sftp"));
        assert!(log.matches_filter("fail"));
        assert!(log.matches_filter("permission"));
        assert!(!log.matches_filter("success"));
    }
}

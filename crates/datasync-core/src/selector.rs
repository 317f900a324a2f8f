// SPDX-License-Identifier: AGPL-3.0
// DataSync Core - Engine selection

use crate::engine::{FtpEngine, LocalEngine, SftpEngine, TransferEngine};
use crate::retry::RetryPolicy;
use crate::types::{clean_path, ConnectionSettings, Protocol};
use std::sync::Arc;

/// Drive-letter (`C:\`, `C:/`) or UNC (`\\server`) path
pub fn looks_local(path: &str) -> bool {
    let path = clean_path(path);
    if path.starts_with("\\\\") {
        return true;
    }
    let bytes = path.as_bytes();
    bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes[2] == b'\\' || bytes[2] == b'/')
}

/// Effective protocol: Local when both ends are local-style paths
pub fn normalize_protocol(connection: &ConnectionSettings) -> Protocol {
    if connection.protocol.is_remote()
        && looks_local(&connection.source_path)
        && looks_local(&connection.destination_path)
    {
        tracing::info!(
            "Both paths are local, using LOCAL instead of {}",
            connection.protocol
        );
        return Protocol::Local;
    }
    connection.protocol
}

/// Maps a protocol to its engine
#[derive(Clone)]
pub struct EngineSelector {
    local: Arc<dyn TransferEngine>,
    ftp: Arc<dyn TransferEngine>,
    sftp: Arc<dyn TransferEngine>,
}

impl EngineSelector {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            local: Arc::new(LocalEngine::new(retry)),
            ftp: Arc::new(FtpEngine::new(retry)),
            sftp: Arc::new(SftpEngine::new(retry)),
        }
    }

    /// Substitute engines, mainly for tests
    pub fn with_engines(
        local: Arc<dyn TransferEngine>,
        ftp: Arc<dyn TransferEngine>,
        sftp: Arc<dyn TransferEngine>,
    ) -> Self {
        Self { local, ftp, sftp }
    }

    pub fn select(&self, protocol: Protocol) -> Arc<dyn TransferEngine> {
        match protocol {
            Protocol::Local => self.local.clone(),
            Protocol::Ftp => self.ftp.clone(),
            Protocol::Sftp => self.sftp.clone(),
        }
    }
}

impl Default for EngineSelector {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_path_detection() {
        assert!(looks_local("C:\\data\\in"));
        assert!(looks_local("d:/out"));
        assert!(looks_local("\\\\fileserver\\share"));
        assert!(looks_local("  \"C:\\quoted\"  "));
        assert!(!looks_local("/home/user"));
        assert!(!looks_local("upload"));
        assert!(!looks_local("C:"));
    }

    #[test]
    fn test_normalization() {
        let mut settings = ConnectionSettings {
            protocol: Protocol::Ftp,
            source_path: "C:\\in".to_string(),
            destination_path: "\\\\nas\\out".to_string(),
            ..ConnectionSettings::default()
        };
        assert_eq!(normalize_protocol(&settings), Protocol::Local);

        settings.destination_path = "/upload".to_string();
        assert_eq!(normalize_protocol(&settings), Protocol::Ftp);

        settings.protocol = Protocol::Sftp;
        assert_eq!(normalize_protocol(&settings), Protocol::Sftp);
    }

    #[test]
    fn test_select_is_exhaustive() {
        let selector = EngineSelector::default();
        for protocol in [Protocol::Local, Protocol::Ftp, Protocol::Sftp] {
            assert_eq!(selector.select(protocol).protocol(), protocol);
        }
    }
}

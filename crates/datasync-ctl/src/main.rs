// SPDX-License-Identifier: AGPL-3.0
// DataSync Ctl - Main entry point
//
// Sends one command to the running service and prints the JSON response.

use clap::{Args, Parser, Subcommand};
use datasync_core::settings::SERVICE_FILE;
use datasync_core::{
    AppError, CommandEnvelope, ConnectionSettings, FilterSettings, IpcClient, IpcEndpoint,
    Protocol, ResponseEnvelope, RetryPolicy, ServiceSettings, TransferDirection,
    TransferFileRequest,
};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "datasync-ctl", version, about = "Control a running DataSync service")]
struct Cli {
    /// Configuration directory used to find the service endpoint
    #[arg(long, global = true, env = "DATASYNC_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// IPC endpoint name (overrides service.json)
    #[arg(long, global = true)]
    pipe_name: Option<String>,

    /// Directory holding the service socket (overrides service.json)
    #[arg(long, global = true)]
    socket_dir: Option<PathBuf>,

    /// Connect and response timeout in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Connection attempts before giving up on an unreachable service. A
    /// command that reached the service is never sent twice.
    #[arg(long, global = true, default_value_t = 1)]
    retries: u32,

    /// Seconds to wait for start, transfer-file and test-connection to finish
    #[arg(long, global = true, default_value_t = 3600)]
    wait_secs: u64,

    #[command(subcommand)]
    command: CtlCommand,
}

#[derive(Debug, Subcommand)]
enum CtlCommand {
    /// Check that the service is alive
    Ping,
    /// Show settings, scheduler state and running jobs
    Status,
    /// Probe a connection (the stored one when no connection options are given)
    TestConnection(ConnectionArgs),
    /// Replace the stored connection settings
    UpdateConnection(ConnectionArgs),
    /// Replace the stored filter settings
    UpdateFilters {
        /// JSON file holding the filter settings
        #[arg(long)]
        file: PathBuf,
    },
    /// Run a transfer now
    Start(ConnectionArgs),
    /// Ask the service to shut down
    Stop,
    /// Query the transfer log
    Logs {
        /// Case-insensitive substring matched against names, paths, status and errors
        #[arg(long)]
        filter: Option<String>,
        #[arg(long)]
        max: Option<usize>,
        /// UTC day as YYYY-MM-DD
        #[arg(long)]
        date: Option<String>,
    },
    /// Delete every transfer log entry
    ClearLogs,
    /// Transfer a single file
    TransferFile {
        #[arg(long)]
        source: String,
        #[arg(long)]
        destination: String,
        #[command(flatten)]
        connection: ConnectionArgs,
    },
    /// Stop scheduled runs without stopping the service
    Pause,
    /// Resume scheduled runs
    Resume,
}

/// Connection given either as a JSON file or as individual options
#[derive(Debug, Default, Args)]
struct ConnectionArgs {
    /// JSON file holding the connection settings
    #[arg(long, conflicts_with_all = ["protocol", "host", "port", "username", "password"])]
    file: Option<PathBuf>,
    /// LOCAL, FTP or SFTP
    #[arg(long)]
    protocol: Option<String>,
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u32>,
    #[arg(long)]
    username: Option<String>,
    #[arg(long)]
    password: Option<String>,
    #[arg(long = "from")]
    source_path: Option<String>,
    #[arg(long = "to")]
    destination_path: Option<String>,
    /// FTP: use active data connections
    #[arg(long)]
    active: bool,
    #[arg(long)]
    timeout_seconds: Option<u64>,
    /// Pull files from the remote side instead of pushing them
    #[arg(long)]
    download: bool,
    /// Skip files that already exist at the destination
    #[arg(long)]
    no_overwrite: bool,
    /// SFTP: expected SHA-256 host key fingerprint
    #[arg(long)]
    fingerprint: Option<String>,
}

impl ConnectionArgs {
    fn is_empty(&self) -> bool {
        self.file.is_none()
            && self.protocol.is_none()
            && self.host.is_none()
            && self.port.is_none()
            && self.username.is_none()
            && self.password.is_none()
            && self.source_path.is_none()
            && self.destination_path.is_none()
            && !self.active
            && self.timeout_seconds.is_none()
            && !self.download
            && !self.no_overwrite
            && self.fingerprint.is_none()
    }

    /// `None` when no connection option was given
    fn to_settings(&self) -> Result<Option<ConnectionSettings>, AppError> {
        if self.is_empty() {
            return Ok(None);
        }
        if let Some(file) = &self.file {
            return read_json_file(file).map(Some);
        }

        let defaults = ConnectionSettings::default();
        Ok(Some(ConnectionSettings {
            protocol: self
                .protocol
                .as_deref()
                .map(Protocol::from_label)
                .unwrap_or(defaults.protocol),
            host: self.host.clone().unwrap_or_default(),
            port: self.port.unwrap_or(defaults.port),
            username: self.username.clone().unwrap_or_default(),
            password: self.password.clone().unwrap_or_default(),
            source_path: self.source_path.clone().unwrap_or_default(),
            destination_path: self.destination_path.clone().unwrap_or_default(),
            use_passive_mode: !self.active,
            timeout_seconds: self.timeout_seconds.unwrap_or(defaults.timeout_seconds),
            direction: if self.download {
                TransferDirection::Download
            } else {
                TransferDirection::Upload
            },
            overwrite_existing: !self.no_overwrite,
            host_key_fingerprint: self.fingerprint.clone(),
        }))
    }
}

fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, AppError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| AppError::FileIo(format!("Failed to read {}: {}", path.display(), e)))?;
    Ok(serde_json::from_str(&contents)?)
}

fn with_optional<T: serde::Serialize>(
    command: &str,
    data: Option<T>,
) -> Result<CommandEnvelope, AppError> {
    match data {
        Some(data) => CommandEnvelope::with_data(command, &data),
        None => Ok(CommandEnvelope::new(command)),
    }
}

/// Translate a subcommand into the envelope the service expects
fn build_envelope(command: &CtlCommand) -> Result<CommandEnvelope, AppError> {
    match command {
        CtlCommand::Ping => Ok(CommandEnvelope::new("PING")),
        CtlCommand::Status => Ok(CommandEnvelope::new("GET_STATUS")),
        CtlCommand::TestConnection(args) => with_optional("TEST_CONNECTION", args.to_settings()?),
        CtlCommand::UpdateConnection(args) => {
            let connection = args.to_settings()?.ok_or_else(|| {
                AppError::InvalidConfig("Connection options or --file are required".to_string())
            })?;
            CommandEnvelope::with_data("UPDATE_CONNECTION", &connection)
        }
        CtlCommand::UpdateFilters { file } => {
            let filters: FilterSettings = read_json_file(file)?;
            CommandEnvelope::with_data("UPDATE_FILTERS", &filters)
        }
        CtlCommand::Start(args) => with_optional("START_TRANSFER", args.to_settings()?),
        CtlCommand::Stop => Ok(CommandEnvelope::new("STOP_SERVICE")),
        CtlCommand::Logs { filter, max, date } => {
            let mut query = Map::new();
            if let Some(filter) = filter {
                query.insert("Filter".to_string(), json!(filter));
            }
            if let Some(max) = max {
                query.insert("MaxResults".to_string(), json!(max));
            }
            if let Some(date) = date {
                query.insert("Date".to_string(), json!(date));
            }
            if query.is_empty() {
                Ok(CommandEnvelope::new("GET_LOGS"))
            } else {
                CommandEnvelope::with_data("GET_LOGS", &Value::Object(query))
            }
        }
        CtlCommand::ClearLogs => Ok(CommandEnvelope::new("CLEAR_LOGS")),
        CtlCommand::TransferFile {
            source,
            destination,
            connection,
        } => CommandEnvelope::with_data(
            "TRANSFER_FILE",
            &TransferFileRequest {
                source_path: source.clone(),
                destination_path: destination.clone(),
                connection: connection.to_settings()?,
            },
        ),
        CtlCommand::Pause => Ok(CommandEnvelope::new("PAUSE_SCHEDULE")),
        CtlCommand::Resume => Ok(CommandEnvelope::new("RESUME_SCHEDULE")),
    }
}

/// Service settings from service.json, or defaults when it cannot be read
fn service_settings(config_dir: Option<&Path>) -> ServiceSettings {
    let dir = match config_dir {
        Some(dir) => dir.to_path_buf(),
        None => match datasync_core::config_dir() {
            Ok(dir) => dir,
            Err(e) => {
                tracing::debug!("No config dir ({}), using default endpoint", e);
                return ServiceSettings::default();
            }
        },
    };
    datasync_core::load_json(&dir.join(SERVICE_FILE)).unwrap_or_default()
}

/// Command-line options win over service.json
fn endpoint_for(cli: &Cli, settings: &ServiceSettings) -> IpcEndpoint {
    let pipe_name = cli.pipe_name.as_deref().unwrap_or(&settings.pipe_name);
    let socket_dir = cli.socket_dir.as_deref().or(settings.socket_dir.as_deref());
    IpcEndpoint::new(pipe_name, socket_dir)
}

fn client_for(cli: &Cli, settings: &ServiceSettings) -> IpcClient {
    let timeout = cli
        .timeout_ms
        .map(|ms| Duration::from_millis(ms.max(1)))
        .unwrap_or_else(|| settings.ipc_timeout());

    IpcClient::new(endpoint_for(cli, settings), timeout)
        .with_max_message_bytes(settings.max_message_bytes)
}

/// Commands that answer only once their work is done
fn waits_for_work(command: &CtlCommand) -> bool {
    matches!(
        command,
        CtlCommand::Start(_) | CtlCommand::TransferFile { .. } | CtlCommand::TestConnection(_)
    )
}

fn response_timeout(cli: &Cli, settings: &ServiceSettings) -> Duration {
    if waits_for_work(&cli.command) {
        Duration::from_secs(cli.wait_secs.max(1))
    } else {
        cli.timeout_ms
            .map(|ms| Duration::from_millis(ms.max(1)))
            .unwrap_or_else(|| settings.ipc_timeout())
    }
}

#[derive(Debug)]
enum DeliveryError {
    /// Nothing was sent
    Unreachable(AppError),
    /// The command was sent; the service may have acted on it
    NoResponse(AppError),
}

/// Retry the connect step only, then exchange the command exactly once
async fn deliver(
    client: &IpcClient,
    envelope: &CommandEnvelope,
    retry: &RetryPolicy,
    response_timeout: Duration,
) -> Result<ResponseEnvelope, DeliveryError> {
    let connection = retry
        .run("connect to service", || client.connect())
        .await
        .map_err(DeliveryError::Unreachable)?;
    connection
        .exchange(envelope, response_timeout)
        .await
        .map_err(DeliveryError::NoResponse)
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("datasync_ctl=warn,datasync_core=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let envelope = match build_envelope(&cli.command) {
        Ok(envelope) => envelope,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::from(2);
        }
    };

    let settings = service_settings(cli.config_dir.as_deref());
    let client = client_for(&cli, &settings);
    let retry = RetryPolicy::new(cli.retries, Duration::from_millis(500));
    let wait = response_timeout(&cli, &settings);
    let response = match deliver(&client, &envelope, &retry, wait).await {
        Ok(response) => response,
        Err(DeliveryError::Unreachable(e)) => {
            let endpoint = endpoint_for(&cli, &settings);
            eprintln!("Cannot reach service at {}: {}", endpoint.path().display(), e);
            return ExitCode::from(2);
        }
        Err(DeliveryError::NoResponse(e)) => {
            eprintln!("No response from service to {}: {}", envelope.command, e);
            return ExitCode::from(2);
        }
    };

    match serde_json::to_string_pretty(&response) {
        Ok(text) => println!("{}", text),
        Err(e) => {
            eprintln!("Failed to render response: {}", e);
            return ExitCode::from(2);
        }
    }

    if response.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

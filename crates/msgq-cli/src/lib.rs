//! # Msgq CLI
//!
//! Command-line interface for typed System-V message queues.
//!
//! This module provides CLI commands for:
//! - Sending and receiving typed messages
//! - Listening to a queue through a subscription
//! - Inspecting and removing queues
//! - Showing the resolved configuration

use bytes::Bytes;
use clap::{Args, Parser, Subcommand};
use msgq_runtime::{
    MessageQueue, Permissions, QueueConfig, QueueError, QueueKey, QueueStats, ReceiveOptions,
    ReceivedMessage, SendOptions, IPC_NOWAIT,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

// ============================================================================
// CLI Structure
// ============================================================================

/// msgq - typed System-V message queues from the shell
#[derive(Parser, Debug)]
#[command(name = "msgq")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Send, receive and inspect typed System-V message queues")]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "MSGQ_CONFIG")]
    pub config: Option<PathBuf>,

    /// Logging level; overrides the configuration file
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Queue selection shared by every queue command
#[derive(Args, Debug, Clone, Default)]
pub struct QueueArgs {
    /// Queue key (decimal, 0x hex or 0o octal)
    #[arg(short, long)]
    pub key: Option<QueueKey>,

    /// Permissions written one hex digit per class, e.g. 0x666
    #[arg(short, long)]
    pub perms: Option<Permissions>,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send one message
    Push {
        #[command(flatten)]
        queue: QueueArgs,

        /// Message type; must be positive
        #[arg(short = 't', long = "type", allow_negative_numbers = true)]
        message_type: Option<i64>,

        /// Fail instead of waiting when the queue is full
        #[arg(long)]
        nowait: bool,

        /// Treat the payload as hex-encoded bytes
        #[arg(long)]
        hex: bool,

        /// Message payload
        payload: String,
    },

    /// Receive one message
    Pop {
        #[command(flatten)]
        queue: QueueArgs,

        /// Type filter: 0 any, n exact, -n lowest type up to n
        #[arg(short = 't', long = "type", default_value = "0", allow_negative_numbers = true)]
        message_type: i64,

        /// Fail instead of waiting when no message matches
        #[arg(long)]
        nowait: bool,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Subscribe and print messages as they arrive
    Listen {
        #[command(flatten)]
        queue: QueueArgs,

        /// Stop after this many messages
        #[arg(short = 'n', long)]
        count: Option<usize>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show queue status
    Stat {
        #[command(flatten)]
        queue: QueueArgs,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Remove the queue from the system
    Remove {
        #[command(flatten)]
        queue: QueueArgs,
    },

    /// Validate and show configuration
    Config {
        /// Show resolved configuration
        #[arg(short, long)]
        show: bool,

        /// Output format for configuration
        #[arg(short = 'f', long, default_value = "toml")]
        format: ConfigFormat,
    },
}

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Type and payload as text
    Text,
    /// One JSON object per message
    Json,
    /// Type and hex-encoded payload
    Hex,
}

/// Configuration format options
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum ConfigFormat {
    Toml,
    Json,
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Command failed: {message}")]
    CommandFailed { message: String },

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Process exit code for this error; 2 is left to clap's usage errors
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 1,
            Self::Queue(_) => 3,
            Self::CommandFailed { .. } => 4,
            Self::InvalidArgument { .. } => 5,
            Self::Io(_) => 6,
        }
    }
}

/// Configuration-related errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Failed to render configuration: {message}")]
    Render { message: String },
}

// ============================================================================
// Configuration Types
// ============================================================================

/// CLI configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CliConfig {
    /// Queue opened by the queue commands
    pub queue: QueueConfig,

    /// Default logging configuration
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum LogFormat {
    #[serde(rename = "text")]
    Text,
    #[serde(rename = "json")]
    Json,
}

/// Load configuration from an optional TOML file and `MSGQ__` variables
///
/// Later sources override earlier ones, e.g. `MSGQ__QUEUE__KEY=31337` sets
/// `queue.key`.
pub fn load_configuration(path: Option<&Path>) -> Result<CliConfig, ConfigError> {
    let mut builder = config::Config::builder();

    if let Some(path) = path {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        builder = builder.add_source(
            config::File::from(path)
                .format(config::FileFormat::Toml)
                .required(true),
        );
    }

    let settings = builder
        .add_source(
            config::Environment::with_prefix("MSGQ")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    Ok(settings.try_deserialize()?)
}

/// Apply command-line queue arguments on top of the configured queue
pub fn resolve_queue_config(config: &CliConfig, args: &QueueArgs) -> QueueConfig {
    let mut queue = config.queue.clone();
    if let Some(key) = args.key {
        queue.key = Some(key);
    }
    if let Some(perms) = args.perms {
        queue.permissions = perms.bits();
    }
    queue
}

// ============================================================================
// Output Rendering
// ============================================================================

/// JSON view of a received message
#[derive(Debug, Serialize)]
struct MessageView<'a> {
    message_type: i64,
    size: usize,
    /// Payload as text when it is valid UTF-8
    text: Option<&'a str>,
    hex: String,
}

/// Render one received message
pub fn render_message(message: &ReceivedMessage, format: OutputFormat) -> Result<String, CliError> {
    match format {
        OutputFormat::Text => Ok(format!(
            "{}\t{}",
            message.message_type,
            String::from_utf8_lossy(&message.body)
        )),
        OutputFormat::Hex => Ok(format!(
            "{}\t{}",
            message.message_type,
            hex::encode(&message.body)
        )),
        OutputFormat::Json => {
            let view = MessageView {
                message_type: message.message_type,
                size: message.len(),
                text: std::str::from_utf8(&message.body).ok(),
                hex: hex::encode(&message.body),
            };
            serde_json::to_string(&view).map_err(|e| CliError::CommandFailed {
                message: format!("failed to encode message: {e}"),
            })
        }
    }
}

/// Render queue status
pub fn render_stats(key: QueueKey, stats: &QueueStats, format: OutputFormat) -> Result<String, CliError> {
    if format == OutputFormat::Json {
        return serde_json::to_string_pretty(stats).map_err(|e| CliError::CommandFailed {
            message: format!("failed to encode status: {e}"),
        });
    }

    let time = |at: Option<chrono::DateTime<chrono::Utc>>| {
        at.map(|at| at.to_rfc3339())
            .unwrap_or_else(|| "never".to_string())
    };
    let pid = |pid: Option<i32>| pid.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string());

    Ok([
        format!("key:              {key}"),
        format!("messages:         {}", stats.message_count),
        format!("max bytes:        {}", stats.max_bytes),
        format!("last send:        {} (pid {})", time(stats.last_send_at), pid(stats.last_send_pid)),
        format!(
            "last receive:     {} (pid {})",
            time(stats.last_receive_at),
            pid(stats.last_receive_pid)
        ),
        format!("last change:      {}", time(stats.changed_at)),
    ]
    .join("\n"))
}

/// Render the resolved configuration
pub fn render_config(config: &CliConfig, format: ConfigFormat) -> Result<String, ConfigError> {
    match format {
        ConfigFormat::Toml => toml::to_string_pretty(config).map_err(|e| ConfigError::Render {
            message: e.to_string(),
        }),
        ConfigFormat::Json => {
            serde_json::to_string_pretty(config).map_err(|e| ConfigError::Render {
                message: e.to_string(),
            })
        }
    }
}

/// Decode a payload argument
pub fn decode_payload(payload: &str, is_hex: bool) -> Result<Bytes, CliError> {
    if !is_hex {
        return Ok(Bytes::copy_from_slice(payload.as_bytes()));
    }

    hex::decode(payload.trim())
        .map(Bytes::from)
        .map_err(|e| CliError::InvalidArgument {
            arg: "payload".to_string(),
            message: e.to_string(),
        })
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Main CLI entry point
pub async fn run_cli() -> Result<(), CliError> {
    run(Cli::parse()).await
}

/// Execute already parsed arguments
pub async fn run(cli: Cli) -> Result<(), CliError> {
    let config = load_configuration(cli.config.as_deref())?;
    initialize_logging(&cli, &config.logging)?;
    debug!(config = ?cli.config, "Loaded configuration");

    match cli.command {
        Commands::Push {
            queue,
            message_type,
            nowait,
            hex,
            payload,
        } => {
            let payload = decode_payload(&payload, hex)?;
            execute_push_command(&config, &queue, message_type, nowait, payload).await
        }
        Commands::Pop {
            queue,
            message_type,
            nowait,
            format,
        } => execute_pop_command(&config, &queue, message_type, nowait, format).await,
        Commands::Listen {
            queue,
            count,
            format,
        } => execute_listen_command(&config, &queue, count, format).await,
        Commands::Stat { queue, format } => execute_stat_command(&config, &queue, format).await,
        Commands::Remove { queue } => execute_remove_command(&config, &queue).await,
        Commands::Config { show, format } => execute_config_command(&config, show, format),
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// Initialize logging based on CLI arguments and configuration
///
/// `RUST_LOG` wins over both. Logs go to stderr so command output stays clean.
fn initialize_logging(cli: &Cli, logging: &LoggingConfig) -> Result<(), CliError> {
    let level = cli.log_level.as_deref().unwrap_or(&logging.level);
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level).map_err(|e| CliError::InvalidArgument {
            arg: "log-level".to_string(),
            message: e.to_string(),
        })?,
    };

    let json = cli.json_logs || logging.format == LogFormat::Json;
    let json_layer = json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
    });
    let text_layer = (!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .map_err(|e| CliError::CommandFailed {
            message: format!("failed to initialize logging: {e}"),
        })
}

async fn open_queue(config: &CliConfig, args: &QueueArgs) -> Result<MessageQueue, CliError> {
    let queue_config = resolve_queue_config(config, args);
    Ok(MessageQueue::from_config(queue_config).await?)
}

/// Execute push command
async fn execute_push_command(
    config: &CliConfig,
    args: &QueueArgs,
    message_type: Option<i64>,
    nowait: bool,
    payload: Bytes,
) -> Result<(), CliError> {
    let queue = open_queue(config, args).await?;

    let mut options = SendOptions::new();
    if let Some(message_type) = message_type {
        options = options.with_type(message_type);
    }
    if nowait {
        options = options.with_flags(IPC_NOWAIT);
    }

    let bytes = payload.len();
    queue.send(payload, options).await?;
    info!(key = %queue.key(), bytes, message_type = ?message_type, "Pushed message");
    Ok(())
}

/// Execute pop command
async fn execute_pop_command(
    config: &CliConfig,
    args: &QueueArgs,
    message_type: i64,
    nowait: bool,
    format: OutputFormat,
) -> Result<(), CliError> {
    let queue = open_queue(config, args).await?;

    let mut options = ReceiveOptions::new().with_type(message_type);
    if nowait {
        options = options.with_flags(IPC_NOWAIT);
    }

    let message = queue.pop(options).await?;
    println!("{}", render_message(&message, format)?);
    Ok(())
}

/// Execute listen command
async fn execute_listen_command(
    config: &CliConfig,
    args: &QueueArgs,
    count: Option<usize>,
    format: OutputFormat,
) -> Result<(), CliError> {
    let queue = open_queue(config, args).await?;
    let mut errors = queue.errors();
    let mut subscription = queue.subscribe().await?;
    info!(key = %queue.key(), count = ?count, "Listening for messages");

    let mut received = 0usize;
    while count.map_or(true, |limit| received < limit) {
        tokio::select! {
            message = subscription.recv() => {
                let Some(message) = message else { break };
                println!("{}", render_message(&message, format)?);
                received += 1;
            }
            failure = errors.recv() => {
                if let Ok(err) = failure {
                    return Err(CliError::CommandFailed {
                        message: format!("listening stopped: {err}"),
                    });
                }
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    subscription.unsubscribe().await;
    info!(key = %queue.key(), received, "Stopped listening");
    Ok(())
}

/// Execute stat command
async fn execute_stat_command(
    config: &CliConfig,
    args: &QueueArgs,
    format: OutputFormat,
) -> Result<(), CliError> {
    let queue = open_queue(config, args).await?;
    let stats = queue.stat().await?;
    println!("{}", render_stats(queue.key(), &stats, format)?);
    Ok(())
}

/// Execute remove command
async fn execute_remove_command(config: &CliConfig, args: &QueueArgs) -> Result<(), CliError> {
    let queue = open_queue(config, args).await?;
    queue.close().await?;
    println!("removed queue {}", queue.key());
    Ok(())
}

/// Execute config command
fn execute_config_command(
    config: &CliConfig,
    show: bool,
    format: ConfigFormat,
) -> Result<(), CliError> {
    info!(show, format = ?format, "Processing config command");

    if show {
        println!("{}", render_config(config, format)?);
    } else {
        println!("configuration OK");
    }
    Ok(())
}

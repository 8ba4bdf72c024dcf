//! streammgr - Command-line interface for the stream manager daemon
//!
//! Provides both a REPL and one-shot command execution.

mod commands;
mod repl;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::PathBuf;
use streammgr_client::{Client, ClientConfig};
use streammgr_protocol::{Persistence, StrategyOnFull};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "streammgr")]
#[command(about = "Command-line interface for the stream manager daemon")]
#[command(version)]
struct Cli {
    /// YAML config file
    #[arg(short, long, env = "STREAMMGR_CONFIG")]
    config: Option<PathBuf>,

    /// Daemon host
    #[arg(long)]
    host: Option<String>,

    /// Daemon port
    #[arg(short, long)]
    port: Option<u16>,

    /// Unix domain socket path (overrides host/port)
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Authentication token
    #[arg(short = 't', long, env = "AWS_CONTAINER_AUTHORIZATION_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Request timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, ValueEnum)]
enum StrategyArg {
    Reject,
    Overwrite,
}

impl From<StrategyArg> for StrategyOnFull {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Reject => StrategyOnFull::RejectNewData,
            StrategyArg::Overwrite => StrategyOnFull::OverwriteOldestData,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum PersistenceArg {
    File,
    Memory,
}

impl From<PersistenceArg> for Persistence {
    fn from(arg: PersistenceArg) -> Self {
        match arg {
            PersistenceArg::File => Persistence::File,
            PersistenceArg::Memory => Persistence::Memory,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Start interactive REPL
    Repl,

    /// Show what the daemon reported during the handshake
    Info,

    /// List all streams
    List,

    /// Create a message stream
    Create {
        /// Stream name
        name: String,

        /// What to do when the stream is full
        #[arg(short, long, value_enum, default_value = "reject")]
        strategy: StrategyArg,

        /// Maximum stream size in bytes
        #[arg(long)]
        max_size: Option<i64>,

        /// Segment size in bytes
        #[arg(long)]
        segment_size: Option<i64>,

        /// Message time to live in milliseconds
        #[arg(long)]
        ttl_ms: Option<i64>,

        #[arg(long, value_enum)]
        persistence: Option<PersistenceArg>,

        /// Flush to disk on every write
        #[arg(long)]
        flush_on_write: bool,

        /// Export definition JSON (or @file.json to read from file)
        #[arg(long)]
        export: Option<String>,
    },

    /// Delete a message stream
    Delete {
        /// Stream name
        name: String,

        /// Succeed if the stream does not exist
        #[arg(long)]
        if_exists: bool,
    },

    /// Show a stream's definition and status
    Describe {
        /// Stream name
        name: String,
    },

    /// Append a message
    Append {
        /// Stream name
        name: String,

        /// Message data (or @file to read from file)
        data: String,
    },

    /// Read messages
    Read {
        /// Stream name
        name: String,

        /// First sequence number to read
        #[arg(short, long)]
        from: Option<i64>,

        /// Minimum number of messages to return
        #[arg(long, default_value = "1")]
        min: i64,

        /// Maximum number of messages to return
        #[arg(long)]
        max: Option<i64>,

        /// How long the daemon may wait for `min` messages
        #[arg(long, default_value = "0")]
        wait_ms: i64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = ClientConfig::load(cli.config.as_deref()).map_err(|e| {
        eprintln!("{}: {}", "Config error".red(), e);
        e
    })?;
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(socket) = cli.socket {
        config.socket_path = Some(socket);
    }
    if let Some(token) = cli.token {
        config.auth_token = Some(token);
    }
    if let Some(ms) = cli.timeout_ms {
        config.request_timeout_ms = ms;
    }

    tracing::debug!(
        endpoint = %config.endpoint(),
        request_timeout_ms = config.request_timeout_ms,
        "configuration loaded"
    );
    let client = Client::from_config(&config);

    match cli.command {
        Some(Commands::Repl) | None => {
            repl::run(client, config.endpoint()).await?;
        }
        Some(cmd) => {
            // Connect for one-shot command
            client.connect().await.map_err(|e| {
                eprintln!("{}: {}", "Connection failed".red(), e);
                e
            })?;

            let result = commands::execute(&client, cmd).await;
            let _ = client.close().await;

            match result {
                Ok(output) => {
                    println!("{}", output);
                }
                Err(e) => {
                    eprintln!("{}: {}", "Error".red(), e);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}

//! voxcal CLI: speak or type calendar commands and confirm them before they apply.
//!
//! Provides an interactive console plus one-shot backend subcommands.

mod commands;
mod console;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// voxcal: voice-driven calendar commands with a confirmation step
#[derive(Parser, Debug)]
#[command(name = "voxcal", version, about, long_about = None)]
struct Cli {
    /// Workspace directory (reads .voxcal/config.toml from here)
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Backend base URL, overriding configuration
    #[arg(short, long)]
    backend: Option<String>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    /// Subcommand (starts the interactive console if omitted)
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum Commands {
    /// Run the voice command console
    Run {
        /// Process a single utterance and exit
        #[arg(short, long)]
        text: Option<String>,
        /// Audio file to transcribe when listening (wav, webm, ogg, mp3, m4a)
        #[arg(short, long, conflicts_with = "mic")]
        audio: Option<PathBuf>,
        /// Record from the default microphone when listening (needs the `voice` feature)
        #[arg(short, long)]
        mic: bool,
        /// Confirm complete commands without prompting
        #[arg(short, long)]
        yes: bool,
    },
    /// List calendar events
    List,
    /// Show recent calendar mutations
    History {
        /// Number of entries to fetch
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },
    /// Delete the most recently created event
    DeleteLast {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Revert the most recent mutation
    UndoLast {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum ConfigAction {
    /// Create default configuration file
    Init,
    /// Show current configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info",
        _ => "debug",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "voxcal", "voxcal")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "voxcal.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let command = cli.command.unwrap_or(Commands::Run {
        text: None,
        audio: None,
        mic: false,
        yes: false,
    });
    commands::handle_command(command, &workspace, cli.backend.as_deref()).await
}

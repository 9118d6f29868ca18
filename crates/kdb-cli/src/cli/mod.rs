//! CLI entry and dispatch.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use kdb_core::config::{self, paths};
use kdb_core::logging;

mod commands;

#[derive(Parser)]
#[command(name = "kdb")]
#[command(version)]
#[command(about = "KdB course assistant client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override the current time (epoch milliseconds)
    #[arg(long, global = true, hide = true, env = "KDB_NOW_MS")]
    now_ms: Option<i64>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Render Markdown to HTML
    Render {
        /// File to read (default: stdin)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Replay a recorded chat stream through the renderer
    Replay {
        /// Recorded server-sent events from the chat endpoint
        #[arg(value_name = "SSE_FILE")]
        file: PathBuf,

        /// Print the render after every fragment, not only the final one
        #[arg(long)]
        frames: bool,
    },

    /// Inspect or change request quota bookkeeping
    Quota {
        #[command(subcommand)]
        command: QuotaCommands,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(clap::Subcommand)]
enum QuotaCommands {
    /// Show today's usage and the cooldown countdown
    Status,
    /// Check whether a request may be sent now
    Check,
    /// Record one request
    Record,
    /// Clear all quota state
    Reset,
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Show the path to the config file
    Path,
    /// Initialize a default config file (if not present)
    Init,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let config = config::Config::load().context("load config")?;

    let _log_guard = match logging::init_logging(&config.log_level, &paths::logs_dir()) {
        Ok(guard) => Some(guard),
        Err(err) => {
            eprintln!("warning: file logging disabled: {err:#}");
            None
        }
    };

    let now_ms = cli
        .now_ms
        .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());

    match cli.command {
        Commands::Render { file } => commands::render::run(file.as_deref()),
        Commands::Replay { file, frames } => {
            // one tokio runtime for the stream
            let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;
            rt.block_on(commands::replay::run(&file, frames))
        }
        Commands::Quota { command } => match command {
            QuotaCommands::Status => commands::quota::status(&config, now_ms),
            QuotaCommands::Check => commands::quota::check(&config, now_ms),
            QuotaCommands::Record => commands::quota::record(&config, now_ms),
            QuotaCommands::Reset => commands::quota::reset(&config),
        },
        Commands::Config { command } => match command {
            ConfigCommands::Path => {
                commands::config::path();
                Ok(())
            }
            ConfigCommands::Init => commands::config::init(),
        },
    }
}

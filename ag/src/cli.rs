//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// agentstream - live event streaming for long-running agent tasks
#[derive(Debug, Parser)]
#[command(
    name = "agentstream",
    about = "Stream structured progress events from long-running agent tasks",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP server
    Serve {
        /// Bind address (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Bind port (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run one task locally, printing its event stream as NDJSON
    Run {
        /// Task prompt
        prompt: String,
    },

    /// Translate log lines from a file (or stdin) into NDJSON events
    Translate {
        /// Log file to read; stdin when omitted
        file: Option<PathBuf>,
    },

    /// Print the executor status as JSON
    Status,
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("agentstream")
        .join("logs")
        .join("agentstream.log")
}

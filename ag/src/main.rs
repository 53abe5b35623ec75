//! agentstream - live event streaming for long-running agent tasks
//!
//! CLI entry point for the HTTP server and local tooling.

use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use clap::Parser;
use eyre::{Context, Result};
use futures::StreamExt;
use tracing::{debug, info};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use agentstream::bridge::SessionRegistry;
use agentstream::cli::{Cli, Command, get_log_path};
use agentstream::config::Config;
use agentstream::events::StreamKind;
use agentstream::executor::probe_dependency;
use agentstream::server::routes::StatusResponse;
use agentstream::server::{self, AppState};
use agentstream::translate::{LogTranslator, TranslatorLayer};

fn parse_level(level: Option<&str>) -> tracing::Level {
    let Some(s) = level else {
        return tracing::Level::INFO;
    };
    match s.to_uppercase().as_str() {
        "TRACE" => tracing::Level::TRACE,
        "DEBUG" => tracing::Level::DEBUG,
        "INFO" => tracing::Level::INFO,
        "WARN" | "WARNING" => tracing::Level::WARN,
        "ERROR" => tracing::Level::ERROR,
        _ => {
            eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
            tracing::Level::INFO
        }
    }
}

/// Install the file log and the translator layer
///
/// Only the file log is level-filtered; the translator layer sees every
/// event so executor lines are classified whatever the log level.
fn setup_logging(cli_log_level: Option<&str>, config: &Config, sessions: SessionRegistry) -> Result<()> {
    // Priority: CLI --log-level > config file > default (INFO)
    let level = parse_level(cli_log_level.or(config.log_level.as_deref()));

    let file_layer = match open_log_file(&get_log_path()) {
        Ok(file) => Some(
            tracing_subscriber::fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into())),
        ),
        Err(e) => {
            eprintln!("Warning: file logging disabled: {e:#}");
            None
        }
    };

    let translator = Arc::new(LogTranslator::with_options(config.translator.options()));
    tracing_subscriber::registry()
        .with(file_layer)
        .with(TranslatorLayer::new(translator, sessions))
        .try_init()
        .context("Failed to install tracing subscriber")?;

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

fn open_log_file(path: &Path) -> Result<fs::File> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).context("Failed to create log directory")?;
    }
    fs::File::create(path).context("Failed to create log file")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.validate()?;

    let sessions = SessionRegistry::new();
    setup_logging(cli.log_level.as_deref(), &config, sessions.clone()).context("Failed to setup logging")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Serve { host, port } => {
            debug!(?host, ?port, "main: matched Serve command");
            cmd_serve(config, sessions, host, port).await
        }
        Command::Run { prompt } => {
            debug!(prompt_len = prompt.len(), "main: matched Run command");
            cmd_run(config, sessions, prompt).await
        }
        Command::Translate { file } => {
            debug!(?file, "main: matched Translate command");
            cmd_translate(&config, file)
        }
        Command::Status => {
            debug!("main: matched Status command");
            cmd_status(&config).await
        }
    }
}

/// Run the HTTP server
async fn cmd_serve(
    mut config: Config,
    sessions: SessionRegistry,
    host: Option<String>,
    port: Option<u16>,
) -> Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    println!("agentstream listening on http://{}", config.server.bind_addr());

    let state = AppState::from_config(config, sessions)?;
    server::serve(state).await
}

/// Run one session and print its events
async fn cmd_run(config: Config, sessions: SessionRegistry, prompt: String) -> Result<()> {
    let state = AppState::from_config(config, sessions)?;
    let mut stream = state.bridge.start(prompt);

    let mut stdout = io::stdout().lock();
    let mut failed = false;
    while let Some(event) = stream.next().await {
        failed = event.kind == StreamKind::Error;
        stdout.write_all(event.to_ndjson().as_bytes())?;
        stdout.flush()?;
    }

    if failed {
        return Err(eyre::eyre!("Task failed"));
    }
    Ok(())
}

/// Translate log lines into NDJSON events
fn cmd_translate(config: &Config, file: Option<PathBuf>) -> Result<()> {
    let translator = LogTranslator::with_options(config.translator.options());
    let reader: Box<dyn BufRead> = match &file {
        Some(path) => Box::new(BufReader::new(
            fs::File::open(path).context(format!("Failed to open {}", path.display()))?,
        )),
        None => Box::new(io::stdin().lock()),
    };

    let mut stdout = io::stdout().lock();
    let mut translated = 0usize;
    for line in reader.lines() {
        let line = line.context("Failed to read input")?;
        if let Some(event) = translator.translate(&line) {
            stdout.write_all(event.to_ndjson().as_bytes())?;
            translated += 1;
        }
    }
    debug!(translated, "cmd_translate: finished");
    Ok(())
}

/// Print the status snapshot
async fn cmd_status(config: &Config) -> Result<()> {
    let status = StatusResponse {
        executor_dependency_ok: probe_dependency(&config.executor.probe, config.executor.probe_timeout()).await,
        agent_initialized: false,
    };
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

//! agentstream configuration types and loading

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::events::{DEFAULT_HISTORY_CAPACITY, DEFAULT_SUBSCRIBER_BUFFER};
use crate::translate::{ThoughtCapture, TranslateOptions};

/// Main agentstream configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,

    /// Event bus sizing
    pub bus: BusConfig,

    /// Streaming session tuning
    pub bridge: BridgeConfig,

    /// Log translation options
    pub translator: TranslatorConfig,

    /// The task executor to run
    pub executor: ExecutorConfig,

    /// Settings store location
    pub settings: SettingsConfig,

    /// Log level (trace, debug, info, warn, error)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .agentstream.yml
        let local_config = PathBuf::from(".agentstream.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/agentstream/agentstream.yml
        if let Some(user_config) = user_config_path() {
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Validate values that serde cannot check
    pub fn validate(&self) -> Result<()> {
        if self.bus.capacity == 0 {
            return Err(eyre::eyre!("bus.capacity must be at least 1"));
        }
        if self.bus.subscriber_buffer == 0 {
            return Err(eyre::eyre!("bus.subscriber-buffer must be at least 1"));
        }
        if self.bridge.poll_interval_ms == 0 {
            return Err(eyre::eyre!("bridge.poll-interval-ms must be at least 1"));
        }
        if self.bridge.output_buffer == 0 {
            return Err(eyre::eyre!("bridge.output-buffer must be at least 1"));
        }
        Ok(())
    }
}

fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("agentstream").join("agentstream.yml"))
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address
    pub host: String,

    /// Bind port
    pub port: u16,

    /// HTML page served at `/`
    #[serde(rename = "ui-path")]
    pub ui_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            ui_path: None,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Event bus sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Maximum number of events kept in history
    pub capacity: usize,

    /// Per-subscriber buffer before a slow subscriber starts skipping events
    #[serde(rename = "subscriber-buffer")]
    pub subscriber_buffer: usize,

    /// Default `limit` of the history endpoint
    #[serde(rename = "history-limit")]
    pub history_limit: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_HISTORY_CAPACITY,
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
            history_limit: 100,
        }
    }
}

/// Streaming session tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Fallback wakeup of the draining loop in milliseconds
    #[serde(rename = "poll-interval-ms")]
    pub poll_interval_ms: u64,

    /// Wait after task completion before the final drain, in milliseconds
    #[serde(rename = "grace-period-ms")]
    pub grace_period_ms: u64,

    /// Bound of each session's delivery queue
    #[serde(rename = "queue-capacity")]
    pub queue_capacity: usize,

    /// Events buffered between a session and its HTTP response
    #[serde(rename = "output-buffer")]
    pub output_buffer: usize,

    /// Clear the event bus when a session takes ownership of it
    #[serde(rename = "reset-bus-on-start")]
    pub reset_bus_on_start: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 50,
            grace_period_ms: 100,
            queue_capacity: crate::bridge::DEFAULT_QUEUE_CAPACITY,
            output_buffer: 64,
            reset_bus_on_start: true,
        }
    }
}

impl BridgeConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

/// Log translation options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslatorConfig {
    #[serde(rename = "thought-capture")]
    pub thought_capture: ThoughtCapture,
}

impl TranslatorConfig {
    pub fn options(&self) -> TranslateOptions {
        TranslateOptions {
            thought_capture: self.thought_capture,
        }
    }
}

/// The external agent program and its dependency probe
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Program to run for each task
    pub program: String,

    /// Arguments; `{prompt}` is replaced by the prompt, otherwise the
    /// prompt is written to stdin
    pub args: Vec<String>,

    #[serde(rename = "working-dir")]
    pub working_dir: Option<PathBuf>,

    /// Extra environment variables
    pub env: HashMap<String, String>,

    /// Command whose success means the executor's dependency is reachable
    pub probe: Vec<String>,

    #[serde(rename = "probe-timeout-ms")]
    pub probe_timeout_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            program: "python".to_string(),
            args: vec!["main.py".to_string()],
            working_dir: None,
            env: HashMap::new(),
            probe: vec!["ollama".to_string(), "list".to_string()],
            probe_timeout_ms: 5000,
        }
    }
}

impl ExecutorConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Settings store location
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsConfig {
    /// JSON settings file; defaults to the user config directory
    pub path: Option<PathBuf>,
}

impl SettingsConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(settingsstore::default_settings_path)
    }
}

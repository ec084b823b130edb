//! Configuration management for the WebTerm daemon.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/webterm/config.toml`.

use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use protocol::OutputEncoding;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default listening port when neither the config file nor `PORT` sets one.
pub const DEFAULT_PORT: u16 = 8000;

/// Default initial terminal width.
pub const DEFAULT_COLS: u16 = 80;

/// Default initial terminal height.
pub const DEFAULT_ROWS: u16 = 24;

/// Default keepalive ping interval in seconds.
pub const DEFAULT_KEEPALIVE_SECS: u64 = 30;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("session command must not be empty")]
    EmptyCommand,

    #[error("terminal size must be at least 1x1, got {cols}x{rows}")]
    InvalidDimensions { cols: u16, rows: u16 },

    #[error("keepalive interval must be greater than 0 seconds")]
    InvalidKeepaliveInterval,

    #[error("send_timeout_ms must be greater than 0")]
    InvalidSendTimeout,

    #[error("ws_path must start with '/' and name a path other than '/', got {0}")]
    InvalidWsPath(String),

    #[error("index_page must be a file name without '/', got {0}")]
    InvalidIndexPage(String),

    #[error("bind_addr must be an IP address, got {0}")]
    InvalidBindAddr(String),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the WebTerm daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General daemon configuration.
    pub daemon: DaemonConfig,

    /// HTTP listener and routing.
    pub server: ServerConfig,

    /// Per-connection terminal session settings.
    pub session: SessionConfig,

    /// Keepalive pinging of idle connections.
    pub keepalive: KeepaliveConfig,
}

/// General daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: String,

    /// Port to listen on.
    pub port: u16,

    /// Directory holding the browser front-end.
    pub static_dir: PathBuf,

    /// Page the root path redirects to.
    pub index_page: String,

    /// Path of the WebSocket terminal endpoint.
    pub ws_path: String,
}

/// Terminal session configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Program started for every connection.
    pub command: String,

    /// Arguments passed to the program.
    pub args: Vec<String>,

    /// Initial terminal width.
    pub cols: u16,

    /// Initial terminal height.
    pub rows: u16,

    /// Value of TERM exported to the program.
    pub term: String,

    /// Working directory. Defaults to the daemon's own.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,

    /// Extra environment variables, on top of the inherited environment.
    pub env: Vec<(String, String)>,

    /// Wire encoding of process output.
    pub output_encoding: OutputEncoding,

    /// Upper bound for a single send to the client, in milliseconds.
    pub send_timeout_ms: u64,

    /// Time allowed to flush remaining output at teardown, in milliseconds.
    pub drain_timeout_ms: u64,
}

/// Keepalive configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KeepaliveConfig {
    /// Seconds between pings.
    pub interval_secs: u64,

    /// Close the connection after this many unanswered pings (0 = never).
    pub max_missed_pongs: u32,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            static_dir: PathBuf::from("public"),
            index_page: "terminal.html".to_string(),
            ws_path: "/term".to_string(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            command: "python".to_string(),
            args: vec!["-u".to_string(), "run_interactive.py".to_string()],
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
            term: "xterm-color".to_string(),
            cwd: None,
            env: Vec::new(),
            output_encoding: OutputEncoding::Text,
            send_timeout_ms: 5_000,
            drain_timeout_ms: 2_000,
        }
    }
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_KEEPALIVE_SECS,
            max_missed_pongs: 3,
        }
    }
}

impl ServerConfig {
    /// Returns the socket address to listen on.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self
            .bind_addr
            .parse()
            .map_err(|_| ConfigError::InvalidBindAddr(self.bind_addr.clone()))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

impl SessionConfig {
    /// Per-send timeout as a duration.
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Teardown drain timeout as a duration.
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Returns whether the command can be found, either as a path or on `PATH`.
    pub fn command_resolves(&self) -> bool {
        let path = Path::new(&self.command);
        if path.is_absolute() {
            path.exists()
        } else {
            which::which(&self.command).is_ok()
        }
    }
}

impl KeepaliveConfig {
    /// Ping interval as a duration.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("webterm")
        .join("config.toml")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - PORT: Override the listening port
    /// - WEBTERM_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - WEBTERM_STATIC_DIR: Override the static front-end directory
    pub fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("PORT") {
            if !port.is_empty() {
                match port.parse::<u16>() {
                    Ok(port) => {
                        tracing::info!("Overriding port from environment: {}", port);
                        self.server.port = port;
                    }
                    Err(_) => {
                        tracing::warn!("Ignoring invalid PORT value: {}", port);
                    }
                }
            }
        }

        if let Ok(level) = std::env::var("WEBTERM_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.daemon.log_level = level;
            }
        }

        if let Ok(dir) = std::env::var("WEBTERM_STATIC_DIR") {
            if !dir.is_empty() {
                tracing::info!("Overriding static_dir from environment: {}", dir);
                self.server.static_dir = PathBuf::from(dir);
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.command.trim().is_empty() {
            return Err(ConfigError::EmptyCommand);
        }

        if self.session.cols == 0 || self.session.rows == 0 {
            return Err(ConfigError::InvalidDimensions {
                cols: self.session.cols,
                rows: self.session.rows,
            });
        }

        if self.session.send_timeout_ms == 0 {
            return Err(ConfigError::InvalidSendTimeout);
        }

        if self.keepalive.interval_secs == 0 {
            return Err(ConfigError::InvalidKeepaliveInterval);
        }

        let ws_path = &self.server.ws_path;
        if !ws_path.starts_with('/') || ws_path.len() < 2 {
            return Err(ConfigError::InvalidWsPath(self.server.ws_path.clone()));
        }

        let page = &self.server.index_page;
        if page.is_empty() || page.contains('/') {
            return Err(ConfigError::InvalidIndexPage(page.clone()));
        }

        self.server.socket_addr()?;

        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}

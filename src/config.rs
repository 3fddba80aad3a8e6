//! Runtime configuration
//!
//! Defaults match the classic deployment (relay on port 5000, logs in
//! `chat_logs/`, offline queue in `offline_messages.json`). Each value can be
//! overridden through environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::warn;

/// Default relay port
pub const DEFAULT_PORT: u16 = 5000;

/// Server-side settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address the listener binds to
    pub addr: String,
    /// Directory for the daily chat logs; `None` disables file logging
    pub log_dir: Option<PathBuf>,
    /// Maximum number of concurrently handled connections
    pub max_connections: usize,
    /// Per-connection outbound queue length
    pub outbound_buffer: usize,
    /// How long a new connection may take to send its first line
    pub handshake_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: format!("0.0.0.0:{}", DEFAULT_PORT),
            log_dir: Some(PathBuf::from("chat_logs")),
            max_connections: 1024,
            outbound_buffer: 64,
            handshake_timeout: Duration::from_secs(30),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `CHAT_HOST`, `CHAT_PORT`, `CHAT_LOG_DIR`
    /// and `CHAT_MAX_CONNECTIONS`
    pub fn from_env() -> Self {
        let mut config = Self::default();
        let host = env::var("CHAT_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        config.addr = format!("{}:{}", host, port_from_env());
        if let Ok(dir) = env::var("CHAT_LOG_DIR") {
            config.log_dir = Some(PathBuf::from(dir));
        }
        match parse_env::<usize>("CHAT_MAX_CONNECTIONS") {
            Some(0) => warn!("Ignoring CHAT_MAX_CONNECTIONS=0"),
            Some(max) => config.max_connections = max,
            None => {}
        }
        config
    }

    /// `max_connections` clamped to what a semaphore can hold, at least one
    pub fn connection_limit(&self) -> usize {
        self.max_connections.clamp(1, Semaphore::MAX_PERMITS)
    }
}

/// Client-side settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Relay address to connect to
    pub server_addr: String,
    /// Offline queue document
    pub queue_path: PathBuf,
    /// Attempts made by a plain `connect`
    pub connect_retries: u32,
    /// Attempts made when `receive` has to connect first
    pub receive_retries: u32,
    /// Pause between failed attempts
    pub retry_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: format!("127.0.0.1:{}", DEFAULT_PORT),
            queue_path: PathBuf::from("offline_messages.json"),
            connect_retries: 3,
            receive_retries: 5,
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `CHAT_HOST`, `CHAT_PORT` and `CHAT_QUEUE_FILE`
    pub fn from_env() -> Self {
        let mut config = Self::default();
        let host = env::var("CHAT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        config.server_addr = format!("{}:{}", host, port_from_env());
        if let Ok(path) = env::var("CHAT_QUEUE_FILE") {
            config.queue_path = PathBuf::from(path);
        }
        config
    }
}

fn port_from_env() -> u16 {
    parse_env("CHAT_PORT").unwrap_or(DEFAULT_PORT)
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring invalid {}={:?}", key, raw);
            None
        }
    }
}

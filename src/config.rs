//! Server configuration

use serde::{Deserialize, Serialize};

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {}", other)),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log file, appended to. Empty disables file output.
    pub path: String,

    /// Echo log lines to stdout
    pub stdout: bool,

    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "debug".to_string(),
            path: "./logs/access.log".to_string(),
            stdout: true,
            format: LogFormat::Pretty,
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    pub host: String,

    /// Port publishers connect to
    pub port: u16,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 1935,
            logging: LoggingConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Get the socket address string
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Apply `RT_*` overrides from the process environment
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup. Unparseable values are logged
    /// and ignored.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup("RT_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(path) = lookup("RT_LOG_PATH") {
            self.logging.path = path;
        }
        if let Some(stdout) = lookup("RT_LOG_STDOUT") {
            match parse_bool(&stdout) {
                Some(value) => self.logging.stdout = value,
                None => tracing::warn!("Ignoring RT_LOG_STDOUT={:?}: not a boolean", stdout),
            }
        }
        if let Some(format) = lookup("RT_LOG_FORMAT") {
            match format.parse() {
                Ok(value) => self.logging.format = value,
                Err(e) => tracing::warn!("Ignoring RT_LOG_FORMAT: {}", e),
            }
        }
        if let Some(addr) = lookup("RT_LISTEN_ADDR") {
            match split_host_port(&addr) {
                Some((host, port)) => {
                    self.host = host;
                    self.port = port;
                }
                None => tracing::warn!("Ignoring RT_LISTEN_ADDR={:?}: expected host:port", addr),
            }
        }
        self
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Split `host:port`, accepting bracketed IPv6 hosts
fn split_host_port(addr: &str) -> Option<(String, u16)> {
    let (host, port) = addr.trim().rsplit_once(':')?;
    let port = port.parse().ok()?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return None;
    }
    Some((host.to_string(), port))
}

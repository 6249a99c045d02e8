//! Configuration file support
//!
//! Loads server configuration from TOML files.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::{LogFormat, LoggingConfig, ServerConfig};

/// Configuration file format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Server settings
    pub server: ServerSettings,
    /// Logging settings
    pub logging: Option<LoggingSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Host address to bind to
    pub host: String,
    /// Port publishers connect to
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log file path
    pub path: Option<String>,
    /// Echo to stdout
    pub stdout: Option<bool>,
    /// Output format (json, pretty)
    pub format: Option<String>,
}

impl ConfigFile {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: ConfigFile = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    /// Generate default configuration file
    pub fn default_config() -> Self {
        let defaults = ServerConfig::default();
        Self {
            server: ServerSettings {
                host: defaults.host,
                port: defaults.port,
            },
            logging: Some(LoggingSettings {
                level: defaults.logging.level,
                path: Some(defaults.logging.path),
                stdout: Some(defaults.logging.stdout),
                format: Some("pretty".to_string()),
            }),
        }
    }

    /// Convert to ServerConfig
    pub fn into_server_config(self) -> ServerConfig {
        let defaults = LoggingConfig::default();
        let logging = match self.logging {
            Some(l) => LoggingConfig {
                level: l.level,
                path: l.path.unwrap_or(defaults.path),
                stdout: l.stdout.unwrap_or(defaults.stdout),
                format: l
                    .format
                    .as_deref()
                    .and_then(|f| match f.parse::<LogFormat>() {
                        Ok(format) => Some(format),
                        Err(e) => {
                            tracing::warn!("{}, using {:?}", e, defaults.format);
                            None
                        }
                    })
                    .unwrap_or(defaults.format),
            },
            None => defaults,
        };

        ServerConfig {
            host: self.server.host,
            port: self.server.port,
            logging,
        }
    }
}

/// Load the server configuration the way the binary does: a missing file
/// means defaults, an unreadable one is reported and replaced by defaults.
pub fn load_server_config(path: &str) -> ServerConfig {
    if !Path::new(path).exists() {
        return ServerConfig::default();
    }
    match ConfigFile::from_file(path) {
        Ok(cf) => cf.into_server_config(),
        Err(e) => {
            tracing::warn!("Failed to load config file {}: {}. Using defaults.", path, e);
            ServerConfig::default()
        }
    }
}

/// Generate default configuration file at the specified path
pub fn generate_default_config<P: AsRef<Path>>(path: P) -> Result<(), Box<dyn std::error::Error>> {
    let config = ConfigFile::default_config();
    config.to_file(path)?;
    Ok(())
}

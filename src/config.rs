//! Configuration module for the lineserv server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::str::FromStr;

/// Lowest port number accepted for binding. Everything at or below this
/// range is reserved for privileged services.
const MIN_PORT: u16 = 1025;

/// Command-line arguments for the server
#[derive(Parser, Debug)]
#[command(name = "lineserv")]
#[command(author = "lineserv authors")]
#[command(version = "0.1.0")]
#[command(about = "A non-blocking line-oriented TCP dispatch server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// IPv4 address to bind to (dotted quad, or "localhost")
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (must be greater than 1024)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerSection {
    /// IPv4 address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind to
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    9999
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: Ipv4Addr,
    pub port: u16,
    pub log_level: String,
}

impl Config {
    /// Build a validated configuration from a host string and port.
    ///
    /// The literal `"localhost"` is accepted as an alias for 127.0.0.1;
    /// anything else must be an IPv4 dotted quad. Ports at or below 1024
    /// are rejected.
    pub fn new(host: &str, port: u16) -> Result<Self, ConfigError> {
        let host = if host == "localhost" {
            Ipv4Addr::LOCALHOST
        } else {
            Ipv4Addr::from_str(host)
                .map_err(|_| ConfigError::InvalidHost(host.to_string()))?
        };

        if port < MIN_PORT {
            return Err(ConfigError::InvalidPort(port));
        }

        Ok(Config {
            host,
            port,
            log_level: default_log_level(),
        })
    }

    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();
        Self::resolve(cli)
    }

    fn resolve(cli: CliArgs) -> Result<Self, ConfigError> {
        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        // Merge CLI args with TOML config (CLI takes precedence)
        let host = cli.host.unwrap_or(toml_config.server.host);
        let port = cli.port.unwrap_or(toml_config.server.port);

        let mut config = Config::new(&host, port)?;
        config.log_level = if cli.log_level != "info" {
            cli.log_level
        } else {
            toml_config.logging.level
        };

        Ok(config)
    }

    /// The socket address the server binds to.
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.host, self.port))
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid IPv4 address: {0}")]
    InvalidHost(String),
    #[error("port numbers must be greater than 1024 but got: {0}")]
    InvalidPort(u16),
    #[error("failed to read config file '{}': {1}", .0.display())]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("failed to parse config file '{}': {1}", .0.display())]
    TomlParse(PathBuf, #[source] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_localhost_alias() {
        let config = Config::new("localhost", 9999).unwrap();
        assert_eq!(config.host, Ipv4Addr::LOCALHOST);
        assert_eq!(config.bind_addr().to_string(), "127.0.0.1:9999");
    }

    #[test]
    fn test_invalid_host_rejected() {
        assert!(matches!(
            Config::new("not-an-address", 9999),
            Err(ConfigError::InvalidHost(_))
        ));
        assert!(matches!(
            Config::new("::1", 9999),
            Err(ConfigError::InvalidHost(_))
        ));
    }

    #[test]
    fn test_privileged_port_rejected() {
        assert!(matches!(
            Config::new("127.0.0.1", 80),
            Err(ConfigError::InvalidPort(80))
        ));
        assert!(matches!(
            Config::new("127.0.0.1", 1024),
            Err(ConfigError::InvalidPort(1024))
        ));
        assert!(Config::new("127.0.0.1", 1025).is_ok());
    }

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9999);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            host = "0.0.0.0"
            port = 7070

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 7070);
        assert_eq!(config.logging.level, "debug");
    }
}

//! Configuration module for sentinel-wire.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::net::{Endpoint, Family};
use crate::protocol::{
    SendPolicy, DEFAULT_BACKLOG, DEFAULT_PORT, END_MESSAGE, HELLO, MAX_PAYLOAD,
};
use crate::roles::{ClientRole, ServerRole};
use bytes::Bytes;
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

/// Which half of the exchange to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Server,
    Client,
    /// Both roles on separate threads in this process.
    #[default]
    Pair,
}

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "sentinel-wire")]
#[command(version)]
#[command(about = "Request/response exchange over stream sockets", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Role to run [default: pair]
    #[arg(short, long, value_enum)]
    pub role: Option<Role>,

    /// Host to bind or connect to (omit for any/local host)
    #[arg(short = 'H', long)]
    pub host: Option<String>,

    /// Port number or service name
    #[arg(short, long)]
    pub port: Option<String>,

    /// Address family passed to the resolver
    #[arg(short, long, value_enum)]
    pub family: Option<Family>,

    /// Pending connection queue depth
    #[arg(short, long)]
    pub backlog: Option<i32>,

    /// Client payload, repeatable; sent in order before the sentinel
    #[arg(short, long = "message")]
    pub messages: Vec<String>,

    /// Short write handling
    #[arg(long, value_enum)]
    pub send_policy: Option<SendPolicy>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Settings shared by both roles
#[derive(Debug, Deserialize)]
pub struct NetworkConfig {
    pub host: Option<String>,
    #[serde(default = "default_port")]
    pub port: String,
    #[serde(default)]
    pub family: Family,
    #[serde(default)]
    pub send_policy: SendPolicy,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: default_port(),
            family: Family::default(),
            send_policy: SendPolicy::default(),
        }
    }
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_backlog")]
    pub backlog: i32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            backlog: default_backlog(),
        }
    }
}

/// Client-related configuration
#[derive(Debug, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_messages")]
    pub messages: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            messages: default_messages(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_port() -> String {
    DEFAULT_PORT.to_string()
}

fn default_backlog() -> i32 {
    DEFAULT_BACKLOG
}

fn default_messages() -> Vec<String> {
    vec![String::from_utf8_lossy(HELLO).into_owned()]
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub role: Role,
    pub host: Option<String>,
    pub port: String,
    pub family: Family,
    pub backlog: i32,
    pub messages: Vec<String>,
    pub send_policy: SendPolicy,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_cli(CliArgs::parse())
    }

    /// Merge parsed CLI args over the TOML file they name, if any.
    pub fn from_cli(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let config = Config {
            role: cli.role.unwrap_or(toml_config.role),
            host: cli.host.or(toml_config.network.host),
            port: cli.port.unwrap_or(toml_config.network.port),
            family: cli.family.unwrap_or(toml_config.network.family),
            backlog: cli.backlog.unwrap_or(toml_config.server.backlog),
            messages: if cli.messages.is_empty() {
                toml_config.client.messages
            } else {
                cli.messages
            },
            send_policy: cli
                .send_policy
                .unwrap_or(toml_config.network.send_policy),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backlog <= 0 {
            return Err(ConfigError::Invalid(format!(
                "backlog must be positive, got {}",
                self.backlog
            )));
        }
        for message in &self.messages {
            if message.is_empty() || message.len() > MAX_PAYLOAD {
                return Err(ConfigError::Invalid(format!(
                    "message {:?} must be 1..={} bytes",
                    message, MAX_PAYLOAD
                )));
            }
            if message.as_bytes() == END_MESSAGE {
                return Err(ConfigError::Invalid(
                    "the termination sentinel cannot be sent as a message".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port.clone(), self.family)
    }

    pub fn server_role(&self) -> ServerRole {
        ServerRole {
            endpoint: self.endpoint(),
            backlog: self.backlog,
            policy: self.send_policy,
        }
    }

    pub fn client_role(&self) -> ClientRole {
        ClientRole {
            endpoint: self.endpoint(),
            messages: self
                .messages
                .iter()
                .map(|m| Bytes::from(m.clone().into_bytes()))
                .collect(),
            policy: self.send_policy,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Config, ConfigError> {
        let mut argv = vec!["sentinel-wire"];
        argv.extend_from_slice(args);
        Config::from_cli(CliArgs::parse_from(argv))
    }

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.role, Role::Pair);
        assert_eq!(config.network.host, None);
        assert_eq!(config.network.port, "20453");
        assert_eq!(config.network.family, Family::Unspecified);
        assert_eq!(config.server.backlog, 2);
        assert_eq!(config.client.messages, vec!["hello".to_string()]);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            role = "server"

            [network]
            host = "127.0.0.1"
            port = "9000"
            family = "ipv4"
            send_policy = "write-all"

            [server]
            backlog = 8

            [client]
            messages = ["hello", "again"]

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.role, Role::Server);
        assert_eq!(config.network.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(config.network.port, "9000");
        assert_eq!(config.network.family, Family::Ipv4);
        assert_eq!(config.network.send_policy, SendPolicy::WriteAll);
        assert_eq!(config.server.backlog, 8);
        assert_eq!(config.client.messages, vec!["hello", "again"]);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_empty_message_list() {
        let config: TomlConfig = toml::from_str("[client]\nmessages = []").unwrap();
        assert!(config.client.messages.is_empty());
    }

    #[test]
    fn test_cli_defaults() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.role, Role::Pair);
        assert_eq!(config.endpoint(), Endpoint::local("20453"));
        assert_eq!(config.backlog, 2);
        assert_eq!(config.send_policy, SendPolicy::FailFast);
        assert_eq!(config.client_role().messages, vec![Bytes::from_static(b"hello")]);
    }

    #[test]
    fn test_cli_overrides() {
        let config = parse(&[
            "--role", "server", "-H", "::1", "-p", "7000", "-f", "ipv6", "-b", "4", "-m", "a",
            "-m", "b", "--send-policy", "write-all", "--log-level", "trace",
        ])
        .unwrap();
        assert_eq!(config.role, Role::Server);
        assert_eq!(config.host.as_deref(), Some("::1"));
        assert_eq!(config.port, "7000");
        assert_eq!(config.family, Family::Ipv6);
        assert_eq!(config.server_role().backlog, 4);
        assert_eq!(config.messages, vec!["a", "b"]);
        assert_eq!(config.send_policy, SendPolicy::WriteAll);
        assert_eq!(config.log_level, "trace");
    }

    #[test]
    fn test_validation() {
        assert!(matches!(parse(&["-b", "0"]), Err(ConfigError::Invalid(_))));
        assert!(matches!(
            parse(&["-m", "END_MESSAGE"]),
            Err(ConfigError::Invalid(_))
        ));
        let long = "x".repeat(MAX_PAYLOAD + 1);
        assert!(matches!(
            parse(&["-m", long.as_str()]),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_role_from_file() {
        let path = std::env::temp_dir().join(format!(
            "sentinel-wire-role-{}.toml",
            std::process::id()
        ));
        std::fs::write(&path, "role = \"client\"\n\n[network]\nport = \"7100\"\n").unwrap();
        let path_str = path.to_str().unwrap();

        let from_file = parse(&["-c", path_str]).unwrap();
        assert_eq!(from_file.role, Role::Client);
        assert_eq!(from_file.port, "7100");

        let overridden = parse(&["-c", path_str, "--role", "server", "-p", "7200"]).unwrap();
        assert_eq!(overridden.role, Role::Server);
        assert_eq!(overridden.port, "7200");

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_unknown_role_in_file() {
        assert!(toml::from_str::<TomlConfig>(r#"role = "observer""#).is_err());
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            parse(&["-c", "/nonexistent/sentinel-wire.toml"]),
            Err(ConfigError::FileRead(..))
        ));
    }
}

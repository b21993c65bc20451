//! Configuration schema definitions.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub client: ClientConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// The tool server to launch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Name used in logs.
    #[serde(default = "default_server_name")]
    pub name: String,

    #[serde(default = "default_command")]
    pub command: String,

    #[serde(default = "default_args")]
    pub args: Vec<String>,

    /// Extra environment for the child, on top of the inherited one.
    #[serde(default)]
    pub env: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            command: default_command(),
            args: default_args(),
            env: HashMap::new(),
            working_dir: None,
        }
    }
}

fn default_server_name() -> String {
    "mcp-server".to_string()
}

fn default_command() -> String {
    "python3".to_string()
}

fn default_args() -> Vec<String> {
    vec!["server.py".to_string()]
}

/// How the bridge introduces itself during the handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_client_name")]
    pub name: String,

    #[serde(default = "default_client_version")]
    pub version: String,

    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: default_client_name(),
            version: default_client_version(),
            protocol_version: default_protocol_version(),
        }
    }
}

fn default_client_name() -> String {
    "toolbridge".to_string()
}

fn default_client_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_protocol_version() -> String {
    "2024-11-05".to_string()
}

/// Request deadlines, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_request_ms")]
    pub request_ms: u64,

    #[serde(default = "default_handshake_ms")]
    pub handshake_ms: u64,

    /// Device commands can take minutes.
    #[serde(default = "default_tool_call_ms")]
    pub tool_call_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_ms: default_request_ms(),
            handshake_ms: default_handshake_ms(),
            tool_call_ms: default_tool_call_ms(),
        }
    }
}

impl TimeoutConfig {
    pub fn request(&self) -> Duration {
        Duration::from_millis(self.request_ms)
    }

    pub fn handshake(&self) -> Duration {
        Duration::from_millis(self.handshake_ms)
    }

    pub fn tool_call(&self) -> Duration {
        Duration::from_millis(self.tool_call_ms)
    }
}

fn default_request_ms() -> u64 {
    10_000
}

fn default_handshake_ms() -> u64 {
    10_000
}

fn default_tool_call_ms() -> u64 {
    180_000
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset.
    #[serde(default = "default_level")]
    pub level: String,

    /// Log file directory. Defaults to `~/.toolbridge/logs`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,

    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,

    #[serde(default = "default_true")]
    pub console: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            directory: None,
            file_prefix: default_file_prefix(),
            console: true,
        }
    }
}

impl LoggingConfig {
    /// The log directory with `~` expanded.
    pub fn resolved_directory(&self) -> PathBuf {
        match &self.directory {
            Some(dir) => PathBuf::from(shellexpand::tilde(dir).to_string()),
            None => dirs::home_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(".toolbridge")
                .join("logs"),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

fn default_file_prefix() -> String {
    "toolbridge".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.command, "python3");
        assert_eq!(config.server.args, vec!["server.py"]);
        assert!(config.server.env.is_empty());
        assert_eq!(config.client.name, "toolbridge");
        assert_eq!(config.client.protocol_version, "2024-11-05");
        assert_eq!(config.timeouts.request(), Duration::from_secs(10));
        assert_eq!(config.timeouts.handshake(), Duration::from_secs(10));
        assert_eq!(config.timeouts.tool_call(), Duration::from_secs(180));
        assert_eq!(config.logging.level, "info");
        assert!(config.logging.console);
    }

    #[test]
    fn test_partial_section_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [timeouts]
            tool_call_ms = 60000
            "#,
        )
        .unwrap();
        assert_eq!(config.timeouts.tool_call_ms, 60_000);
        assert_eq!(config.timeouts.request_ms, 10_000);
    }

    #[test]
    fn test_resolved_directory_default() {
        let dir = LoggingConfig::default().resolved_directory();
        assert!(dir.ends_with(".toolbridge/logs"));
    }

    #[test]
    fn test_resolved_directory_expands_tilde() {
        let logging = LoggingConfig {
            directory: Some("~/bridge-logs".to_string()),
            ..LoggingConfig::default()
        };
        let dir = logging.resolved_directory();
        assert!(!dir.to_string_lossy().starts_with('~'));
        assert!(dir.ends_with("bridge-logs"));
    }

    #[test]
    fn test_serialize_round_trip() {
        let config = Config::default();
        let text = toml::to_string(&config).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back.server.command, config.server.command);
        assert_eq!(back.timeouts.tool_call_ms, config.timeouts.tool_call_ms);
    }
}

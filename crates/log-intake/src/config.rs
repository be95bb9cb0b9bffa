// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Configuration for a log intake server.
//!
//! A [`Config`] can be built in code, deserialized (for embedding in a larger agent
//! configuration), or read from `DD_LOGS_INTAKE_*` environment variables. Whatever the
//! source, [`Config::validate`] runs before a server is constructed so invalid
//! settings never reach a bound socket.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::error::ConfigError;
use crate::metadata::Family;

pub const DEFAULT_DELIMITER: &[u8] = b"\n";
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 20 * 1024 * 1024;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 9000;

/// Settings of a single server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Byte sequence separating messages
    #[serde(
        rename = "line_delimiter",
        default = "default_delimiter",
        deserialize_with = "deserialize_delimiter"
    )]
    pub delimiter: Vec<u8>,
    /// Largest message accepted, in bytes, delimiter excluded
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// How long a stream connection may stay silent before it is closed
    #[serde(default = "default_timeout", deserialize_with = "deserialize_secs")]
    pub timeout: Duration,
    /// Where to listen
    pub transport: TransportConfig,
}

/// Transport specific settings. The variant selects the transport family.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    Tcp {
        host: String,
        port: u16,
        /// Connections served at once; further connections wait to be accepted
        #[serde(default)]
        max_connections: Option<usize>,
    },
    Unix {
        path: PathBuf,
        /// Mode applied to the socket file after bind (e.g. `0o660`)
        #[serde(default)]
        permissions: Option<u32>,
        #[serde(default)]
        max_connections: Option<usize>,
    },
    Udp {
        host: String,
        port: u16,
    },
}

fn default_delimiter() -> Vec<u8> {
    DEFAULT_DELIMITER.to_vec()
}

fn default_max_message_size() -> usize {
    DEFAULT_MAX_MESSAGE_SIZE
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn deserialize_delimiter<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(String::into_bytes)
}

fn deserialize_secs<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_secs)
}

impl Config {
    fn with_transport(transport: TransportConfig) -> Self {
        Self {
            delimiter: default_delimiter(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            timeout: DEFAULT_TIMEOUT,
            transport,
        }
    }

    /// TCP server on `host:port` with default framing settings.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::with_transport(TransportConfig::Tcp {
            host: host.into(),
            port,
            max_connections: None,
        })
    }

    /// Unix domain socket server at `path` with default framing settings.
    pub fn unix(path: impl Into<PathBuf>) -> Self {
        Self::with_transport(TransportConfig::Unix {
            path: path.into(),
            permissions: None,
            max_connections: None,
        })
    }

    /// UDP server on `host:port` with default framing settings.
    pub fn udp(host: impl Into<String>, port: u16) -> Self {
        Self::with_transport(TransportConfig::Udp {
            host: host.into(),
            port,
        })
    }

    #[must_use]
    pub fn with_delimiter(mut self, delimiter: impl Into<Vec<u8>>) -> Self {
        self.delimiter = delimiter.into();
        self
    }

    #[must_use]
    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Checks every invariant of the configuration.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant: empty delimiter, zero max message size,
    /// zero timeout, zero connection limit or an invalid address.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.delimiter.is_empty() {
            return Err(ConfigError::EmptyDelimiter);
        }
        if self.max_message_size == 0 {
            return Err(ConfigError::InvalidMaxMessageSize);
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout);
        }
        self.transport.validate()
    }

    /// Reads the configuration from `DD_LOGS_INTAKE_*` environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `DD_LOGS_INTAKE_TYPE` (`tcp`, `udp`, `unix`) | `tcp` |
    /// | `DD_LOGS_INTAKE_HOST` | `localhost` |
    /// | `DD_LOGS_INTAKE_PORT` | `9000` |
    /// | `DD_LOGS_INTAKE_PATH` | required for `unix` |
    /// | `DD_LOGS_INTAKE_PERMISSIONS` (octal) | unset |
    /// | `DD_LOGS_INTAKE_MAX_CONNECTIONS` | unset |
    /// | `DD_LOGS_INTAKE_LINE_DELIMITER` (`\n`, `\r`, `\t`, `\\` escapes) | `\n` |
    /// | `DD_LOGS_INTAKE_MAX_MESSAGE_SIZE` (bytes) | 20 MiB |
    /// | `DD_LOGS_INTAKE_TIMEOUT` (seconds) | 300 |
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed or the resulting configuration
    /// is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        let transport_type = env::var("DD_LOGS_INTAKE_TYPE")
            .map(|val| val.trim().to_lowercase())
            .unwrap_or_else(|_| "tcp".to_string());
        let host = env::var("DD_LOGS_INTAKE_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string());
        let port = parse_env("DD_LOGS_INTAKE_PORT")?.unwrap_or(DEFAULT_PORT);
        let max_connections = parse_env("DD_LOGS_INTAKE_MAX_CONNECTIONS")?;

        let transport = match transport_type.as_str() {
            "tcp" => TransportConfig::Tcp {
                host,
                port,
                max_connections,
            },
            "udp" => TransportConfig::Udp { host, port },
            "unix" => {
                let path = env::var("DD_LOGS_INTAKE_PATH").map_err(|_| ConfigError::InvalidEnv {
                    name: "DD_LOGS_INTAKE_PATH",
                    reason: "required when DD_LOGS_INTAKE_TYPE is unix".to_string(),
                })?;
                let permissions = match env::var("DD_LOGS_INTAKE_PERMISSIONS") {
                    Ok(mode) => Some(parse_mode(&mode).ok_or_else(|| ConfigError::InvalidEnv {
                        name: "DD_LOGS_INTAKE_PERMISSIONS",
                        reason: format!("'{}' is not an octal file mode", mode),
                    })?),
                    Err(_) => None,
                };
                TransportConfig::Unix {
                    path: PathBuf::from(path),
                    permissions,
                    max_connections,
                }
            }
            other => {
                return Err(ConfigError::InvalidEnv {
                    name: "DD_LOGS_INTAKE_TYPE",
                    reason: format!("unknown transport '{}', expected tcp, udp or unix", other),
                })
            }
        };

        let mut config = Self::with_transport(transport);
        if let Ok(delimiter) = env::var("DD_LOGS_INTAKE_LINE_DELIMITER") {
            config.delimiter = unescape(&delimiter).into_bytes();
        }
        if let Some(max_message_size) = parse_env("DD_LOGS_INTAKE_MAX_MESSAGE_SIZE")? {
            config.max_message_size = max_message_size;
        }
        if let Some(secs) = parse_env::<u64>("DD_LOGS_INTAKE_TIMEOUT")? {
            config.timeout = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }
}

impl TransportConfig {
    #[must_use]
    pub fn family(&self) -> Family {
        match self {
            Self::Tcp { .. } => Family::Tcp,
            Self::Unix { .. } => Family::Unix,
            Self::Udp { .. } => Family::Udp,
        }
    }

    /// Human readable address, `host:port` or the socket path.
    #[must_use]
    pub fn address(&self) -> String {
        match self {
            Self::Tcp { host, port, .. } | Self::Udp { host, port } => {
                format!("{}:{}", host, port)
            }
            Self::Unix { path, .. } => path.display().to_string(),
        }
    }

    #[must_use]
    pub fn max_connections(&self) -> Option<usize> {
        match self {
            Self::Tcp {
                max_connections, ..
            }
            | Self::Unix {
                max_connections, ..
            } => *max_connections,
            Self::Udp { .. } => None,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections() == Some(0) {
            return Err(ConfigError::InvalidMaxConnections);
        }
        match self {
            Self::Tcp { host, .. } | Self::Udp { host, .. } => {
                if host.trim().is_empty() {
                    return Err(ConfigError::InvalidAddress("host cannot be empty".to_string()));
                }
                if host.chars().any(char::is_whitespace) {
                    return Err(ConfigError::InvalidAddress(format!(
                        "host '{}' contains whitespace",
                        host
                    )));
                }
                Ok(())
            }
            #[cfg(unix)]
            Self::Unix { path, .. } => crate::server::unix::validate_socket_path(path)
                .map_err(|e| ConfigError::InvalidAddress(e.to_string())),
            #[cfg(not(unix))]
            Self::Unix { .. } => Err(ConfigError::InvalidAddress(
                "Unix Domain Sockets are only supported on Unix platforms".to_string(),
            )),
        }
    }
}

fn parse_env<T: FromStr>(name: &'static str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(val) => val
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnv {
                name,
                reason: format!("'{}': {}", val, e),
            }),
        Err(_) => Ok(None),
    }
}

fn parse_mode(mode: &str) -> Option<u32> {
    let mode = mode.trim();
    let digits = mode.strip_prefix("0o").unwrap_or(mode);
    u32::from_str_radix(digits, 8).ok().filter(|m| *m <= 0o7777)
}

// Environment variables cannot easily carry control characters, so delimiters are
// written with backslash escapes.
fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    const ENV_VARS: [&str; 9] = [
        "DD_LOGS_INTAKE_TYPE",
        "DD_LOGS_INTAKE_HOST",
        "DD_LOGS_INTAKE_PORT",
        "DD_LOGS_INTAKE_PATH",
        "DD_LOGS_INTAKE_PERMISSIONS",
        "DD_LOGS_INTAKE_MAX_CONNECTIONS",
        "DD_LOGS_INTAKE_LINE_DELIMITER",
        "DD_LOGS_INTAKE_MAX_MESSAGE_SIZE",
        "DD_LOGS_INTAKE_TIMEOUT",
    ];

    fn clear_env() {
        for name in ENV_VARS {
            env::remove_var(name);
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::tcp("localhost", 9000);
        assert!(config.validate().is_ok());
        assert_eq!(config.delimiter, b"\n");
        assert_eq!(config.max_message_size, 20 * 1024 * 1024);
        assert_eq!(config.timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_validate_empty_delimiter() {
        let config = Config::tcp("localhost", 9000).with_delimiter(Vec::<u8>::new());
        assert!(matches!(config.validate(), Err(ConfigError::EmptyDelimiter)));
    }

    #[test]
    fn test_validate_zero_max_message_size() {
        let config = Config::udp("localhost", 9000).with_max_message_size(0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidMaxMessageSize)
        ));
    }

    #[test]
    fn test_validate_zero_timeout() {
        let config = Config::tcp("localhost", 9000).with_timeout(Duration::ZERO);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidTimeout)));
    }

    #[test]
    fn test_validate_host() {
        assert!(matches!(
            Config::tcp("  ", 9000).validate(),
            Err(ConfigError::InvalidAddress(_))
        ));
        assert!(matches!(
            Config::udp("local host", 9000).validate(),
            Err(ConfigError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_validate_zero_max_connections() {
        let config = Config::with_transport(TransportConfig::Tcp {
            host: "localhost".to_string(),
            port: 9000,
            max_connections: Some(0),
        });
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidMaxConnections)
        ));
    }

    #[test]
    #[cfg(unix)]
    fn test_validate_unix_path() {
        assert!(Config::unix("/tmp/intake.sock").validate().is_ok());
        assert!(matches!(
            Config::unix("").validate(),
            Err(ConfigError::InvalidAddress(_))
        ));
        let long_path = format!("/tmp/{}.sock", "a".repeat(120));
        assert!(matches!(
            Config::unix(long_path).validate(),
            Err(ConfigError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"transport": {"type": "tcp", "host": "0.0.0.0", "port": 5140}}"#)
                .unwrap();
        assert_eq!(config, Config::tcp("0.0.0.0", 5140));
    }

    #[test]
    fn test_deserialize_full() {
        let config: Config = serde_json::from_str(
            r#"{
                "line_delimiter": "<END>",
                "max_message_size": 50000,
                "timeout": 10,
                "transport": {"type": "unix", "path": "/tmp/intake.sock", "permissions": 432, "max_connections": 4}
            }"#,
        )
        .unwrap();
        assert_eq!(config.delimiter, b"<END>");
        assert_eq!(config.max_message_size, 50_000);
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(
            config.transport,
            TransportConfig::Unix {
                path: PathBuf::from("/tmp/intake.sock"),
                permissions: Some(0o660),
                max_connections: Some(4),
            }
        );
    }

    #[test]
    fn test_deserialize_rejects_unknown_fields() {
        let result: Result<Config, _> = serde_json::from_str(
            r#"{"delimiter": ";", "transport": {"type": "udp", "host": "localhost", "port": 1}}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_deserialized_empty_delimiter_fails_validation() {
        let config: Config = serde_json::from_str(
            r#"{"line_delimiter": "", "transport": {"type": "udp", "host": "localhost", "port": 1}}"#,
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::EmptyDelimiter)));
    }

    #[test]
    fn test_transport_address() {
        assert_eq!(Config::tcp("localhost", 9000).transport.address(), "localhost:9000");
        assert_eq!(Config::unix("/tmp/a.sock").transport.address(), "/tmp/a.sock");
        assert_eq!(Config::udp("localhost", 1).transport.family(), Family::Udp);
    }

    #[test]
    fn test_unescape() {
        assert_eq!(unescape(r"\n"), "\n");
        assert_eq!(unescape(r"\r\n"), "\r\n");
        assert_eq!(unescape(r"<END>"), "<END>");
        assert_eq!(unescape(r"a\\b"), r"a\b");
        assert_eq!(unescape(r"\x"), r"\x");
        assert_eq!(unescape("\\"), "\\");
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!(parse_mode("660"), Some(0o660));
        assert_eq!(parse_mode("0o600"), Some(0o600));
        assert_eq!(parse_mode("0755"), Some(0o755));
        assert_eq!(parse_mode("999"), None);
        assert_eq!(parse_mode("77777"), None);
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        clear_env();
        let config = Config::from_env().unwrap();
        assert_eq!(config, Config::tcp(DEFAULT_HOST, DEFAULT_PORT));
    }

    #[test]
    #[serial]
    fn test_from_env_udp() {
        clear_env();
        env::set_var("DD_LOGS_INTAKE_TYPE", "UDP");
        env::set_var("DD_LOGS_INTAKE_HOST", "0.0.0.0");
        env::set_var("DD_LOGS_INTAKE_PORT", "5140");
        env::set_var("DD_LOGS_INTAKE_LINE_DELIMITER", r"\r\n");
        env::set_var("DD_LOGS_INTAKE_MAX_MESSAGE_SIZE", "66560");
        env::set_var("DD_LOGS_INTAKE_TIMEOUT", "30");

        let config = Config::from_env().unwrap();
        clear_env();

        assert_eq!(
            config.transport,
            TransportConfig::Udp {
                host: "0.0.0.0".to_string(),
                port: 5140,
            }
        );
        assert_eq!(config.delimiter, b"\r\n");
        assert_eq!(config.max_message_size, 66_560);
        assert_eq!(config.timeout, Duration::from_secs(30));
    }

    #[test]
    #[serial]
    fn test_from_env_unix() {
        clear_env();
        env::set_var("DD_LOGS_INTAKE_TYPE", "unix");
        env::set_var("DD_LOGS_INTAKE_PATH", "/tmp/intake.sock");
        env::set_var("DD_LOGS_INTAKE_PERMISSIONS", "0660");
        env::set_var("DD_LOGS_INTAKE_MAX_CONNECTIONS", "8");

        let config = Config::from_env();
        clear_env();

        assert_eq!(
            config.unwrap().transport,
            TransportConfig::Unix {
                path: PathBuf::from("/tmp/intake.sock"),
                permissions: Some(0o660),
                max_connections: Some(8),
            }
        );
    }

    #[test]
    #[serial]
    fn test_from_env_unix_requires_path() {
        clear_env();
        env::set_var("DD_LOGS_INTAKE_TYPE", "unix");

        let result = Config::from_env();
        clear_env();

        assert!(matches!(
            result,
            Err(ConfigError::InvalidEnv {
                name: "DD_LOGS_INTAKE_PATH",
                ..
            })
        ));
    }

    #[test]
    #[serial]
    fn test_from_env_invalid_values() {
        clear_env();
        env::set_var("DD_LOGS_INTAKE_PORT", "not-a-port");
        let result = Config::from_env();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidEnv {
                name: "DD_LOGS_INTAKE_PORT",
                ..
            })
        ));

        clear_env();
        env::set_var("DD_LOGS_INTAKE_TYPE", "sctp");
        let result = Config::from_env();
        assert!(result.unwrap_err().to_string().contains("unknown transport 'sctp'"));

        clear_env();
        env::set_var("DD_LOGS_INTAKE_LINE_DELIMITER", "");
        let result = Config::from_env();
        assert!(matches!(result, Err(ConfigError::EmptyDelimiter)));

        clear_env();
        env::set_var("DD_LOGS_INTAKE_TYPE", "unix");
        env::set_var("DD_LOGS_INTAKE_PATH", "/tmp/intake.sock");
        env::set_var("DD_LOGS_INTAKE_PERMISSIONS", "rw-rw----");
        let result = Config::from_env();
        clear_env();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidEnv {
                name: "DD_LOGS_INTAKE_PERMISSIONS",
                ..
            })
        ));
    }
}

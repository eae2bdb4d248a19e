//! Relay configuration.
//!
//! Values are layered, lowest priority first:
//!
//! 1. Built-in defaults
//! 2. TOML file (`--config PATH` or `RELAY_CONFIG`)
//! 3. Environment (`PORT`, `RELAY_HOST`, `RELAY_SHAPE_TOOLS`)
//! 4. Command-line flags (applied by the binary)
//!
//! ```toml
//! host = "0.0.0.0"
//! port = 12345
//! write_timeout_ms = 10000
//! outbox_capacity = 1024
//! max_line_length = 65536
//! shape_tools = ["RECT", "OVAL", "SQUARE"]
//! ```

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use relay_protocol::{Validator, DEFAULT_SHAPE_TOOLS};

/// Default listen address (all interfaces).
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default listen port when `PORT` is unset.
pub const DEFAULT_PORT: u16 = 12345;

/// Default per-write timeout for client sockets.
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 10_000;

/// Default number of lines that may queue for one client.
pub const DEFAULT_OUTBOX_CAPACITY: usize = 1024;

/// Default maximum length of one incoming line (64 KiB).
pub const DEFAULT_MAX_LINE_LENGTH: usize = 65_536;

/// Largest accepted `outbox_capacity`. Must stay below the tokio semaphore
/// permit limit.
pub const MAX_OUTBOX_CAPACITY: usize = 1 << 20;

/// Largest accepted `max_line_length` (16 MiB).
pub const MAX_LINE_LENGTH_LIMIT: usize = 16 * 1024 * 1024;

pub const ENV_CONFIG: &str = "RELAY_CONFIG";
pub const ENV_PORT: &str = "PORT";
pub const ENV_HOST: &str = "RELAY_HOST";
pub const ENV_SHAPE_TOOLS: &str = "RELAY_SHAPE_TOOLS";

/// Relay server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelayConfig {
    /// Interface to bind
    pub host: String,

    /// TCP port to listen on
    pub port: u16,

    /// Timeout for each socket write batch, in milliseconds
    pub write_timeout_ms: u64,

    /// Bounded queue size per client; a client that falls this far behind
    /// is disconnected
    pub outbox_capacity: usize,

    /// Longest accepted line, in bytes, excluding the newline
    pub max_line_length: usize,

    /// Tool names validated with the `x;y;w;h` layout
    pub shape_tools: Vec<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            write_timeout_ms: DEFAULT_WRITE_TIMEOUT_MS,
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            shape_tools: DEFAULT_SHAPE_TOOLS.iter().map(|t| t.to_string()).collect(),
        }
    }
}

impl RelayConfig {
    /// Loads configuration from an optional file and the process environment.
    ///
    /// When `path` is `None`, `RELAY_CONFIG` is consulted; without either,
    /// the defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| env::var_os(ENV_CONFIG).map(PathBuf::from));

        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };

        config.apply_env(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a TOML configuration file. Missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })
    }

    /// Applies environment overrides using `lookup` to read variables.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_PORT) {
            self.port = parse_port(&value)?;
        }

        if let Some(host) = lookup(ENV_HOST) {
            let host = host.trim();
            if !host.is_empty() {
                self.host = host.to_string();
            }
        }

        if let Some(tools) = lookup(ENV_SHAPE_TOOLS) {
            self.shape_tools = tools
                .split(',')
                .map(str::trim)
                .filter(|tool| !tool.is_empty())
                .map(str::to_string)
                .collect();
        }

        Ok(())
    }

    /// Rejects values the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::invalid("host", "must not be empty"));
        }
        if self.write_timeout_ms == 0 {
            return Err(ConfigError::invalid("write_timeout_ms", "must be greater than 0"));
        }
        if self.outbox_capacity == 0 {
            return Err(ConfigError::invalid("outbox_capacity", "must be greater than 0"));
        }
        if self.outbox_capacity > MAX_OUTBOX_CAPACITY {
            return Err(ConfigError::invalid("outbox_capacity", "must be at most 1048576"));
        }
        if self.max_line_length == 0 {
            return Err(ConfigError::invalid("max_line_length", "must be greater than 0"));
        }
        if self.max_line_length > MAX_LINE_LENGTH_LIMIT {
            return Err(ConfigError::invalid("max_line_length", "must be at most 16777216"));
        }
        Ok(())
    }

    /// Address string suitable for `TcpListener::bind`.
    pub fn bind_address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Builds the command validator for the configured shape tools.
    pub fn validator(&self) -> Validator {
        Validator::with_shape_tools(&self.shape_tools)
    }
}

/// Parses a port number the way `PORT` is interpreted.
pub fn parse_port(value: &str) -> Result<u16, ConfigError> {
    value
        .trim()
        .parse::<u16>()
        .map_err(|_| ConfigError::InvalidPort {
            value: value.to_string(),
        })
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {error}")]
    Read { path: PathBuf, error: String },

    #[error("Failed to parse config file {path}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid PORT value {value:?} (expected 0-65535)")]
    InvalidPort { value: String },

    #[error("Invalid {field}: {reason}")]
    InvalidValue { field: &'static str, reason: &'static str },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: &'static str) -> Self {
        Self::InvalidValue { field, reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.port, 12345);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.bind_address(), "0.0.0.0:12345");
        assert_eq!(config.write_timeout(), Duration::from_secs(10));
        assert_eq!(config.shape_tools, vec!["RECT", "OVAL"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_port_override() {
        let mut config = RelayConfig::default();
        config.apply_env(env_from(&[("PORT", "8080")])).unwrap();
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn test_env_invalid_port() {
        for bad in ["abc", "", "70000", "-1", "12.5"] {
            let mut config = RelayConfig::default();
            let err = config.apply_env(env_from(&[("PORT", bad)])).unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidPort { ref value } if value == bad),
                "PORT={bad:?} gave {err}"
            );
        }
    }

    #[test]
    fn test_env_host_and_shape_tools() {
        let mut config = RelayConfig::default();
        config
            .apply_env(env_from(&[
                ("RELAY_HOST", " 127.0.0.1 "),
                ("RELAY_SHAPE_TOOLS", "RECT, OVAL,,SQUARE "),
            ]))
            .unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.shape_tools, vec!["RECT", "OVAL", "SQUARE"]);
        assert!(config.validator().is_valid("DRAW;SQUARE;red;1;0;0;4;4"));
    }

    #[test]
    fn test_empty_host_env_ignored() {
        let mut config = RelayConfig::default();
        config.apply_env(env_from(&[("RELAY_HOST", "  ")])).unwrap();
        assert_eq!(config.host, DEFAULT_HOST);
    }

    #[test]
    fn test_ipv6_bind_address() {
        let config = RelayConfig {
            host: "::1".to_string(),
            port: 9000,
            ..RelayConfig::default()
        };
        assert_eq!(config.bind_address(), "[::1]:9000");
    }

    #[test]
    fn test_zero_values_rejected() {
        let config = RelayConfig {
            outbox_capacity: 0,
            ..RelayConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                field: "outbox_capacity",
                ..
            })
        ));

        let config = RelayConfig {
            max_line_length: 0,
            ..RelayConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_oversized_values_rejected() {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        writeln!(file, "outbox_capacity = 9223372036854775807").unwrap();

        let config = RelayConfig::from_file(file.path()).unwrap();
        let err = config.validate().unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidValue { field: "outbox_capacity", .. }),
            "got {err}"
        );

        let config = RelayConfig {
            outbox_capacity: MAX_OUTBOX_CAPACITY,
            ..RelayConfig::default()
        };
        assert!(config.validate().is_ok());

        let config = RelayConfig {
            max_line_length: usize::MAX,
            ..RelayConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                field: "max_line_length",
                ..
            })
        ));
    }

    #[test]
    fn test_load_rejects_oversized_outbox() {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        writeln!(file, "outbox_capacity = {}", MAX_OUTBOX_CAPACITY + 1).unwrap();

        assert!(RelayConfig::load(Some(file.path())).is_err());
    }

    #[test]
    fn test_from_file_partial() {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        writeln!(file, "port = 4000").unwrap();
        writeln!(file, "shape_tools = [\"RECT\", \"HEXAGON\"]").unwrap();

        let config = RelayConfig::from_file(file.path()).unwrap();
        assert_eq!(config.port, 4000);
        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.outbox_capacity, DEFAULT_OUTBOX_CAPACITY);
        assert_eq!(config.shape_tools, vec!["RECT", "HEXAGON"]);
    }

    #[test]
    fn test_from_file_unknown_key() {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        writeln!(file, "prot = 4000").unwrap();

        let err = RelayConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_from_missing_file() {
        let err = RelayConfig::from_file(Path::new("/nonexistent/relay.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
        assert!(err.to_string().contains("/nonexistent/relay.toml"));
    }

    #[test]
    fn test_env_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        writeln!(file, "port = 4000").unwrap();

        let mut config = RelayConfig::from_file(file.path()).unwrap();
        config.apply_env(env_from(&[("PORT", "5000")])).unwrap();
        assert_eq!(config.port, 5000);
    }
}

//! Configuration
//!
//! Values come from the built-in defaults, then an optional YAML file, then
//! command line flags applied by the tools, then `DAEMONWATCH_TOKEN` when no
//! token was given any other way.

use crate::data::DisplayFilter;
use crate::net::Endpoint;
use crate::stream::DEFAULT_SAMPLE_WINDOW;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::path::{Path, PathBuf};
use std::time::Duration;

pub const TOKEN_ENV: &str = "DAEMONWATCH_TOKEN";
pub const DEFAULT_PORT: u16 = 16662;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {}: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Use https/wss instead of http/ws.
    pub tls: bool,
    pub api_version: String,
    pub token: Option<String>,
    /// Unset means a channel that never opens stays in `Loading`.
    pub connect_timeout_ms: Option<u64>,
    pub console: ConsoleConfig,
    pub perf: PerfConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ConsoleConfig {
    pub history_limit: Option<usize>,
    pub filter: DisplayFilter,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerfConfig {
    pub capacity: usize,
    pub stale_after_ms: u64,
}

impl Default for PerfConfig {
    fn default() -> Self {
        PerfConfig {
            capacity: DEFAULT_SAMPLE_WINDOW,
            stale_after_ms: 3000,
        }
    }
}

impl PerfConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            tls: false,
            api_version: "v1".to_string(),
            token: None,
            connect_timeout_ms: None,
            console: ConsoleConfig::default(),
            perf: PerfConfig::default(),
        }
    }
}

impl Config {
    pub fn from_yaml_str(text: &str) -> Result<Config, ConfigError> {
        let config: Config = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    /// Fills the token from the environment if none is set yet.
    pub fn apply_env(&mut self) {
        if self.token.is_none() {
            self.token = std::env::var(TOKEN_ENV).ok().filter(|t| !t.is_empty());
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Invalid("host must not be empty".into()));
        }
        if self.api_version.is_empty() || self.api_version.contains('/') {
            return Err(ConfigError::Invalid(format!(
                "bad api version '{}'",
                self.api_version
            )));
        }
        if self.perf.capacity == 0 {
            return Err(ConfigError::Invalid("perf.capacity must be at least 1".into()));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            host: self.host.clone(),
            port: self.port,
            tls: self.tls,
            api_version: self.api_version.clone(),
            token: self.token.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.perf.capacity, 60);
        assert_eq!(config.console.filter, DisplayFilter::default());
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config = Config::from_yaml_str(
            "host: daemon.lan\ntls: true\nconsole:\n  filter:\n    system: false\n",
        )
        .unwrap();
        assert_eq!(config.host, "daemon.lan");
        assert!(config.tls);
        assert_eq!(config.port, DEFAULT_PORT);
        assert!(config.console.filter.player);
        assert!(!config.console.filter.system);
        assert!(config.console.filter.output);
        assert_eq!(config.perf.stale_after(), Duration::from_secs(3));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            Config::from_yaml_str("host: ''"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::from_yaml_str("api_version: v1/x"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::from_yaml_str("perf:\n  capacity: 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::from_yaml_str("port: not-a-port"),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = Config::load("/nonexistent/daemonwatch.yaml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/daemonwatch.yaml"));
    }
}

//! Configuration loader.
//!
//! Every section is optional; missing values fall back to defaults and
//! command-line flags are applied on top.

use anyhow::{Context, Result};
use mtbridge_platforms_terminal::TerminalConfig;
use mtbridge_server::BridgeConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Config file picked up from the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_PATH: &str = "mtbridge.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: BridgeConfig,
    pub platform: PlatformConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformKind {
    /// A live MT5 terminal reached through the EA socket.
    #[default]
    Terminal,
    /// The in-memory simulator.
    Simulated,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub kind: PlatformKind,
    pub terminal: TerminalConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Log file, appended to alongside stdout. An empty path turns it off.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    /// Emit stdout logs as JSON lines.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some(PathBuf::from("mtbridge.log")),
            json: false,
        }
    }
}

impl LoggingConfig {
    /// The log file to append to, if file logging is on.
    pub fn file_path(&self) -> Option<&Path> {
        self.file
            .as_deref()
            .filter(|path| !path.as_os_str().is_empty())
    }
}

impl Config {
    /// Load from `path`, or from `mtbridge.toml` if it exists, or defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_PATH))
            }
            None => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 18812);
        assert_eq!(config.server.bind_address, "0.0.0.0");
        assert_eq!(config.platform.kind, PlatformKind::Terminal);
        assert_eq!(config.platform.terminal.port, 5556);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.file, Some(PathBuf::from("mtbridge.log")));
    }

    #[test]
    fn test_partial_sections_merge_with_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            port = 5555

            [platform]
            kind = "simulated"

            [platform.terminal]
            host = "10.0.0.5"
            request_timeout_secs = 5

            [logging]
            level = "debug"
            json = true
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 5555);
        assert_eq!(config.server.bind_address, "0.0.0.0");
        assert_eq!(config.platform.kind, PlatformKind::Simulated);
        assert_eq!(config.platform.terminal.host, "10.0.0.5");
        assert_eq!(config.platform.terminal.port, 5556);
        assert_eq!(config.platform.terminal.request_timeout_secs, 5);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
    }

    #[test]
    fn test_empty_log_file_disables_file_logging() {
        let config: Config = toml::from_str("[logging]\nfile = \"\"\n").unwrap();
        assert_eq!(config.logging.file_path(), None);
        assert_eq!(
            Config::default().logging.file_path(),
            Some(Path::new("mtbridge.log"))
        );
    }

    #[test]
    fn test_unknown_platform_kind_rejected() {
        let result: Result<Config, _> = toml::from_str("[platform]\nkind = \"mt4\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = Config::load(Some(Path::new("/nonexistent/mtbridge.toml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_defaults_serialize_back() {
        let text = toml::to_string_pretty(&Config::default()).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.server.port, 18812);
        assert_eq!(parsed.logging.file, Some(PathBuf::from("mtbridge.log")));
    }
}

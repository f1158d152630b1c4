//! Broker configuration via figment.
//!
//! Sources, later ones winning:
//!
//! 1. Built-in defaults (the timeouts and limits below are part of the
//!    broker's contract with plugins)
//! 2. A TOML file (`chadbot.toml` by convention)
//! 3. `CHADBOT_`-prefixed environment variables, `__` as the section
//!    separator (`CHADBOT_SOCKET__PATH=/run/x.sock`)
//!
//! # Example (TOML)
//!
//! ```toml
//! plugin_config_path = "/etc/chadbot/plugins.toml"
//!
//! [socket]
//! path = "/var/run/chadbot.sock"
//!
//! [limits]
//! skill_timeout_secs = 30
//! keep_exchanges = 10
//!
//! [logging]
//! level = "debug"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

// =============================================================================
// Root configuration
// =============================================================================

/// Root configuration for the broker runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Plugin socket settings.
    pub socket: SocketConfig,

    /// Path of the watched per-plugin config file.
    pub plugin_config_path: PathBuf,

    /// Timeouts and size limits.
    pub limits: LimitsConfig,

    /// Logging settings.
    pub logging: LoggingConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            socket: SocketConfig::default(),
            plugin_config_path: default_plugin_config_path(),
            limits: LimitsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl BrokerConfig {
    /// Loads defaults merged with the given TOML file (when it exists) and
    /// `CHADBOT_` environment overrides.
    pub fn load_from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let config: BrokerConfig = Figment::new()
            .merge(Serialized::defaults(BrokerConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("CHADBOT_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Loads defaults plus environment overrides only.
    pub fn load() -> ConfigResult<Self> {
        let config: BrokerConfig = Figment::new()
            .merge(Serialized::defaults(BrokerConfig::default()))
            .merge(Env::prefixed("CHADBOT_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants the components rely on.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.socket.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("socket.path must not be empty".into()));
        }
        if self.limits.skill_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "limits.skill_timeout_secs must be positive".into(),
            ));
        }
        if self.limits.max_iterations == 0 {
            return Err(ConfigError::Invalid(
                "limits.max_iterations must be positive".into(),
            ));
        }
        if self.limits.max_tool_result_bytes == 0 {
            return Err(ConfigError::Invalid(
                "limits.max_tool_result_bytes must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn default_plugin_config_path() -> PathBuf {
    PathBuf::from("plugins.toml")
}

// =============================================================================
// Socket configuration
// =============================================================================

/// Plugin socket settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    /// Socket path to bind.
    pub path: PathBuf,

    /// Tried when the primary path is not writable (unprivileged runs).
    pub fallback_path: Option<PathBuf>,

    /// Outbound frame queue capacity per plugin connection.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/run/chadbot.sock"),
            fallback_path: Some(PathBuf::from("/tmp/chadbot.sock")),
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_queue_capacity() -> usize {
    256
}

// =============================================================================
// Limits
// =============================================================================

/// Timeouts and size limits. The defaults are part of the broker's contract
/// with plugins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Per-call deadline for skill invocations, in seconds.
    #[serde(default = "default_skill_timeout_secs")]
    pub skill_timeout_secs: u64,

    /// Deadline for synchronous chat helpers, in seconds.
    #[serde(default = "default_chat_op_timeout_secs")]
    pub chat_op_timeout_secs: u64,

    /// Debounce window for plugin-config file edits, in milliseconds.
    #[serde(default = "default_config_debounce_ms")]
    pub config_debounce_ms: u64,

    /// Tool exchanges kept when pruning transcript history.
    #[serde(default = "default_keep_exchanges")]
    pub keep_exchanges: usize,

    /// Tool results longer than this are truncated.
    #[serde(default = "default_max_tool_result_bytes")]
    pub max_tool_result_bytes: usize,

    /// Backstop on provider iterations per LLM turn.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            skill_timeout_secs: default_skill_timeout_secs(),
            chat_op_timeout_secs: default_chat_op_timeout_secs(),
            config_debounce_ms: default_config_debounce_ms(),
            keep_exchanges: default_keep_exchanges(),
            max_tool_result_bytes: default_max_tool_result_bytes(),
            max_iterations: default_max_iterations(),
        }
    }
}

impl LimitsConfig {
    pub fn skill_timeout(&self) -> Duration {
        Duration::from_secs(self.skill_timeout_secs)
    }

    pub fn chat_op_timeout(&self) -> Duration {
        Duration::from_secs(self.chat_op_timeout_secs)
    }

    pub fn config_debounce(&self) -> Duration {
        Duration::from_millis(self.config_debounce_ms)
    }
}

fn default_skill_timeout_secs() -> u64 {
    30
}

fn default_chat_op_timeout_secs() -> u64 {
    10
}

fn default_config_debounce_ms() -> u64 {
    100
}

fn default_keep_exchanges() -> usize {
    10
}

fn default_max_tool_result_bytes() -> usize {
    16_000
}

fn default_max_iterations() -> u32 {
    25
}

// =============================================================================
// Logging configuration
// =============================================================================

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log level.
    pub level: LogLevel,

    /// Output format.
    pub format: LogFormat,
}

/// Log level enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Converts to a filter directive string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable multi-line format.
    #[default]
    Pretty,
    /// Compact single-line format.
    Compact,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_contract() {
        let config = BrokerConfig::default();
        assert_eq!(config.limits.skill_timeout(), Duration::from_secs(30));
        assert_eq!(config.limits.chat_op_timeout(), Duration::from_secs(10));
        assert_eq!(config.limits.config_debounce(), Duration::from_millis(100));
        assert_eq!(config.limits.keep_exchanges, 10);
        assert_eq!(config.limits.max_tool_result_bytes, 16_000);
        assert_eq!(config.socket.path, PathBuf::from("/var/run/chadbot.sock"));
        config.validate().unwrap();
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chadbot.toml");
        std::fs::write(
            &path,
            r#"
plugin_config_path = "/etc/chadbot/plugins.toml"

[socket]
path = "/run/custom.sock"

[limits]
skill_timeout_secs = 5
keep_exchanges = 3

[logging]
level = "debug"
"#,
        )
        .unwrap();

        let config = BrokerConfig::load_from_file(&path).unwrap();
        assert_eq!(config.socket.path, PathBuf::from("/run/custom.sock"));
        assert_eq!(config.limits.skill_timeout_secs, 5);
        assert_eq!(config.limits.keep_exchanges, 3);
        // Untouched values keep their defaults.
        assert_eq!(config.limits.chat_op_timeout_secs, 10);
        assert_eq!(config.logging.level, LogLevel::Debug);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = BrokerConfig::load_from_file("/nonexistent/chadbot.toml").unwrap();
        assert_eq!(config.limits.keep_exchanges, 10);
    }

    #[test]
    fn zero_limits_fail_validation() {
        let mut config = BrokerConfig::default();
        config.limits.skill_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = BrokerConfig::default();
        config.socket.path = PathBuf::new();
        assert!(config.validate().is_err());
    }
}

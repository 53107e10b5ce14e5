//! Harness configuration using Figment
//!
//! Configuration is loaded from:
//! 1. `config/certkit.toml` (base configuration)
//! 2. Environment variables prefixed with `CERTKIT_`, nested keys split on `__`
//!
//! # Example
//! ```no_run
//! use certkit::config::HarnessConfig;
//!
//! let config = HarnessConfig::load()?;
//! config.validate()?;
//! println!("Application: {}", config.application.name);
//! # Ok::<(), certkit::config::ConfigError>(())
//! ```
//!
//! `CERTKIT_SETUP__CONFIG_JOIN_TIMEOUT_MS=30000` overrides
//! `[setup] config_join_timeout_ms`.

use certkit_core::model::TitleInfo;
use certkit_driver_mock::MockConsoleConfig;
use certkit_setup::{JoinTimeout, SessionSettings};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

/// Default configuration file
pub const DEFAULT_CONFIG_PATH: &str = "config/certkit.toml";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file or environment could not be read or parsed
    #[error("Failed to load configuration: {0}")]
    Load(#[from] figment::Error),
    /// Values parsed but are not usable
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level harness configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HarnessConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Session timing and retries
    #[serde(default)]
    pub setup: SetupConfig,
    /// Title under test
    pub title: TitleInfo,
    /// Simulated consoles on the bench
    #[serde(default)]
    pub consoles: Vec<MockConsoleConfig>,
}

/// Application-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, colored
    #[default]
    Pretty,
    /// One line per event
    Compact,
    /// JSON lines for log aggregation
    Json,
}

/// Session timing and retry settings
#[derive(Debug, Clone, Deserialize)]
pub struct SetupConfig {
    /// Join bound for configuration scripts, in milliseconds
    #[serde(default = "default_config_join_timeout")]
    pub config_join_timeout_ms: u64,
    /// Join bound for install/launch; absent means wait as long as it takes
    #[serde(default)]
    pub install_join_timeout_ms: Option<u64>,
    /// Profile attempts per role before giving up
    #[serde(default = "default_max_profile_attempts")]
    pub max_profile_attempts: usize,
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self {
            config_join_timeout_ms: default_config_join_timeout(),
            install_join_timeout_ms: None,
            max_profile_attempts: default_max_profile_attempts(),
        }
    }
}

// Default value functions
fn default_name() -> String {
    "certkit".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_config_join_timeout() -> u64 {
    120_000
}

fn default_max_profile_attempts() -> usize {
    3
}

impl HarnessConfig {
    /// Load from the default file and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path, with environment overrides
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("CERTKIT_").split("__"))
            .extract()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::Invalid(format!(
                "log_level '{}' must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.title.name.trim().is_empty() {
            return Err(ConfigError::Invalid("title name must not be empty".into()));
        }

        if self.setup.max_profile_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max_profile_attempts must be at least 1".into(),
            ));
        }

        let mut ids = HashSet::new();
        for console in &self.consoles {
            if !ids.insert(console.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate console id: {}",
                    console.id
                )));
            }
        }

        Ok(())
    }

    /// Session settings derived from `[setup]`
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            config_join_timeout: JoinTimeout::from_millis(Some(self.setup.config_join_timeout_ms)),
            install_join_timeout: JoinTimeout::from_millis(self.setup.install_join_timeout_ms),
            max_profile_attempts: self.setup.max_profile_attempts,
        }
    }
}

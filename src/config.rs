//! Configuration management for Hotspot.
//!
//! Settings are layered: built-in defaults, then an optional YAML file, then
//! environment variables such as `HOTSPOT__LOGGING__LEVEL=debug`.

use config::{Config, ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::{HotspotError, Result};

/// Prefix of environment variable overrides.
pub const ENV_PREFIX: &str = "HOTSPOT";

/// Main configuration for Hotspot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HotspotConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Rule source configuration
    #[serde(default)]
    pub rules: RulesConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `hotspot=debug`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Where hotspot rules come from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesConfig {
    /// Path to a YAML rule file
    pub path: Option<String>,
}

impl HotspotConfig {
    /// Load configuration from an optional file plus environment overrides.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path));
        }
        Self::finish(builder.add_source(environment()))
    }

    /// Load configuration from a YAML string, without environment overrides.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Self::finish(Config::builder().add_source(File::from_str(yaml, config::FileFormat::Yaml)))
    }

    fn finish(builder: ConfigBuilder<config::builder::DefaultState>) -> Result<Self> {
        builder
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| HotspotError::Config(e.to_string()))
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX).separator("__")
}

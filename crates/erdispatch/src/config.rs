//! Configuration management for erdispatch.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "erdispatch";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "dispatch.db";

/// Longest accepted acceptance timeout (one day).
pub const MAX_ACCEPTANCE_TIMEOUT_SECS: u64 = 86_400;

/// Prefix of environment variable overrides.
const ENV_PREFIX: &str = "ERDISPATCH_";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `ERDISPATCH_`, `__` between
///    section and key, e.g. `ERDISPATCH_AI__API_KEY`)
/// 2. TOML config file at `~/.config/erdispatch/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Matching and re-broadcast policy.
    pub dispatch: DispatchConfig,
    /// Generative model endpoint.
    pub ai: AiConfig,
}

/// Storage-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/erdispatch/dispatch.db`
    pub database_path: Option<PathBuf>,
    /// How often subscriptions re-query the database to pick up writes made
    /// by other processes, in milliseconds.
    pub poll_interval_ms: u64,
}

/// Matching and re-broadcast policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Radii searched for the first broadcast, in metres, non-decreasing.
    pub search_radii_m: Vec<f64>,
    /// Radii searched when the acceptance timeout expires, in metres.
    pub expansion_radii_m: Vec<f64>,
    /// How long a first broadcast waits for an accept, in seconds.
    pub acceptance_timeout_secs: u64,
    /// Most departments kept from a classification.
    pub max_recommended_departments: usize,
}

/// Generative model configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    /// Base URL of the generative language API.
    pub endpoint: String,
    /// Model name.
    pub model: String,
    /// API key. Usually supplied through `ERDISPATCH_AI__API_KEY`.
    pub api_key: Option<String>,
    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: None, // Will be resolved to default at runtime
            poll_interval_ms: 1000,
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            search_radii_m: vec![5_000.0, 10_000.0, 20_000.0],
            expansion_radii_m: vec![10_000.0, 30_000.0],
            acceptance_timeout_secs: 30,
            max_recommended_departments: 2,
        }
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-2.5-flash".to_string(),
            api_key: None,
            request_timeout_secs: 30,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file).nested())
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        validate_radii("search_radii_m", &self.dispatch.search_radii_m)?;
        validate_radii("expansion_radii_m", &self.dispatch.expansion_radii_m)?;

        if self.dispatch.acceptance_timeout_secs == 0 {
            return Err(Error::ConfigValidation {
                message: "acceptance_timeout_secs must be greater than 0".to_string(),
            });
        }
        if self.dispatch.acceptance_timeout_secs > MAX_ACCEPTANCE_TIMEOUT_SECS {
            return Err(Error::ConfigValidation {
                message: format!(
                    "acceptance_timeout_secs must be at most {MAX_ACCEPTANCE_TIMEOUT_SECS}"
                ),
            });
        }

        if self.dispatch.max_recommended_departments == 0 {
            return Err(Error::ConfigValidation {
                message: "max_recommended_departments must be greater than 0".to_string(),
            });
        }

        if self.storage.poll_interval_ms == 0 {
            return Err(Error::ConfigValidation {
                message: "poll_interval_ms must be greater than 0".to_string(),
            });
        }

        if self.ai.endpoint.trim().is_empty() || self.ai.model.trim().is_empty() {
            return Err(Error::ConfigValidation {
                message: "ai.endpoint and ai.model must be set".to_string(),
            });
        }

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the subscription poll interval as a Duration.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.storage.poll_interval_ms)
    }

    /// Get the acceptance timeout as a Duration.
    #[must_use]
    pub fn acceptance_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch.acceptance_timeout_secs)
    }

    /// Get the model request timeout as a Duration.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.ai.request_timeout_secs)
    }
}

/// A radius list must be non-empty, positive and non-decreasing so that
/// every search terminates after a bounded number of passes.
fn validate_radii(name: &str, radii: &[f64]) -> Result<()> {
    if radii.is_empty() {
        return Err(Error::ConfigValidation {
            message: format!("{name} must not be empty"),
        });
    }
    if radii.iter().any(|r| !r.is_finite() || *r <= 0.0) {
        return Err(Error::ConfigValidation {
            message: format!("{name} must contain positive distances"),
        });
    }
    if radii.windows(2).any(|w| w[1] < w[0]) {
        return Err(Error::ConfigValidation {
            message: format!("{name} must be non-decreasing"),
        });
    }
    Ok(())
}

//! Per-user settings
//!
//! Settings that belong to the operator rather than to a project: the default
//! stage, state lock timeout, retry policy and tags added to every project.

pub mod error;

pub use error::*;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const CONFIG_PATH_ENV: &str = "TIERFLOW_CONFIG_PATH";
const CONFIG_FILE: &str = "config.yaml";
/// One week
pub const MAX_LOCK_TIMEOUT_MINUTES: u64 = 7 * 24 * 60;

/// Retry policy for provider calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    /// Stage used when none is given on the command line
    pub default_stage: Option<String>,
    /// Age after which a state lock is considered abandoned
    pub lock_timeout_minutes: u64,
    pub retry: RetrySettings,
    /// Tags merged under the project tags; project values win
    pub default_tags: BTreeMap<String, String>,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            default_stage: None,
            lock_timeout_minutes: 60,
            retry: RetrySettings::default(),
            default_tags: BTreeMap::new(),
        }
    }
}

impl UserConfig {
    fn check(self) -> Result<Self> {
        if !(1..=MAX_LOCK_TIMEOUT_MINUTES).contains(&self.lock_timeout_minutes) {
            return Err(ConfigError::Invalid(format!(
                "lock_timeout_minutes must be between 1 and {}",
                MAX_LOCK_TIMEOUT_MINUTES
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::Invalid(
                "retry.initial_delay_ms must not exceed retry.max_delay_ms".to_string(),
            ));
        }
        Ok(self)
    }
}

/// `<config_dir>/tierflow`
pub fn get_config_dir() -> Result<PathBuf> {
    Ok(dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("tierflow"))
}

/// Settings file location: `TIERFLOW_CONFIG_PATH` or `<config_dir>/tierflow/config.yaml`
pub fn config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        return Ok(PathBuf::from(path));
    }
    Ok(get_config_dir()?.join(CONFIG_FILE))
}

/// Load the user settings; a missing file yields the defaults
pub fn load_user_config() -> Result<UserConfig> {
    load_user_config_from(&config_path()?)
}

pub fn load_user_config_from(path: &Path) -> Result<UserConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "No user settings file, using defaults");
        return Ok(UserConfig::default());
    }

    let content = std::fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(UserConfig::default());
    }

    let config: UserConfig =
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    debug!(path = %path.display(), "Loaded user settings");
    config.check()
}

//! Client configuration
//!
//! Loaded from a JSON file, then overridden from the environment. The
//! resulting [`Config`] is passed explicitly to the network client and the
//! sync policy; nothing reads process-wide state after startup.

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::sync::{SyncSettings, DEFAULT_BULK_THRESHOLD, DEFAULT_MAX_CONCURRENT_FETCHES};

/// Environment variable pointing at the config file
pub const CONFIG_PATH_ENV: &str = "PREVIEW_SYNC_CONFIG";

/// Environment overrides
pub const ADDRESS_ENV: &str = "FILE_SERVER_ADDRESS";
pub const USERNAME_ENV: &str = "FILE_SERVER_USERNAME";
pub const PASSWORD_ENV: &str = "FILE_SERVER_PASSWORD";

/// Default HTTP timeout
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Server versions this client is known to work with
const DEFAULT_COMPATIBLE_VERSION: &str = "2.x.x";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Missing server address (set `address` or FILE_SERVER_ADDRESS)")]
    MissingAddress,

    #[error("Bad compatible version {0:?}: expected #.(#|x).(#|x), e.g. 1.2.x")]
    InvalidVersionPattern(String),

    #[error("Invalid setting: {0}")]
    InvalidSetting(String),
}

fn default_compatible_version() -> String {
    DEFAULT_COMPATIBLE_VERSION.to_string()
}

fn default_bulk_threshold() -> usize {
    DEFAULT_BULK_THRESHOLD
}

fn default_max_concurrent_fetches() -> usize {
    DEFAULT_MAX_CONCURRENT_FETCHES
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Server base URL, scheme + host + port
    #[serde(default)]
    pub address: String,
    /// Accepted server versions, `x` matching any number
    #[serde(default = "default_compatible_version")]
    pub compatible_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    /// Directory of the on-disk store; the platform cache dir when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
    #[serde(default = "default_bulk_threshold")]
    pub bulk_threshold: usize,
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Config {
    /// Config with the given address and defaults everywhere else
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            compatible_version: default_compatible_version(),
            username: None,
            password: None,
            cache_dir: None,
            bulk_threshold: DEFAULT_BULK_THRESHOLD,
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }

    /// Load from the config file (if any) and the process environment
    pub fn load() -> Result<Self, ConfigError> {
        let path = env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .or_else(default_config_path);

        let mut config = match path {
            Some(path) if path.exists() => {
                debug!(path = %path.display(), "Loading config file");
                Self::from_file(&path)?
            }
            _ => Self::new(String::new()),
        };

        config.apply_overrides(|name| env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Apply environment-style overrides from `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(address) = lookup(ADDRESS_ENV) {
            self.address = address;
        }
        if let Some(username) = lookup(USERNAME_ENV) {
            self.username = Some(username);
        }
        if let Some(password) = lookup(PASSWORD_ENV) {
            self.password = Some(password);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.address.trim().is_empty() {
            return Err(ConfigError::MissingAddress);
        }
        self.version_pattern()?;
        if self.bulk_threshold == 0 {
            return Err(ConfigError::InvalidSetting(
                "bulkThreshold must be at least 1".to_string(),
            ));
        }
        if self.max_concurrent_fetches == 0 {
            return Err(ConfigError::InvalidSetting(
                "maxConcurrentFetches must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn version_pattern(&self) -> Result<VersionPattern, ConfigError> {
        self.compatible_version.parse()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            bulk_threshold: self.bulk_threshold,
            max_concurrent_fetches: self.max_concurrent_fetches,
        }
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("fileserver").join("config.json"))
}

/// A `#.(#|x).(#|x)` server version pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionPattern {
    major: u64,
    minor: Option<u64>,
    patch: Option<u64>,
}

impl VersionPattern {
    /// Whether a `major.minor.patch` server version satisfies the pattern
    ///
    /// The whole version must match: "1.2.3-beta" or "11.2.3" never satisfy
    /// "1.2.x".
    pub fn matches(&self, version: &str) -> bool {
        let parts: Vec<&str> = version.trim().split('.').collect();
        let [major, minor, patch] = parts.as_slice() else {
            return false;
        };
        let (Ok(major), Ok(minor), Ok(patch)) = (
            major.parse::<u64>(),
            minor.parse::<u64>(),
            patch.parse::<u64>(),
        ) else {
            return false;
        };
        major == self.major
            && self.minor.map_or(true, |m| m == minor)
            && self.patch.map_or(true, |p| p == patch)
    }
}

impl FromStr for VersionPattern {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidVersionPattern(s.to_string());
        let wildcard = |part: &str| -> Result<Option<u64>, ConfigError> {
            if part == "x" {
                Ok(None)
            } else {
                part.parse::<u64>().map(Some).map_err(|_| invalid())
            }
        };

        let parts: Vec<&str> = s.split('.').collect();
        let [major, minor, patch] = parts.as_slice() else {
            return Err(invalid());
        };
        Ok(Self {
            major: major.parse().map_err(|_| invalid())?,
            minor: wildcard(minor)?,
            patch: wildcard(patch)?,
        })
    }
}

impl fmt::Display for VersionPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let part = |p: Option<u64>| p.map_or_else(|| "x".to_string(), |n| n.to_string());
        write!(f, "{}.{}.{}", self.major, part(self.minor), part(self.patch))
    }
}

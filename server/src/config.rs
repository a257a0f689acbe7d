//! Gate configuration
//!
//! The server reads one YAML file at startup. `max_clients` is special: the
//! operator may edit it while the server runs, so the capacity tracker reads it
//! through a [`LimitSource`] on every telemetry update instead of keeping the
//! startup value.

use crate::error::ConfigError;
use crate::policy::ToxicPolicy;
use crate::roles::UserProfile;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Maximum number of concurrently connected clients.
    #[serde(default = "default_max_clients")]
    pub max_clients: i64,

    /// Pause between the end of one reconciliation pass and the next.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Members whose behaviour score is below this queue in the toxic tier.
    #[serde(default = "default_toxic_score_below")]
    pub toxic_score_below: i32,

    #[serde(default)]
    pub toxic_policy: ToxicPolicy,

    /// Known users and their roles. Unlisted users are standard members.
    #[serde(default)]
    pub users: HashMap<String, UserProfile>,
}

fn default_max_clients() -> i64 {
    1000
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_toxic_score_below() -> i32 {
    5000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_clients: default_max_clients(),
            tick_interval_ms: default_tick_interval_ms(),
            toxic_score_below: default_toxic_score_below(),
            toxic_policy: ToxicPolicy::default(),
            users: HashMap::new(),
        }
    }
}

impl ServerConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_str(&contents)
    }

    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let config: ServerConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_clients < 0 {
            return Err(ConfigError::Invalid(format!(
                "max_clients cannot be negative: {}",
                self.max_clients
            )));
        }

        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "tick_interval_ms must be at least 1".to_string(),
            ));
        }

        self.toxic_policy.validate().map_err(ConfigError::Invalid)
    }
}

/// Where the capacity tracker gets the current client limit from.
pub trait LimitSource: Send + Sync {
    fn current_limit(&self) -> i64;
}

/// In-memory limit that can be changed at runtime by whoever holds a clone.
#[derive(Debug, Clone)]
pub struct SharedLimit(Arc<AtomicI64>);

impl SharedLimit {
    pub fn new(limit: i64) -> Self {
        Self(Arc::new(AtomicI64::new(limit)))
    }

    pub fn set(&self, limit: i64) {
        self.0.store(limit, Ordering::SeqCst);
    }
}

impl LimitSource for SharedLimit {
    fn current_limit(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Re-reads `max_clients` from the config file on every call.
///
/// If the file is unreadable or invalid the last good value is served.
#[derive(Debug)]
pub struct FileLimit {
    path: PathBuf,
    last_good: AtomicI64,
}

impl FileLimit {
    pub fn new<P: AsRef<Path>>(path: P, initial: i64) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            last_good: AtomicI64::new(initial),
        }
    }
}

impl LimitSource for FileLimit {
    fn current_limit(&self) -> i64 {
        match ServerConfig::from_file(&self.path) {
            Ok(config) => {
                self.last_good.store(config.max_clients, Ordering::SeqCst);
                config.max_clients
            }
            Err(e) => {
                let fallback = self.last_good.load(Ordering::SeqCst);
                warn!("Config reload failed ({}), keeping max_clients={}", e, fallback);
                fallback
            }
        }
    }
}

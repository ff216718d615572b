//! Registry and expiry runtime configuration
//!
//! Values can be built in code with the `with_*` builders or loaded from
//! `MAPLOCK_*` environment variables:
//!
//! | Variable                         | Field                      |
//! |----------------------------------|----------------------------|
//! | `MAPLOCK_INITIAL_CAPACITY`       | `initial_capacity`         |
//! | `MAPLOCK_EXPIRY__WORKER_THREADS` | `expiry.worker_threads`    |
//! | `MAPLOCK_EXPIRY__THREAD_NAME`    | `expiry.thread_name`       |

use config::{Config, Environment};
use serde::Deserialize;

use crate::error::ConfigError;

/// Environment variable prefix read by [`RegistryConfig::from_env`]
pub const ENV_PREFIX: &str = "MAPLOCK";

/// Default number of worker threads driving expiry timers
pub const DEFAULT_EXPIRY_WORKER_THREADS: usize = 1;

/// Default thread name for the expiry runtime
pub const DEFAULT_EXPIRY_THREAD_NAME: &str = "maplock-expiry";

/// Settings for the dedicated runtime that fires expiry timers
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ExpiryConfig {
    /// Worker threads of the expiry runtime (default: 1)
    pub worker_threads: usize,
    /// Name given to expiry runtime threads
    pub thread_name: String,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            worker_threads: DEFAULT_EXPIRY_WORKER_THREADS,
            thread_name: DEFAULT_EXPIRY_THREAD_NAME.to_string(),
        }
    }
}

impl ExpiryConfig {
    pub fn with_worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads;
        self
    }

    pub fn with_thread_name(mut self, thread_name: impl Into<String>) -> Self {
        self.thread_name = thread_name.into();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_threads == 0 {
            return Err(ConfigError::Invalid(
                "expiry.worker_threads must be at least 1".to_string(),
            ));
        }
        if self.thread_name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "expiry.thread_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for a [`LockRegistry`](crate::LockRegistry)
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Number of keys the map is pre-sized for (0 = grow on demand)
    pub initial_capacity: usize,
    /// Expiry runtime settings, only consulted when the global runtime is
    /// first started
    pub expiry: ExpiryConfig,
}

impl RegistryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initial_capacity(mut self, initial_capacity: usize) -> Self {
        self.initial_capacity = initial_capacity;
        self
    }

    pub fn with_expiry(mut self, expiry: ExpiryConfig) -> Self {
        self.expiry = expiry;
        self
    }

    /// Load configuration from `MAPLOCK_*` environment variables, falling
    /// back to defaults for anything unset
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Self::from_config(&config)
    }

    /// Deserialize from an already assembled [`Config`]
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let parsed: RegistryConfig = config.clone().try_deserialize()?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.expiry.validate()
    }
}

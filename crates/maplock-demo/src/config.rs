//! Configuration for the demo binary
//!
//! Sources are layered lowest to highest: built-in defaults, the optional
//! YAML file, `MAPLOCK_*` environment variables, then command line flags.

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use config::{Config, Environment, File};
use maplock::RegistryConfig;

const DEFAULT_CONFIG_FILE: &str = "conf/maplock.yml";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_KEYS: [&str; 3] = ["k8s-a", "k8s-b", "k8s-c"];
const DEFAULT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_WORK_MS: u64 = 200;

/// Command line arguments for the demo
#[derive(Debug, Parser)]
#[command(name = "maplock-demo", about = "Walk through the shared lock registry")]
pub struct Cli {
    /// Configuration file (YAML)
    #[arg(short = 'c', long = "config", env = "MAPLOCK_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    pub config: String,
    /// Comma separated lock names to create
    #[arg(short = 'k', long = "keys", value_delimiter = ',')]
    pub keys: Option<Vec<String>>,
    /// Lock to acquire once the batch is created
    #[arg(short = 'l', long = "lock-key")]
    pub lock_key: Option<String>,
    /// Auto-release timeout in milliseconds, 0 holds until released
    #[arg(short = 't', long = "timeout-ms")]
    pub timeout_ms: Option<u64>,
    /// Simulated work while holding the lock
    #[arg(short = 'w', long = "work-ms")]
    pub work_ms: Option<u64>,
    /// Log level filter used when RUST_LOG is unset
    #[arg(long = "log-level")]
    pub log_level: Option<String>,
}

/// Resolved demo configuration
#[derive(Clone, Debug)]
pub struct Configuration {
    pub config: Config,
}

impl Configuration {
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let mut builder = Config::builder()
            .set_default("log.level", DEFAULT_LOG_LEVEL)?
            .set_default("demo.keys", DEFAULT_KEYS.to_vec())?
            .set_default("demo.lock_key", DEFAULT_KEYS[0])?
            .set_default("demo.timeout_ms", DEFAULT_TIMEOUT_MS)?
            .set_default("demo.work_ms", DEFAULT_WORK_MS)?
            .add_source(File::with_name(&cli.config).required(false))
            .add_source(
                Environment::with_prefix(maplock::config::ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("demo.keys"),
            );

        if let Some(keys) = &cli.keys {
            builder = builder.set_override("demo.keys", keys.clone())?;
        }
        if let Some(lock_key) = &cli.lock_key {
            builder = builder.set_override("demo.lock_key", lock_key.as_str())?;
        }
        if let Some(timeout_ms) = cli.timeout_ms {
            builder = builder.set_override("demo.timeout_ms", timeout_ms)?;
        }
        if let Some(work_ms) = cli.work_ms {
            builder = builder.set_override("demo.work_ms", work_ms)?;
        }
        if let Some(level) = &cli.log_level {
            builder = builder.set_override("log.level", level.as_str())?;
        }

        let config = builder
            .build()
            .with_context(|| format!("Failed to build configuration from {}", cli.config))?;

        Ok(Configuration { config })
    }

    pub fn log_level(&self) -> String {
        self.config
            .get_string("log.level")
            .unwrap_or(DEFAULT_LOG_LEVEL.to_string())
    }

    pub fn registry_config(&self) -> anyhow::Result<RegistryConfig> {
        match self.config.get_table("registry") {
            Ok(_) => {
                let registry: RegistryConfig = self
                    .config
                    .get("registry")
                    .context("Invalid registry section")?;
                registry.validate()?;
                Ok(registry)
            }
            Err(_) => Ok(RegistryConfig::default()),
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.config
            .get_array("demo.keys")
            .map(|values| {
                values
                    .into_iter()
                    .filter_map(|value| value.into_string().ok())
                    .map(|key| key.trim().to_string())
                    .filter(|key| !key.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn lock_key(&self) -> String {
        self.config
            .get_string("demo.lock_key")
            .unwrap_or(DEFAULT_KEYS[0].to_string())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(
            self.config
                .get::<u64>("demo.timeout_ms")
                .unwrap_or(DEFAULT_TIMEOUT_MS),
        )
    }

    pub fn work(&self) -> Duration {
        Duration::from_millis(
            self.config
                .get::<u64>("demo.work_ms")
                .unwrap_or(DEFAULT_WORK_MS),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["maplock-demo", "--config", "does-not-exist.yml"];
        argv.extend_from_slice(args);
        Cli::parse_from(argv)
    }

    #[test]
    fn test_defaults_without_file() {
        let configuration = Configuration::load(&cli(&[])).unwrap();

        assert_eq!(configuration.keys(), vec!["k8s-a", "k8s-b", "k8s-c"]);
        assert_eq!(configuration.lock_key(), "k8s-a");
        assert_eq!(configuration.timeout(), Duration::from_secs(10));
        assert_eq!(configuration.work(), Duration::from_millis(200));
        assert_eq!(configuration.registry_config().unwrap(), RegistryConfig::default());
    }

    #[test]
    fn test_cli_overrides() {
        let configuration = Configuration::load(&cli(&[
            "--keys",
            "x,y",
            "--lock-key",
            "y",
            "--timeout-ms",
            "0",
            "--log-level",
            "debug",
        ]))
        .unwrap();

        assert_eq!(configuration.keys(), vec!["x", "y"]);
        assert_eq!(configuration.lock_key(), "y");
        assert_eq!(configuration.timeout(), Duration::ZERO);
        assert_eq!(configuration.log_level(), "debug");
    }
}

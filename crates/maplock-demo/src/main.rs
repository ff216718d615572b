//! Demo entry point: creates a batch of locks in the shared registry, probes
//! one, holds it with a timeout while doing some work, then releases it.

mod config;
mod logging;

use std::time::Duration;

use clap::Parser;
use maplock::{LockError, SharedRegistry};
use tracing::{info, warn};

use crate::config::{Cli, Configuration};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let configuration = Configuration::load(&cli)?;
    logging::init_logging(&configuration.log_level())?;

    // Must run before anything touches the shared registry
    if !maplock::init_shared(configuration.registry_config()?) {
        warn!("Shared lock registry already initialized, registry settings ignored");
    }

    let registry = maplock::shared();
    let keys = configuration.keys();
    registry.store_many(keys.iter().map(|key| (key.clone(), None)))?;
    info!(count = keys.len(), "Locks created");

    let lock_key = configuration.lock_key();
    let timeout = configuration.timeout();
    let outcome = hold_and_work(registry, &lock_key, timeout, configuration.work());

    registry.destroy_all();
    info!("Locks destroyed");

    outcome.map_err(Into::into)
}

fn hold_and_work(
    registry: &SharedRegistry,
    key: &str,
    timeout: Duration,
    work: Duration,
) -> Result<(), LockError> {
    registry.try_lock(key)?;

    let lock = registry.lock(key, timeout)?.into_guard();
    info!(key = %lock.key(), timeout_ms = timeout.as_millis() as u64, "Lock acquired");

    if let Err(err) = registry.lock(key, timeout) {
        info!(error = %err, "Second acquisition rejected as expected");
    }

    std::thread::sleep(work);
    if !lock.is_held() {
        warn!(key = %key, "Lock expired before the work finished");
    }

    drop(lock);
    info!(key = %key, "Lock released");
    Ok(())
}

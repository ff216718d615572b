//! Expiry scheduler - cancellable delayed callbacks for timed locks
//!
//! Timers are tokio tasks that sleep for the lock timeout and then run a
//! release callback. By default they run on a dedicated process-wide
//! runtime so timed locks expire even when the caller is plain threaded
//! code with no runtime of its own.

use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::AbortHandle;
use tracing::info;

use crate::config::ExpiryConfig;

static GLOBAL_RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// Spawns expiry timers onto a tokio runtime
#[derive(Clone)]
pub struct ExpiryScheduler {
    handle: Handle,
}

impl fmt::Debug for ExpiryScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpiryScheduler")
            .field("runtime_flavor", &self.handle.runtime_flavor())
            .finish()
    }
}

impl ExpiryScheduler {
    /// Scheduler backed by the process-wide expiry runtime, started with
    /// default settings on first use
    pub fn global() -> Self {
        Self::global_with(&ExpiryConfig::default())
    }

    /// Scheduler backed by the process-wide expiry runtime.
    ///
    /// `config` only takes effect if this call starts the runtime; later
    /// calls share whatever runtime was started first.
    ///
    /// # Panics
    ///
    /// Panics if the operating system refuses to spawn the runtime threads.
    pub fn global_with(config: &ExpiryConfig) -> Self {
        let runtime = GLOBAL_RUNTIME.get_or_init(|| {
            info!(
                worker_threads = config.worker_threads,
                thread_name = %config.thread_name,
                "Starting lock expiry runtime"
            );
            Builder::new_multi_thread()
                .worker_threads(config.worker_threads.max(1))
                .thread_name(config.thread_name.clone())
                .enable_time()
                .build()
                .expect("Failed to start lock expiry runtime")
        });

        Self {
            handle: runtime.handle().clone(),
        }
    }

    /// Scheduler running timers on an existing runtime.
    ///
    /// The runtime must be able to make progress while locks are held; a
    /// current-thread runtime whose only thread is blocked will not fire
    /// timers until it is polled again.
    pub fn from_handle(handle: Handle) -> Self {
        Self { handle }
    }

    /// Scheduler on the ambient runtime if called from within tokio,
    /// otherwise the global one
    pub fn current() -> Self {
        match Handle::try_current() {
            Ok(handle) => Self::from_handle(handle),
            Err(_) => Self::global(),
        }
    }

    /// Run `on_fire` once `delay` has elapsed unless the returned timer is
    /// cancelled first
    pub fn schedule<F>(&self, delay: Duration, on_fire: F) -> ExpiryTimer
    where
        F: FnOnce() + Send + 'static,
    {
        let task = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            on_fire();
        });

        ExpiryTimer {
            abort: task.abort_handle(),
            delay,
        }
    }
}

impl Default for ExpiryScheduler {
    fn default() -> Self {
        Self::global()
    }
}

/// Handle to a pending expiry callback
///
/// Cancelling after the callback has started does not stop it, so callbacks
/// must re-check whatever state they act on.
#[derive(Debug)]
pub struct ExpiryTimer {
    abort: AbortHandle,
    delay: Duration,
}

impl ExpiryTimer {
    pub fn cancel(&self) {
        self.abort.abort();
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }
}

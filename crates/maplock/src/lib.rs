//! Maplock - process-local registry of named locks
//!
//! This crate provides:
//! - A concurrent registry mapping keys to independently acquirable locks
//! - Fail-fast acquisition: contention is reported, never waited on
//! - Optional per-acquisition timeouts that release the lock automatically
//! - A lazily created process-wide shared registry
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//! use maplock::LockRegistry;
//!
//! let registry = LockRegistry::<()>::new();
//! registry.store_many([("k8s-a", ()), ("k8s-b", ())]).unwrap();
//!
//! registry.try_lock("k8s-a").unwrap();
//! let lock = registry.lock("k8s-a", Duration::from_secs(10)).unwrap();
//! assert!(registry.lock("k8s-a", Duration::ZERO).unwrap_err().is_busy());
//! lock.release();
//! ```

pub mod config;
pub mod entry;
pub mod error;
pub mod expiry;
pub mod registry;

// Re-exports for convenience
pub use config::{ExpiryConfig, RegistryConfig};
pub use entry::{EntryHandle, LockGuard, LockState};
pub use error::{ConfigError, LockError};
pub use expiry::{ExpiryScheduler, ExpiryTimer};
pub use registry::{LockRegistry, Payload, SharedRegistry, init_shared, shared};

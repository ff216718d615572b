//! Error types for the lock registry
//!
//! Every registry failure names the offending key so callers can log or
//! surface it without extra bookkeeping.

/// Failures reported by [`LockRegistry`](crate::LockRegistry) operations
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error("lock[{0}] already exists")]
    DuplicateKey(String),

    #[error("lock[{0}] not found")]
    KeyNotFound(String),

    #[error("lock[{0}] busy")]
    LockBusy(String),
}

impl LockError {
    /// The key the failed operation was called with
    pub fn key(&self) -> &str {
        match self {
            LockError::DuplicateKey(key) | LockError::KeyNotFound(key) | LockError::LockBusy(key) => {
                key
            }
        }
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, LockError::LockBusy(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, LockError::KeyNotFound(_))
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, LockError::DuplicateKey(_))
    }
}

/// Failures while loading registry configuration
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("configuration error: {0}")]
    Source(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

//! Tunables for storage and resolution.
//!
//! # Responsibility
//! - Hold the knobs the process entry point may override.
//! - Provide defaults that are safe for single-process deployments.

use std::time::Duration;

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_MAX_IDLE_CONNECTIONS: usize = 4;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(25);

/// Connection-level options for `ContactStore`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    /// Bounded wait on SQLite's lock before a unit of work fails as transient.
    pub busy_timeout: Duration,
    /// Idle connections kept by file-backed stores between units of work.
    pub max_idle_connections: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            max_idle_connections: DEFAULT_MAX_IDLE_CONNECTIONS,
        }
    }
}

/// Retry policy for `IdentityResolver`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverOptions {
    /// Total attempts per resolution, including the first. Zero is treated as one.
    pub max_attempts: u32,
    /// Delay before attempt `n + 1` is `retry_backoff * n`.
    pub retry_backoff: Duration,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }
}

impl ResolverOptions {
    pub(crate) fn effective_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

//! Bus configuration from environment variables.

use std::env;
use std::time::Duration;

use crate::registry::DEFAULT_BACKEND;

/// Default drain grace period for `shutdown()`.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_millis(5000);

/// Configuration shared by every backend a registry creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusConfig {
    /// Backend resolved by `BusRegistry::get_bus()`
    pub default_backend: String,

    /// Dispatcher worker threads
    pub worker_threads: usize,

    /// How long `shutdown()` waits for in-flight deliveries
    pub shutdown_grace: Duration,

    /// Name given to dispatcher worker threads
    pub thread_name: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            default_backend: DEFAULT_BACKEND.to_string(),
            worker_threads: default_worker_threads(),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            thread_name: "pubsub-dispatch".to_string(),
        }
    }
}

impl BusConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `PUBSUB_BACKEND`: Default backend name (default: in-memory)
    /// - `PUBSUB_WORKER_THREADS`: Dispatcher pool size (default: CPU count, min 2)
    /// - `PUBSUB_SHUTDOWN_GRACE_MS`: Drain grace period (default: 5000)
    /// - `PUBSUB_THREAD_NAME`: Worker thread name (default: pubsub-dispatch)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            default_backend: env::var("PUBSUB_BACKEND").unwrap_or(defaults.default_backend),

            worker_threads: env::var("PUBSUB_WORKER_THREADS")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.worker_threads),

            shutdown_grace: env::var("PUBSUB_SHUTDOWN_GRACE_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.shutdown_grace),

            thread_name: env::var("PUBSUB_THREAD_NAME").unwrap_or(defaults.thread_name),
        }
    }

    /// Set the default backend name.
    #[must_use]
    pub fn with_default_backend(mut self, name: impl Into<String>) -> Self {
        self.default_backend = name.into();
        self
    }

    /// Set the worker pool size. Zero is clamped to one.
    #[must_use]
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads.max(1);
        self
    }

    /// Set the shutdown grace period.
    #[must_use]
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}

fn default_worker_threads() -> usize {
    num_cpus::get().max(2)
}

//! # Pubsub Telemetry
//!
//! Logging and metrics for the pubsub bus.
//!
//! ## Components
//!
//! - **Logging**: `tracing-subscriber` fmt output (plain or JSON) behind an `EnvFilter`
//! - **Metrics**: Prometheus counters for publishes and per-subscriber delivery outcomes
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pubsub_telemetry::{init_telemetry, TelemetryConfig};
//!
//! fn main() {
//!     let config = TelemetryConfig::from_env();
//!     let _guard = init_telemetry(config).expect("Failed to init telemetry");
//!
//!     // Bus activity is now logged and counted
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `PUBSUB_SERVICE_NAME` | `pubsub-bus` | Service name in logs |
//! | `PUBSUB_LOG_LEVEL` | `info` | Log level filter |
//! | `PUBSUB_JSON_LOGS` | `false` | JSON formatted output |
//! | `PUBSUB_CONSOLE_OUTPUT` | `true` | Install the console subscriber |

mod config;
mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use logging::{init_logging, StructuredLogger};
pub use metrics::{
    encode_metrics, register_metrics, MetricsHandle, ACTIVE_SUBSCRIPTIONS, DELIVERIES,
    DELIVERY_DURATION, MESSAGES_PUBLISHED,
};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Initialize logging and metrics.
///
/// Returns a guard that should be held for the lifetime of the application.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    // Metrics first: they have no side effects on output
    let metrics = register_metrics()?;
    let logger = logging::init_logging(&config)?;

    Ok(TelemetryGuard {
        _logger: logger,
        metrics,
    })
}

/// Guard that keeps telemetry active.
pub struct TelemetryGuard {
    _logger: StructuredLogger,
    metrics: MetricsHandle,
}

impl TelemetryGuard {
    /// Registered metrics.
    pub fn metrics(&self) -> &MetricsHandle {
        &self.metrics
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!("Shutting down telemetry...");
    }
}

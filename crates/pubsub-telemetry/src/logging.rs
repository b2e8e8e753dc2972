//! Structured logging setup.
//!
//! Installs a `tracing-subscriber` fmt subscriber driven by an `EnvFilter`.
//! Output is either human readable or JSON with consistent fields:
//! - `timestamp`: ISO 8601 timestamp
//! - `level`: Log level (trace, debug, info, warn, error)
//! - `target`: Emitting module (e.g. `pubsub_bus::dispatcher`)
//! - `fields`: Structured context such as `channel`, `subscription`, `event`

use tracing_subscriber::EnvFilter;

use crate::{TelemetryConfig, TelemetryError};

/// Handle returned once logging has been configured.
#[derive(Debug)]
pub struct StructuredLogger {
    installed: bool,
}

impl StructuredLogger {
    /// Whether this call installed the global subscriber.
    ///
    /// `false` means another subscriber was already in place (common in
    /// test binaries) and the existing one was left untouched.
    pub fn installed(&self) -> bool {
        self.installed
    }
}

/// Initialize logging from configuration.
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_logging(config: &TelemetryConfig) -> Result<StructuredLogger, TelemetryError> {
    if !config.console_output {
        return Ok(StructuredLogger { installed: false });
    }

    let filter = EnvFilter::try_new(&config.log_level)
        .map_err(|e| TelemetryError::Config(format!("invalid log filter: {e}")))?;

    let installed = if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .try_init()
            .is_ok()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
            .is_ok()
    };

    if installed {
        tracing::debug!(
            service = %config.service_name,
            json_logs = config.json_logs,
            "Structured logging configured"
        );
    }

    Ok(StructuredLogger { installed })
}

/// Helper to create structured bus log entries with a channel field.
#[macro_export]
macro_rules! log_channel_event {
    (info, $channel:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::info!(channel = %$channel, $($($field)*,)? $msg)
    };
    (warn, $channel:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::warn!(channel = %$channel, $($($field)*,)? $msg)
    };
    (error, $channel:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::error!(channel = %$channel, $($($field)*,)? $msg)
    };
    (debug, $channel:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::debug!(channel = %$channel, $($($field)*,)? $msg)
    };
}

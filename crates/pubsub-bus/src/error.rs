//! # Bus Errors
//!
//! Errors a caller can observe from its own direct calls. Failures during
//! asynchronous delivery never surface here; they are logged by the
//! dispatcher instead.

use thiserror::Error;

use crate::bus::BusState;

/// Result alias for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors from publish, subscribe and registry operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// A property key or value could not be stored on a message or filter.
    #[error("Invalid property '{key}': {reason}")]
    InvalidProperty { key: String, reason: String },

    /// The bus is draining or shut down.
    #[error("Bus is {state}, operation rejected")]
    Shutdown { state: BusState },

    /// No backend registered under the requested name.
    #[error("Unknown bus backend '{name}' (available: {})", .available.join(", "))]
    UnknownBackend { name: String, available: Vec<String> },

    /// `publish` was called on a message with no channel name.
    #[error("Message has no channel name")]
    MissingChannel,

    /// The dispatcher worker pool could not be started.
    #[error("Failed to start dispatcher: {0}")]
    RuntimeInit(String),

    /// A message could not be decoded from JSON.
    #[error("Malformed message JSON: {0}")]
    Json(String),
}

impl BusError {
    pub(crate) fn invalid_property(key: &str, reason: impl Into<String>) -> Self {
        Self::InvalidProperty {
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether this error means the bus is no longer accepting work.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Self::Shutdown { .. })
    }
}

/// Failure reported by a subscriber callback.
///
/// Caught and logged by the dispatcher; never propagated to the publisher
/// or to other subscribers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Delivery failed: {message}")]
pub struct DeliveryError {
    message: String,
}

impl DeliveryError {
    /// Create a delivery error with a description.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The failure description.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for DeliveryError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for DeliveryError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

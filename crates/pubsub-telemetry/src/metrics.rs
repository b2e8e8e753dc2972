//! Prometheus metrics for the pubsub bus.
//!
//! All metrics follow the naming convention: `pubsub_<metric>_<unit>`
//!
//! ## Metric Types
//!
//! - **Counter**: Monotonically increasing value (e.g., messages_published_total)
//! - **Gauge**: Value that can go up or down (e.g., active_subscriptions)
//! - **Histogram**: Distribution of values (e.g., delivery_duration_seconds)

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, CounterVec, Encoder, Gauge, Histogram, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    /// Messages accepted for dispatch, by channel
    pub static ref MESSAGES_PUBLISHED: CounterVec = CounterVec::new(
        Opts::new("pubsub_messages_published_total", "Messages accepted for dispatch"),
        &["channel"]
    ).expect("metric creation failed");

    /// Per-subscriber delivery attempts by outcome
    pub static ref DELIVERIES: CounterVec = CounterVec::new(
        Opts::new("pubsub_deliveries_total", "Delivery attempts per subscription"),
        &["outcome"]  // outcome: delivered/filtered/denied/failed
    ).expect("metric creation failed");

    /// Subscriptions currently registered across all channels
    pub static ref ACTIVE_SUBSCRIPTIONS: Gauge = Gauge::new(
        "pubsub_active_subscriptions",
        "Number of live subscriptions"
    ).expect("metric creation failed");

    /// Time spent in a subscriber callback
    pub static ref DELIVERY_DURATION: Histogram = Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "pubsub_delivery_duration_seconds",
            "Time spent filtering, authorizing and delivering one message"
        ).buckets(exponential_buckets(0.00001, 2.0, 18).expect("valid buckets"))
    ).expect("metric creation failed");
}

/// Label values for [`DELIVERIES`].
pub mod outcome {
    pub const DELIVERED: &str = "delivered";
    pub const FILTERED: &str = "filtered";
    pub const DENIED: &str = "denied";
    pub const FAILED: &str = "failed";
}

/// Handle for the registered metrics
pub struct MetricsHandle {
    registry: Arc<Registry>,
}

impl MetricsHandle {
    /// The registry holding the bus metrics.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

/// Register all metrics with the global registry.
///
/// Registering twice fails with `TelemetryError::MetricsInit` because
/// Prometheus rejects duplicate collectors.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(MESSAGES_PUBLISHED.clone()),
        Box::new(DELIVERIES.clone()),
        Box::new(ACTIVE_SUBSCRIPTIONS.clone()),
        Box::new(DELIVERY_DURATION.clone()),
    ];

    for metric in metrics {
        REGISTRY
            .register(metric)
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    }

    Ok(MetricsHandle {
        registry: Arc::new(REGISTRY.clone()),
    })
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// Timer guard for automatic histogram observation.
pub struct HistogramTimer {
    histogram: Histogram,
    start: std::time::Instant,
}

impl HistogramTimer {
    /// Start a new timer for the given histogram.
    pub fn new(histogram: &Histogram) -> Self {
        Self {
            histogram: histogram.clone(),
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for HistogramTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        self.histogram.observe(duration);
    }
}

/// Start timing for a histogram. Observation happens on drop.
#[macro_export]
macro_rules! time_histogram {
    ($histogram:expr) => {
        $crate::metrics::HistogramTimer::new(&$histogram)
    };
}

//! Prometheus metrics for the courier event bus.
//!
//! All metrics follow the naming convention: `courier_<metric>_<unit>`
//!
//! ## Metric Types
//!
//! - **Counter**: Monotonically increasing value (e.g., messages_published_total)
//! - **Histogram**: Distribution of values (e.g., health_check_latency_seconds)

use courier_bus::{DropReason, MetricsRecorder, RaceOutcome};
use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, Counter, CounterVec, Encoder, Histogram, HistogramOpts, Opts, Registry,
    TextEncoder, DEFAULT_BUCKETS,
};
use std::time::Duration;

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // ENVELOPE FLOW
    // =========================================================================

    /// Envelopes handed to the transport
    pub static ref MESSAGES_PUBLISHED: CounterVec = CounterVec::new(
        Opts::new("courier_messages_published_total", "Envelopes published on the topic"),
        &["event"]
    ).expect("metric creation failed");

    /// Valid envelopes received
    pub static ref MESSAGES_RECEIVED: CounterVec = CounterVec::new(
        Opts::new("courier_messages_received_total", "Valid envelopes received from the topic"),
        &["event"]
    ).expect("metric creation failed");

    /// Inbound payloads that never reached a listener
    pub static ref MESSAGES_DROPPED: CounterVec = CounterVec::new(
        Opts::new("courier_messages_dropped_total", "Inbound payloads dropped before dispatch"),
        &["reason"]  // reason: parse/corrupt/no_arbitration
    ).expect("metric creation failed");

    // =========================================================================
    // RACE ARBITRATION
    // =========================================================================

    /// Local race outcomes
    pub static ref RACE_OUTCOMES: CounterVec = CounterVec::new(
        Opts::new("courier_race_outcomes_total", "Race arbitration outcomes on this instance"),
        &["outcome"]  // outcome: won/lost
    ).expect("metric creation failed");

    // =========================================================================
    // HEALTH CHECKS
    // =========================================================================

    /// Health check round trip
    pub static ref HEALTH_CHECK_LATENCY: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "courier_health_check_latency_seconds",
            "Round trip of successful health checks"
        ).buckets(
            exponential_buckets(0.0001, 2.0, 15).unwrap_or_else(|_| DEFAULT_BUCKETS.to_vec())
        )
    ).expect("metric creation failed");

    /// Health checks that timed out
    pub static ref HEALTH_CHECK_TIMEOUTS: Counter = Counter::new(
        "courier_health_check_timeouts_total",
        "Health checks with no reply before the timeout"
    ).expect("metric creation failed");
}

/// Handle returned once metrics are registered
pub struct MetricsHandle {
    registry: Registry,
}

impl MetricsHandle {
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

/// Register all metrics with the global registry.
///
/// Calling it more than once is fine: already registered collectors are
/// skipped.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        // Envelope flow
        Box::new(MESSAGES_PUBLISHED.clone()),
        Box::new(MESSAGES_RECEIVED.clone()),
        Box::new(MESSAGES_DROPPED.clone()),
        // Race arbitration
        Box::new(RACE_OUTCOMES.clone()),
        // Health checks
        Box::new(HEALTH_CHECK_LATENCY.clone()),
        Box::new(HEALTH_CHECK_TIMEOUTS.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }

    Ok(MetricsHandle {
        registry: REGISTRY.clone(),
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

/// [`MetricsRecorder`] that feeds the global Prometheus metrics.
///
/// ```rust,ignore
/// let bus = EventBus::builder(config)
///     .transport(transport)
///     .metrics(Arc::new(PrometheusRecorder::new()))
///     .build()?;
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct PrometheusRecorder;

impl PrometheusRecorder {
    pub fn new() -> Self {
        Self
    }
}

impl MetricsRecorder for PrometheusRecorder {
    fn record_published(&self, event: &str) {
        MESSAGES_PUBLISHED.with_label_values(&[event]).inc();
    }

    fn record_received(&self, event: &str) {
        MESSAGES_RECEIVED.with_label_values(&[event]).inc();
    }

    fn record_dropped(&self, reason: DropReason) {
        MESSAGES_DROPPED.with_label_values(&[reason.as_str()]).inc();
    }

    fn record_race(&self, _event: &str, outcome: RaceOutcome) {
        RACE_OUTCOMES.with_label_values(&[outcome.as_str()]).inc();
    }

    fn record_health_check(&self, latency: Option<Duration>) {
        match latency {
            Some(latency) => HEALTH_CHECK_LATENCY.observe(latency.as_secs_f64()),
            None => HEALTH_CHECK_TIMEOUTS.inc(),
        }
    }
}

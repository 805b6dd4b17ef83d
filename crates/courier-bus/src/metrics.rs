//! Metrics hooks for bus operations
//!
//! The bus reports through a [`MetricsRecorder`]; [`BusMetrics`] keeps plain
//! atomic counters, [`NoOpMetrics`] discards everything. Exporters such as
//! Prometheus implement the trait themselves.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Why an inbound payload never reached a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// Not JSON.
    Parse,
    /// JSON without a usable event name, or a race envelope without id.
    Corrupt,
    /// Race-mode envelope with no lock service to arbitrate it.
    NoArbitration,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parse => "parse",
            Self::Corrupt => "corrupt",
            Self::NoArbitration => "no_arbitration",
        }
    }
}

/// Local result of race arbitration for one envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RaceOutcome {
    Won,
    Lost,
}

impl RaceOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Won => "won",
            Self::Lost => "lost",
        }
    }
}

/// Trait for custom metrics recording implementations
pub trait MetricsRecorder: Send + Sync {
    /// An envelope was handed to the transport.
    fn record_published(&self, event: &str);

    /// A valid envelope arrived.
    fn record_received(&self, event: &str);

    /// An inbound payload was dropped.
    fn record_dropped(&self, reason: DropReason);

    /// Race arbitration finished for one envelope.
    fn record_race(&self, event: &str, outcome: RaceOutcome);

    /// A health check finished; `None` means it timed out.
    fn record_health_check(&self, latency: Option<Duration>);
}

/// No-op metrics recorder for when metrics are disabled
#[derive(Debug, Default)]
pub struct NoOpMetrics;

impl MetricsRecorder for NoOpMetrics {
    fn record_published(&self, _: &str) {}
    fn record_received(&self, _: &str) {}
    fn record_dropped(&self, _: DropReason) {}
    fn record_race(&self, _: &str, _: RaceOutcome) {}
    fn record_health_check(&self, _: Option<Duration>) {}
}

/// Atomic counters for one bus instance.
#[derive(Debug, Default)]
pub struct BusMetrics {
    pub published: AtomicU64,
    pub received: AtomicU64,
    pub dropped_parse: AtomicU64,
    pub dropped_corrupt: AtomicU64,
    pub dropped_no_arbitration: AtomicU64,
    pub races_won: AtomicU64,
    pub races_lost: AtomicU64,
    pub health_checks_ok: AtomicU64,
    pub health_checks_timed_out: AtomicU64,
    /// Cumulative successful health check latency in microseconds
    pub health_check_latency_us: AtomicU64,
}

impl BusMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        let health_checks_ok = self.health_checks_ok.load(Ordering::Relaxed);
        let latency_us = self.health_check_latency_us.load(Ordering::Relaxed);

        MetricsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            dropped_parse: self.dropped_parse.load(Ordering::Relaxed),
            dropped_corrupt: self.dropped_corrupt.load(Ordering::Relaxed),
            dropped_no_arbitration: self.dropped_no_arbitration.load(Ordering::Relaxed),
            races_won: self.races_won.load(Ordering::Relaxed),
            races_lost: self.races_lost.load(Ordering::Relaxed),
            health_checks_ok,
            health_checks_timed_out: self.health_checks_timed_out.load(Ordering::Relaxed),
            avg_health_check_us: if health_checks_ok > 0 {
                latency_us / health_checks_ok
            } else {
                0
            },
        }
    }
}

impl MetricsRecorder for BusMetrics {
    fn record_published(&self, _event: &str) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    fn record_received(&self, _event: &str) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    fn record_dropped(&self, reason: DropReason) {
        let counter = match reason {
            DropReason::Parse => &self.dropped_parse,
            DropReason::Corrupt => &self.dropped_corrupt,
            DropReason::NoArbitration => &self.dropped_no_arbitration,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record_race(&self, _event: &str, outcome: RaceOutcome) {
        match outcome {
            RaceOutcome::Won => self.races_won.fetch_add(1, Ordering::Relaxed),
            RaceOutcome::Lost => self.races_lost.fetch_add(1, Ordering::Relaxed),
        };
    }

    fn record_health_check(&self, latency: Option<Duration>) {
        match latency {
            Some(latency) => {
                self.health_checks_ok.fetch_add(1, Ordering::Relaxed);
                self.health_check_latency_us
                    .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
            }
            None => {
                self.health_checks_timed_out.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Point-in-time metrics snapshot
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub published: u64,
    pub received: u64,
    pub dropped_parse: u64,
    pub dropped_corrupt: u64,
    pub dropped_no_arbitration: u64,
    pub races_won: u64,
    pub races_lost: u64,
    pub health_checks_ok: u64,
    pub health_checks_timed_out: u64,
    pub avg_health_check_us: u64,
}

//! Shared fixtures: a cluster of buses on one broker and lock table.

use courier_bus::{
    BusConfig, BusError, EventBus, InMemoryLockService, InMemoryTransport, MetricsRecorder,
};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Time for in-flight envelopes to be dispatched everywhere.
pub const SETTLE: Duration = Duration::from_millis(150);

pub const TOPIC: &str = "integration";

/// N buses sharing one transport and one lock service.
pub struct Cluster {
    pub transport: InMemoryTransport,
    pub locks: InMemoryLockService,
    pub buses: Vec<EventBus>,
}

impl Cluster {
    /// Build and connect `size` buses with race arbitration enabled.
    pub async fn connect(size: usize) -> Self {
        Self::connect_with(size, BusConfig::for_topic(TOPIC), None).await
    }

    pub async fn connect_with(
        size: usize,
        config: BusConfig,
        metrics: Option<Arc<dyn MetricsRecorder>>,
    ) -> Self {
        let transport = InMemoryTransport::new();
        let locks = InMemoryLockService::new();

        let mut buses = Vec::with_capacity(size);
        for _ in 0..size {
            let mut builder = EventBus::builder(config.clone())
                .transport(Arc::new(transport.clone()))
                .lock_service(Arc::new(locks.clone()));
            if let Some(metrics) = &metrics {
                builder = builder.metrics(metrics.clone());
            }
            let bus = builder.build().expect("valid bus config");
            bus.connect().await.expect("connect");
            buses.push(bus);
        }

        Self {
            transport,
            locks,
            buses,
        }
    }

    pub fn bus(&self, index: usize) -> &EventBus {
        &self.buses[index]
    }

    /// Register a counting listener for `event` on every bus.
    pub fn count_on(&self, event: &str, race: bool) -> Vec<Arc<AtomicUsize>> {
        self.buses
            .iter()
            .map(|bus| counting_listener(bus, event, race))
            .collect()
    }

    /// One error receiver per bus, subscribed now.
    pub fn error_receivers(&self) -> Vec<broadcast::Receiver<BusError>> {
        self.buses.iter().map(EventBus::errors).collect()
    }

    pub async fn shutdown(self) {
        for bus in &self.buses {
            let _ = bus.disconnect().await;
        }
    }
}

pub fn counting_listener(bus: &EventBus, event: &str, race: bool) -> Arc<AtomicUsize> {
    let hits = Arc::new(AtomicUsize::new(0));
    let sink = hits.clone();
    let listener = move |_: &[Value]| {
        sink.fetch_add(1, Ordering::SeqCst);
    };
    if race {
        bus.on_race(event, listener);
    } else {
        bus.on(event, listener);
    }
    hits
}

pub fn total(hits: &[Arc<AtomicUsize>]) -> usize {
    hits.iter().map(|h| h.load(Ordering::SeqCst)).sum()
}

/// Drain everything currently buffered on `errors`.
pub fn drain(errors: &mut broadcast::Receiver<BusError>) -> Vec<BusError> {
    let mut drained = Vec::new();
    while let Ok(error) = errors.try_recv() {
        drained.push(error);
    }
    drained
}

pub async fn settle() {
    tokio::time::sleep(SETTLE).await;
}

//! # In-Memory Transport
//!
//! Process-local pub/sub broker with Redis `SUBSCRIBE` semantics.

use crate::error::TransportError;
use crate::ports::{SubscribeAck, Transport, TransportConnection, TransportEvent};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// In-memory transport.
///
/// Cloning yields another handle to the same broker, so every bus built from
/// clones of one `InMemoryTransport` shares the same topics.
#[derive(Clone, Default)]
pub struct InMemoryTransport {
    broker: Arc<Broker>,
}

#[derive(Default)]
struct Broker {
    /// Topic -> live subscription routes.
    routes: RwLock<HashMap<String, Vec<Route>>>,

    next_connection: AtomicU64,

    /// Accept publishes but deliver nothing.
    muted: AtomicBool,

    /// Total publish calls (including muted and unrouted ones).
    published: AtomicU64,
}

struct Route {
    connection: u64,
    sender: mpsc::UnboundedSender<TransportEvent>,
}

impl Broker {
    fn deliver(&self, topic: &str, payload: Vec<u8>) -> usize {
        self.published.fetch_add(1, Ordering::Relaxed);

        if self.muted.load(Ordering::Relaxed) {
            trace!(topic, "Broker muted, payload discarded");
            return 0;
        }

        let mut routes = self.routes.write();
        let Some(subscribers) = routes.get_mut(topic) else {
            return 0;
        };

        // Drop routes whose receiving side is gone while delivering.
        subscribers.retain(|route| {
            route
                .sender
                .send(TransportEvent::Message {
                    topic: topic.to_string(),
                    payload: payload.clone(),
                })
                .is_ok()
        });

        let delivered = subscribers.len();
        if delivered == 0 {
            routes.remove(topic);
        }
        delivered
    }

    fn add_route(&self, topic: &str, route: Route) {
        self.routes
            .write()
            .entry(topic.to_string())
            .or_default()
            .push(route);
    }

    fn remove_connection(&self, connection: u64) {
        let mut routes = self.routes.write();
        for subscribers in routes.values_mut() {
            subscribers.retain(|route| route.connection != connection);
        }
        routes.retain(|_, subscribers| !subscribers.is_empty());
    }
}

impl InMemoryTransport {
    /// Create a new, empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish raw bytes, bypassing the string check of a connection.
    ///
    /// Lets tests put arbitrary (corrupt, non-UTF-8) payloads on a topic.
    pub fn publish_raw(&self, topic: &str, payload: impl Into<Vec<u8>>) -> usize {
        self.broker.deliver(topic, payload.into())
    }

    /// Push an asynchronous transport error to every live subscription.
    pub fn inject_error(&self, error: TransportError) -> usize {
        let routes = self.broker.routes.read();
        routes
            .values()
            .flatten()
            .filter(|route| route.sender.send(TransportEvent::Error(error.clone())).is_ok())
            .count()
    }

    /// While muted, publishes succeed but reach nobody.
    pub fn set_muted(&self, muted: bool) {
        self.broker.muted.store(muted, Ordering::Relaxed);
    }

    /// Live subscriptions on `topic`.
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.broker
            .routes
            .read()
            .get(topic)
            .map(|subscribers| {
                subscribers
                    .iter()
                    .filter(|route| !route.sender.is_closed())
                    .count()
            })
            .unwrap_or(0)
    }

    /// Total publish calls seen by the broker.
    #[must_use]
    pub fn messages_published(&self) -> u64 {
        self.broker.published.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn connect(&self) -> Result<Box<dyn TransportConnection>, TransportError> {
        let id = self.broker.next_connection.fetch_add(1, Ordering::Relaxed);
        debug!(connection = id, "In-memory transport connection opened");
        Ok(Box::new(InMemoryConnection {
            id,
            broker: self.broker.clone(),
            topics: Mutex::new(HashSet::new()),
            closed: AtomicBool::new(false),
        }))
    }
}

/// One connection to an [`InMemoryTransport`].
pub struct InMemoryConnection {
    id: u64,
    broker: Arc<Broker>,
    topics: Mutex<HashSet<String>>,
    closed: AtomicBool,
}

impl InMemoryConnection {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl TransportConnection for InMemoryConnection {
    async fn subscribe(&self, topic: &str) -> Result<SubscribeAck, TransportError> {
        self.ensure_open()?;

        let (sender, events) = mpsc::unbounded_channel();
        self.broker.add_route(
            topic,
            Route {
                connection: self.id,
                sender,
            },
        );

        let active_subscriptions = {
            let mut topics = self.topics.lock();
            topics.insert(topic.to_string());
            topics.len()
        };

        debug!(connection = self.id, topic, active_subscriptions, "Subscribed");
        Ok(SubscribeAck {
            active_subscriptions,
            events,
        })
    }

    async fn publish(&self, topic: &str, payload: &str) -> Result<usize, TransportError> {
        self.ensure_open()?;
        Ok(self.broker.deliver(topic, payload.as_bytes().to_vec()))
    }

    async fn disconnect(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.topics.lock().clear();
        self.broker.remove_connection(self.id);
        debug!(connection = self.id, "In-memory transport connection closed");
    }
}

impl Drop for InMemoryConnection {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::Acquire) {
            self.broker.remove_connection(self.id);
        }
    }
}

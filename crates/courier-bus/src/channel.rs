//! # Channel
//!
//! Topic-scoped transport wrapper with flow control.
//!
//! A channel owns two transport connections: the subscriber side, opened
//! exactly once by [`Channel::subscribe`], and the publisher side, opened
//! lazily by the first [`Channel::publish`] and reused afterwards.
//!
//! ## Flow control
//!
//! While paused, inbound messages are dropped (not queued) and publishes are
//! silently skipped while still reporting success. Resuming never replays.
//!
//! ## Errors
//!
//! Transport faults are never returned to the caller of `publish`; they are
//! forwarded to the callback registered with [`Channel::set_error_callback`].

use crate::config::validate_topic;
use crate::error::{ChannelError, TransportError};
use crate::ports::{Transport, TransportConnection, TransportEvent};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Receives raw inbound payloads, one at a time, in arrival order.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn on_message(&self, payload: Vec<u8>);
}

/// Sink for transport-level errors.
pub type ErrorCallback = Arc<dyn Fn(ChannelError) + Send + Sync>;

/// State shared with the subscriber pump task.
struct ChannelShared {
    topic: String,
    paused: AtomicBool,
    closed: AtomicBool,
    on_error: RwLock<Option<ErrorCallback>>,
}

impl ChannelShared {
    fn report(&self, error: ChannelError) {
        warn!(topic = %self.topic, error = %error, "Channel error");
        let callback = self.on_error.read().clone();
        if let Some(callback) = callback {
            callback(error);
        }
    }
}

struct SubscriberSide {
    connection: Box<dyn TransportConnection>,
    pump: JoinHandle<()>,
}

/// A single logical topic on a transport.
pub struct Channel {
    shared: Arc<ChannelShared>,
    transport: Arc<dyn Transport>,
    subscriber: Mutex<Option<SubscriberSide>>,
    publisher: Mutex<Option<Arc<dyn TransportConnection>>>,
}

impl Channel {
    /// Create a channel for `topic`. No connection is opened yet.
    pub fn new(
        topic: impl Into<String>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ChannelError> {
        let topic = topic.into();
        validate_topic(&topic)?;

        Ok(Self {
            shared: Arc::new(ChannelShared {
                topic,
                paused: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                on_error: RwLock::new(None),
            }),
            transport,
            subscriber: Mutex::new(None),
            publisher: Mutex::new(None),
        })
    }

    pub fn topic(&self) -> &str {
        &self.shared.topic
    }

    /// Register the single transport-error callback, replacing any previous one.
    pub fn set_error_callback(&self, callback: ErrorCallback) {
        *self.shared.on_error.write() = Some(callback);
    }

    /// Establish the receive side and start delivering to `handler`.
    ///
    /// # Errors
    ///
    /// - `ChannelError::AlreadySubscribed` - a subscription is active
    /// - `ChannelError::SubscriptionCount` - the transport did not acknowledge
    ///   exactly one active subscription
    /// - `ChannelError::Transport` - connect or subscribe failed
    pub async fn subscribe(&self, handler: Arc<dyn MessageHandler>) -> Result<(), ChannelError> {
        self.ensure_open()?;

        let mut subscriber = self.subscriber.lock().await;
        if subscriber.is_some() {
            return Err(ChannelError::AlreadySubscribed);
        }

        let connection = self.transport.connect().await?;
        let ack = match connection.subscribe(&self.shared.topic).await {
            Ok(ack) => ack,
            Err(e) => {
                connection.disconnect().await;
                return Err(e.into());
            }
        };

        if ack.active_subscriptions != 1 {
            connection.disconnect().await;
            return Err(ChannelError::SubscriptionCount {
                topic: self.shared.topic.clone(),
                active: ack.active_subscriptions,
            });
        }

        let pump = tokio::spawn(pump(self.shared.clone(), ack.events, handler));
        *subscriber = Some(SubscriberSide { connection, pump });

        info!(topic = %self.shared.topic, "Channel subscribed");
        Ok(())
    }

    /// Publish a serialized payload on the topic.
    ///
    /// A no-op reporting success while paused. Transport failures go to the
    /// error callback, not to the caller.
    ///
    /// # Errors
    ///
    /// - `ChannelError::InvalidPayload` - payload is not UTF-8 text
    /// - `ChannelError::Closed` - the channel was closed
    pub async fn publish(&self, payload: &[u8]) -> Result<(), ChannelError> {
        self.ensure_open()?;

        if self.is_paused() {
            trace!(topic = %self.shared.topic, "Channel paused, publish skipped");
            return Ok(());
        }

        let payload =
            std::str::from_utf8(payload).map_err(|e| ChannelError::InvalidPayload(e.to_string()))?;

        let connection = match self.publisher_connection().await {
            Ok(connection) => connection,
            Err(e) => {
                self.shared.report(e.into());
                return Ok(());
            }
        };

        match connection.publish(&self.shared.topic, payload).await {
            Ok(receivers) => {
                trace!(topic = %self.shared.topic, receivers, "Payload published");
            }
            Err(e) => self.shared.report(e.into()),
        }
        Ok(())
    }

    /// Stop delivering inbound messages and skip publishes. Idempotent.
    pub fn pause(&self) {
        if !self.shared.paused.swap(true, Ordering::AcqRel) {
            info!(topic = %self.shared.topic, "Channel paused");
        }
    }

    /// Undo [`Channel::pause`]. Idempotent; nothing dropped is replayed.
    pub fn resume(&self) {
        if self.shared.paused.swap(false, Ordering::AcqRel) {
            info!(topic = %self.shared.topic, "Channel resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Acquire)
    }

    pub async fn is_subscribed(&self) -> bool {
        self.subscriber.lock().await.is_some()
    }

    /// Release both sides. Each side is checked independently, so closing a
    /// channel that never subscribed or never published is fine.
    pub async fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);

        let subscriber = self.subscriber.lock().await.take();
        if let Some(side) = subscriber {
            side.pump.abort();
            side.connection.disconnect().await;
        }

        let publisher = self.publisher.lock().await.take();
        if let Some(connection) = publisher {
            connection.disconnect().await;
        }

        debug!(topic = %self.shared.topic, "Channel closed");
    }

    fn ensure_open(&self) -> Result<(), ChannelError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(ChannelError::Closed);
        }
        Ok(())
    }

    async fn publisher_connection(&self) -> Result<Arc<dyn TransportConnection>, TransportError> {
        let mut publisher = self.publisher.lock().await;
        if let Some(connection) = publisher.as_ref() {
            return Ok(connection.clone());
        }

        let connection: Arc<dyn TransportConnection> = Arc::from(self.transport.connect().await?);
        *publisher = Some(connection.clone());
        debug!(topic = %self.shared.topic, "Publisher connection created");
        Ok(connection)
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if let Some(side) = self.subscriber.get_mut().take() {
            side.pump.abort();
        }
    }
}

/// Drain the subscription stream, handing each payload to `handler` before
/// taking the next one.
async fn pump(
    shared: Arc<ChannelShared>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    handler: Arc<dyn MessageHandler>,
) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Message { topic, payload } => {
                if topic != shared.topic {
                    continue;
                }
                if shared.paused.load(Ordering::Acquire) {
                    trace!(topic = %shared.topic, "Channel paused, message dropped");
                    continue;
                }
                handler.on_message(payload).await;
            }
            TransportEvent::Error(error) => shared.report(ChannelError::Transport(error)),
        }
    }
    debug!(topic = %shared.topic, "Subscription stream ended");
}

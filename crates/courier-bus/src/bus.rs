//! # EventBus
//!
//! The public emitter. Owns a private [`ListenerRegistry`] and a separate
//! [`RaceRegistry`], frames outgoing events as [`Envelope`]s and publishes
//! them on a [`Channel`], and dispatches inbound envelopes either straight to
//! local listeners or through lock arbitration.
//!
//! ## Connection state
//!
//! ```text
//!   Disconnected ──connect()──► Connected ──disconnect()──► Disconnected
//! ```
//!
//! No implicit reconnection. Transport faults are reported on the error
//! channel and the application decides whether to `disconnect`/`connect`.
//!
//! ## Error channel
//!
//! Every non-fatal failure (corrupt payloads, transport faults, lost races,
//! rejected emits) is broadcast as a [`BusError`] to every receiver obtained
//! from [`EventBus::errors`] or [`EventBus::error_stream`].

use crate::channel::{Channel, MessageHandler};
use crate::config::{validate_topic, BusConfig};
use crate::envelope::Envelope;
use crate::error::{BusError, ConfigError};
use crate::listeners::{Listener, ListenerId, ListenerRegistry};
use crate::metrics::{DropReason, MetricsRecorder, NoOpMetrics, RaceOutcome};
use crate::ports::{LockClient, LockHandle, LockService, Transport};
use crate::race::RaceRegistry;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{ready, Context, Poll};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::Stream;
use tracing::{debug, info, trace, warn};

/// Listener and race bookkeeping, mutated together so race counts never
/// drift from the registrations they describe.
#[derive(Default)]
struct Registries {
    listeners: ListenerRegistry,
    races: RaceRegistry,
}

/// Race locks won by this instance and still inside their hold, keyed by
/// lock key.
type HeldLocks = Arc<Mutex<HashMap<String, LockHandle>>>;

/// Live resources of a connected bus.
struct Connection {
    channel: Arc<Channel>,
    locks: Option<Arc<dyn LockClient>>,
    held: HeldLocks,
}

struct BusInner {
    config: RwLock<BusConfig>,
    transport: Arc<dyn Transport>,
    lock_service: Option<Arc<dyn LockService>>,
    metrics: Arc<dyn MetricsRecorder>,
    registries: Mutex<Registries>,
    errors: broadcast::Sender<BusError>,
    connection: RwLock<Option<Arc<Connection>>>,
    /// Serializes connect/disconnect.
    lifecycle: tokio::sync::Mutex<()>,
}

impl BusInner {
    fn report(&self, error: BusError) {
        if error.is_race_loss() {
            debug!(error = %error, "Race lost");
        } else {
            warn!(error = %error, "Event bus error");
        }
        // No receivers is fine.
        let _ = self.errors.send(error);
    }

    /// Run the local listeners for `envelope.event` whose race mode equals
    /// `race`. A panicking listener is reported and does not stop the others.
    fn deliver(&self, envelope: &Envelope, race: bool) {
        let listeners = self
            .registries
            .lock()
            .listeners
            .take_for_dispatch(&envelope.event, race);

        trace!(
            event = %envelope.event,
            listeners = listeners.len(),
            race,
            "Dispatching to local listeners"
        );
        for listener in listeners {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener(&envelope.args))) {
                self.report(BusError::ListenerPanicked {
                    event: envelope.event.clone(),
                    message: panic_message(panic.as_ref()),
                });
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Handles inbound payloads for one connection.
struct Dispatcher {
    bus: Weak<BusInner>,
    locks: Option<Arc<dyn LockClient>>,
    lock_prefix: String,
    race_lock_ttl: Duration,
    race_hold: Duration,
    held: HeldLocks,
}

#[async_trait]
impl MessageHandler for Dispatcher {
    async fn on_message(&self, payload: Vec<u8>) {
        let Some(bus) = self.bus.upgrade() else {
            return;
        };

        let envelope = match Envelope::decode(&payload) {
            Ok(envelope) => envelope,
            Err(error) => {
                let reason = match error {
                    BusError::Parse(_) => DropReason::Parse,
                    _ => DropReason::Corrupt,
                };
                bus.metrics.record_dropped(reason);
                bus.report(error);
                return;
            }
        };

        bus.metrics.record_received(&envelope.event);
        debug!(
            event = %envelope.event,
            id = envelope.id.as_deref().unwrap_or("-"),
            "Envelope received"
        );

        bus.deliver(&envelope, false);

        let race = bus.registries.lock().races.contains(&envelope.event);
        if race {
            self.arbitrate(&bus, envelope).await;
        }
    }
}

impl Dispatcher {
    /// First instance to take the lock for this envelope id runs its
    /// race-mode listeners.
    async fn arbitrate(&self, bus: &BusInner, envelope: Envelope) {
        let Some(id) = envelope.id.clone() else {
            bus.metrics.record_dropped(DropReason::Corrupt);
            bus.report(BusError::CorruptMessage(format!(
                "race event {} carries no id",
                envelope.event
            )));
            return;
        };

        let Some(locks) = self.locks.as_ref() else {
            bus.metrics.record_dropped(DropReason::NoArbitration);
            bus.report(BusError::ArbitrationUnavailable {
                event: envelope.event,
            });
            return;
        };

        let key = format!("{}:{}", self.lock_prefix, id);
        match locks.acquire(&key, self.race_lock_ttl).await {
            Ok(lock) => {
                bus.metrics.record_race(&envelope.event, RaceOutcome::Won);
                debug!(event = %envelope.event, key = %key, "Race won");
                bus.deliver(&envelope, true);
                self.release_after_hold(bus, locks.clone(), lock).await;
            }
            Err(reason) => {
                bus.metrics.record_race(&envelope.event, RaceOutcome::Lost);
                bus.report(BusError::RaceLost {
                    event: envelope.event,
                    id,
                    reason,
                });
            }
        }
    }

    /// Keep the claim visible for `race_hold` after acquisition so that
    /// instances receiving the envelope slightly later still lose.
    async fn release_after_hold(
        &self,
        bus: &BusInner,
        locks: Arc<dyn LockClient>,
        lock: LockHandle,
    ) {
        let remaining = self.race_hold.saturating_sub(lock.elapsed());
        if remaining.is_zero() {
            if let Err(e) = locks.release(lock).await {
                bus.report(BusError::LockRelease(e));
            }
            return;
        }

        // Parked until the hold elapses; disconnect releases whatever is
        // still parked before quitting the client.
        let key = lock.key().to_string();
        self.held.lock().insert(key.clone(), lock);

        let held = self.held.clone();
        let weak = self.bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(remaining).await;
            let Some(lock) = held.lock().remove(&key) else {
                return;
            };
            if let Err(e) = locks.release(lock).await {
                if let Some(bus) = weak.upgrade() {
                    bus.report(BusError::LockRelease(e));
                }
            }
        });
    }
}

/// A distributed event emitter bound to one topic.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("topic", &self.topic())
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl EventBus {
    /// Bus without race arbitration or metrics.
    pub fn new(config: BusConfig, transport: Arc<dyn Transport>) -> Result<Self, BusError> {
        EventBusBuilder::new(config).transport(transport).build()
    }

    pub fn builder(config: BusConfig) -> EventBusBuilder {
        EventBusBuilder::new(config)
    }

    /// Open the channel, establish the lock client (when configured) and
    /// subscribe. Returns once the subscription is active.
    ///
    /// # Errors
    ///
    /// - `BusError::AlreadyConnected` - a connection is open
    /// - `BusError::LockService` - the lock client could not be established
    /// - `BusError::Channel` - channel setup or subscription failed
    pub async fn connect(&self) -> Result<(), BusError> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        if self.is_connected() {
            return Err(BusError::AlreadyConnected);
        }

        let config = self.inner.config.read().clone();
        let channel = Arc::new(Channel::new(
            config.topic.clone(),
            self.inner.transport.clone(),
        )?);

        let errors = self.inner.errors.clone();
        channel.set_error_callback(Arc::new(move |error| {
            let _ = errors.send(BusError::Channel(error));
        }));

        let locks = match &self.inner.lock_service {
            Some(service) => Some(service.connect().await.map_err(BusError::LockService)?),
            None => None,
        };

        let held = HeldLocks::default();
        let dispatcher = Arc::new(Dispatcher {
            bus: Arc::downgrade(&self.inner),
            locks: locks.clone(),
            lock_prefix: config.lock_prefix(),
            race_lock_ttl: config.race_lock_ttl,
            race_hold: config.race_hold,
            held: held.clone(),
        });

        if let Err(e) = channel.subscribe(dispatcher).await {
            channel.close().await;
            if let Some(locks) = &locks {
                locks.quit().await;
            }
            return Err(e.into());
        }

        *self.inner.connection.write() = Some(Arc::new(Connection {
            channel,
            locks,
            held,
        }));
        info!(
            topic = %config.topic,
            arbitration = self.inner.lock_service.is_some(),
            "Event bus connected"
        );
        Ok(())
    }

    /// Spawn [`EventBus::connect`]. A failure is logged and reported on the
    /// error channel.
    pub fn connect_in_background(&self) -> JoinHandle<()> {
        let bus = self.clone();
        tokio::spawn(async move {
            if let Err(e) = bus.connect().await {
                bus.inner.report(e);
            }
        })
    }

    /// Close the channel, release race locks still inside their hold and
    /// close the lock client.
    ///
    /// # Errors
    ///
    /// - `BusError::NotConnected` - nothing to disconnect
    pub async fn disconnect(&self) -> Result<(), BusError> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        let connection = self
            .inner
            .connection
            .write()
            .take()
            .ok_or(BusError::NotConnected)?;

        connection.channel.close().await;
        if let Some(locks) = &connection.locks {
            let parked: Vec<LockHandle> = connection
                .held
                .lock()
                .drain()
                .map(|(_, lock)| lock)
                .collect();
            for lock in parked {
                if let Err(e) = locks.release(lock).await {
                    self.inner.report(BusError::LockRelease(e));
                }
            }
            locks.quit().await;
        }

        info!(topic = %connection.channel.topic(), "Event bus disconnected");
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connection.read().is_some()
    }

    /// Drop inbound envelopes and skip emits until [`EventBus::resume`].
    pub fn pause(&self) -> Result<(), BusError> {
        self.channel()?.pause();
        Ok(())
    }

    pub fn resume(&self) -> Result<(), BusError> {
        self.channel()?.resume();
        Ok(())
    }

    pub fn is_paused(&self) -> bool {
        self.inner
            .connection
            .read()
            .as_ref()
            .is_some_and(|connection| connection.channel.is_paused())
    }

    pub fn topic(&self) -> String {
        self.inner.config.read().topic.clone()
    }

    /// Change the topic used by the next `connect`.
    ///
    /// # Errors
    ///
    /// - `BusError::AlreadyConnected` - the bus is connected
    /// - `BusError::Config` - blank topic
    pub fn set_topic(&self, topic: impl Into<String>) -> Result<(), BusError> {
        let topic = topic.into();
        validate_topic(&topic)?;

        let mut config = self.inner.config.write();
        if self.is_connected() {
            return Err(BusError::AlreadyConnected);
        }
        config.topic = topic;
        Ok(())
    }

    /// Publish `event` with `args` to every instance on the topic.
    ///
    /// Fire-and-forget: failures (no payload, not connected, encode or
    /// validation errors) are reported on the error channel, and returning
    /// says nothing about local delivery, which only happens through the
    /// transport round trip.
    pub async fn emit(&self, event: &str, args: Vec<Value>) {
        if event.is_empty() || args.is_empty() {
            self.inner.report(BusError::MissingPayload);
            return;
        }

        let envelope = Envelope::new(event, args);
        if let Err(e) = self.publish_envelope(&envelope).await {
            self.inner.report(e);
        }
    }

    /// [`EventBus::emit`] with a single serializable payload.
    pub async fn emit_value<T: Serialize>(&self, event: &str, payload: &T) {
        match serde_json::to_value(payload) {
            Ok(value) => self.emit(event, vec![value]).await,
            Err(e) => self.inner.report(BusError::Encode(e.to_string())),
        }
    }

    pub(crate) async fn publish_envelope(&self, envelope: &Envelope) -> Result<(), BusError> {
        let channel = self.channel()?;
        let payload = envelope.encode()?;
        channel.publish(payload.as_bytes()).await?;

        self.inner.metrics.record_published(&envelope.event);
        debug!(
            event = %envelope.event,
            id = envelope.id.as_deref().unwrap_or("-"),
            "Envelope published"
        );
        Ok(())
    }

    /// Register a listener that fires on every instance receiving `event`.
    pub fn on<F>(&self, event: &str, listener: F) -> ListenerId
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        self.register(event, Arc::new(listener), false, false)
    }

    /// Register a race-mode listener: for each envelope of `event`, exactly
    /// one instance across the topic runs its race-mode listeners.
    pub fn on_race<F>(&self, event: &str, listener: F) -> ListenerId
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        self.register(event, Arc::new(listener), true, false)
    }

    /// Register a listener removed after its first invocation.
    pub fn once<F>(&self, event: &str, listener: F) -> ListenerId
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        self.register(event, Arc::new(listener), false, true)
    }

    fn register(&self, event: &str, listener: Listener, race: bool, once: bool) -> ListenerId {
        let mut registries = self.inner.registries.lock();
        let id = registries.listeners.add(event, listener, race, once);
        if race {
            registries.races.increment(event);
        }
        debug!(event, listener = %id, race, once, "Listener registered");
        id
    }

    /// Remove a registration. Returns `false` when `id` is not registered
    /// for `event`.
    pub fn remove_listener(&self, event: &str, id: ListenerId) -> bool {
        let mut registries = self.inner.registries.lock();
        let Some(removed) = registries.listeners.remove(event, id) else {
            return false;
        };

        if removed.race {
            let remaining = registries.races.decrement(event);
            debug!(event, remaining, "Race listener removed");
        }
        true
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.inner.registries.lock().listeners.count(event)
    }

    /// Race-mode registrations for `event` on this instance.
    pub fn race_count(&self, event: &str) -> usize {
        self.inner.registries.lock().races.count(event)
    }

    /// New receiver on the error channel.
    pub fn errors(&self) -> broadcast::Receiver<BusError> {
        self.inner.errors.subscribe()
    }

    /// Error channel as a stream. Lag notifications are skipped.
    pub fn error_stream(&self) -> ErrorStream {
        ErrorStream {
            inner: BroadcastStream::new(self.errors()),
        }
    }

    pub(crate) fn metrics(&self) -> &Arc<dyn MetricsRecorder> {
        &self.inner.metrics
    }

    pub(crate) fn health_check_timeout(&self) -> Duration {
        self.inner.config.read().health_check_timeout
    }

    fn channel(&self) -> Result<Arc<Channel>, BusError> {
        self.inner
            .connection
            .read()
            .as_ref()
            .map(|connection| connection.channel.clone())
            .ok_or(BusError::NotConnected)
    }
}

/// Builder for [`EventBus`]. The transport is mandatory.
pub struct EventBusBuilder {
    config: BusConfig,
    transport: Option<Arc<dyn Transport>>,
    lock_service: Option<Arc<dyn LockService>>,
    metrics: Option<Arc<dyn MetricsRecorder>>,
}

impl EventBusBuilder {
    pub fn new(config: BusConfig) -> Self {
        Self {
            config,
            transport: None,
            lock_service: None,
            metrics: None,
        }
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Enables race arbitration.
    pub fn lock_service(mut self, lock_service: Arc<dyn LockService>) -> Self {
        self.lock_service = Some(lock_service);
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// # Errors
    ///
    /// - `BusError::Config` - invalid config or no transport
    pub fn build(self) -> Result<EventBus, BusError> {
        self.config.validate()?;
        let transport = self.transport.ok_or(ConfigError::MissingTransport)?;
        let (errors, _) = broadcast::channel(self.config.error_capacity);

        Ok(EventBus {
            inner: Arc::new(BusInner {
                config: RwLock::new(self.config),
                transport,
                lock_service: self.lock_service,
                metrics: self.metrics.unwrap_or_else(|| Arc::new(NoOpMetrics)),
                registries: Mutex::new(Registries::default()),
                errors,
                connection: RwLock::new(None),
                lifecycle: tokio::sync::Mutex::new(()),
            }),
        })
    }
}

/// Stream of [`BusError`]s from one bus.
pub struct ErrorStream {
    inner: BroadcastStream<BusError>,
}

impl Stream for ErrorStream {
    type Item = BusError;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match ready!(Pin::new(&mut self.inner).poll_next(cx)) {
                Some(Ok(error)) => return Poll::Ready(Some(error)),
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    warn!(skipped, "Error stream lagged");
                }
                None => return Poll::Ready(None),
            }
        }
    }
}

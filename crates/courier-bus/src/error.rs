//! Error types for the courier bus.
//!
//! `BusError` is `Clone` because every instance fans its errors out over a
//! broadcast channel to any number of observers.

use std::time::Duration;
use thiserror::Error;

/// Invalid bus or channel configuration. Fatal at construction/connect time.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("topic must be a non-empty string")]
    EmptyTopic,

    #[error("lock namespace must be a non-empty string")]
    EmptyNamespace,

    #[error("race lock ttl must be greater than zero")]
    ZeroLockTtl,

    #[error("race hold ({hold:?}) must be shorter than the race lock ttl ({ttl:?})")]
    HoldExceedsTtl { hold: Duration, ttl: Duration },

    #[error("health check timeout must be greater than zero")]
    ZeroHealthCheckTimeout,

    #[error("error channel capacity must be greater than zero")]
    ZeroErrorCapacity,

    #[error("transport is mandatory but was not configured")]
    MissingTransport,
}

/// Errors raised by a transport backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("failed to connect: {0}")]
    Connection(String),

    #[error("error during subscription: {0}")]
    Subscribe(String),

    #[error("failed to publish: {0}")]
    Publish(String),

    #[error("connection closed")]
    Closed,
}

/// Errors raised by a distributed lock backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error("lock {key} is held by another owner")]
    Contended { key: String },

    #[error("lock {key} is not held by this owner")]
    NotHeld { key: String },

    #[error("lock service unavailable: {0}")]
    Unavailable(String),
}

/// Errors from [`Channel`](crate::Channel) operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("invalid channel configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("a subscription is already active on this channel")]
    AlreadySubscribed,

    #[error("channel has been closed")]
    Closed,

    #[error("failed to subscribe to topic {topic}: expected 1 active subscription, got {active}")]
    SubscriptionCount { topic: String, active: usize },

    #[error("message to be published has to be a string: {0}")]
    InvalidPayload(String),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Errors reported by an [`EventBus`](crate::EventBus), either as a rejected
/// call or through its error channel.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("there is already an open connection, close it first")]
    AlreadyConnected,

    #[error("there is no open connection")]
    NotConnected,

    #[error("cannot emit events without event name and at least one argument")]
    MissingPayload,

    #[error("failed to encode envelope: {0}")]
    Encode(String),

    #[error("failed to parse message: {0}")]
    Parse(String),

    #[error("received corrupt internal message: {0}")]
    CorruptMessage(String),

    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("failed to establish lock service handle: {0}")]
    LockService(LockError),

    #[error("lost race for {event} ({id}): {reason}")]
    RaceLost {
        event: String,
        id: String,
        reason: LockError,
    },

    #[error("cannot arbitrate race event {event}: no lock service configured")]
    ArbitrationUnavailable { event: String },

    #[error("failed to release race lock: {0}")]
    LockRelease(LockError),

    #[error("listener for {event} panicked: {message}")]
    ListenerPanicked { event: String, message: String },
}

impl BusError {
    /// Routine outcome of race arbitration on a losing instance.
    #[must_use]
    pub fn is_race_loss(&self) -> bool {
        matches!(self, Self::RaceLost { .. })
    }
}

/// Outcome of a failed [`EventBus::health_check`](crate::EventBus::health_check).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HealthCheckError {
    #[error("health check requires an open connection")]
    NotConnected,

    #[error("health check probe could not be published: {0}")]
    Publish(BusError),

    #[error("healthcheck timed out after {after:?}")]
    TimedOut { after: Duration },
}

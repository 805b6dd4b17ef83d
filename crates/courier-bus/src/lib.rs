//! # Courier Bus - Distributed Event Bus
//!
//! Lets independent process instances that share one pub/sub topic exchange
//! application events as if they shared a single in-process emitter.
//!
//! ## Flow
//!
//! ```text
//! ┌──────────────┐   emit()    ┌───────────┐   publish   ┌─────────────┐
//! │  EventBus A  │ ──────────► │  Channel  │ ──────────► │  Transport  │
//! └──────────────┘  Envelope   └───────────┘             └──────┬──────┘
//!                                                               │ topic
//!        ┌──────────────────────────────┬───────────────────────┘
//!        ▼                              ▼
//! ┌──────────────┐               ┌──────────────┐
//! │  EventBus A  │               │  EventBus B  │   decode → race? → listeners
//! └──────────────┘               └──────────────┘
//! ```
//!
//! Local delivery only happens through the transport round trip, including
//! for the instance that emitted.
//!
//! ## Race mode
//!
//! Listeners registered with [`EventBus::on_race`] are arbitrated through a
//! distributed lock keyed by the envelope id: across all instances exactly
//! one runs its listeners for a given envelope, the rest report
//! [`BusError::RaceLost`].
//!
//! ## Modules
//!
//! - [`ports`]: transport and lock-service traits
//! - [`adapters`]: in-memory implementations of both ports
//! - [`channel`]: topic-scoped transport wrapper with pause/resume
//! - [`bus`]: the public emitter
//! - [`health`]: round-trip liveness probe

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod adapters;
pub mod bus;
pub mod channel;
pub mod config;
pub mod envelope;
pub mod error;
pub mod health;
pub mod listeners;
pub mod metrics;
pub mod ports;
pub mod race;

// Re-export main types
pub use adapters::{InMemoryLockService, InMemoryTransport};
pub use bus::{ErrorStream, EventBus, EventBusBuilder};
pub use channel::{Channel, ErrorCallback, MessageHandler};
pub use config::{BusConfig, BusConfigBuilder};
pub use envelope::Envelope;
pub use error::{BusError, ChannelError, ConfigError, HealthCheckError, LockError, TransportError};
pub use health::HealthReport;
pub use listeners::{Listener, ListenerId};
pub use metrics::{
    BusMetrics, DropReason, MetricsRecorder, MetricsSnapshot, NoOpMetrics, RaceOutcome,
};
pub use ports::{LockClient, LockHandle, LockService, Transport, TransportConnection};

use std::time::Duration;

/// Reserved event name used by the health-check probe.
pub const HEALTH_CHECK_EVENT: &str = "health-check";

/// Round-trip budget of a health check.
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(1);

/// TTL of the lock taken for each race-mode envelope.
pub const DEFAULT_RACE_LOCK_TTL: Duration = Duration::from_millis(500);

/// How long a race winner keeps its lock, measured from acquisition.
pub const DEFAULT_RACE_HOLD: Duration = Duration::from_millis(250);

/// Lock key namespace.
pub const DEFAULT_LOCK_NAMESPACE: &str = "courier";

/// Buffered errors per error-channel receiver before it lags.
pub const DEFAULT_ERROR_CAPACITY: usize = 256;

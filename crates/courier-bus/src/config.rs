//! Bus configuration and validation
//!
//! # Example
//!
//! ```ignore
//! use courier_bus::BusConfigBuilder;
//! use std::time::Duration;
//!
//! let config = BusConfigBuilder::new()
//!     .topic("orders")
//!     .race_lock_ttl(Duration::from_millis(800))
//!     .build()?;
//! ```

use crate::error::ConfigError;
use crate::{
    DEFAULT_ERROR_CAPACITY, DEFAULT_LOCK_NAMESPACE, DEFAULT_RACE_HOLD, DEFAULT_RACE_LOCK_TTL,
    HEALTH_CHECK_TIMEOUT,
};
use std::env;
use std::time::Duration;

/// Configuration for one [`EventBus`](crate::EventBus) instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusConfig {
    /// Shared pub/sub topic every cooperating instance subscribes to
    pub topic: String,
    /// Prefix for race lock keys, keeps them apart from unrelated keys
    pub lock_namespace: String,
    /// TTL of the lock taken per race-mode envelope
    pub race_lock_ttl: Duration,
    /// Minimum time a race winner keeps its lock before releasing it
    pub race_hold: Duration,
    /// Health check round-trip budget
    pub health_check_timeout: Duration,
    /// Buffered errors per error-channel receiver
    pub error_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            topic: "courier".to_string(),
            lock_namespace: DEFAULT_LOCK_NAMESPACE.to_string(),
            race_lock_ttl: DEFAULT_RACE_LOCK_TTL,
            race_hold: DEFAULT_RACE_HOLD,
            health_check_timeout: HEALTH_CHECK_TIMEOUT,
            error_capacity: DEFAULT_ERROR_CAPACITY,
        }
    }
}

impl BusConfig {
    /// Default configuration for `topic`.
    pub fn for_topic(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ..Self::default()
        }
    }

    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `COURIER_TOPIC`: Topic name (default: courier)
    /// - `COURIER_LOCK_NAMESPACE`: Lock key prefix (default: courier)
    /// - `COURIER_RACE_LOCK_TTL_MS`: Race lock TTL (default: 500)
    /// - `COURIER_RACE_HOLD_MS`: Winner hold before release (default: 250)
    /// - `COURIER_HEALTH_CHECK_TIMEOUT_MS`: Health check timeout (default: 1000)
    /// - `COURIER_ERROR_CAPACITY`: Error channel capacity (default: 256)
    ///
    /// Unparsable numbers fall back to their defaults. The result is not
    /// validated; call [`BusConfig::validate`] or go through the builder.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let millis = |name: &str, fallback: Duration| {
            env::var(name)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(fallback)
        };

        Self {
            topic: env::var("COURIER_TOPIC").unwrap_or(defaults.topic),
            lock_namespace: env::var("COURIER_LOCK_NAMESPACE").unwrap_or(defaults.lock_namespace),
            race_lock_ttl: millis("COURIER_RACE_LOCK_TTL_MS", defaults.race_lock_ttl),
            race_hold: millis("COURIER_RACE_HOLD_MS", defaults.race_hold),
            health_check_timeout: millis(
                "COURIER_HEALTH_CHECK_TIMEOUT_MS",
                defaults.health_check_timeout,
            ),
            error_capacity: env::var("COURIER_ERROR_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.error_capacity),
        }
    }

    /// Validate configuration boundaries
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_topic(&self.topic)?;

        if self.lock_namespace.trim().is_empty() {
            return Err(ConfigError::EmptyNamespace);
        }

        if self.race_lock_ttl.is_zero() {
            return Err(ConfigError::ZeroLockTtl);
        }

        // A hold that outlives the ttl would release an already expired lock.
        if self.race_hold >= self.race_lock_ttl {
            return Err(ConfigError::HoldExceedsTtl {
                hold: self.race_hold,
                ttl: self.race_lock_ttl,
            });
        }

        if self.health_check_timeout.is_zero() {
            return Err(ConfigError::ZeroHealthCheckTimeout);
        }

        if self.error_capacity == 0 {
            return Err(ConfigError::ZeroErrorCapacity);
        }

        Ok(())
    }

    /// Prefix of every race lock key for this topic.
    pub fn lock_prefix(&self) -> String {
        format!("{}:mutex:{}", self.lock_namespace, self.topic)
    }
}

/// Topics are opaque to the bus; they only need to be non-blank.
pub fn validate_topic(topic: &str) -> Result<(), ConfigError> {
    if topic.trim().is_empty() {
        return Err(ConfigError::EmptyTopic);
    }
    Ok(())
}

/// Builder for [`BusConfig`] with validation
#[derive(Default)]
pub struct BusConfigBuilder {
    topic: Option<String>,
    lock_namespace: Option<String>,
    race_lock_ttl: Option<Duration>,
    race_hold: Option<Duration>,
    health_check_timeout: Option<Duration>,
    error_capacity: Option<usize>,
}

impl BusConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn lock_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.lock_namespace = Some(namespace.into());
        self
    }

    pub fn race_lock_ttl(mut self, ttl: Duration) -> Self {
        self.race_lock_ttl = Some(ttl);
        self
    }

    pub fn race_hold(mut self, hold: Duration) -> Self {
        self.race_hold = Some(hold);
        self
    }

    pub fn health_check_timeout(mut self, timeout: Duration) -> Self {
        self.health_check_timeout = Some(timeout);
        self
    }

    pub fn error_capacity(mut self, capacity: usize) -> Self {
        self.error_capacity = Some(capacity);
        self
    }

    /// Build the config, validating all parameters
    pub fn build(self) -> Result<BusConfig, ConfigError> {
        let defaults = BusConfig::default();

        let config = BusConfig {
            topic: self.topic.unwrap_or(defaults.topic),
            lock_namespace: self.lock_namespace.unwrap_or(defaults.lock_namespace),
            race_lock_ttl: self.race_lock_ttl.unwrap_or(defaults.race_lock_ttl),
            race_hold: self.race_hold.unwrap_or(defaults.race_hold),
            health_check_timeout: self
                .health_check_timeout
                .unwrap_or(defaults.health_check_timeout),
            error_capacity: self.error_capacity.unwrap_or(defaults.error_capacity),
        };

        config.validate()?;
        Ok(config)
    }
}

//! Distributed lock port
//!
//! Used for race arbitration: the first instance that acquires the lock for
//! an envelope id handles it, everyone else stands down.

use crate::error::LockError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Proof of ownership of a lock.
///
/// Deliberately not `Clone`: a handle is held by exactly one owner and is
/// consumed by [`LockClient::release`].
#[derive(Debug, PartialEq, Eq)]
pub struct LockHandle {
    key: String,
    token: Uuid,
    ttl: Duration,
    acquired_at: Instant,
}

impl LockHandle {
    /// Create a handle for a freshly acquired lock with a random owner token.
    pub fn new(key: impl Into<String>, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            token: Uuid::new_v4(),
            ttl,
            acquired_at: Instant::now(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> Uuid {
        self.token
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn acquired_at(&self) -> Instant {
        self.acquired_at
    }

    /// Time since acquisition.
    pub fn elapsed(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    /// Whether the ttl has lapsed (the lock service may hand the key out again).
    pub fn is_expired(&self) -> bool {
        self.elapsed() >= self.ttl
    }
}

/// Factory for lock clients. Called once per bus `connect`.
#[async_trait]
pub trait LockService: Send + Sync {
    /// Establish a client handle.
    async fn connect(&self) -> Result<Arc<dyn LockClient>, LockError>;
}

/// A live lock-service client.
#[async_trait]
pub trait LockClient: Send + Sync {
    /// Try to acquire `key` for `ttl`. Fails immediately when held elsewhere.
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<LockHandle, LockError>;

    /// Release a held lock.
    async fn release(&self, lock: LockHandle) -> Result<(), LockError>;

    /// Tear the client down. Later calls fail with [`LockError::Unavailable`].
    async fn quit(&self);
}

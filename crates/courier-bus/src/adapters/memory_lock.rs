//! # In-Memory Lock Service
//!
//! Time-bounded lock table for race arbitration inside one process.
//!
//! - A key is held until released by its owner or until its ttl lapses
//! - Expired entries are treated as free on access
//! - Expired entries are garbage-collected periodically, bounding memory

use crate::error::LockError;
use crate::ports::{LockClient, LockHandle, LockService};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

struct LockEntry {
    token: Uuid,
    expires_at: Instant,
}

/// Key -> current owner.
struct LockTable {
    entries: HashMap<String, LockEntry>,
    last_gc: Instant,
    gc_interval: Duration,
}

impl LockTable {
    fn new(gc_interval: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            last_gc: Instant::now(),
            gc_interval,
        }
    }

    fn try_acquire(&mut self, key: &str, ttl: Duration) -> Result<LockHandle, LockError> {
        let now = Instant::now();

        if now.duration_since(self.last_gc) > self.gc_interval {
            self.garbage_collect(now);
            self.last_gc = now;
        }

        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > now {
                return Err(LockError::Contended {
                    key: key.to_string(),
                });
            }
        }

        let handle = LockHandle::new(key, ttl);
        self.entries.insert(
            key.to_string(),
            LockEntry {
                token: handle.token(),
                expires_at: handle.acquired_at() + ttl,
            },
        );
        Ok(handle)
    }

    fn release(&mut self, handle: &LockHandle) -> Result<(), LockError> {
        let now = Instant::now();
        let owned = self
            .entries
            .get(handle.key())
            .is_some_and(|entry| entry.token == handle.token() && entry.expires_at > now);

        if !owned {
            return Err(LockError::NotHeld {
                key: handle.key().to_string(),
            });
        }

        self.entries.remove(handle.key());
        Ok(())
    }

    fn held(&self, now: Instant) -> usize {
        self.entries
            .values()
            .filter(|entry| entry.expires_at > now)
            .count()
    }

    fn garbage_collect(&mut self, now: Instant) {
        self.entries.retain(|_, entry| entry.expires_at > now);
    }
}

/// In-memory lock service.
///
/// Clones share the same lock table, so several buses in one process can
/// arbitrate against each other.
#[derive(Clone)]
pub struct InMemoryLockService {
    table: Arc<Mutex<LockTable>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryLockService {
    /// Default garbage collection interval.
    pub const DEFAULT_GC_INTERVAL: Duration = Duration::from_secs(10);

    #[must_use]
    pub fn new() -> Self {
        Self::with_gc_interval(Self::DEFAULT_GC_INTERVAL)
    }

    #[must_use]
    pub fn with_gc_interval(gc_interval: Duration) -> Self {
        Self {
            table: Arc::new(Mutex::new(LockTable::new(gc_interval))),
            unavailable: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Simulate an outage: every call fails with [`LockError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    /// Number of unexpired locks.
    #[must_use]
    pub fn held_count(&self) -> usize {
        self.table.lock().held(Instant::now())
    }

    /// Whether `key` is currently held.
    #[must_use]
    pub fn is_locked(&self, key: &str) -> bool {
        self.table
            .lock()
            .entries
            .get(key)
            .is_some_and(|entry| entry.expires_at > Instant::now())
    }

    /// Entries still stored, expired or not.
    #[must_use]
    pub fn stored_entries(&self) -> usize {
        self.table.lock().entries.len()
    }
}

impl Default for InMemoryLockService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LockService for InMemoryLockService {
    async fn connect(&self) -> Result<Arc<dyn LockClient>, LockError> {
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(LockError::Unavailable("lock service is down".to_string()));
        }

        Ok(Arc::new(InMemoryLockClient {
            table: self.table.clone(),
            unavailable: self.unavailable.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Client handle returned by [`InMemoryLockService::connect`].
pub struct InMemoryLockClient {
    table: Arc<Mutex<LockTable>>,
    unavailable: Arc<AtomicBool>,
    closed: AtomicBool,
}

impl InMemoryLockClient {
    fn ensure_available(&self) -> Result<(), LockError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(LockError::Unavailable("client has quit".to_string()));
        }
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(LockError::Unavailable("lock service is down".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LockClient for InMemoryLockClient {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<LockHandle, LockError> {
        self.ensure_available()?;
        let result = self.table.lock().try_acquire(key, ttl);
        debug!(key, acquired = result.is_ok(), "Lock acquire");
        result
    }

    async fn release(&self, lock: LockHandle) -> Result<(), LockError> {
        self.ensure_available()?;
        self.table.lock().release(&lock)
    }

    async fn quit(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

//! Listener registry
//!
//! Local callbacks per event name, in registration order. Callbacks receive
//! the envelope's argument list.

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A local event listener.
pub type Listener = Arc<dyn Fn(&[Value]) + Send + Sync>;

/// Opaque handle identifying one registration, used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

struct Entry {
    id: ListenerId,
    race: bool,
    once: bool,
    listener: Listener,
}

/// What was removed by [`ListenerRegistry::remove`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Removed {
    /// The registration was race-mode and must be released from the race count.
    pub race: bool,
}

#[derive(Default)]
pub struct ListenerRegistry {
    entries: HashMap<String, Vec<Entry>>,
    next_id: u64,
}

impl ListenerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, event: &str, listener: Listener, race: bool, once: bool) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.entries.entry(event.to_string()).or_default().push(Entry {
            id,
            race,
            once,
            listener,
        });
        id
    }

    /// Remove one registration. `None` when `id` is not registered for `event`.
    pub fn remove(&mut self, event: &str, id: ListenerId) -> Option<Removed> {
        let entries = self.entries.get_mut(event)?;
        let position = entries.iter().position(|entry| entry.id == id)?;
        let entry = entries.remove(position);
        if entries.is_empty() {
            self.entries.remove(event);
        }
        Some(Removed { race: entry.race })
    }

    /// Callbacks to invoke for one delivery of `event`, in registration order.
    ///
    /// Only registrations whose race mode equals `race` are taken: plain
    /// listeners fire on every instance, race-mode ones only on the instance
    /// that won arbitration. One-shot registrations among them are removed as
    /// part of the call so they can never fire twice.
    pub fn take_for_dispatch(&mut self, event: &str, race: bool) -> Vec<Listener> {
        let Some(entries) = self.entries.get_mut(event) else {
            return Vec::new();
        };

        let listeners = entries
            .iter()
            .filter(|entry| entry.race == race)
            .map(|entry| entry.listener.clone())
            .collect();

        entries.retain(|entry| entry.race != race || !entry.once);
        if entries.is_empty() {
            self.entries.remove(event);
        }
        listeners
    }

    #[must_use]
    pub fn count(&self, event: &str) -> usize {
        self.entries.get(event).map_or(0, Vec::len)
    }

    /// Event names with at least one listener.
    #[must_use]
    pub fn events(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }
}

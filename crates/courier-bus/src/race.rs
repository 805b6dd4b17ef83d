//! Race registry
//!
//! Process-local reference count of race-mode listeners per event name. An
//! event name present here is arbitrated through the distributed lock; one
//! absent is broadcast to every instance.

use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct RaceRegistry {
    counts: HashMap<String, usize>,
}

impl RaceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one more race-mode listener for `event`. Returns the new count.
    pub fn increment(&mut self, event: &str) -> usize {
        let count = self.counts.entry(event.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Record the removal of a race-mode listener. Returns the remaining count.
    ///
    /// The entry disappears at zero; decrementing an unknown name is a no-op.
    pub fn decrement(&mut self, event: &str) -> usize {
        let Some(count) = self.counts.get_mut(event) else {
            return 0;
        };

        *count = count.saturating_sub(1);
        let remaining = *count;
        if remaining == 0 {
            self.counts.remove(event);
        }
        remaining
    }

    #[must_use]
    pub fn contains(&self, event: &str) -> bool {
        self.counts.contains_key(event)
    }

    #[must_use]
    pub fn count(&self, event: &str) -> usize {
        self.counts.get(event).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

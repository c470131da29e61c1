//! Live per-route traffic summary.
//!
//! # Responsibilities
//! - Count requests per (method, path) and remember when each was last seen
//! - Hand out consistent snapshots for the dashboard
//! - Clear everything in one step
//!
//! # Design Decisions
//! - A single mutex serializes record, snapshot and clear, so count and
//!   timestamp always move together and a clear is never observed half-done
//! - The aggregator is an owned handle passed to whoever needs it, not a global

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

/// Aggregation key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteKey {
    pub method: String,
    pub path: String,
}

/// Aggregation value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub count: u64,
    pub last_seen: SystemTime,
}

/// Shared, cheaply cloneable handle.
#[derive(Debug, Clone, Default)]
pub struct Aggregator {
    inner: Arc<Mutex<HashMap<RouteKey, Entry>>>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<RouteKey, Entry>> {
        // A panic while holding the lock cannot leave an entry half-written.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bump the entry for `(method, path)`, creating it if needed.
    pub fn record(&self, method: &str, path: &str) {
        let now = SystemTime::now();
        let key = RouteKey {
            method: method.to_string(),
            path: path.to_string(),
        };
        let mut map = self.lock();
        let entry = map.entry(key).or_insert(Entry {
            count: 0,
            last_seen: now,
        });
        entry.count += 1;
        entry.last_seen = now;
    }

    /// Point-in-time copy, most recently seen first.
    pub fn snapshot(&self) -> Vec<(RouteKey, Entry)> {
        let mut entries: Vec<_> = {
            let map = self.lock();
            map.iter().map(|(k, v)| (k.clone(), *v)).collect()
        };
        entries.sort_by(|a, b| b.1.last_seen.cmp(&a.1.last_seen).then_with(|| a.0.cmp(&b.0)));
        entries
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

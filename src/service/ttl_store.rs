//! In-memory key-value store with per-entry expiry.
//!
//! Expiry is lazy: an entry past its deadline is treated as absent and
//! evicted by whichever read touches it first. `sweep` only bounds memory
//! for keys nobody reads again.

use std::{
    collections::{HashMap, hash_map},
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::Mutex;

use crate::utils::clock::Clock;

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> Entry<V> {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Result of an atomic compare-and-consume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Take<V> {
    /// No live entry under the key.
    Missing,
    /// A live entry exists but the predicate rejected it; it is left in place.
    Rejected,
    /// The entry matched and has been removed.
    Taken(V),
}

pub struct TtlStore<V> {
    entries: Mutex<HashMap<String, Entry<V>>>,
    clock: Arc<dyn Clock>,
}

impl<V: Clone> TtlStore<V> {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Stores `value` under `key`, replacing any previous entry.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let expires_at = self.clock.now() + ttl;
        self.entries
            .lock()
            .insert(key.into(), Entry { value, expires_at });
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Removes the entry. Returns whether a live entry was removed.
    pub fn delete(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.entries
            .lock()
            .remove(key)
            .is_some_and(|entry| entry.is_live(now))
    }

    /// Runs `f` against the live value and its remaining lifetime without
    /// creating an entry.
    pub fn peek_with<R>(&self, key: &str, f: impl FnOnce(&V, Duration) -> R) -> Option<R> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Some(f(&entry.value, entry.expires_at - now)),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Runs `f` against the live value, first inserting `init()` with `ttl`
    /// when the key is absent or expired. An existing entry keeps its
    /// original deadline.
    pub fn get_or_insert_with<R>(
        &self,
        key: &str,
        ttl: Duration,
        init: impl FnOnce() -> V,
        f: impl FnOnce(&mut V, Duration) -> R,
    ) -> R {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let entry = match entries.entry(key.to_string()) {
            hash_map::Entry::Occupied(mut slot) => {
                if !slot.get().is_live(now) {
                    slot.insert(Entry {
                        value: init(),
                        expires_at: now + ttl,
                    });
                }
                slot.into_mut()
            }
            hash_map::Entry::Vacant(slot) => slot.insert(Entry {
                value: init(),
                expires_at: now + ttl,
            }),
        };
        let remaining = entry.expires_at - now;
        f(&mut entry.value, remaining)
    }

    /// Removes the entry only if it is live and `accept` returns true.
    pub fn take_if(&self, key: &str, accept: impl FnOnce(&V) -> bool) -> Take<V> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get(key) else {
            return Take::Missing;
        };
        if !entry.is_live(now) {
            entries.remove(key);
            return Take::Missing;
        }
        if !accept(&entry.value) {
            return Take::Rejected;
        }
        match entries.remove(key) {
            Some(entry) => Take::Taken(entry.value),
            None => Take::Missing,
        }
    }

    /// Drops every expired entry and returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        before - entries.len()
    }

    /// Number of stored entries, expired ones included until touched or swept.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

//! An in-process token store

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use vkads_clock::{Clock, DurationSecs, System, UnixTime};

use super::TokenStore;
use crate::error::StoreError;

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Option<UnixTime>,
}

impl Entry {
    fn is_live_at(&self, now: UnixTime) -> bool {
        self.expires_at.map_or(true, |e| now < e)
    }
}

/// A token store kept in process memory
///
/// Expired entries are treated as absent and evicted lazily when touched.
#[derive(Debug, Default)]
pub struct InMemoryTokenStore<C = System> {
    entries: Mutex<HashMap<String, Entry>>,
    clock: C,
}

impl InMemoryTokenStore<System> {
    /// Constructs an empty store using the system clock
    pub fn new() -> Self {
        Self::default()
    }
}

impl<C> InMemoryTokenStore<C> {
    /// Sets a custom clock to be used for expiry
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> InMemoryTokenStore<D> {
        InMemoryTokenStore {
            entries: self.entries,
            clock,
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<C: Clock> InMemoryTokenStore<C> {
    /// The instant at which the live entry under `key` will expire
    ///
    /// Returns `None` if the key is absent or was stored without a TTL.
    pub fn expiry_of(&self, key: &str) -> Option<UnixTime> {
        let now = self.clock.now();
        self.entries()
            .get(key)
            .filter(|e| e.is_live_at(now))
            .and_then(|e| e.expires_at)
    }

    /// The number of live entries
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries().values().filter(|e| e.is_live_at(now)).count()
    }

    /// Whether the store holds no live entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl<C: Clock + Send + Sync> TokenStore for InMemoryTokenStore<C> {
    async fn put(
        &self,
        key: &str,
        value: String,
        ttl: Option<DurationSecs>,
    ) -> Result<(), StoreError> {
        let expires_at = ttl.map(|ttl| self.clock.now() + ttl);
        tracing::trace!(key, ttl = ttl.map(|t| t.0), "storing entry");
        self.entries()
            .insert(key.to_owned(), Entry { value, expires_at });
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = self.clock.now();
        let mut entries = self.entries();
        match entries.get(key) {
            Some(entry) if entry.is_live_at(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                tracing::trace!(key, "evicting expired entry");
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        tracing::trace!(key, "deleting entry");
        self.entries().remove(key);
        Ok(())
    }

    async fn delete_by_pattern(&self, pattern: &str) -> Result<usize, StoreError> {
        let now = self.clock.now();
        let mut entries = self.entries();
        let before = entries.len();
        let mut removed = 0;
        entries.retain(|key, entry| {
            if key.contains(pattern) {
                if entry.is_live_at(now) {
                    tracing::debug!(key = key.as_str(), "deleting entry matched by pattern");
                    removed += 1;
                }
                false
            } else {
                true
            }
        });
        tracing::trace!(pattern, scanned = before, removed, "pattern deletion finished");
        Ok(removed)
    }
}

//! Thread-safe map with a per-key time-to-live.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::CacheSettings;

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> Entry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Key -> value store where every key expires independently.
///
/// Expiry is lazy: an expired entry stays in the map until a `get` touches
/// it or `purge_expired` sweeps it, but it is never returned.
///
/// One coarse mutex guards the map. Every operation is O(1) apart from the
/// sweeps, and none of them can fail; a poisoned lock is recovered.
pub struct ExpiringCache<K, V> {
    entries: Mutex<HashMap<K, Entry<V>>>,
    default_ttl: Duration,
}

impl<K, V> ExpiringCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            default_ttl,
        }
    }

    pub fn from_settings(settings: &CacheSettings) -> Self {
        Self::new(settings.default_ttl)
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, Entry<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The stored value, unless it is missing or expired. Expired entries
    /// are evicted on the way out.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut entries = self.lock();
        let expired = entries.get(key)?.is_expired(Instant::now());
        if expired {
            entries.remove(key);
            return None;
        }
        entries.get(key).map(|entry| entry.value.clone())
    }

    /// Insert or overwrite with the default TTL.
    pub fn set(&self, key: K, value: V) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    /// Insert or overwrite; the countdown restarts from now.
    pub fn set_with_ttl(&self, key: K, value: V, ttl: Duration) {
        let expires_at = Instant::now() + ttl;
        self.lock().insert(key, Entry { value, expires_at });
    }

    /// Returns whether a (possibly expired) entry was removed.
    pub fn delete<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.lock().remove(key).is_some()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Delete every entry whose key matches `pred`, e.g. everything derived
    /// from a report type after that report's data changed.
    pub fn invalidate_matching<F>(&self, pred: F) -> usize
    where
        F: Fn(&K) -> bool,
    {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|key, _| !pred(key));
        let removed = before - entries.len();
        debug!(removed, "cache entries invalidated");
        removed
    }

    /// Drop every expired entry now instead of waiting for reads.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock()
            .values()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V> Default for ExpiringCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    fn default() -> Self {
        Self::from_settings(&CacheSettings::default())
    }
}

//! Volatile expiring stores.
//!
//! Every entity gets its own typed store over [`ExpiringMap`]. Expiry is an
//! absolute unix timestamp; an entry is dead once `now >= expires_at`, whether
//! or not a sweeper has visited it yet.

mod forbidden;
mod session;
mod trust;

pub use forbidden::{ForbiddenEntry, ForbiddenStore};
pub use session::{SessionRecord, SessionStore};
pub use trust::{TrustEntry, TrustIpStore};

use dashmap::{mapref::entry::Entry, DashMap};
use std::hash::Hash;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("entry not found")]
    NotFound,
    #[error("entry expired")]
    Expired,
}

pub trait Expiring {
    fn expires_at(&self) -> i64;

    fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at()
    }
}

/// Stores the sweeper can walk.
pub trait Sweepable: Send + Sync {
    fn name(&self) -> &'static str;

    /// Remove every entry expired at `now`, returning how many went away.
    fn sweep(&self, now: i64) -> usize;
}

#[derive(Debug)]
pub(crate) struct ExpiringMap<K, V>
where
    K: Eq + Hash,
{
    entries: DashMap<K, V>,
}

impl<K, V> ExpiringMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Expiring + Clone,
{
    pub(crate) fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub(crate) fn insert(&self, key: K, value: V) {
        self.entries.insert(key, value);
    }

    /// Live entry for `key`; an expired entry is removed on the spot.
    pub(crate) fn get(&self, key: &K, now: i64) -> Result<V, StoreError> {
        let value = self
            .entries
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or(StoreError::NotFound)?;

        if value.is_expired(now) {
            // Only drop it if nobody refreshed the entry in between.
            self.entries
                .remove_if(key, |_, current| current.is_expired(now));
            return Err(StoreError::Expired);
        }

        Ok(value)
    }

    /// Apply `update` to a live entry in place.
    pub(crate) fn update<F>(&self, key: &K, now: i64, update: F) -> Result<V, StoreError>
    where
        F: FnOnce(&mut V),
    {
        {
            let mut entry = self.entries.get_mut(key).ok_or(StoreError::NotFound)?;
            if !entry.is_expired(now) {
                update(entry.value_mut());
                return Ok(entry.value().clone());
            }
        }

        self.entries
            .remove_if(key, |_, current| current.is_expired(now));
        Err(StoreError::Expired)
    }

    /// Insert or modify under the shard lock so concurrent writers never lose updates.
    pub(crate) fn upsert<F>(&self, key: K, upsert: F) -> V
    where
        F: FnOnce(Option<&V>) -> V,
    {
        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                let next = upsert(Some(occupied.get()));
                occupied.insert(next.clone());
                next
            }
            Entry::Vacant(vacant) => {
                let next = upsert(None);
                vacant.insert(next.clone());
                next
            }
        }
    }

    pub(crate) fn remove(&self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|(_, value)| value)
    }

    pub(crate) fn sweep(&self, now: i64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, value| !value.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    pub(crate) fn snapshot(&self) -> Vec<(K, V)> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

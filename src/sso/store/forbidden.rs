use super::{Expiring, ExpiringMap, StoreError, Sweepable};
use crate::provider::ContactType;

/// Temporary block raised by a failed second factor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForbiddenEntry {
    pub name: String,
    pub contact_type: ContactType,
    pub mobile: String,
    pub expires_at: i64,
}

impl Expiring for ForbiddenEntry {
    fn expires_at(&self) -> i64 {
        self.expires_at
    }
}

#[derive(Debug)]
pub struct ForbiddenStore {
    entries: ExpiringMap<String, ForbiddenEntry>,
}

impl ForbiddenStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: ExpiringMap::new(),
        }
    }

    /// Create or overwrite the block for `key`.
    pub fn block(&self, key: &str, entry: ForbiddenEntry) {
        self.entries.insert(key.to_string(), entry);
    }

    /// The live block for `key`, if any.
    #[must_use]
    pub fn blocked(&self, key: &str, now: i64) -> Option<ForbiddenEntry> {
        self.get(key, now).ok()
    }

    /// # Errors
    /// `NotFound` or `Expired`.
    pub fn get(&self, key: &str, now: i64) -> Result<ForbiddenEntry, StoreError> {
        self.entries.get(&key.to_string(), now)
    }

    pub fn delete(&self, key: &str) -> bool {
        self.entries.remove(&key.to_string()).is_some()
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, ForbiddenEntry)> {
        self.entries.snapshot()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ForbiddenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Sweepable for ForbiddenStore {
    fn name(&self) -> &'static str {
        "forbidden"
    }

    fn sweep(&self, now: i64) -> usize {
        self.entries.sweep(now)
    }
}

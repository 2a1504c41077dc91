use super::{Expiring, ExpiringMap, StoreError, Sweepable};

/// Successful logins seen from one client IP.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrustEntry {
    pub total_login_count: u64,
    pub expires_at: i64,
}

impl Expiring for TrustEntry {
    fn expires_at(&self) -> i64 {
        self.expires_at
    }
}

#[derive(Debug)]
pub struct TrustIpStore {
    entries: ExpiringMap<String, TrustEntry>,
}

impl TrustIpStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: ExpiringMap::new(),
        }
    }

    /// Count one more login from `ip` and refresh its expiry to `now + duration`.
    ///
    /// The previous count survives even if the entry lapsed but was not swept yet.
    pub fn increment(&self, ip: &str, now: i64, duration: i64) -> TrustEntry {
        self.entries.upsert(ip.to_string(), |previous| TrustEntry {
            total_login_count: previous.map_or(0, |entry| entry.total_login_count) + 1,
            expires_at: now.saturating_add(duration),
        })
    }

    /// # Errors
    /// `NotFound` or `Expired`.
    pub fn get(&self, ip: &str, now: i64) -> Result<TrustEntry, StoreError> {
        self.entries.get(&ip.to_string(), now)
    }

    #[must_use]
    pub fn is_trusted(&self, ip: &str, now: i64) -> bool {
        self.get(ip, now).is_ok()
    }

    pub fn delete(&self, ip: &str) -> bool {
        self.entries.remove(&ip.to_string()).is_some()
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, TrustEntry)> {
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

impl Default for TrustIpStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Sweepable for TrustIpStore {
    fn name(&self) -> &'static str {
        "trust"
    }

    fn sweep(&self, now: i64) -> usize {
        self.entries.sweep(now)
    }
}

use super::{Expiring, ExpiringMap, StoreError, Sweepable};

/// Serialized profile granted to a ticket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionRecord {
    pub payload: String,
    pub expires_at: i64,
}

impl Expiring for SessionRecord {
    fn expires_at(&self) -> i64 {
        self.expires_at
    }
}

#[derive(Debug)]
pub struct SessionStore {
    sessions: ExpiringMap<String, SessionRecord>,
}

impl SessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: ExpiringMap::new(),
        }
    }

    /// Last write wins.
    pub fn put(&self, ticket: &str, payload: String, expires_at: i64) {
        self.sessions.insert(
            ticket.to_string(),
            SessionRecord {
                payload,
                expires_at,
            },
        );
    }

    /// # Errors
    /// `NotFound` when the ticket was never stored, `Expired` when it lapsed.
    pub fn get(&self, ticket: &str, now: i64) -> Result<SessionRecord, StoreError> {
        self.sessions.get(&ticket.to_string(), now)
    }

    /// Seconds left before the session lapses.
    ///
    /// # Errors
    /// Same as [`SessionStore::get`].
    pub fn remaining(&self, ticket: &str, now: i64) -> Result<i64, StoreError> {
        self.get(ticket, now)
            .map(|record| record.expires_at.saturating_sub(now))
    }

    /// Move the expiry of a live session; the payload is left untouched.
    ///
    /// # Errors
    /// Same as [`SessionStore::get`].
    pub fn renew(&self, ticket: &str, expires_at: i64, now: i64) -> Result<(), StoreError> {
        self.sessions
            .update(&ticket.to_string(), now, |record| {
                record.expires_at = expires_at;
            })
            .map(|_| ())
    }

    pub fn delete(&self, ticket: &str) -> bool {
        self.sessions.remove(&ticket.to_string()).is_some()
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, SessionRecord)> {
        self.sessions.snapshot()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Sweepable for SessionStore {
    fn name(&self) -> &'static str {
        "sessions"
    }

    fn sweep(&self, now: i64) -> usize {
        self.sessions.sweep(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    #[test]
    fn stored_session_is_readable_until_expiry() {
        let store = SessionStore::new();
        store.put("t1", "{\"sso_name\":\"x\"}".to_string(), NOW + 30);

        let record = store.get("t1", NOW).map(|r| r.payload);
        assert_eq!(record.as_deref(), Ok("{\"sso_name\":\"x\"}"));
        assert_eq!(store.remaining("t1", NOW + 10), Ok(20));

        assert_eq!(store.get("t1", NOW + 30), Err(StoreError::Expired));
        // Lazily deleted on the failed read.
        assert!(store.is_empty());
        assert_eq!(store.get("t1", NOW), Err(StoreError::NotFound));
    }

    #[test]
    fn renew_extends_expiry_only() {
        let store = SessionStore::new();
        store.put("t1", "payload".to_string(), NOW + 5);

        assert_eq!(store.renew("t1", NOW + 100, NOW + 1), Ok(()));
        let record = store.get("t1", NOW + 50);
        assert_eq!(
            record,
            Ok(SessionRecord {
                payload: "payload".to_string(),
                expires_at: NOW + 100,
            })
        );
    }

    #[test]
    fn renew_of_unknown_or_lapsed_ticket_fails() {
        let store = SessionStore::new();
        assert_eq!(store.renew("nope", NOW + 10, NOW), Err(StoreError::NotFound));

        store.put("t1", "payload".to_string(), NOW);
        assert_eq!(store.renew("t1", NOW + 10, NOW), Err(StoreError::Expired));
        assert!(store.is_empty());
    }

    #[test]
    fn delete_then_get_is_not_found() {
        let store = SessionStore::new();
        store.put("t1", "payload".to_string(), NOW + 5);
        assert!(store.delete("t1"));
        assert!(!store.delete("t1"));
        assert_eq!(store.get("t1", NOW), Err(StoreError::NotFound));
    }

    #[test]
    fn sweep_removes_only_lapsed_sessions() {
        let store = SessionStore::new();
        store.put("old", "a".to_string(), NOW - 1);
        store.put("edge", "b".to_string(), NOW);
        store.put("live", "c".to_string(), NOW + 1);

        assert_eq!(store.sweep(NOW), 2);
        let keys: Vec<String> = store.snapshot().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["live".to_string()]);
        assert_eq!(store.name(), "sessions");
    }
}

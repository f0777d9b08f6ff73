/// Streamable HTTP Sessions
///
/// Session ids are issued on `initialize` and remembered with the time they
/// were last used. Idle sessions expire and the store never holds more than
/// `max_sessions` ids; when full, the least recently used one is dropped.
///
/// Every method takes `now` explicitly so expiry can be tested without
/// sleeping.

use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct SessionStore {
    idle_timeout: Duration,
    max_sessions: usize,
    last_seen: HashMap<String, Instant>,
}

impl SessionStore {
    /// Create an empty store.
    ///
    /// # Arguments
    /// * `idle_timeout` - Sessions unused for this long are forgotten
    /// * `max_sessions` - Upper bound on live sessions (at least 1)
    pub fn new(idle_timeout: Duration, max_sessions: usize) -> Self {
        Self {
            idle_timeout,
            max_sessions: max_sessions.max(1),
            last_seen: HashMap::new(),
        }
    }

    /// Register a new session id, evicting expired and, if still full, the
    /// least recently used sessions first.
    pub fn open(&mut self, id: String, now: Instant) {
        self.prune(now);
        while self.last_seen.len() >= self.max_sessions {
            let Some(oldest) = self
                .last_seen
                .iter()
                .min_by_key(|(_, seen)| **seen)
                .map(|(id, _)| id.clone())
            else {
                break;
            };
            tracing::debug!(session = %oldest, "evicting least recently used session");
            self.last_seen.remove(&oldest);
        }
        self.last_seen.insert(id, now);
    }

    /// Mark a session as used.
    ///
    /// # Returns
    /// `false` when the id is unknown or has expired.
    pub fn touch(&mut self, id: &str, now: Instant) -> bool {
        self.prune(now);
        match self.last_seen.get_mut(id) {
            Some(seen) => {
                *seen = now;
                true
            }
            None => false,
        }
    }

    /// Forget a session. Returns whether it was live.
    pub fn close(&mut self, id: &str, now: Instant) -> bool {
        self.prune(now);
        self.last_seen.remove(id).is_some()
    }

    /// Number of live sessions at `now`.
    pub fn active(&mut self, now: Instant) -> usize {
        self.prune(now);
        self.last_seen.len()
    }

    fn prune(&mut self, now: Instant) {
        let idle_timeout = self.idle_timeout;
        let before = self.last_seen.len();
        self.last_seen
            .retain(|_, seen| now.saturating_duration_since(*seen) < idle_timeout);
        let expired = before - self.last_seen.len();
        if expired > 0 {
            tracing::debug!(expired, "expired idle sessions");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn idle_sessions_expire() {
        let start = Instant::now();
        let mut store = SessionStore::new(10 * MINUTE, 100);
        store.open("a".into(), start);
        store.open("b".into(), start);

        // "a" stays alive by being used
        assert!(store.touch("a", start + 6 * MINUTE));
        assert_eq!(store.active(start + 9 * MINUTE), 2);

        assert_eq!(store.active(start + 11 * MINUTE), 1);
        assert!(!store.touch("b", start + 11 * MINUTE));
        assert!(store.touch("a", start + 15 * MINUTE));
        assert!(!store.touch("a", start + 26 * MINUTE));
        assert_eq!(store.active(start + 26 * MINUTE), 0);
    }

    #[test]
    fn full_store_drops_least_recently_used() {
        let start = Instant::now();
        let mut store = SessionStore::new(60 * MINUTE, 2);
        store.open("a".into(), start);
        store.open("b".into(), start + MINUTE);
        assert!(store.touch("a", start + 2 * MINUTE));

        store.open("c".into(), start + 3 * MINUTE);
        assert_eq!(store.active(start + 3 * MINUTE), 2);
        assert!(!store.touch("b", start + 3 * MINUTE));
        assert!(store.touch("a", start + 3 * MINUTE));
        assert!(store.touch("c", start + 3 * MINUTE));
    }

    #[test]
    fn close_reports_whether_session_was_live() {
        let start = Instant::now();
        let mut store = SessionStore::new(MINUTE, 10);
        store.open("a".into(), start);
        assert!(store.close("a", start));
        assert!(!store.close("a", start));
        assert!(!store.close("never-issued", start));

        store.open("b".into(), start);
        assert!(!store.close("b", start + 2 * MINUTE));
    }
}

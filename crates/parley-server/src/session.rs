//! Bearer-token session store.
//!
//! One token per user. Token string is `<role>_<epoch-ms>_<counter>`
//! where the role char is `a` or `n` and the counter is a process-wide
//! atomic taken modulo 10 000, which keeps tokens unique even within
//! one millisecond. Validation checks expiry itself, so the sweeper is
//! an optimisation, not a correctness requirement.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::debug;

use parley_core::time::epoch_millis;

/// What a token grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Normal,
    Admin,
    Invalid,
}

#[derive(Debug, Clone)]
struct TokenEntry {
    token: String,
    expires_at_ms: i64,
}

pub struct SessionStore {
    tokens: Mutex<HashMap<i64, TokenEntry>>,
    counter: AtomicU64,
    token_lifetime: Duration,
}

impl SessionStore {
    pub fn new(token_lifetime: Duration) -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
            counter: AtomicU64::new(0),
            token_lifetime,
        }
    }

    /// Mint a token for a user, replacing any prior entry.
    pub fn issue(&self, user_id: i64, is_admin: bool) -> String {
        let now = epoch_millis();
        let role_char = if is_admin { 'a' } else { 'n' };
        let counter = self.counter.fetch_add(1, Ordering::Relaxed) % 10_000;
        let token = format!("{role_char}_{now}_{counter}");

        let entry = TokenEntry {
            token: token.clone(),
            expires_at_ms: now + self.token_lifetime.as_millis() as i64,
        };
        self.tokens.lock().unwrap().insert(user_id, entry);
        token
    }

    /// Check a presented token for a user.
    ///
    /// Invalid when the user has no entry, the entry is expired, or the
    /// strings differ. Expiry is checked here regardless of the
    /// sweeper's schedule.
    pub fn validate(&self, user_id: i64, token: &str) -> Access {
        let tokens = self.tokens.lock().unwrap();
        let Some(entry) = tokens.get(&user_id) else {
            return Access::Invalid;
        };
        if epoch_millis() >= entry.expires_at_ms {
            return Access::Invalid;
        }
        if entry.token != token {
            return Access::Invalid;
        }
        match entry.token.as_bytes().first() {
            Some(b'a') => Access::Admin,
            Some(b'n') => Access::Normal,
            _ => Access::Invalid,
        }
    }

    /// Drop a user's token (logout, kick, teardown).
    pub fn revoke(&self, user_id: i64) {
        self.tokens.lock().unwrap().remove(&user_id);
    }

    /// Remove expired entries. Returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let now = epoch_millis();
        let mut tokens = self.tokens.lock().unwrap();
        let before = tokens.len();
        tokens.retain(|_, entry| entry.expires_at_ms > now);
        before - tokens.len()
    }

    /// Number of live token entries.
    pub fn len(&self) -> usize {
        self.tokens.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Periodic expired-token sweeper; runs until shutdown flips.
pub async fn run_sweeper(
    sessions: std::sync::Arc<SessionStore>,
    interval: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    // interval() rejects a zero period; clamp pathological configs.
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let removed = sessions.sweep();
                if removed > 0 {
                    debug!(removed, "expired tokens swept");
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn store(lifetime: Duration) -> SessionStore {
        SessionStore::new(lifetime)
    }

    #[test]
    fn issued_token_validates_with_role() {
        let sessions = store(Duration::from_secs(60));
        let normal = sessions.issue(1, false);
        let admin = sessions.issue(2, true);

        assert!(normal.starts_with("n_"));
        assert!(admin.starts_with("a_"));
        assert_eq!(sessions.validate(1, &normal), Access::Normal);
        assert_eq!(sessions.validate(2, &admin), Access::Admin);
    }

    #[test]
    fn wrong_or_missing_token_is_invalid() {
        let sessions = store(Duration::from_secs(60));
        let token = sessions.issue(1, false);

        assert_eq!(sessions.validate(1, "n_0_0"), Access::Invalid);
        assert_eq!(sessions.validate(2, &token), Access::Invalid);
    }

    #[test]
    fn reissue_replaces_the_previous_token() {
        let sessions = store(Duration::from_secs(60));
        let first = sessions.issue(1, false);
        let second = sessions.issue(1, false);

        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions.validate(1, &first), Access::Invalid);
        assert_eq!(sessions.validate(1, &second), Access::Normal);
    }

    #[test]
    fn zero_lifetime_token_is_expired_at_once_without_sweep() {
        let sessions = store(Duration::from_secs(0));
        let token = sessions.issue(1, false);
        assert_eq!(sessions.validate(1, &token), Access::Invalid);
        // The entry is still in the table — only validation rejected it.
        assert_eq!(sessions.len(), 1);
    }

    #[test]
    fn sweep_removes_only_expired_entries() {
        let sessions = store(Duration::from_secs(0));
        sessions.issue(1, false);
        let long = SessionStore::new(Duration::from_secs(60));
        long.issue(2, false);

        assert_eq!(sessions.sweep(), 1);
        assert_eq!(sessions.len(), 0);
        assert_eq!(long.sweep(), 0);
        assert_eq!(long.len(), 1);
    }

    #[test]
    fn tokens_are_unique_within_a_burst() {
        let sessions = store(Duration::from_secs(60));
        let mut seen = HashSet::new();
        for user in 0..1000 {
            assert!(seen.insert(sessions.issue(user, false)), "duplicate token");
        }
    }

    #[test]
    fn revoke_drops_the_entry() {
        let sessions = store(Duration::from_secs(60));
        let token = sessions.issue(1, false);
        sessions.revoke(1);
        assert_eq!(sessions.validate(1, &token), Access::Invalid);
        assert!(sessions.is_empty());
    }
}

use chrono::Utc;
use std::collections::HashMap;

/// Time-windowed negative cache of challenges that recently failed to
/// resolve. Owned by a single challenge worker; nothing here is persisted.
#[derive(Debug, Default)]
pub struct FailedChallengesCache {
    expirations: HashMap<String, u64>,
}

fn now_seconds() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

impl FailedChallengesCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remember_failed_challenge(&mut self, challenge_id: &str, ttl_seconds: u64) {
        self.remember_failed_challenge_at(challenge_id, ttl_seconds, now_seconds());
    }

    pub fn did_challenge_fail_recently(&self, challenge_id: &str) -> bool {
        self.did_challenge_fail_recently_at(challenge_id, now_seconds())
    }

    pub fn clear_outdated_challenges(&mut self) {
        self.clear_outdated_challenges_at(now_seconds());
    }

    /// Last write wins.
    fn remember_failed_challenge_at(&mut self, challenge_id: &str, ttl_seconds: u64, now: u64) {
        self.expirations
            .insert(challenge_id.to_owned(), now + ttl_seconds);
    }

    fn did_challenge_fail_recently_at(&self, challenge_id: &str, now: u64) -> bool {
        self.expirations
            .get(challenge_id)
            .is_some_and(|expire_at| *expire_at > now)
    }

    fn clear_outdated_challenges_at(&mut self, now: u64) {
        self.expirations.retain(|_, expire_at| *expire_at > now);
    }

    pub fn len(&self) -> usize {
        self.expirations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expirations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remembers_until_expiration() {
        let mut cache = FailedChallengesCache::new();
        cache.remember_failed_challenge_at("c1", 100, 1000);

        assert!(cache.did_challenge_fail_recently_at("c1", 1099));
        assert!(!cache.did_challenge_fail_recently_at("c1", 1100));
        assert!(!cache.did_challenge_fail_recently_at("c2", 1000));
    }

    #[test]
    fn last_write_wins() {
        let mut cache = FailedChallengesCache::new();
        cache.remember_failed_challenge_at("c1", 100, 1000);
        cache.remember_failed_challenge_at("c1", 10, 1000);

        assert!(!cache.did_challenge_fail_recently_at("c1", 1050));
    }

    #[test]
    fn clear_drops_only_expired_entries() {
        let mut cache = FailedChallengesCache::new();
        cache.remember_failed_challenge_at("expired", 50, 1000);
        cache.remember_failed_challenge_at("alive", 500, 1000);

        cache.clear_outdated_challenges_at(1100);
        assert_eq!(cache.len(), 1);
        assert!(cache.did_challenge_fail_recently_at("alive", 1100));
    }
}

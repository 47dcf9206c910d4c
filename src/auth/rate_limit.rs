/**
 * Sign-in Rate Limiter
 * Per-identity failure counting with a lockout window. Process-local and
 * non-durable; the interface is kept narrow so the map behind it could be
 * swapped for a shared TTL-capable store without touching call sites.
 */
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Failed attempts tolerated inside one lockout window.
pub const MAX_ATTEMPTS: u32 = 5;

/// Minutes after the last failure before the slate is wiped clean.
pub const LOCKOUT_WINDOW_MINUTES: i64 = 15;

#[derive(Debug, Clone, Copy)]
struct AttemptRecord {
    count: u32,
    last_attempt: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct RateLimiter {
    records: Mutex<HashMap<String, AttemptRecord>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
        }
    }

    fn key(identity: &str) -> String {
        identity.trim().to_lowercase()
    }

    /// Whether a sign-in attempt for this identity may proceed. Records whose
    /// window has lapsed are purged as a side effect, so the map stays
    /// proportional to recently-failing identities.
    pub async fn check_allowed(&self, identity: &str) -> bool {
        self.check_allowed_at(identity, Utc::now()).await
    }

    pub(crate) async fn check_allowed_at(&self, identity: &str, now: DateTime<Utc>) -> bool {
        let key = Self::key(identity);
        let mut records = self.records.lock().await;
        match records.get(&key) {
            None => true,
            Some(rec) if now - rec.last_attempt > Duration::minutes(LOCKOUT_WINDOW_MINUTES) => {
                records.remove(&key);
                true
            }
            Some(rec) => rec.count < MAX_ATTEMPTS,
        }
    }

    /// Record the outcome of one attempt that reached the credential store.
    /// Success wipes the identity's record; failure increments it.
    pub async fn record_outcome(&self, identity: &str, success: bool) {
        self.record_outcome_at(identity, success, Utc::now()).await;
    }

    pub(crate) async fn record_outcome_at(
        &self,
        identity: &str,
        success: bool,
        now: DateTime<Utc>,
    ) {
        let key = Self::key(identity);
        let mut records = self.records.lock().await;
        if success {
            records.remove(&key);
            return;
        }
        let rec = records.entry(key).or_insert(AttemptRecord {
            count: 0,
            last_attempt: now,
        });
        rec.count += 1;
        rec.last_attempt = now;
    }
}

lazy_static::lazy_static! {
    /// Limiter guarding the admin login endpoint.
    pub static ref LOGIN_LIMITER: RateLimiter = RateLimiter::new();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fresh_identity_is_allowed() {
        let limiter = RateLimiter::new();
        assert!(limiter.check_allowed("someone@example.com").await);
    }

    #[tokio::test]
    async fn test_sixth_attempt_is_rejected_within_window() {
        let limiter = RateLimiter::new();
        let now = Utc::now();

        for _ in 0..MAX_ATTEMPTS {
            assert!(limiter.check_allowed_at("victim@example.com", now).await);
            limiter
                .record_outcome_at("victim@example.com", false, now)
                .await;
        }

        assert!(!limiter.check_allowed_at("victim@example.com", now).await);
    }

    #[tokio::test]
    async fn test_success_resets_the_counter() {
        let limiter = RateLimiter::new();
        let now = Utc::now();

        for _ in 0..MAX_ATTEMPTS - 1 {
            limiter
                .record_outcome_at("owner@example.com", false, now)
                .await;
        }
        limiter
            .record_outcome_at("owner@example.com", true, now)
            .await;

        assert!(limiter.check_allowed_at("owner@example.com", now).await);
        for _ in 0..MAX_ATTEMPTS - 1 {
            limiter
                .record_outcome_at("owner@example.com", false, now)
                .await;
        }
        assert!(limiter.check_allowed_at("owner@example.com", now).await);
    }

    #[tokio::test]
    async fn test_window_expiry_purges_the_record() {
        let limiter = RateLimiter::new();
        let locked_at = Utc::now();

        for _ in 0..MAX_ATTEMPTS {
            limiter
                .record_outcome_at("victim@example.com", false, locked_at)
                .await;
        }
        assert!(
            !limiter
                .check_allowed_at("victim@example.com", locked_at)
                .await
        );

        let later = locked_at + Duration::minutes(LOCKOUT_WINDOW_MINUTES + 1);
        assert!(limiter.check_allowed_at("victim@example.com", later).await);

        // The stale record is gone; one new failure starts from one.
        limiter
            .record_outcome_at("victim@example.com", false, later)
            .await;
        assert!(limiter.check_allowed_at("victim@example.com", later).await);
    }

    #[tokio::test]
    async fn test_identities_are_isolated() {
        let limiter = RateLimiter::new();
        let now = Utc::now();

        for _ in 0..MAX_ATTEMPTS {
            limiter.record_outcome_at("a@example.com", false, now).await;
        }

        assert!(!limiter.check_allowed_at("a@example.com", now).await);
        assert!(limiter.check_allowed_at("b@example.com", now).await);
    }

    #[tokio::test]
    async fn test_identity_keys_are_normalized() {
        let limiter = RateLimiter::new();
        let now = Utc::now();

        for _ in 0..MAX_ATTEMPTS {
            limiter
                .record_outcome_at("Owner@Example.com ", false, now)
                .await;
        }
        assert!(!limiter.check_allowed_at("owner@example.com", now).await);
    }
}

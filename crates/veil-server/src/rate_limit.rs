use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use veil_core::ids::UserId;
use veil_core::time::unix_millis;

use crate::cache::{SharedCache, rate_key};

/// Budget for one event class: `tokens` per `window_secs`.
#[derive(Debug, Clone, Copy)]
pub struct RateLimit {
    pub tokens: f64,
    pub window_secs: f64,
}

/// Map an inbound event name to its rate-limit bucket. `None` means the
/// event is not limited. `requestMatch` and `startGameWithPool` share one
/// bucket.
pub fn limit_for(event: &str) -> Option<(&'static str, RateLimit)> {
    let budget = |tokens: f64, window_secs: f64| RateLimit { tokens, window_secs };
    match event {
        "gameAction" => Some(("gameAction", budget(30.0, 1.0))),
        "sendMessage" => Some(("sendMessage", budget(10.0, 10.0))),
        "createRoom" => Some(("createRoom", budget(3.0, 60.0))),
        "joinRoom" => Some(("joinRoom", budget(10.0, 60.0))),
        "submitConfession" | "updateConfession" => {
            Some(("submitConfession", budget(5.0, 60.0)))
        },
        "requestMatch" | "startGameWithPool" => Some(("startGame", budget(5.0, 30.0))),
        "updateNickname" => Some(("updateNickname", budget(3.0, 60.0))),
        _ => None,
    }
}

/// Bucket state stored under `rate:{userId}:{event}`. The key carries a
/// TTL of one window, so a bucket idle for a full window (by then fully
/// refilled anyway) simply expires.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct TokenBucket {
    tokens: f64,
    last_refill_ms: u64,
}

impl TokenBucket {
    fn full(limit: &RateLimit) -> Self {
        Self {
            tokens: limit.tokens,
            last_refill_ms: unix_millis(),
        }
    }

    /// Refill from elapsed wall-clock, then try to take one token.
    fn refill_and_take(&mut self, limit: &RateLimit) -> bool {
        let now = unix_millis();
        let elapsed = now.saturating_sub(self.last_refill_ms) as f64 / 1000.0;
        let refill_rate = limit.tokens / limit.window_secs;
        self.tokens = (self.tokens + elapsed * refill_rate).min(limit.tokens);
        self.last_refill_ms = now;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Token buckets per (user, event class), kept in the shared cache
/// keyspace. Keyed by user so neither a reattach nor a second tab can
/// reset a drained bucket.
pub struct EventRateLimiter {
    cache: Arc<SharedCache>,
}

impl EventRateLimiter {
    pub fn new(cache: Arc<SharedCache>) -> Self {
        Self { cache }
    }

    /// Returns `true` if the event is allowed for this user.
    pub async fn check(&self, user: UserId, event: &str) -> bool {
        let Some((bucket_name, limit)) = limit_for(event) else {
            return true;
        };
        let key = rate_key(user, bucket_name);
        let ttl = Duration::from_secs_f64(limit.window_secs);

        // Optimistic read-modify-swap; a CAS conflict means a sibling
        // attachment of the same user raced us, so retry on the fresh
        // value, then fall back to last writer wins.
        for _ in 0..2 {
            let read = self.cache.get_bytes(&key).await;
            let version = read.as_ref().map(|(_, v)| *v);
            let mut bucket = read
                .and_then(|(bytes, _)| rmp_serde::from_slice::<TokenBucket>(&bytes).ok())
                .unwrap_or_else(|| TokenBucket::full(&limit));
            let allowed = bucket.refill_and_take(&limit);
            let Ok(bytes) = rmp_serde::to_vec(&bucket) else {
                return allowed;
            };
            if self
                .cache
                .cas_bytes(&key, version, bytes, Some(ttl))
                .await
                .is_ok()
            {
                return allowed;
            }
        }

        tracing::warn!(user = %user, event, "rate bucket CAS failed twice, last writer wins");
        let mut bucket = self
            .cache
            .get_bytes(&key)
            .await
            .and_then(|(bytes, _)| rmp_serde::from_slice::<TokenBucket>(&bytes).ok())
            .unwrap_or_else(|| TokenBucket::full(&limit));
        let allowed = bucket.refill_and_take(&limit);
        if let Ok(bytes) = rmp_serde::to_vec(&bucket) {
            self.cache.set_bytes(&key, bytes, Some(ttl)).await;
        }
        allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> EventRateLimiter {
        EventRateLimiter::new(Arc::new(SharedCache::new()))
    }

    #[tokio::test]
    async fn allows_within_budget() {
        let limiter = limiter();
        let user = UserId::new();
        for _ in 0..3 {
            assert!(limiter.check(user, "createRoom").await);
        }
        assert!(!limiter.check(user, "createRoom").await);
    }

    #[tokio::test]
    async fn buckets_are_per_user() {
        let limiter = limiter();
        let (a, b) = (UserId::new(), UserId::new());
        for _ in 0..3 {
            assert!(limiter.check(a, "createRoom").await);
        }
        assert!(!limiter.check(a, "createRoom").await);
        assert!(limiter.check(b, "createRoom").await);
    }

    #[tokio::test]
    async fn buckets_are_per_event_class() {
        let limiter = limiter();
        let user = UserId::new();
        for _ in 0..3 {
            assert!(limiter.check(user, "createRoom").await);
        }
        assert!(!limiter.check(user, "createRoom").await);
        // A different event class has its own bucket.
        assert!(limiter.check(user, "sendMessage").await);
    }

    #[tokio::test]
    async fn start_and_match_share_a_bucket() {
        let limiter = limiter();
        let user = UserId::new();
        for _ in 0..5 {
            assert!(limiter.check(user, "requestMatch").await);
        }
        assert!(!limiter.check(user, "startGameWithPool").await);
    }

    #[tokio::test]
    async fn unlimited_events_always_pass() {
        let limiter = limiter();
        let user = UserId::new();
        for _ in 0..100 {
            assert!(limiter.check(user, "getRooms").await);
        }
    }

    #[tokio::test]
    async fn counters_live_in_the_cache_keyspace() {
        let cache = Arc::new(SharedCache::new());
        let limiter = EventRateLimiter::new(Arc::clone(&cache));
        let user = UserId::new();
        limiter.check(user, "createRoom").await;

        let (bytes, _) = cache
            .get_bytes(&rate_key(user, "createRoom"))
            .await
            .expect("bucket stored under rate:{userId}:{event}");
        let bucket: TokenBucket = rmp_serde::from_slice(&bytes).unwrap();
        assert!((bucket.tokens - 2.0).abs() < 1e-6, "one token consumed");
    }

    #[tokio::test]
    async fn bucket_survives_across_limiter_handles() {
        // The state lives in the cache, not the limiter: a second handle
        // over the same cache (a reattached session, another tab) sees
        // the drained bucket.
        let cache = Arc::new(SharedCache::new());
        let first = EventRateLimiter::new(Arc::clone(&cache));
        let user = UserId::new();
        for _ in 0..3 {
            assert!(first.check(user, "createRoom").await);
        }
        let second = EventRateLimiter::new(Arc::clone(&cache));
        assert!(!second.check(user, "createRoom").await);
    }

    #[tokio::test]
    async fn refills_over_time() {
        let limiter = limiter();
        let user = UserId::new();
        // gameAction refills at 30 tokens/s.
        for _ in 0..30 {
            assert!(limiter.check(user, "gameAction").await);
        }
        assert!(!limiter.check(user, "gameAction").await);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(limiter.check(user, "gameAction").await);
    }

    #[tokio::test]
    async fn expired_bucket_reads_as_full() {
        // A bucket past its window TTL would have fully refilled anyway;
        // expiry and a fresh full bucket are equivalent.
        let cache = Arc::new(SharedCache::new());
        let limiter = EventRateLimiter::new(Arc::clone(&cache));
        let user = UserId::new();
        for _ in 0..3 {
            limiter.check(user, "createRoom").await;
        }
        cache.delete(&rate_key(user, "createRoom")).await;
        assert!(limiter.check(user, "createRoom").await);
    }
}

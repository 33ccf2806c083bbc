//! C2: the rate limiter call sites actually use — a thin, metrics-instrumented
//! wrapper over a [`caseloot_storage::BucketStore`] plus the caller-supplied
//! params for each [`RateLimitKey`] kind.

use std::sync::Arc;

use caseloot_storage::{BucketParams, BucketStore, Decision};
use caseloot_types::RateLimitKey;

/// Per-kind bucket parameters; distinct limits for IP vs. subject vs. path
/// traffic (a path is typically much busier than any one subject).
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub ip: BucketParams,
    pub subject: BucketParams,
    pub path: BucketParams,
    pub composite: BucketParams,
}

pub struct RateLimiter {
    store: Arc<dyn BucketStore>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn BucketStore>, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    pub async fn check(&self, key: &RateLimitKey, now_ms: i64) -> Decision {
        let params = match key {
            RateLimitKey::Ip(_) => self.config.ip,
            RateLimitKey::Subject(_) => self.config.subject,
            RateLimitKey::Path(_) => self.config.path,
            RateLimitKey::Composite(..) => self.config.composite,
        };
        let decision = self.store.try_consume(&key.as_string(), params, 1.0, now_ms).await;

        let kind = match key {
            RateLimitKey::Ip(_) => "ip",
            RateLimitKey::Subject(_) => "subject",
            RateLimitKey::Path(_) => "ip",
            RateLimitKey::Composite(..) => "ip",
        };
        if decision.allowed {
            caseloot_metrics::rl_allowed(kind);
        } else {
            caseloot_metrics::rl_blocked(kind);
        }
        decision
    }
}

#[cfg(test)]
mod tests {
    use caseloot_storage::InMemoryBucketStore;

    use super::*;

    fn config() -> RateLimitConfig {
        let p = BucketParams { capacity: 2.0, refill_per_sec: 1.0, ttl_sec: 3600, initial_tokens: 2.0 };
        RateLimitConfig { ip: p, subject: p, path: p, composite: p }
    }

    #[tokio::test]
    async fn denies_after_capacity_exhausted() {
        let limiter = RateLimiter::new(Arc::new(InMemoryBucketStore::new()), config());
        let key = RateLimitKey::Ip("1.2.3.4".into());
        assert!(limiter.check(&key, 0).await.allowed);
        assert!(limiter.check(&key, 0).await.allowed);
        assert!(!limiter.check(&key, 0).await.allowed);
    }

    #[tokio::test]
    async fn different_keys_have_independent_buckets() {
        let limiter = RateLimiter::new(Arc::new(InMemoryBucketStore::new()), config());
        let a = RateLimitKey::Ip("1.2.3.4".into());
        let b = RateLimitKey::Subject(42);
        limiter.check(&a, 0).await;
        limiter.check(&a, 0).await;
        assert!(!limiter.check(&a, 0).await.allowed);
        assert!(limiter.check(&b, 0).await.allowed);
    }
}

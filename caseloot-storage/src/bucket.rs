//! C2: token bucket store (§4.1).
//!
//! The in-memory backend serializes all bucket reads/writes behind one
//! mutex; for a single-process bot this gives per-key atomicity without the
//! complexity of a lazily-GC'd per-key lock map. A future distributed
//! backend (§9, deferred) would swap this for an atomic compute-and-set
//! script against a shared store.

use std::{collections::HashMap, sync::Mutex};

use async_trait::async_trait;

/// One request's worth of refill configuration. Supplied by the caller per
/// bucket rather than fixed globally, since different routes want different
/// capacities.
#[derive(Debug, Clone, Copy)]
pub struct BucketParams {
    pub capacity: f64,
    pub refill_per_sec: f64,
    pub ttl_sec: i64,
    pub initial_tokens: f64,
}

#[derive(Debug, Clone, Copy)]
struct BucketState {
    tokens: f64,
    updated_at_ms: i64,
    expires_at_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub allowed: bool,
    pub remaining: i64,
    pub retry_after_sec: Option<i64>,
    pub reset_at_ms: i64,
}

/// A year in seconds, the fallback used when `refill_per_sec == 0` and a
/// request can never be satisfied again.
const MAX_RETRY_AFTER_SEC: i64 = 365 * 24 * 3600;

#[async_trait]
pub trait BucketStore: Send + Sync {
    /// Atomically consume `cost` tokens from `key`'s bucket, refilling first.
    async fn try_consume(
        &self,
        key: &str,
        params: BucketParams,
        cost: f64,
        now_ms: i64,
    ) -> Decision;
}

#[derive(Debug, Default)]
pub struct InMemoryBucketStore {
    buckets: Mutex<HashMap<String, BucketState>>,
}

impl InMemoryBucketStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BucketStore for InMemoryBucketStore {
    async fn try_consume(
        &self,
        key: &str,
        params: BucketParams,
        cost: f64,
        now_ms: i64,
    ) -> Decision {
        let mut buckets = self.buckets.lock().expect("bucket store mutex poisoned");

        // Step 1: load prior state, or start fresh if absent / expired.
        let prior = buckets.get(key).copied().filter(|s| now_ms <= s.expires_at_ms);
        let (mut tokens, updated_at_ms) = match prior {
            Some(s) => (s.tokens, s.updated_at_ms),
            None => (params.initial_tokens, now_ms),
        };

        // Step 2: refill.
        let elapsed_sec = ((now_ms - updated_at_ms).max(0) as f64) / 1000.0;
        tokens = (tokens + elapsed_sec * params.refill_per_sec).min(params.capacity);

        let decision = if cost > params.capacity {
            // Step 3: this request can never be satisfied by this bucket.
            Decision {
                allowed: false,
                remaining: tokens.floor() as i64,
                retry_after_sec: Some(MAX_RETRY_AFTER_SEC),
                reset_at_ms: reset_at_ms(now_ms, tokens, params),
            }
        } else if tokens >= cost {
            // Step 4: allow, subtract cost.
            tokens -= cost;
            Decision {
                allowed: true,
                remaining: tokens.floor() as i64,
                retry_after_sec: None,
                reset_at_ms: reset_at_ms(now_ms, tokens, params),
            }
        } else {
            // Step 5: deny, compute retry-after.
            let retry_after_sec = if params.refill_per_sec <= 0.0 {
                MAX_RETRY_AFTER_SEC
            } else {
                (((cost - tokens) / params.refill_per_sec).ceil() as i64).clamp(1, MAX_RETRY_AFTER_SEC)
            };
            Decision {
                allowed: false,
                remaining: tokens.floor() as i64,
                retry_after_sec: Some(retry_after_sec),
                reset_at_ms: reset_at_ms(now_ms, tokens, params),
            }
        };

        // Step 7: persist (or evict if the new state is already expired).
        let expires_at_ms = now_ms + params.ttl_sec * 1000;
        if expires_at_ms <= now_ms {
            buckets.remove(key);
        } else {
            buckets.insert(key.to_string(), BucketState { tokens, updated_at_ms: now_ms, expires_at_ms });
        }

        decision
    }
}

/// Step 6: `reset_at_ms`, with the same one-year fallback as retry-after
/// when the bucket can never refill.
fn reset_at_ms(now_ms: i64, tokens: f64, params: BucketParams) -> i64 {
    if params.refill_per_sec <= 0.0 {
        return now_ms + MAX_RETRY_AFTER_SEC * 1000;
    }
    let deficit = (params.capacity - tokens).max(0.0);
    let seconds = (deficit / params.refill_per_sec).ceil() as i64;
    now_ms + seconds * 1000
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> BucketParams {
        BucketParams { capacity: 5.0, refill_per_sec: 1.0, ttl_sec: 3600, initial_tokens: 5.0 }
    }

    #[tokio::test]
    async fn allows_until_capacity_then_denies() {
        let store = InMemoryBucketStore::new();
        for i in 0..5 {
            let d = store.try_consume("k", params(), 1.0, 0).await;
            assert!(d.allowed, "request {i} should be allowed");
        }
        let d = store.try_consume("k", params(), 1.0, 0).await;
        assert!(!d.allowed);
        assert!(d.retry_after_sec.unwrap() >= 1);
    }

    #[tokio::test]
    async fn refills_over_time() {
        let store = InMemoryBucketStore::new();
        for _ in 0..5 {
            store.try_consume("k", params(), 1.0, 0).await;
        }
        // 3 seconds later, 3 tokens should have refilled.
        let d = store.try_consume("k", params(), 3.0, 3_000).await;
        assert!(d.allowed);
        assert_eq!(d.remaining, 0);
    }

    #[tokio::test]
    async fn cost_exceeding_capacity_is_a_permanent_deny() {
        let store = InMemoryBucketStore::new();
        let d = store.try_consume("k", params(), 10.0, 0).await;
        assert!(!d.allowed);
        assert_eq!(d.retry_after_sec, Some(MAX_RETRY_AFTER_SEC));
    }

    #[tokio::test]
    async fn expired_bucket_restarts_with_initial_tokens() {
        let store = InMemoryBucketStore::new();
        let short_ttl = BucketParams { ttl_sec: 1, ..params() };
        store.try_consume("k", short_ttl, 5.0, 0).await;
        // past the 1s ttl: state should have been evicted and restart fresh.
        let d = store.try_consume("k", short_ttl, 5.0, 5_000).await;
        assert!(d.allowed);
    }

    #[tokio::test]
    async fn monotonicity_bound_over_interval() {
        // At most C + floor(R*(t1-t0)) allowed decisions for cost-1 requests.
        let store = InMemoryBucketStore::new();
        let p = BucketParams { capacity: 3.0, refill_per_sec: 1.0, ttl_sec: 3600, initial_tokens: 3.0 };
        let mut allowed_count = 0;
        for now_ms in (0..10_000).step_by(100) {
            if store.try_consume("k", p, 1.0, now_ms).await.allowed {
                allowed_count += 1;
            }
        }
        let bound = 3 + (1.0 * 10.0) as i64;
        assert!(allowed_count <= bound, "{allowed_count} <= {bound}");
    }
}

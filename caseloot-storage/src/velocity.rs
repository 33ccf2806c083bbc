//! C3: sliding-window counters backing the velocity scorer (§4.2).
//!
//! Two primitives are exposed: a plain event counter over a trailing window
//! (for burst detection), and a distinct-value tracker with its own TTL
//! (for the "subject observed with >N distinct UAs" heuristic).

use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
};

use async_trait::async_trait;

#[async_trait]
pub trait VelocityStore: Send + Sync {
    /// Record one event for `key` at `now_ms` and return the number of
    /// events recorded for that key within the trailing `window_sec`.
    async fn record_and_count(&self, key: &str, window_sec: i64, now_ms: i64) -> u32;

    /// Record that `key` was observed paired with `value` (e.g. a subject id
    /// paired with a user-agent string) and return the number of distinct
    /// values seen for `key` within the trailing `ttl_sec`.
    async fn record_distinct(&self, key: &str, value: &str, ttl_sec: i64, now_ms: i64) -> usize;
}

#[derive(Debug, Default)]
pub struct InMemoryVelocityStore {
    counters: Mutex<HashMap<String, VecDeque<i64>>>,
    distinct: Mutex<HashMap<String, HashMap<String, i64>>>,
}

impl InMemoryVelocityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VelocityStore for InMemoryVelocityStore {
    async fn record_and_count(&self, key: &str, window_sec: i64, now_ms: i64) -> u32 {
        let mut counters = self.counters.lock().expect("velocity counter mutex poisoned");
        let window_ms = window_sec * 1000;
        let deque = counters.entry(key.to_string()).or_default();
        deque.push_back(now_ms);
        while let Some(&oldest) = deque.front() {
            if now_ms - oldest > window_ms {
                deque.pop_front();
            } else {
                break;
            }
        }
        deque.len() as u32
    }

    async fn record_distinct(&self, key: &str, value: &str, ttl_sec: i64, now_ms: i64) -> usize {
        let mut distinct = self.distinct.lock().expect("velocity distinct mutex poisoned");
        let ttl_ms = ttl_sec * 1000;
        let values = distinct.entry(key.to_string()).or_default();
        values.insert(value.to_string(), now_ms);
        values.retain(|_, &mut seen_at| now_ms - seen_at <= ttl_ms);
        values.len()
    }
}

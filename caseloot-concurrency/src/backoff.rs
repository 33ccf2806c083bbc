//! Jittered exponential backoff, shared by every retrying outbound call in
//! this workspace (the chat-platform client facade, refund retries, ...).
//!
//! Per the concurrency & resource model: base 200ms, factor 2, cap 5s,
//! max 3 attempts for outbound HTTP; the long-poll runner uses its own
//! wider bounds (initial 1s, cap 30s), passed in explicitly.

use std::time::Duration;

use rand::Rng;

/// Returns an iterator of [`Duration`]s suitable for `tokio::time::sleep`.
/// `initial` and `cap` bound the exponential growth; each duration is
/// jittered by up to +/-20% so that many concurrent retriers don't land on
/// the same wall-clock tick ("thundering herd").
pub fn jittered_backoff_iter(
    initial: Duration,
    cap: Duration,
    factor: u32,
) -> impl Iterator<Item = Duration> {
    (0u32..).map(move |index| {
        let scale = factor.saturating_pow(index);
        let wait = initial.saturating_mul(scale).min(cap);
        jitter(wait)
    })
}

fn jitter(base: Duration) -> Duration {
    let jitter_frac = rand::thread_rng().gen_range(0.8..=1.2);
    Duration::from_secs_f64(base.as_secs_f64() * jitter_frac)
}

/// The default outbound-retry backoff: base 200ms, factor 2, cap 5s.
pub fn default_outbound_backoff_iter() -> impl Iterator<Item = Duration> {
    jittered_backoff_iter(Duration::from_millis(200), Duration::from_secs(5), 2)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn never_exceeds_cap_plus_jitter() {
        let cap = Duration::from_secs(5);
        let mut iter = jittered_backoff_iter(Duration::from_millis(200), cap, 2);
        for _ in 0..50 {
            let d = iter.next().unwrap();
            assert!(d <= cap.mul_f64(1.21), "{d:?} exceeded jittered cap");
        }
    }

    #[test]
    fn grows_then_plateaus() {
        let mut iter = default_outbound_backoff_iter();
        let first = iter.next().unwrap();
        let last = iter.by_ref().take(20).last().unwrap();
        assert!(last >= first);
    }
}

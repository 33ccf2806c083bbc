//! C1: monotonic-ish wall time.
//!
//! Every component that needs "now" takes `&dyn Clock` rather than calling
//! `SystemTime::now()` directly, so tests can supply a fixed or
//! manually-advanced clock without sleeping.

use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{NaiveDate, Utc};

pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> i64;

    /// The current UTC calendar day, used to key the daily RNG seed commit.
    fn utc_day(&self) -> NaiveDate {
        Utc::now().date_naive()
    }
}

/// The real wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        let d = SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before epoch");
        d.as_millis() as i64
    }

    fn utc_day(&self) -> NaiveDate {
        Utc::now().date_naive()
    }
}

//! C1: short random request identifiers.
//!
//! Spec: `X-Request-Id` is 8-64 chars of `[A-Za-z0-9]`; generated as 12 chars
//! when the caller (or, for webhook updates, the chat platform) doesn't
//! supply one.

use rand::{distributions::Alphanumeric, Rng};

const GENERATED_LEN: usize = 12;
const MIN_LEN: usize = 8;
const MAX_LEN: usize = 64;

/// Generate a fresh 12-char alphanumeric request id.
pub fn generate_request_id() -> String {
    rand::thread_rng().sample_iter(&Alphanumeric).take(GENERATED_LEN).map(char::from).collect()
}

/// Validate a caller-supplied `X-Request-Id` header value.
pub fn is_valid_request_id(s: &str) -> bool {
    let len = s.len();
    (MIN_LEN..=MAX_LEN).contains(&len) && s.bytes().all(|b| b.is_ascii_alphanumeric())
}

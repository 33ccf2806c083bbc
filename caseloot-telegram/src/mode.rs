//! The webhook/long-poll mutual-exclusion guard (§4.5, §10 supplement):
//! exactly one ingestion runner may be active at a time. Starting the
//! long-poll runner requires the webhook deleted first; starting the
//! webhook requires the long-poll runner stopped first.

use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestMode {
    Webhook,
    LongPolling,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ModeError {
    #[error("the long-polling runner is active; stop it before enabling the webhook")]
    RunnerActive,
    #[error("the webhook is configured; delete it before starting the long-polling runner")]
    WebhookActive,
}

const NONE: u8 = 0;
const WEBHOOK: u8 = 1;
const LONG_POLLING: u8 = 2;

/// Tracks which ingress is currently live so admin operations and the
/// long-poll runner's startup can refuse to run both at once. A single
/// atomic, not a mutex: the only operations are "claim" and "release",
/// each a single compare-and-swap.
pub struct ModeGuard {
    active: AtomicU8,
}

impl Default for ModeGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl ModeGuard {
    pub fn new() -> Self {
        Self { active: AtomicU8::new(NONE) }
    }

    /// Claim the webhook as the active ingress. Fails if the long-polling
    /// runner currently holds it.
    pub fn claim_webhook(&self) -> Result<(), ModeError> {
        self.active
            .compare_exchange(NONE, WEBHOOK, Ordering::SeqCst, Ordering::SeqCst)
            .or_else(|current| if current == WEBHOOK { Ok(WEBHOOK) } else { Err(ModeError::RunnerActive) })
            .map(|_| ())
    }

    /// Claim the long-polling runner as the active ingress. Fails if the
    /// webhook is currently configured.
    pub fn claim_long_polling(&self) -> Result<(), ModeError> {
        self.active
            .compare_exchange(NONE, LONG_POLLING, Ordering::SeqCst, Ordering::SeqCst)
            .or_else(|current| if current == LONG_POLLING { Ok(LONG_POLLING) } else { Err(ModeError::WebhookActive) })
            .map(|_| ())
    }

    pub fn release(&self) {
        self.active.store(NONE, Ordering::SeqCst);
    }

    pub fn active_mode(&self) -> Option<IngestMode> {
        match self.active.load(Ordering::SeqCst) {
            WEBHOOK => Some(IngestMode::Webhook),
            LONG_POLLING => Some(IngestMode::LongPolling),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_and_long_polling_are_mutually_exclusive() {
        let guard = ModeGuard::new();
        guard.claim_webhook().unwrap();
        assert_eq!(guard.claim_long_polling(), Err(ModeError::WebhookActive));
        guard.release();
        guard.claim_long_polling().unwrap();
        assert_eq!(guard.claim_webhook(), Err(ModeError::RunnerActive));
    }

    #[test]
    fn re_claiming_the_same_mode_is_idempotent() {
        let guard = ModeGuard::new();
        guard.claim_webhook().unwrap();
        guard.claim_webhook().unwrap();
        assert_eq!(guard.active_mode(), Some(IngestMode::Webhook));
    }

    #[test]
    fn release_allows_the_other_mode_to_claim() {
        let guard = ModeGuard::new();
        guard.claim_webhook().unwrap();
        guard.release();
        assert_eq!(guard.active_mode(), None);
        guard.claim_long_polling().unwrap();
    }
}

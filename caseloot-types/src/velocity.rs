//! §3 / §4.2: velocity heuristic flags and the graded antifraud action they
//! map to.

use serde::{Deserialize, Serialize};

/// The event that triggered an antifraud evaluation. Determines whether a
/// `HARD_BLOCK` verdict is allowed to stand (§4.2, §4.8): only pre-capture
/// events (`Invoice`, `PreCheckout`) may deny.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Invoice,
    PreCheckout,
    Success,
    Webhook,
}

impl EventType {
    /// Whether a `HARD_BLOCK` verdict for this event type is applied as-is
    /// (pre-capture) or must be demoted to `SOFT_CAP` (post-capture, §4.2).
    pub fn is_pre_capture(self) -> bool {
        matches!(self, EventType::Invoice | EventType::PreCheckout)
    }
}

/// A heuristic signal raised during velocity evaluation, each carrying a
/// fixed score that's summed to decide the resulting [`AntifraudAction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VelocityFlag {
    IpShortBurst,
    IpLongBurst,
    SubjectShortBurst,
    SubjectUaMismatch,
    DistinctPaths,
    InvoiceShortBurst,
    PrecheckoutBurst,
    SuccessBurst,
}

impl VelocityFlag {
    /// The fixed score contributed by this flag. Configurable in principle
    /// (spec §9 open question), fixed here as the scorer's defaults.
    pub fn score(self) -> u32 {
        match self {
            VelocityFlag::IpShortBurst => 10,
            VelocityFlag::IpLongBurst => 5,
            VelocityFlag::SubjectShortBurst => 10,
            VelocityFlag::SubjectUaMismatch => 15,
            VelocityFlag::DistinctPaths => 8,
            VelocityFlag::InvoiceShortBurst => 20,
            VelocityFlag::PrecheckoutBurst => 20,
            VelocityFlag::SuccessBurst => 5,
        }
    }
}

/// The three graded antifraud verdicts (§3, §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AntifraudAction {
    LogOnly,
    SoftCap,
    HardBlock,
}

impl AntifraudAction {
    /// Map a summed flag score to an action given `soft_cap`/`hard_block`
    /// thresholds (§3).
    pub fn from_score(score: u32, soft_cap: u32, hard_block: u32) -> Self {
        if score >= hard_block {
            AntifraudAction::HardBlock
        } else if score >= soft_cap {
            AntifraudAction::SoftCap
        } else {
            AntifraudAction::LogOnly
        }
    }

    /// Demote `HARD_BLOCK` to `SOFT_CAP` for post-capture event types, per
    /// §4.2's "post-capture never blocks" rule.
    pub fn demoted_for(self, event_type: EventType) -> Self {
        if self == AntifraudAction::HardBlock && !event_type.is_pre_capture() {
            AntifraudAction::SoftCap
        } else {
            self
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AntifraudAction::LogOnly => "log_only",
            AntifraudAction::SoftCap => "soft_cap",
            AntifraudAction::HardBlock => "hard_block",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_pick_correct_action() {
        assert_eq!(AntifraudAction::from_score(0, 10, 20), AntifraudAction::LogOnly);
        assert_eq!(AntifraudAction::from_score(10, 10, 20), AntifraudAction::SoftCap);
        assert_eq!(AntifraudAction::from_score(20, 10, 20), AntifraudAction::HardBlock);
    }

    #[test]
    fn hard_block_demoted_post_capture() {
        let hard = AntifraudAction::HardBlock;
        assert_eq!(hard.demoted_for(EventType::Invoice), AntifraudAction::HardBlock);
        assert_eq!(hard.demoted_for(EventType::PreCheckout), AntifraudAction::HardBlock);
        assert_eq!(hard.demoted_for(EventType::Success), AntifraudAction::SoftCap);
        assert_eq!(hard.demoted_for(EventType::Webhook), AntifraudAction::SoftCap);
    }

    #[test]
    fn non_hard_block_is_unaffected_by_demotion() {
        assert_eq!(AntifraudAction::SoftCap.demoted_for(EventType::Webhook), AntifraudAction::SoftCap);
        assert_eq!(AntifraudAction::LogOnly.demoted_for(EventType::Success), AntifraudAction::LogOnly);
    }
}

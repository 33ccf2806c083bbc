//! C3: sliding-window heuristic scorer (§4.2).

use std::{collections::HashSet, sync::Arc};

use caseloot_storage::VelocityStore;
use caseloot_types::{AntifraudAction, EventType, VelocityFlag};

/// Window sizes and per-counter thresholds. All are configuration, not
/// constants (§9 open question): the exact scoring table is expected to be
/// tuned per deployment.
#[derive(Debug, Clone, Copy)]
pub struct VelocityConfig {
    pub short_window_sec: i64,
    pub long_window_sec: i64,
    pub ip_short_max: u32,
    pub ip_long_max: u32,
    pub subject_short_max: u32,
    pub distinct_paths_max: usize,
    pub ua_distinct_max: usize,
    pub ua_ttl_sec: i64,
    pub invoice_short_max: u32,
    pub precheckout_max: u32,
    pub success_max: u32,
    pub soft_cap: u32,
    pub hard_block: u32,
}

impl Default for VelocityConfig {
    fn default() -> Self {
        VelocityConfig {
            short_window_sec: 60,
            long_window_sec: 600,
            ip_short_max: 20,
            ip_long_max: 100,
            subject_short_max: 10,
            distinct_paths_max: 8,
            ua_distinct_max: 3,
            ua_ttl_sec: 3600,
            invoice_short_max: 1,
            precheckout_max: 5,
            success_max: 5,
            soft_cap: 10,
            hard_block: 20,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VelocityContext {
    pub ip: String,
    pub subject: Option<i64>,
    pub path: String,
    pub user_agent: Option<String>,
    pub event_type: EventType,
}

#[derive(Debug, Clone)]
pub struct VelocityVerdict {
    pub flags: HashSet<VelocityFlag>,
    pub action: AntifraudAction,
}

pub struct VelocityScorer {
    store: Arc<dyn VelocityStore>,
    config: VelocityConfig,
}

impl VelocityScorer {
    pub fn new(store: Arc<dyn VelocityStore>, config: VelocityConfig) -> Self {
        Self { store, config }
    }

    pub async fn evaluate(&self, ctx: &VelocityContext, now_ms: i64) -> VelocityVerdict {
        let c = &self.config;
        let mut flags = HashSet::new();

        let ip_short = self.store.record_and_count(&format!("ip_short:{}", ctx.ip), c.short_window_sec, now_ms).await;
        if ip_short > c.ip_short_max {
            flags.insert(VelocityFlag::IpShortBurst);
        }
        let ip_long = self.store.record_and_count(&format!("ip_long:{}", ctx.ip), c.long_window_sec, now_ms).await;
        if ip_long > c.ip_long_max {
            flags.insert(VelocityFlag::IpLongBurst);
        }

        let distinct_paths =
            self.store.record_distinct(&format!("ip_paths:{}", ctx.ip), &ctx.path, c.long_window_sec, now_ms).await;
        if distinct_paths > c.distinct_paths_max {
            flags.insert(VelocityFlag::DistinctPaths);
        }

        if let Some(subject) = ctx.subject {
            let subject_short = self
                .store
                .record_and_count(&format!("subject_short:{subject}"), c.short_window_sec, now_ms)
                .await;
            if subject_short > c.subject_short_max {
                flags.insert(VelocityFlag::SubjectShortBurst);
            }

            if let Some(ua) = &ctx.user_agent {
                let distinct_uas = self
                    .store
                    .record_distinct(&format!("subject_ua:{subject}"), ua, c.ua_ttl_sec, now_ms)
                    .await;
                if distinct_uas > c.ua_distinct_max {
                    flags.insert(VelocityFlag::SubjectUaMismatch);
                }
            }
        }

        match ctx.event_type {
            EventType::Invoice => {
                let key = ctx.subject.map(|s| format!("subject:{s}")).unwrap_or_else(|| format!("ip:{}", ctx.ip));
                let count =
                    self.store.record_and_count(&format!("invoice:{key}"), c.short_window_sec, now_ms).await;
                if count > c.invoice_short_max {
                    flags.insert(VelocityFlag::InvoiceShortBurst);
                }
            }
            EventType::PreCheckout => {
                let key = ctx.subject.map(|s| format!("subject:{s}")).unwrap_or_else(|| format!("ip:{}", ctx.ip));
                let count =
                    self.store.record_and_count(&format!("precheckout:{key}"), c.short_window_sec, now_ms).await;
                if count > c.precheckout_max {
                    flags.insert(VelocityFlag::PrecheckoutBurst);
                }
            }
            EventType::Success => {
                let key = ctx.subject.map(|s| format!("subject:{s}")).unwrap_or_else(|| format!("ip:{}", ctx.ip));
                let count =
                    self.store.record_and_count(&format!("success:{key}"), c.short_window_sec, now_ms).await;
                if count > c.success_max {
                    flags.insert(VelocityFlag::SuccessBurst);
                }
            }
            EventType::Webhook => {}
        }

        let score: u32 = flags.iter().map(|f| f.score()).sum();
        let action = AntifraudAction::from_score(score, c.soft_cap, c.hard_block).demoted_for(ctx.event_type);

        for flag in &flags {
            caseloot_metrics::af_flag(flag_name(*flag));
        }
        caseloot_metrics::af_decision(event_type_name(ctx.event_type), action.as_str());

        VelocityVerdict { flags, action }
    }
}

fn flag_name(flag: VelocityFlag) -> &'static str {
    match flag {
        VelocityFlag::IpShortBurst => "ip_short_burst",
        VelocityFlag::IpLongBurst => "ip_long_burst",
        VelocityFlag::SubjectShortBurst => "subject_short_burst",
        VelocityFlag::SubjectUaMismatch => "subject_ua_mismatch",
        VelocityFlag::DistinctPaths => "distinct_paths",
        VelocityFlag::InvoiceShortBurst => "invoice_short_burst",
        VelocityFlag::PrecheckoutBurst => "precheckout_burst",
        VelocityFlag::SuccessBurst => "success_burst",
    }
}

fn event_type_name(event_type: EventType) -> &'static str {
    match event_type {
        EventType::Invoice => "invoice",
        EventType::PreCheckout => "precheckout",
        EventType::Success => "success",
        EventType::Webhook => "webhook",
    }
}

#[cfg(test)]
mod tests {
    use caseloot_storage::InMemoryVelocityStore;

    use super::*;

    fn ctx(event_type: EventType) -> VelocityContext {
        VelocityContext {
            ip: "1.2.3.4".into(),
            subject: Some(42),
            path: "/telegram/webhook".into(),
            user_agent: Some("UA-A".into()),
            event_type,
        }
    }

    #[tokio::test]
    async fn second_invoice_from_same_ip_hits_hard_block() {
        let config = VelocityConfig { invoice_short_max: 1, hard_block: 20, soft_cap: 10, ..Default::default() };
        let scorer = VelocityScorer::new(Arc::new(InMemoryVelocityStore::new()), config);

        let first = scorer.evaluate(&ctx(EventType::Invoice), 0).await;
        assert_eq!(first.action, AntifraudAction::LogOnly);

        let second = scorer.evaluate(&ctx(EventType::Invoice), 1_000).await;
        assert!(second.flags.contains(&VelocityFlag::InvoiceShortBurst));
        assert_eq!(second.action, AntifraudAction::HardBlock);
    }

    #[tokio::test]
    async fn post_capture_never_returns_hard_block() {
        let config = VelocityConfig { success_max: 0, hard_block: 1, soft_cap: 1, ..Default::default() };
        let scorer = VelocityScorer::new(Arc::new(InMemoryVelocityStore::new()), config);

        let verdict = scorer.evaluate(&ctx(EventType::Success), 0).await;
        assert_ne!(verdict.action, AntifraudAction::HardBlock);

        let verdict = scorer.evaluate(&ctx(EventType::Webhook), 0).await;
        assert_ne!(verdict.action, AntifraudAction::HardBlock);
    }

    #[tokio::test]
    async fn ua_mismatch_flag_raised_past_threshold() {
        let config = VelocityConfig { ua_distinct_max: 1, ..Default::default() };
        let scorer = VelocityScorer::new(Arc::new(InMemoryVelocityStore::new()), config);

        let mut c = ctx(EventType::Webhook);
        c.user_agent = Some("UA-A".into());
        scorer.evaluate(&c, 0).await;
        c.user_agent = Some("UA-B".into());
        let verdict = scorer.evaluate(&c, 0).await;
        assert!(verdict.flags.contains(&VelocityFlag::SubjectUaMismatch));
    }
}

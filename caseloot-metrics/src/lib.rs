//! A process-wide metrics facade.
//!
//! This wraps the [`metrics`] crate's global `(name, sorted tags) -> meter`
//! registry: a meter is registered once per unique tag set and returned for
//! subsequent calls, so call sites never hand-roll tag strings or worry about
//! double-registering a counter. Every function below corresponds to exactly
//! one fixed metric name from the naming table; none of them accept a
//! caller-supplied `path`, `ip`, or `userId` tag, since those would blow up
//! cardinality in the exported series.
//!
//! Prometheus text exposition (the wire format for `/metrics`) is treated as
//! an external collaborator: [`install_recorder`] wires up
//! [`metrics_exporter_prometheus`]'s recorder and [`render`] asks it to
//! render the current snapshot, but this crate never hand-formats the
//! exposition text itself.

use std::time::Duration;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Installs the global recorder. Call this exactly once, at process start,
/// before any of the functions below are used.
pub fn install_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install the global metrics recorder")
}

/// Render the current metric snapshot as Prometheus text exposition format.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// --- C6 webhook receiver --- //

pub fn webhook_update_received() {
    metrics::counter!("tg_webhook_updates_total").increment(1);
}

pub fn webhook_rejected(reason: &'static str) {
    metrics::counter!("tg_webhook_rejected_total", "reason" => reason).increment(1);
}

pub fn webhook_body_too_large() {
    metrics::counter!("tg_webhook_body_too_large_total").increment(1);
}

pub fn webhook_enqueue_seconds(elapsed: Duration) {
    metrics::histogram!("tg_webhook_enqueue_seconds").record(elapsed.as_secs_f64());
}

// --- C5 update queue --- //

pub fn queue_size(size: usize) {
    metrics::gauge!("tg_queue_size").set(size as f64);
}

pub fn updates_enqueued() {
    metrics::counter!("tg_updates_enqueued_total").increment(1);
}

pub fn updates_duplicated() {
    metrics::counter!("tg_updates_duplicated_total").increment(1);
}

pub fn updates_dropped() {
    metrics::counter!("tg_updates_dropped_total").increment(1);
}

pub fn updates_processed() {
    metrics::counter!("tg_updates_processed_total").increment(1);
}

pub fn update_handle_seconds(elapsed: Duration) {
    metrics::histogram!("tg_update_handle_seconds").record(elapsed.as_secs_f64());
}

// --- C7 long-polling runner --- //

pub fn lp_retries() {
    metrics::counter!("tg_lp_retries_total").increment(1);
}

pub fn lp_batches_polled() {
    metrics::counter!("tg_lp_batches_total").increment(1);
}

// --- C11 admin surface --- //

pub fn admin_webhook_set() {
    metrics::counter!("tg_admin_webhook_set_total").increment(1);
}

pub fn admin_webhook_delete() {
    metrics::counter!("tg_admin_webhook_delete_total").increment(1);
}

// --- C2 rate limiter --- //

/// `kind` is one of `"ip"` or `"subject"`, matching spec tag `type=ip|subject`.
pub fn rl_allowed(kind: &'static str) {
    metrics::counter!("af_rl_allowed_total", "type" => kind).increment(1);
}

pub fn rl_blocked(kind: &'static str) {
    metrics::counter!("af_rl_blocked_total", "type" => kind).increment(1);
}

// --- C4 IP banlist --- //

pub fn ip_suspicious_mark() {
    metrics::counter!("af_ip_suspicious_mark_total").increment(1);
}

pub fn ip_ban() {
    metrics::counter!("af_ip_ban_total").increment(1);
}

pub fn ip_unban() {
    metrics::counter!("af_ip_unban_total").increment(1);
}

pub fn ip_forbidden() {
    metrics::counter!("af_ip_forbidden_total").increment(1);
}

// --- C3 antifraud scoring --- //

pub fn af_flag(flag: &'static str) {
    metrics::counter!("pay_af_flags_total", "flag" => flag).increment(1);
}

/// `event_type` is one of `invoice|precheckout|success|webhook`;
/// `action` is one of `log_only|soft_cap|hard_block`.
pub fn af_decision(event_type: &'static str, action: &'static str) {
    metrics::counter!("pay_af_decisions_total", "type" => event_type, "action" => action)
        .increment(1);
}

/// `event_type` is one of `invoice|precheckout` (blocks are pre-capture only).
pub fn af_block(event_type: &'static str) {
    metrics::counter!("pay_af_blocks_total", "type" => event_type).increment(1);
}

// --- C10 payment state machine --- //

pub fn pay_success() {
    metrics::counter!("pay_success_total").increment(1);
}

pub fn pay_success_idempotent() {
    metrics::counter!("pay_success_idempotent_total").increment(1);
}

pub fn pay_success_fail() {
    metrics::counter!("pay_success_fail_total").increment(1);
}

/// `kind` is one of `gift|premium|internal|fail`; each maps to its own
/// fixed metric name (`award_gift_total`, ...), not a tag, per the naming
/// table.
pub fn award(kind: &'static str) {
    let name = match kind {
        "gift" => "award_gift_total",
        "premium" => "award_premium_total",
        "internal" => "award_internal_total",
        _ => "award_fail_total",
    };
    metrics::counter!(name).increment(1);
}

pub fn refund() {
    metrics::counter!("refund_total").increment(1);
}

pub fn refund_fail() {
    metrics::counter!("refund_fail_total").increment(1);
}

// --- C9 RNG commit/reveal --- //

pub fn rng_commit() {
    metrics::counter!("rng_commit_total").increment(1);
}

pub fn rng_reveal() {
    metrics::counter!("rng_reveal_total").increment(1);
}

pub fn rng_draw() {
    metrics::counter!("rng_draw_total").increment(1);
}

pub fn rng_draw_idempotent() {
    metrics::counter!("rng_draw_idempotent_total").increment(1);
}

pub fn rng_draw_fail() {
    metrics::counter!("rng_draw_fail_total").increment(1);
}

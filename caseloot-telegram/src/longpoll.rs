//! C7: the long-polling runner (§4.5). An `{IDLE, POLLING, BACKOFF,
//! STOPPED}` loop that pulls batches via `getUpdates`, feeds each update
//! through the same scoring/enqueue tail the webhook receiver uses, and
//! only advances its offset once the whole batch is enqueued.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU8, Ordering},
        Arc,
    },
    time::Duration,
};

use caseloot_concurrency::backoff::jittered_backoff_iter;
use caseloot_types::Update;
use tracing::{info, warn};

use crate::{client::TelegramClient, webhook::WebhookIngest};

const POLL_TIMEOUT_SEC: u64 = 25;
const BACKOFF_INITIAL: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Idle,
    Polling,
    Backoff,
    Stopped,
}

impl RunnerState {
    fn from_tag(tag: u8) -> Self {
        match tag {
            1 => RunnerState::Polling,
            2 => RunnerState::Backoff,
            3 => RunnerState::Stopped,
            _ => RunnerState::Idle,
        }
    }

    fn tag(self) -> u8 {
        match self {
            RunnerState::Idle => 0,
            RunnerState::Polling => 1,
            RunnerState::Backoff => 2,
            RunnerState::Stopped => 3,
        }
    }
}

/// A cooperative stop flag; `run` checks it between polls and exits the
/// loop once observed, landing in [`RunnerState::Stopped`].
pub struct LongPollRunner {
    client: Arc<dyn TelegramClient>,
    ingest: Arc<WebhookIngest>,
    stop: Arc<AtomicBool>,
    state: AtomicU8,
}

impl LongPollRunner {
    pub fn new(client: Arc<dyn TelegramClient>, ingest: Arc<WebhookIngest>) -> Self {
        Self {
            client,
            ingest,
            stop: Arc::new(AtomicBool::new(false)),
            state: AtomicU8::new(RunnerState::Idle.tag()),
        }
    }

    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn state(&self) -> RunnerState {
        RunnerState::from_tag(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: RunnerState) {
        self.state.store(state.tag(), Ordering::SeqCst);
    }

    /// Runs until `stop_handle()` is set. Each iteration: poll, score and
    /// enqueue the batch, then advance `offset` — only after every update
    /// in the batch is enqueued, so a crash mid-batch re-delivers it on
    /// restart rather than silently skipping updates.
    pub async fn run(&self, clock_now_ms: impl Fn() -> i64) {
        let mut offset: i64 = 0;
        let mut backoff = jittered_backoff_iter(BACKOFF_INITIAL, BACKOFF_CAP, 2);

        loop {
            if self.stop.load(Ordering::SeqCst) {
                self.set_state(RunnerState::Stopped);
                info!("long-polling runner stopping");
                return;
            }

            self.set_state(RunnerState::Polling);
            match self.client.get_updates(offset, POLL_TIMEOUT_SEC).await {
                Ok(batch) => {
                    self.set_state(RunnerState::Idle);
                    backoff = jittered_backoff_iter(BACKOFF_INITIAL, BACKOFF_CAP, 2);
                    caseloot_metrics::lp_batches_polled();

                    if batch.is_empty() {
                        tokio::task::yield_now().await;
                        continue;
                    }

                    let mut last_update_id = offset.saturating_sub(1);
                    for raw in &batch {
                        let Some(update_id) = raw.get("update_id").and_then(serde_json::Value::as_i64) else {
                            continue;
                        };
                        let update = Update::from_raw(update_id, raw);
                        let now_ms = clock_now_ms();
                        // the long-poll source has no per-request IP; the
                        // scorer's IP-keyed counters fold onto one bucket
                        // for this ingress, which is the intended behavior
                        // since there's exactly one runner per bot process.
                        if let Err(err) = self.ingest.score_and_enqueue(update, "longpoll", now_ms).await {
                            warn!(?err, update_id, "long-poll update rejected by scoring");
                        }
                        last_update_id = last_update_id.max(update_id);
                    }
                    offset = last_update_id + 1;
                }
                Err(err) => {
                    self.set_state(RunnerState::Backoff);
                    caseloot_metrics::lp_retries();
                    let wait = backoff.next().expect("backoff iterator never ends");
                    warn!(?err, ?wait, "long-poll getUpdates failed, backing off");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}

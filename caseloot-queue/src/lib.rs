//! C5: bounded, deduplicating, drop-oldest, multi-worker update queue (§4.3).

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use caseloot_concurrency::CaseTask;
use caseloot_types::Update;
use tokio::sync::Notify;
use tracing::{debug, warn};

/// The dedup window: a repeated `update_id` is suppressed for this long
/// after first being seen (§3: "discarded after TTL (~26h)").
pub const DEDUP_TTL_MS: i64 = 26 * 3600 * 1000;

#[async_trait]
pub trait UpdateHandler: Send + Sync {
    async fn handle(&self, update: Update);
}

#[derive(Debug, thiserror::Error)]
pub enum CloseError {
    #[error("workers did not finish within the shutdown timeout")]
    Timeout,
}

struct Inner {
    items: Mutex<VecDeque<Update>>,
    dedup: Mutex<HashMap<i64, i64>>,
    notify: Notify,
    capacity: usize,
    closed: AtomicBool,
}

/// Bounded queue of capacity `Q`, drop-oldest on overflow, at-most-once
/// dispatch per `update_id` (enforced by the dedup set, not locking: a
/// duplicate is discarded before ever reaching the channel).
pub struct UpdateQueue {
    inner: Arc<Inner>,
}

impl UpdateQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                items: Mutex::new(VecDeque::with_capacity(capacity)),
                dedup: Mutex::new(HashMap::new()),
                notify: Notify::new(),
                capacity,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// `enqueue` step 1-3: dedup check/insert, then try a non-blocking push,
    /// evicting the oldest item on overflow.
    pub fn enqueue(&self, update: Update, now_ms: i64) {
        let mut dedup = self.inner.dedup.lock().expect("queue dedup mutex poisoned");
        dedup.retain(|_, &mut first_seen| now_ms - first_seen < DEDUP_TTL_MS);

        if dedup.contains_key(&update.update_id) {
            caseloot_metrics::updates_duplicated();
            return;
        }
        dedup.insert(update.update_id, now_ms);
        drop(dedup);

        if self.inner.closed.load(Ordering::Acquire) {
            caseloot_metrics::updates_dropped();
            return;
        }

        let mut items = self.inner.items.lock().expect("queue items mutex poisoned");
        if items.len() >= self.inner.capacity {
            items.pop_front();
            caseloot_metrics::updates_dropped();
        }
        items.push_back(update);
        caseloot_metrics::queue_size(items.len());
        drop(items);

        caseloot_metrics::updates_enqueued();
        self.inner.notify.notify_one();
    }

    async fn pop(&self) -> Option<Update> {
        loop {
            {
                let mut items = self.inner.items.lock().expect("queue items mutex poisoned");
                if let Some(update) = items.pop_front() {
                    caseloot_metrics::queue_size(items.len());
                    return Some(update);
                }
                if self.inner.closed.load(Ordering::Acquire) {
                    return None;
                }
            }
            self.inner.notify.notified().await;
        }
    }

    /// Spawn `workers` tasks, each pulling items in a loop (FIFO within that
    /// worker; no cross-worker ordering guarantee) and invoking `handler`.
    pub fn start(
        self: &Arc<Self>,
        handler: Arc<dyn UpdateHandler>,
        workers: usize,
    ) -> Vec<CaseTask<()>> {
        (0..workers)
            .map(|i| {
                let queue = Arc::clone(self);
                let handler = Arc::clone(&handler);
                CaseTask::spawn(format!("queue-worker-{i}"), async move {
                    while let Some(update) = queue.pop().await {
                        let started = Instant::now();
                        handler.handle(update).await;
                        caseloot_metrics::update_handle_seconds(started.elapsed());
                        caseloot_metrics::updates_processed();
                    }
                    debug!(worker = i, "queue worker exiting: queue closed and drained");
                })
            })
            .collect()
    }

    /// Stop accepting new work and wake every worker so it observes
    /// `closed` once the queue drains.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    /// `close()` plus joining the worker tasks within a bounded timeout.
    pub async fn close_and_join(
        &self,
        workers: Vec<CaseTask<()>>,
        timeout: Duration,
    ) -> Result<(), CloseError> {
        self.close();
        match tokio::time::timeout(timeout, futures::future::join_all(workers)).await {
            Ok(_) => Ok(()),
            Err(_) => {
                warn!("queue workers did not finish within the shutdown timeout, abandoning them");
                Err(CloseError::Timeout)
            }
        }
    }
}

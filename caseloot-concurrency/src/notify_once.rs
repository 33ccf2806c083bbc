use std::sync::Arc;

use tokio::sync::Semaphore;

/// Synchronization utility which sends a notification to all consumers
/// *once*, most commonly used for shutdown signals.
///
/// - Multi-producer and multi-consumer: clone to get another handle.
/// - Every clone observes a signal at-most-once. If the signal has already
///   been sent, new clones can still observe it once.
/// - Consumers can receive signals sent prior to "subscribing" (unlike
///   [`tokio::sync::broadcast`]).
/// - Sending the signal more than once (e.g. by accident) is safe.
///
/// The implementation (ab)uses the fact that calling [`acquire`] on a
/// [`Semaphore`] with 0 permits only returns once the semaphore has been
/// closed.
///
/// [`acquire`]: Semaphore::acquire
#[derive(Debug)]
pub struct NotifyOnce {
    inner: Arc<Semaphore>,
    have_recved: bool,
}

impl NotifyOnce {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self { inner: Arc::new(Semaphore::new(0)), have_recved: false }
    }

    /// Send the signal, waking every actor waiting on [`recv`](Self::recv).
    pub fn send(&self) {
        self.inner.close();
    }

    /// Wait for the signal. If this handle has already observed one,
    /// this future never resolves -- clone the handle before the first
    /// `recv` if you need to observe the signal more than once.
    pub async fn recv(&mut self) {
        if self.have_recved {
            std::future::pending().await
        } else {
            self.inner
                .acquire()
                .await
                .map_err(|_| ())
                .expect_err("semaphore should only close, never add permits");
            self.have_recved = true;
        }
    }

    /// Immediately returns whether a signal has been sent, without consuming
    /// it for a later [`recv`](Self::recv) call.
    #[must_use]
    pub fn try_recv(&self) -> bool {
        self.inner.is_closed()
    }
}

impl Clone for NotifyOnce {
    fn clone(&self) -> Self {
        // Every clone gets its own chance to observe the signal.
        Self { inner: self.inner.clone(), have_recved: false }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use tokio::time;

    use super::*;

    #[test]
    fn multiple_sends_dont_panic() {
        let shutdown = NotifyOnce::new();
        shutdown.send();
        shutdown.send();
    }

    #[tokio::test(start_paused = true)]
    async fn late_clone_still_observes_signal() {
        let mut a = NotifyOnce::new();
        let mut b = a.clone();
        time::sleep(Duration::from_secs(1)).await;
        a.send();
        time::timeout(Duration::from_nanos(1), b.recv()).await.expect("should resolve immediately");

        let mut c = b.clone();
        assert!(c.try_recv());
        time::timeout(Duration::from_nanos(1), c.recv()).await.expect("should resolve immediately");
    }

    #[tokio::test]
    async fn second_recv_on_same_handle_never_resolves() {
        let mut a = NotifyOnce::new();
        a.send();
        a.recv().await;
        assert!(time::timeout(Duration::from_millis(20), a.recv()).await.is_err());
    }
}

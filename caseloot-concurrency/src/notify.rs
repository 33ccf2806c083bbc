//! A single-slot notification channel.
//!
//! Wraps [`tokio::sync::mpsc`] with capacity 1 so that multiple sends which
//! race ahead of the receiver collapse into a single wakeup, preventing the
//! receiver from doing duplicate work (e.g. re-checking a snapshot that
//! hasn't changed again).

use tokio::sync::mpsc;

pub fn channel() -> (Sender, Receiver) {
    let (tx, rx) = mpsc::channel(1);
    (Sender(tx), Receiver(rx))
}

#[derive(Clone)]
pub struct Sender(mpsc::Sender<()>);

pub struct Receiver(mpsc::Receiver<()>);

impl Sender {
    /// Notify the receiver. Never blocks; drops the notification if one is
    /// already pending.
    pub fn send(&self) {
        let _ = self.0.try_send(());
    }
}

impl Receiver {
    /// Waits for a notification. If all [`Sender`]s were dropped, this
    /// future never resolves.
    pub async fn recv(&mut self) {
        match self.0.recv().await {
            Some(()) => (),
            None => std::future::pending().await,
        }
    }

    #[must_use]
    pub fn try_recv(&mut self) -> bool {
        self.0.try_recv().is_ok()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn multiple_sends_collapse_to_one_wakeup() {
        let (tx, mut rx) = channel();
        tx.send();
        tx.send();
        tx.send();
        rx.recv().await;
        assert!(!rx.try_recv());
    }
}

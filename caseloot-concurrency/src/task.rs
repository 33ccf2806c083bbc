use std::{
    borrow::Cow,
    fmt::{self, Display},
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use futures::{stream::FuturesUnordered, StreamExt};
use thiserror::Error;
use tokio::{
    sync::mpsc,
    task::{JoinError, JoinHandle},
};
use tracing::{debug, error, info, warn, Instrument};

use crate::NotifyOnce;

/// A thin wrapper around [`tokio::task::JoinHandle`] that:
///
/// 1. propagates panics instead of swallowing them, and
/// 2. adds `#[must_use]` so every spawned task is either joined or
///    explicitly [`detach`](CaseTask::detach)ed.
///
/// Named tasks make `try_join_static_tasks` diagnostics (and logs of
/// panicking/cancelled tasks) actually useful.
#[must_use]
pub struct CaseTask<T> {
    task: JoinHandle<T>,
    name: Cow<'static, str>,
}

impl<T> CaseTask<T> {
    /// Spawn a named task that inherits the current tracing span.
    #[allow(clippy::disallowed_methods)]
    pub fn spawn<F>(name: impl Into<Cow<'static, str>>, future: F) -> CaseTask<F::Output>
    where
        F: Future<Output = T> + Send + 'static,
        F::Output: Send + 'static,
    {
        let name = name.into();
        let span = tracing::Span::current();
        debug!(%name, "spawning task");
        CaseTask { task: tokio::spawn(future.instrument(span)), name }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    #[inline]
    pub fn abort(&self) {
        self.task.abort();
    }

    /// Drop the handle, letting the task keep running detached.
    #[inline]
    pub fn detach(self) {
        drop(self)
    }

    /// Instrument so the task logs its own name/outcome when it finishes.
    #[inline]
    pub fn logged(self) -> LoggedCaseTask<T> {
        LoggedCaseTask(self)
    }
}

impl<T> Future for CaseTask<T> {
    type Output = Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let result = match Pin::new(&mut self.task).poll(cx) {
            Poll::Ready(result) => result,
            Poll::Pending => return Poll::Pending,
        };
        match result {
            Ok(val) => Poll::Ready(Ok(val)),
            Err(join_err) => match join_err.try_into_panic() {
                Ok(panic_reason) => {
                    error!(name = %self.name(), "task panicked");
                    std::panic::resume_unwind(panic_reason)
                }
                Err(join_err) => Poll::Ready(Err(join_err)),
            },
        }
    }
}

/// Wraps a [`CaseTask`] so its result is logged (once) when it completes.
pub struct LoggedCaseTask<T>(CaseTask<T>);

impl<T> Future for LoggedCaseTask<T> {
    type Output = Cow<'static, str>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx).map(|result| {
            let display = TaskOutcome { name: self.0.name(), result: result.as_ref().map(|_| ()) };
            match &result {
                Ok(_) => info!("{display}"),
                Err(e) if e.is_cancelled() => warn!("{display}"),
                Err(_) => error!("{display}"),
            }
            self.0.name.clone()
        })
    }
}

struct TaskOutcome<'a> {
    name: &'a str,
    result: Result<(), &'a JoinError>,
}

impl Display for TaskOutcome<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match &self.result {
            Ok(()) => "finished",
            Err(e) if e.is_cancelled() => "cancelled",
            Err(_) => "panicked",
        };
        write!(f, "task '{}' {label}", self.name)
    }
}

/// Errors surfaced by [`try_join_static_tasks`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("static task finished prematurely: {name}")]
    PrematureFinish { name: Cow<'static, str> },
    #[error("some tasks failed to finish within the shutdown timeout: {hung_tasks:?}")]
    Hung { hung_tasks: Vec<String> },
}

/// Caseloot's standard task-group lifecycle: all "static" tasks (the HTTP
/// servers, queue workers, long-poll runner) are expected to run until
/// shutdown. If any one finishes early, that's treated as a bug and triggers
/// a coordinated shutdown of the whole process rather than a silent half-dead
/// server.
///
/// Ephemeral one-off tasks (e.g. an admin-triggered reload) can be registered
/// over `eph_tasks_rx` at any point and are joined the same way without
/// affecting the "static tasks must not finish early" invariant.
pub async fn try_join_static_tasks(
    static_tasks: Vec<CaseTask<()>>,
    mut eph_tasks_rx: mpsc::Receiver<CaseTask<()>>,
    mut shutdown: NotifyOnce,
    shutdown_timeout: Duration,
) -> Result<(), Error> {
    if static_tasks.is_empty() {
        shutdown.recv().await;
        return Ok(());
    }

    let mut static_tasks =
        static_tasks.into_iter().map(CaseTask::logged).collect::<FuturesUnordered<_>>();
    let mut ephemeral_tasks = FuturesUnordered::new();
    let mut result = Ok(());

    loop {
        tokio::select! {
            biased;
            () = shutdown.recv() => break,
            Some(task) = eph_tasks_rx.recv() => {
                debug!(name = %task.name(), "received ephemeral task");
                ephemeral_tasks.push(task.logged());
            }
            Some(_name) = ephemeral_tasks.next() => {}
            Some(name) = static_tasks.next() => {
                result = Err(Error::PrematureFinish { name });
                break shutdown.send();
            }
        }
    }

    let mut all_tasks = static_tasks.into_iter().chain(ephemeral_tasks).collect::<FuturesUnordered<_>>();
    let sleep = tokio::time::sleep(shutdown_timeout);
    tokio::pin!(sleep);

    while !all_tasks.is_empty() {
        tokio::select! {
            Some(_name) = all_tasks.next() => {}
            () = &mut sleep => {
                let hung_tasks = all_tasks.iter().map(|t| t.name().to_owned()).collect();
                return Err(Error::Hung { hung_tasks });
            }
        }
    }

    result
}

//! Serialized task queue.
//!
//! A single-consumer FIFO executor. Producers send a unit of work together
//! with a oneshot completion sender; one worker task drains the channel and
//! runs each unit to completion before starting the next. This turns any
//! number of concurrent callers into one effective writer for the embedded
//! store.
//!
//! # Guarantees
//!
//! - Exactly one unit runs at a time, in submission order.
//! - A caller's future resolves only after its unit was dequeued and finished.
//! - A panic inside a unit is reported to that unit's caller as
//!   [`QueueError::Panicked`]; the worker keeps going.
//! - Cancellation is cooperative: the token is checked before dispatch and
//!   raced against completion. A unit that already started is never
//!   interrupted; its caller just stops waiting for it.

use crate::error::QueueError;
use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

type Runner = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

struct QueuedTask {
    id: u64,
    runner: Runner,
}

/// Handle to the serialized task queue.
///
/// Cloning the handle shares the same worker. The worker stops once every
/// handle has been dropped and the backlog is drained.
#[derive(Clone)]
pub struct ProcessingQueue {
    sender: mpsc::UnboundedSender<QueuedTask>,
    next_id: Arc<AtomicU64>,
}

impl ProcessingQueue {
    /// Start a queue and its worker.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(Self::worker(receiver));
        Self {
            sender,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    async fn worker(mut receiver: mpsc::UnboundedReceiver<QueuedTask>) {
        tracing::debug!("processing queue worker started");

        while let Some(task) = receiver.recv().await {
            tracing::trace!(task_id = task.id, "running queued task");
            (task.runner)().await;
        }

        tracing::debug!("processing queue worker stopped");
    }

    /// Queue a blocking unit of work.
    ///
    /// The closure runs on Tokio's blocking pool so store I/O never stalls
    /// the async workers, while the queue still awaits it before moving on.
    pub async fn enqueue_blocking<T, F>(
        &self,
        work: F,
        cancel: Option<&CancellationToken>,
    ) -> Result<T, QueueError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.dispatch(move || tokio::task::spawn_blocking(work).boxed(), cancel)
            .await
    }

    /// Queue an async unit of work.
    pub async fn enqueue<T, Fut>(
        &self,
        work: Fut,
        cancel: Option<&CancellationToken>,
    ) -> Result<T, QueueError>
    where
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.dispatch(move || tokio::spawn(work).boxed(), cancel)
            .await
    }

    async fn dispatch<T, S>(
        &self,
        start: S,
        cancel: Option<&CancellationToken>,
    ) -> Result<T, QueueError>
    where
        S: FnOnce() -> BoxFuture<'static, Result<T, JoinError>> + Send + 'static,
        T: Send + 'static,
    {
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(QueueError::Cancelled);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (completion, completed) = oneshot::channel();

        let runner: Runner = Box::new(move || {
            async move {
                let outcome = start().await.map_err(|err| join_failure(id, err));
                // The caller may have stopped waiting; nothing to do then.
                let _ = completion.send(outcome);
            }
            .boxed()
        });

        self.sender
            .send(QueuedTask { id, runner })
            .map_err(|_| QueueError::Closed)?;

        let received = match cancel {
            Some(token) => tokio::select! {
                received = completed => received,
                _ = token.cancelled() => return Err(QueueError::Cancelled),
            },
            None => completed.await,
        };

        // A dropped completion sender means the worker went away mid-task.
        let outcome = received.map_err(|_| QueueError::Closed)?;

        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(QueueError::Cancelled);
        }

        outcome
    }
}

impl Default for ProcessingQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProcessingQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessingQueue")
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}

fn join_failure(id: u64, err: JoinError) -> QueueError {
    if !err.is_panic() {
        return QueueError::Closed;
    }

    let payload = err.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());

    tracing::error!(task_id = id, panic = %message, "queued task panicked");
    QueueError::Panicked(message)
}

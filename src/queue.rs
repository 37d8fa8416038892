//! Keyed FIFO task queue
//!
//! Serializes asynchronous work per string key: for any one key at most one
//! task is in flight and tasks run strictly in submission order, while
//! distinct keys run fully concurrently. This is the runtime's only
//! concurrency-control primitive; the durable store builds its per-record
//! ordering on top of it.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures::FutureExt;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// A queued unit of work. The oneshot sender that delivers the task's
/// outcome is captured inside the job itself.
type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

type QueueMap = HashMap<String, VecDeque<Job>>;

/// Error surfaced by a [`TaskHandle`] when the task's outcome never arrived.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// The task panicked, or its queue was dropped before the task ran.
    #[error("queued task aborted before completing")]
    Aborted,
}

/// Handle resolving with a submitted task's own outcome.
///
/// Dropping the handle does not cancel the task; the outcome is discarded.
#[derive(Debug)]
pub struct TaskHandle<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, QueueError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|outcome| outcome.map_err(|_| QueueError::Aborted))
    }
}

/// Keyed FIFO task queue.
///
/// Cloning is cheap and clones share the same queues.
#[derive(Clone, Default)]
pub struct TaskQueue {
    queues: Arc<Mutex<QueueMap>>,
}

impl TaskQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue `task` under `key` and return a handle that resolves with the
    /// task's own outcome, independent of other tasks' outcomes.
    ///
    /// Tasks submitted under the same key execute one at a time, in
    /// submission order. If the key had no pending tasks a worker is started
    /// for it; the worker drains the key's queue and then removes the entry,
    /// so an idle key holds no state.
    pub fn submit<F, T>(&self, key: impl Into<String>, task: F) -> TaskHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let key = key.into();
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::pin(async move {
            // The caller may have dropped its handle; the outcome is then
            // discarded.
            let _ = tx.send(task.await);
        });

        let start_worker = {
            let mut queues = self.lock();
            match queues.get_mut(&key) {
                Some(pending) => {
                    pending.push_back(job);
                    false
                }
                None => {
                    queues.insert(key.clone(), VecDeque::from([job]));
                    true
                }
            }
        };

        if start_worker {
            debug!("Starting queue worker for key {}", key);
            let queues = Arc::clone(&self.queues);
            tokio::spawn(Self::drain(queues, key));
        }

        TaskHandle { rx }
    }

    /// Queue depth for `key`: tasks waiting behind the one in flight.
    pub fn pending_count(&self, key: &str) -> usize {
        self.lock().get(key).map_or(0, VecDeque::len)
    }

    fn lock(&self) -> MutexGuard<'_, QueueMap> {
        // The lock is only held for map surgery, never across an await, so
        // a poisoned lock still guards a consistent map.
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Worker loop for one key. Exactly one runs per key at any time: it is
    /// spawned only when the key's entry is created, and it removes the
    /// entry before exiting.
    async fn drain(queues: Arc<Mutex<QueueMap>>, key: String) {
        loop {
            let job = {
                let mut queues = queues.lock().unwrap_or_else(PoisonError::into_inner);
                match queues.get_mut(&key).and_then(VecDeque::pop_front) {
                    Some(job) => job,
                    None => {
                        // Drained: the key must not linger as an empty entry.
                        queues.remove(&key);
                        return;
                    }
                }
            };

            // A panicking task takes down only its own handle, never the
            // worker or the tasks queued behind it.
            if let Err(panic) = std::panic::AssertUnwindSafe(job).catch_unwind().await {
                warn!(
                    "Task for queue key {} panicked: {}",
                    key,
                    panic_message(&panic)
                );
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

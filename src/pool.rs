//! Bounded task pool
//!
//! Runs any number of async tasks with at most `max_concurrency` of them in
//! flight. Submissions beyond the limit wait in a FIFO queue; a slot freed by
//! a finished task picks up the oldest queued task straight away. Running
//! count and queue live behind a single lock.
//!
//! Each task is spawned onto its own tokio task, so a panic only fails that
//! task's handle. The pool must be used from inside a tokio runtime.

use crate::error::TaskError;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{oneshot, Notify};

/// Hands a finished task's outcome to its waiting handle.
type Delivery = Box<dyn FnOnce() + Send + 'static>;

type Job = Pin<Box<dyn Future<Output = Delivery> + Send + 'static>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub max_concurrency: usize,
    pub running: usize,
    pub queued: usize,
    pub submitted: u64,
    pub completed: u64,
    pub peak_running: usize,
}

struct PoolState {
    running: usize,
    queue: VecDeque<Job>,
    submitted: u64,
    completed: u64,
    peak_running: usize,
}

struct Shared {
    max_concurrency: usize,
    state: Mutex<PoolState>,
    idle: Notify,
}

impl Shared {
    fn start(self: Arc<Self>, job: Job) {
        tokio::spawn(async move {
            let mut next = Some(job);
            while let Some(job) = next {
                let deliver = job.await;
                // Account for the slot first so a caller holding every outcome
                // never sees the pool busy.
                next = self.finish_one();
                deliver();
            }
        });
    }

    /// Hands the freed slot to the next queued job, or releases it.
    fn finish_one(&self) -> Option<Job> {
        let mut state = self.state.lock();
        state.completed += 1;

        if let Some(job) = state.queue.pop_front() {
            return Some(job);
        }

        state.running -= 1;
        if state.running == 0 {
            self.idle.notify_waiters();
        }
        None
    }
}

#[derive(Clone)]
pub struct ConcurrencyPool {
    shared: Arc<Shared>,
}

impl ConcurrencyPool {
    /// A limit of zero is treated as one.
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                max_concurrency: max_concurrency.max(1),
                state: Mutex::new(PoolState {
                    running: 0,
                    queue: VecDeque::new(),
                    submitted: 0,
                    completed: 0,
                    peak_running: 0,
                }),
                idle: Notify::new(),
            }),
        }
    }

    #[inline]
    pub fn max_concurrency(&self) -> usize {
        self.shared.max_concurrency
    }

    /// Queues `task` and returns immediately with a handle to its outcome.
    pub fn submit<F, T>(&self, task: F) -> TaskHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();

        let job: Job = Box::pin(async move {
            let outcome = match tokio::spawn(task).await {
                Ok(value) => Ok(value),
                Err(e) if e.is_panic() => Err(TaskError::Panicked(panic_message(e.into_panic()))),
                Err(_) => Err(TaskError::Dropped),
            };
            let deliver: Delivery = Box::new(move || {
                // The caller may have dropped its handle; the outcome is discarded then.
                let _ = tx.send(outcome);
            });
            deliver
        });

        let mut state = self.shared.state.lock();
        state.submitted += 1;

        if state.running < self.shared.max_concurrency {
            state.running += 1;
            state.peak_running = state.peak_running.max(state.running);
            drop(state);
            Arc::clone(&self.shared).start(job);
        } else {
            state.queue.push_back(job);
        }

        TaskHandle { rx }
    }

    pub fn is_idle(&self) -> bool {
        let state = self.shared.state.lock();
        state.running == 0 && state.queue.is_empty()
    }

    /// Resolves once nothing is running and nothing is queued.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.shared.state.lock();
        PoolStats {
            max_concurrency: self.shared.max_concurrency,
            running: state.running,
            queued: state.queue.len(),
            submitted: state.submitted,
            completed: state.completed,
            peak_running: state.peak_running,
        }
    }
}

impl fmt::Debug for ConcurrencyPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrencyPool")
            .field("stats", &self.stats())
            .finish()
    }
}

/// Eventual outcome of a submitted task
#[derive(Debug)]
pub struct TaskHandle<T> {
    rx: oneshot::Receiver<Result<T, TaskError>>,
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, TaskError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(TaskError::Dropped)),
            Poll::Pending => Poll::Pending,
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

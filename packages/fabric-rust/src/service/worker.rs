//! One-shot background worker with captured result.
//!
//! Provides a generic `Worker<T>` that runs a single fallible task on its own
//! tokio task and records the outcome. Completion is reported independently
//! from success: a task that fails or panics still ends `finished`, with no
//! result, and its error text is kept on a side channel.

use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::AbortHandle;
use tracing::{debug, trace};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// State written by the worker task and read by any observer. Each slot has
/// its own guard.
struct WorkerState<T> {
    result: Mutex<Option<T>>,
    error: Mutex<Option<String>>,
    running: AtomicBool,
    finished: AtomicBool,
    done: Notify,
}

impl<T> WorkerState<T> {
    fn new() -> Self {
        Self {
            result: Mutex::new(None),
            error: Mutex::new(None),
            running: AtomicBool::new(true),
            finished: AtomicBool::new(false),
            done: Notify::new(),
        }
    }

    fn complete(&self) {
        self.running.store(false, Ordering::Release);
        self.finished.store(true, Ordering::Release);
        self.done.notify_waiters();
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Handle to a single background task and its captured result.
///
/// The target runs inside a nested tokio task so that a panic is caught at
/// the join boundary and turned into "finished, no result" rather than
/// leaving the worker unfinished forever.
pub struct Worker<T> {
    name: String,
    state: Arc<WorkerState<T>>,
    target: AbortHandle,
}

impl<T: Send + 'static> Worker<T> {
    /// Starts `target(args)` on a new task.
    ///
    /// `Ok(value)` is stored as the result. `Err(e)` and panics leave the
    /// result empty and record the error text, readable via [`Worker::error`].
    pub fn start<F, A, Fut, E>(name: impl Into<String>, target: F, args: A) -> Self
    where
        F: FnOnce(A) -> Fut + Send + 'static,
        A: Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let name = name.into();
        let state = Arc::new(WorkerState::new());
        let task_state = Arc::clone(&state);
        let task_name = name.clone();

        let inner = tokio::spawn(async move { target(args).await });
        let target_handle = inner.abort_handle();

        tokio::spawn(async move {
            trace!(worker = %task_name, "worker started");
            let outcome = inner.await;

            match outcome {
                Ok(Ok(value)) => {
                    *task_state.result.lock() = Some(value);
                }
                Ok(Err(err)) => {
                    let text = err.to_string();
                    debug!(worker = %task_name, error = %text, "worker task failed");
                    *task_state.error.lock() = Some(text);
                }
                Err(join_err) => {
                    let text = join_err.to_string();
                    debug!(worker = %task_name, error = %text, "worker task aborted");
                    *task_state.error.lock() = Some(text);
                }
            }

            task_state.complete();
            trace!(worker = %task_name, "worker finished");
        });

        Self {
            name,
            state,
            target: target_handle,
        }
    }
}

impl<T> Worker<T> {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the task has completed, successfully or not.
    #[must_use]
    pub fn finished(&self) -> bool {
        self.state.finished.load(Ordering::Acquire)
    }

    /// Whether the task is still executing.
    #[must_use]
    pub fn running(&self) -> bool {
        self.state.running.load(Ordering::Acquire)
    }

    /// Takes the captured result, leaving `None` behind.
    pub fn take_result(&self) -> Option<T> {
        self.state.result.lock().take()
    }

    /// Error text of a failed or panicked task. `None` while running or after
    /// success.
    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.state.error.lock().clone()
    }

    /// Waits until the task has finished.
    pub async fn join(&self) {
        loop {
            let notified = self.state.done.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.finished() {
                return;
            }
            notified.await;
        }
    }

    /// Waits up to `timeout` for the task to finish. Returns `finished()`.
    pub async fn wait(&self, timeout: Duration) -> bool {
        let _ = tokio::time::timeout(timeout, self.join()).await;
        self.finished()
    }

    /// Cancels the target at its next suspension point. The worker then
    /// finishes without a result, like any other failure. No-op once finished.
    pub fn abort(&self) {
        self.target.abort();
    }
}

impl<T: Clone> Worker<T> {
    /// Returns a copy of the captured result, or `None` if the task has not
    /// finished or did not succeed.
    #[must_use]
    pub fn result(&self) -> Option<T> {
        self.state.result.lock().clone()
    }
}

impl<T> std::fmt::Debug for Worker<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.name)
            .field("running", &self.running())
            .field("finished", &self.finished())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

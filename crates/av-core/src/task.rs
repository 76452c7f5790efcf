//! Progress-reporting asynchronous tasks.
//!
//! A [`Task`] is a cloneable handle to a single asynchronous operation. It
//! exposes a lifecycle state, a progress value in `[0, 1]` and, once finished,
//! either a result or an error. Observers are notified through a watch
//! channel, so awaiting a task never spins.
//!
//! Tasks are produced in one of three ways:
//!
//! - [`Task::spawn`] runs an async driving routine that receives a
//!   [`TaskContext`] to report progress and await subtasks,
//! - [`Task::spawn_blocking`] runs blocking work (file I/O, archive
//!   decompression) on the worker pool and only hands back the outcome,
//! - [`Task::new`] yields a manually driven task completed by its owner.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::composite::TaskContext;
use crate::error::Error;
use crate::Result;

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    /// Created, work not started yet.
    Pending,
    /// Work is in progress.
    Running,
    /// Finished with a result.
    Done,
    /// Finished with an error.
    Error,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

/// Point-in-time view of a task, as delivered to watchers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaskSnapshot {
    pub state: TaskState,
    pub progress: f32,
}

impl TaskSnapshot {
    fn pending() -> Self {
        Self {
            state: TaskState::Pending,
            progress: 0.0,
        }
    }
}

/// Type-erased view of a task, used to walk and await subtasks of mixed
/// result types.
pub trait TaskNode: Send + Sync {
    fn label(&self) -> String;
    fn snapshot(&self) -> TaskSnapshot;
    fn error(&self) -> Option<Error>;
    /// Active child awaited by this task's routine, if it is still alive.
    fn current_subtask(&self) -> Option<Arc<dyn TaskNode>>;
    fn subscribe(&self) -> watch::Receiver<TaskSnapshot>;
    fn cancel(&self);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Result-independent part of a task, shared with its driving routine.
pub(crate) struct TaskCore {
    label: Mutex<String>,
    snapshot: watch::Sender<TaskSnapshot>,
    current: Mutex<Option<Weak<dyn TaskNode>>>,
    cancel: CancellationToken,
}

impl TaskCore {
    fn new(label: String) -> Self {
        let (snapshot, _) = watch::channel(TaskSnapshot::pending());
        Self {
            label: Mutex::new(label),
            snapshot,
            current: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    pub(crate) fn label(&self) -> String {
        lock(&self.label).clone()
    }

    pub(crate) fn set_label(&self, label: String) {
        *lock(&self.label) = label;
        // Wake watchers so the new label is displayed.
        self.snapshot.send_modify(|_| {});
    }

    pub(crate) fn snapshot(&self) -> TaskSnapshot {
        *self.snapshot.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<TaskSnapshot> {
        self.snapshot.subscribe()
    }

    /// Raises progress. Lower values, NaN and updates after the terminal
    /// transition are ignored.
    pub(crate) fn set_progress(&self, progress: f32) -> bool {
        if progress.is_nan() {
            return false;
        }
        let progress = progress.clamp(0.0, 1.0);
        self.snapshot.send_if_modified(|s| {
            if s.state.is_terminal() {
                return false;
            }
            let mut modified = false;
            if s.state == TaskState::Pending {
                s.state = TaskState::Running;
                modified = true;
            }
            if progress > s.progress {
                s.progress = progress;
                modified = true;
            }
            modified
        })
    }

    pub(crate) fn mark_running(&self) {
        self.snapshot.send_if_modified(|s| {
            if s.state == TaskState::Pending {
                s.state = TaskState::Running;
                true
            } else {
                false
            }
        });
    }

    fn mark_terminal(&self, failed: bool) {
        self.snapshot.send_modify(|s| {
            if failed {
                s.state = TaskState::Error;
            } else {
                s.state = TaskState::Done;
                s.progress = 1.0;
            }
        });
    }

    pub(crate) fn set_current(&self, child: Weak<dyn TaskNode>) {
        *lock(&self.current) = Some(child);
    }

    pub(crate) fn current(&self) -> Option<Arc<dyn TaskNode>> {
        lock(&self.current).as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

struct TaskInner<T> {
    core: Arc<TaskCore>,
    outcome: OnceLock<Result<T>>,
}

impl<T: Clone + Send + Sync + 'static> TaskNode for TaskInner<T> {
    fn label(&self) -> String {
        self.core.label()
    }

    fn snapshot(&self) -> TaskSnapshot {
        self.core.snapshot()
    }

    fn error(&self) -> Option<Error> {
        self.outcome.get().and_then(|o| o.as_ref().err().cloned())
    }

    fn current_subtask(&self) -> Option<Arc<dyn TaskNode>> {
        self.core.current()
    }

    fn subscribe(&self) -> watch::Receiver<TaskSnapshot> {
        self.core.subscribe()
    }

    fn cancel(&self) {
        self.core.cancel.cancel();
    }
}

/// Handle to an asynchronous operation producing a `T`.
///
/// Clones share the same underlying operation. The operation finishes at most
/// once; afterwards its outcome never changes.
pub struct Task<T> {
    inner: Arc<TaskInner<T>>,
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Task<T> {
    /// Creates a pending task finished by whoever holds it.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TaskInner {
                core: Arc::new(TaskCore::new(label.into())),
                outcome: OnceLock::new(),
            }),
        }
    }

    /// Creates a task that is already done.
    pub fn completed(label: impl Into<String>, value: T) -> Self {
        let task = Self::new(label);
        let _ = task.finish(Ok(value));
        task
    }

    /// Creates a task that already failed.
    pub fn failed(label: impl Into<String>, error: Error) -> Self {
        let task = Self::new(label);
        let _ = task.finish(Err(error));
        task
    }

    /// Starts `routine` on the tokio runtime and returns its handle.
    ///
    /// The routine is called synchronously to build its future, which then
    /// runs on the runtime. Its `Ok` value completes the task and its error
    /// fails it, so `?` on an awaited subtask propagates the first failure.
    pub fn spawn<F, Fut>(label: impl Into<String>, routine: F) -> Self
    where
        F: FnOnce(TaskContext) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let task = Self::new(label);
        let future = routine(TaskContext::new(Arc::clone(&task.inner.core)));

        let handle = task.clone();
        tokio::spawn(async move {
            handle.inner.core.mark_running();
            let outcome = match AssertUnwindSafe(future).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!(task = %handle.label(), panic = %message, "Task routine panicked");
                    Err(Error::task(format!("task routine panicked: {}", message)))
                }
            };
            if let Err(e) = &outcome {
                debug!(task = %handle.label(), error = %e, "Task failed");
            }
            let _ = handle.finish(outcome);
        });
        task
    }

    /// Runs blocking `work` on the worker pool.
    ///
    /// The only state crossing the thread boundary is the final outcome.
    pub fn spawn_blocking<F>(label: impl Into<String>, work: F) -> Self
    where
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let task = Self::new(label);
        let handle = task.clone();
        tokio::spawn(async move {
            handle.inner.core.mark_running();
            let outcome = match tokio::task::spawn_blocking(work).await {
                Ok(outcome) => outcome,
                Err(e) => Err(Error::task(format!("worker thread failed: {}", e))),
            };
            let _ = handle.finish(outcome);
        });
        task
    }

    pub fn label(&self) -> String {
        self.inner.core.label()
    }

    pub fn state(&self) -> TaskState {
        self.inner.core.snapshot().state
    }

    pub fn progress(&self) -> f32 {
        self.inner.core.snapshot().progress
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        self.inner.core.snapshot()
    }

    /// True once the task reached `Done` or `Error`.
    pub fn is_done(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn is_error(&self) -> bool {
        self.state() == TaskState::Error
    }

    /// The result, available only in the `Done` state.
    pub fn result(&self) -> Option<T> {
        self.inner.outcome.get().and_then(|o| o.as_ref().ok().cloned())
    }

    /// The error, available only in the `Error` state.
    pub fn error(&self) -> Option<Error> {
        self.inner.outcome.get().and_then(|o| o.as_ref().err().cloned())
    }

    pub fn outcome(&self) -> Option<Result<T>> {
        self.inner.outcome.get().cloned()
    }

    /// Raises the progress of a manually driven task.
    pub fn set_progress(&self, progress: f32) -> bool {
        self.inner.core.set_progress(progress)
    }

    /// Finishes the task with `value` and sets progress to 1.
    ///
    /// Returns [`Error::Misuse`] and leaves the task untouched when it already
    /// finished.
    pub fn complete(&self, value: T) -> Result<()> {
        self.finish(Ok(value))
    }

    /// Fails the task with `error`.
    ///
    /// Returns [`Error::Misuse`] and leaves the task untouched when it already
    /// finished.
    pub fn set_error(&self, error: Error) -> Result<()> {
        self.finish(Err(error))
    }

    /// Asks the driving routine to stop at its next yield point.
    ///
    /// Side effects already performed are not rolled back.
    pub fn cancel(&self) {
        self.inner.core.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.core.cancel.is_cancelled()
    }

    pub fn subscribe(&self) -> watch::Receiver<TaskSnapshot> {
        self.inner.core.subscribe()
    }

    pub fn current_subtask(&self) -> Option<Arc<dyn TaskNode>> {
        self.inner.core.current()
    }

    /// Type-erased handle for progress display and [`TaskContext::await_subtasks`].
    pub fn node(&self) -> Arc<dyn TaskNode> {
        self.inner.clone()
    }

    pub(crate) fn downgrade_node(&self) -> Weak<dyn TaskNode> {
        let node: Arc<dyn TaskNode> = self.inner.clone();
        Arc::downgrade(&node)
    }

    /// Both handles refer to the same operation.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Waits until the task finishes and returns its outcome.
    pub async fn wait(&self) -> Result<T> {
        let mut rx = self.subscribe();
        let finished = rx.wait_for(|s| s.state.is_terminal()).await.is_ok();
        if !finished {
            return Err(Error::task(format!(
                "task '{}' was dropped before finishing",
                self.label()
            )));
        }
        self.outcome().unwrap_or_else(|| {
            Err(Error::task(format!("task '{}' finished without outcome", self.label())))
        })
    }

    fn finish(&self, outcome: Result<T>) -> Result<()> {
        let failed = outcome.is_err();
        if self.inner.outcome.set(outcome).is_err() {
            warn!(task = %self.label(), "Ignoring second completion of a finished task");
            return Err(Error::misuse(format!(
                "task '{}' is already finished",
                self.label()
            )));
        }
        self.inner.core.mark_terminal(failed);
        Ok(())
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = *self.inner.core.snapshot.borrow();
        f.debug_struct("Task")
            .field("label", &self.inner.core.label())
            .field("state", &snapshot.state)
            .field("progress", &snapshot.progress)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_complete_sets_result_and_full_progress() {
        let task = Task::new("manual");
        assert_eq!(task.state(), TaskState::Pending);
        assert!(!task.is_done());

        task.set_progress(0.3);
        assert_eq!(task.state(), TaskState::Running);
        task.complete(42).unwrap();

        assert_eq!(task.state(), TaskState::Done);
        assert_eq!(task.progress(), 1.0);
        assert_eq!(task.result(), Some(42));
        assert_eq!(task.error(), None);
        assert_eq!(task.wait().await, Ok(42));
    }

    #[tokio::test]
    async fn test_single_terminal_transition() {
        let task: Task<u32> = Task::new("once");
        task.set_error(Error::task("first")).unwrap();

        assert!(matches!(task.complete(1), Err(Error::Misuse { .. })));
        assert!(matches!(task.set_error(Error::task("second")), Err(Error::Misuse { .. })));

        assert_eq!(task.state(), TaskState::Error);
        assert_eq!(task.error(), Some(Error::task("first")));
        assert_eq!(task.result(), None);
    }

    #[tokio::test]
    async fn test_progress_never_decreases() {
        let task: Task<()> = Task::new("monotonic");
        let mut rx = task.subscribe();

        let mut observed = Vec::new();
        for value in [0.1, 0.4, 0.2, 0.4, 0.9, f32::NAN, 0.5, 7.0] {
            task.set_progress(value);
            observed.push(rx.borrow_and_update().progress);
        }

        assert!(observed.windows(2).all(|w| w[0] <= w[1]), "{:?}", observed);
        assert_eq!(task.progress(), 1.0);
        assert!(!task.is_done());
    }

    #[tokio::test]
    async fn test_progress_ignored_after_terminal() {
        let task: Task<()> = Task::new("failed");
        task.set_progress(0.5);
        task.set_error(Error::task("boom")).unwrap();

        assert!(!task.set_progress(0.9));
        assert_eq!(task.progress(), 0.5);
    }

    #[tokio::test]
    async fn test_spawned_routine_outcome_becomes_task_outcome() {
        let ok = Task::spawn("ok", |ctx| async move {
            ctx.set_progress(0.5);
            Ok("value".to_string())
        });
        let failed: Task<String> =
            Task::spawn("failed", |_ctx| async move { Err(Error::task("nope")) });

        assert_eq!(ok.wait().await, Ok("value".to_string()));
        assert_eq!(failed.wait().await, Err(Error::task("nope")));
        assert!(failed.is_error());
    }

    #[tokio::test]
    async fn test_spawn_blocking_hands_back_result() {
        let task = Task::spawn_blocking("blocking", || {
            std::thread::sleep(Duration::from_millis(5));
            Ok(std::thread::current().name().map(str::to_owned))
        });

        assert!(task.wait().await.is_ok());
        assert_eq!(task.progress(), 1.0);
    }

    #[tokio::test]
    async fn test_panicking_routine_fails_task() {
        let task: Task<u32> = Task::spawn("panicking", |_ctx| async move {
            panic!("observer exploded")
        });

        let outcome = tokio::time::timeout(Duration::from_secs(5), task.wait())
            .await
            .expect("panicking task never finished");

        assert_eq!(task.state(), TaskState::Error);
        match outcome {
            Err(Error::Task { message }) => assert!(message.contains("observer exploded"), "{}", message),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancellation_is_cooperative() {
        let task: Task<u32> = Task::spawn("cancellable", |ctx| async move {
            loop {
                ctx.checkpoint()?;
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        });

        task.cancel();
        assert_eq!(task.wait().await, Err(Error::Cancelled));
        assert!(task.is_cancelled());
    }

    #[tokio::test]
    async fn test_prebuilt_tasks_are_terminal() {
        let done = Task::completed("done", 1u8);
        let failed: Task<u8> = Task::failed("failed", Error::task("x"));

        assert!(done.is_done() && !done.is_error());
        assert!(failed.is_done() && failed.is_error());
        assert!(done.ptr_eq(&done.clone()));
    }
}

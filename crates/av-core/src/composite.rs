//! Subtask composition for task driving routines.
//!
//! A routine started with [`Task::spawn`] receives a [`TaskContext`]. Each
//! awaited child is assigned a cumulative target in `(0, 1]`; while the child
//! runs the parent shows `previous + child.progress * (target - previous)`.

use std::sync::Arc;
use std::time::Duration;

use futures::future::select_all;
use tracing::{debug, warn};

use crate::error::Error;
use crate::task::{Task, TaskCore, TaskNode, TaskSnapshot};
use crate::Result;

/// Cumulative progress already credited to finished subtasks.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct ProgressLedger {
    completed: f32,
}

impl ProgressLedger {
    /// Targets below the completed share are raised to it, so such a child
    /// occupies no range.
    pub(crate) fn admit(&self, target: f32) -> f32 {
        if target.is_nan() {
            return self.completed;
        }
        target.clamp(self.completed, 1.0)
    }

    pub(crate) fn project(&self, target: f32, child_progress: f32) -> f32 {
        let child_progress = if child_progress.is_nan() {
            0.0
        } else {
            child_progress.clamp(0.0, 1.0)
        };
        self.completed + child_progress * (target - self.completed)
    }

    pub(crate) fn advance(&mut self, target: f32) {
        if target > self.completed {
            self.completed = target;
        }
    }

    pub(crate) fn completed(&self) -> f32 {
        self.completed
    }
}

/// Handle given to a task's driving routine.
pub struct TaskContext {
    core: Arc<TaskCore>,
    ledger: ProgressLedger,
}

impl TaskContext {
    pub(crate) fn new(core: Arc<TaskCore>) -> Self {
        Self {
            core,
            ledger: ProgressLedger::default(),
        }
    }

    pub fn label(&self) -> String {
        self.core.label()
    }

    /// Changes the label shown in progress trails.
    pub fn set_label(&self, label: impl Into<String>) {
        self.core.set_label(label.into());
    }

    /// Reports own progress. Values below the current progress are ignored.
    pub fn set_progress(&self, progress: f32) {
        self.core.set_progress(progress);
    }

    /// Progress credited to finished subtasks so far.
    pub fn completed_share(&self) -> f32 {
        self.ledger.completed()
    }

    pub fn is_cancelled(&self) -> bool {
        self.core.cancellation().is_cancelled()
    }

    /// Resolves once the owning task is cancelled.
    pub async fn cancelled(&self) {
        self.core.cancellation().cancelled().await
    }

    /// Yield point: fails with [`Error::Cancelled`] once cancellation was
    /// requested.
    pub fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    /// Sleeps for `duration` unless the task is cancelled first.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.core.cancellation().cancelled() => Err(Error::Cancelled),
        }
    }

    fn ensure_running(&self) -> Result<()> {
        if self.core.snapshot().state.is_terminal() {
            return Err(Error::misuse(format!(
                "task '{}' awaited a subtask after it finished",
                self.core.label()
            )));
        }
        Ok(())
    }

    /// Awaits `child` and assigns it the progress range ending at `target`.
    ///
    /// On success the ledger advances to `target` and the child's result is
    /// returned. On failure the child's error is returned unchanged.
    pub async fn await_subtask<U>(&mut self, child: &Task<U>, target: f32) -> Result<U>
    where
        U: Clone + Send + Sync + 'static,
    {
        self.ensure_running()?;
        self.checkpoint()?;

        let target = self.ledger.admit(target);
        self.core.set_current(child.downgrade_node());

        let mut rx = child.subscribe();
        loop {
            let snapshot = *rx.borrow_and_update();
            self.core
                .set_progress(self.ledger.project(target, snapshot.progress));
            if snapshot.state.is_terminal() {
                break;
            }
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = self.core.cancellation().cancelled() => {
                    debug!(task = %self.core.label(), subtask = %child.label(), "Cancelling subtask");
                    child.cancel();
                    return Err(Error::Cancelled);
                }
            }
        }

        match child.outcome() {
            Some(Ok(value)) => {
                self.ledger.advance(target);
                self.core.set_progress(target);
                Ok(value)
            }
            Some(Err(e)) => Err(e),
            None => Err(Error::task(format!(
                "subtask '{}' ended without outcome",
                child.label()
            ))),
        }
    }

    /// Awaits all `children` concurrently as one step ending at `target`.
    ///
    /// Progress follows the average of the children. After all of them
    /// finished, the first failed child in list order decides the error;
    /// errors of later siblings are logged.
    pub async fn await_subtasks(
        &mut self,
        target: f32,
        children: &[Arc<dyn TaskNode>],
    ) -> Result<()> {
        self.ensure_running()?;
        self.checkpoint()?;

        let target = self.ledger.admit(target);
        let mut receivers: Vec<_> = children.iter().map(|c| c.subscribe()).collect();

        loop {
            let snapshots: Vec<TaskSnapshot> = receivers
                .iter_mut()
                .map(|rx| *rx.borrow_and_update())
                .collect();

            if let Some(active) = children
                .iter()
                .zip(&snapshots)
                .find(|(_, s)| !s.state.is_terminal())
                .map(|(c, _)| c)
            {
                self.core.set_current(Arc::downgrade(active));
            }

            let average = if snapshots.is_empty() {
                1.0
            } else {
                snapshots.iter().map(|s| s.progress).sum::<f32>() / snapshots.len() as f32
            };
            self.core.set_progress(self.ledger.project(target, average));

            let pending: Vec<_> = receivers
                .iter_mut()
                .zip(&snapshots)
                .filter(|(_, s)| !s.state.is_terminal())
                .map(|(rx, _)| Box::pin(rx.changed()))
                .collect();
            if pending.is_empty() {
                break;
            }

            tokio::select! {
                (changed, _, _) = select_all(pending) => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = self.core.cancellation().cancelled() => {
                    for child in children {
                        child.cancel();
                    }
                    return Err(Error::Cancelled);
                }
            }
        }

        let mut first_error = None;
        for child in children {
            if let Some(e) = child.error() {
                if first_error.is_none() {
                    first_error = Some(e);
                } else {
                    warn!(task = %self.core.label(), subtask = %child.label(), error = %e, "Discarding sibling error");
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        self.ledger.advance(target);
        self.core.set_progress(target);
        Ok(())
    }
}

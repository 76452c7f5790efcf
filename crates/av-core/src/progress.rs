//! Human-readable progress derived from task state.
//!
//! The reporter only observes tasks. It never changes their state or
//! progress.

use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::task::{Task, TaskNode};

/// Lines shown for a task and its active subtasks.
pub const MAX_TRAIL_DEPTH: usize = 2;

/// Receiver of `(label, percent)` progress updates.
///
/// Implementations must return quickly; the reporter calls them from its
/// driving loop.
pub trait ProgressSink: Send + Sync {
    fn update(&self, label: &str, percent: f32);

    /// Called once with the final status text.
    fn finished(&self, _status: &str) {}
}

/// One line of a progress trail.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressLine {
    pub label: String,
    pub percent: f32,
}

impl fmt::Display for ProgressLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {:.1}%", self.label, self.percent)
    }
}

pub struct ProgressReporter {
    root: Arc<dyn TaskNode>,
    max_depth: usize,
}

impl ProgressReporter {
    pub fn new(root: Arc<dyn TaskNode>) -> Self {
        Self {
            root,
            max_depth: MAX_TRAIL_DEPTH,
        }
    }

    pub fn for_task<T: Clone + Send + Sync + 'static>(task: &Task<T>) -> Self {
        Self::new(task.node())
    }

    /// Limits the trail, at most [`MAX_TRAIL_DEPTH`] lines.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.clamp(1, MAX_TRAIL_DEPTH);
        self
    }

    /// The root task followed by its active subtasks.
    pub fn trail(&self) -> Vec<ProgressLine> {
        let mut lines = Vec::with_capacity(self.max_depth);
        let mut node = Some(Arc::clone(&self.root));
        while let Some(current) = node {
            if lines.len() == self.max_depth {
                break;
            }
            lines.push(ProgressLine {
                label: current.label(),
                percent: current.snapshot().progress * 100.0,
            });
            node = current.current_subtask();
        }
        lines
    }

    /// The error message once the root failed, the trail otherwise.
    pub fn status_text(&self) -> String {
        if let Some(error) = self.root.error() {
            return error.to_string();
        }
        self.trail()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn percent(&self) -> f32 {
        self.root.snapshot().progress * 100.0
    }

    pub fn is_finished(&self) -> bool {
        self.root.snapshot().state.is_terminal()
    }

    /// Forwards every change of the root task to `sink` until it finishes.
    pub async fn drive(&self, sink: &dyn ProgressSink) {
        let mut rx = self.root.subscribe();
        loop {
            let snapshot = *rx.borrow_and_update();
            if snapshot.state.is_terminal() {
                break;
            }
            for line in self.trail() {
                sink.update(&line.label, line.percent);
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
        let status = self.status_text();
        trace!(status = %status, "Progress finished");
        sink.finished(&status);
    }
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("root", &self.root.label())
            .field("max_depth", &self.max_depth)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        updates: Mutex<Vec<(String, f32)>>,
        status: Mutex<Option<String>>,
    }

    impl ProgressSink for RecordingSink {
        fn update(&self, label: &str, percent: f32) {
            self.updates.lock().unwrap().push((label.to_string(), percent));
        }

        fn finished(&self, status: &str) {
            *self.status.lock().unwrap() = Some(status.to_string());
        }
    }

    #[test]
    fn test_line_format() {
        let line = ProgressLine {
            label: "Generating model".to_string(),
            percent: 42.3,
        };
        assert_eq!(line.to_string(), "Generating model: 42.3%");
    }

    #[tokio::test]
    async fn test_trail_is_capped() {
        let leaf: Task<()> = Task::new("leaf");
        let leaf_ref = leaf.clone();
        let middle: Task<()> = Task::spawn("middle", |mut ctx| async move {
            ctx.await_subtask(&leaf_ref, 1.0).await
        });
        let middle_ref = middle.clone();
        let root: Task<()> = Task::spawn("root", |mut ctx| async move {
            ctx.await_subtask(&middle_ref, 1.0).await
        });

        leaf.set_progress(0.5);
        let mut rx = root.subscribe();
        rx.wait_for(|s| s.progress >= 0.5).await.unwrap();

        let reporter = ProgressReporter::for_task(&root);
        let trail = reporter.trail();
        assert_eq!(trail.len(), MAX_TRAIL_DEPTH);
        assert_eq!(trail[0].label, "root");
        assert_eq!(trail[1].label, "middle");
        assert_eq!(reporter.status_text(), "root: 50.0%\nmiddle: 50.0%");

        leaf.complete(()).unwrap();
        root.wait().await.unwrap();
        assert!(reporter.is_finished());
        assert_eq!(reporter.percent(), 100.0);
    }

    #[tokio::test]
    async fn test_status_text_shows_error() {
        let task: Task<()> = Task::failed("upload", Error::computation_failed("Failed"));
        let reporter = ProgressReporter::for_task(&task);
        assert_eq!(reporter.status_text(), "Avatar calculations failed, status: Failed");
    }

    #[tokio::test]
    async fn test_drive_forwards_updates_until_finished() {
        let task: Task<()> = Task::new("download");
        let sink = Arc::new(RecordingSink::default());

        let reporter = ProgressReporter::for_task(&task);
        let driven = {
            let sink = Arc::clone(&sink);
            tokio::spawn(async move { reporter.drive(sink.as_ref()).await })
        };

        task.set_progress(0.5);
        tokio::task::yield_now().await;
        task.complete(()).unwrap();
        driven.await.unwrap();

        let updates = sink.updates.lock().unwrap();
        assert!(updates.iter().all(|(label, _)| label == "download"));
        assert!(updates.windows(2).all(|w| w[0].1 <= w[1].1));
        assert_eq!(sink.status.lock().unwrap().as_deref(), Some("download: 100.0%"));
    }
}

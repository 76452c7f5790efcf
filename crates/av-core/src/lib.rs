//! Task orchestration and generation pipeline for cloud-computed avatars.
//!
//! This crate provides progress-reporting asynchronous tasks, their
//! composition into weighted subtasks, retrying and caching of service
//! requests, and the state machine that turns a photo into locally stored
//! avatar files.

pub mod archive;
pub mod cache;
pub mod composite;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod provider;
pub mod retry;
pub mod session;
pub mod storage;
pub mod task;

/// Core result type used throughout the avatar core.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type that encompasses all orchestration operations.
pub use error::Error;

/// Progress-reporting tasks and their lifecycle.
pub use task::{Task, TaskNode, TaskSnapshot, TaskState};

/// Subtask composition inside task driving routines.
pub use composite::TaskContext;

/// Retrying and caching of service requests.
pub use cache::{FailurePolicy, ResourceCache};
pub use retry::{retry_until_done, RetryPolicy};

/// Progress display.
pub use progress::{ProgressLine, ProgressReporter, ProgressSink, MAX_TRAIL_DEPTH};

/// Service access and local storage.
pub use archive::{ArchiveExtractor, ZipExtractor};
pub use config::CoreConfig;
pub use provider::{Artifact, AvatarProvider};
pub use storage::{FileKind, FsStorage, PersistentStorage, StorageKey};

/// Avatar generation pipeline.
pub use pipeline::{
    AvatarGenerator, Gender, GenerationRecord, GenerationRequest, GenerationState, PipelineKind,
    StateObserver,
};
pub use session::SessionContext;

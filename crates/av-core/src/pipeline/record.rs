use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::{GenerationState, PipelineKind};
use crate::storage::{FileKind, PersistentStorage, StorageKey};
use crate::task::Task;

/// Persisted outcome of one avatar generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRecord {
    pub avatar_code: String,
    pub state: GenerationState,
    pub pipeline_kind: PipelineKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_haircut: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_outfit: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GenerationRecord {
    pub fn new(avatar_code: impl Into<String>, pipeline_kind: PipelineKind) -> Self {
        let now = Utc::now();
        Self {
            avatar_code: avatar_code.into(),
            state: GenerationState::Default,
            pipeline_kind,
            selected_haircut: None,
            selected_outfit: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub(crate) fn set_state(&mut self, state: GenerationState) {
        self.state = state;
        self.updated_at = Utc::now();
    }

    fn key(avatar_code: &str) -> StorageKey {
        StorageKey::new(avatar_code, FileKind::GenerationRecord)
    }

    pub fn save(&self, storage: Arc<dyn PersistentStorage>) -> Task<()> {
        let record = self.clone();
        Task::spawn_blocking("Saving generation record", move || {
            let bytes = serde_json::to_vec_pretty(&record)?;
            storage.save(&Self::key(&record.avatar_code), &bytes)?;
            Ok(())
        })
    }

    pub fn load(storage: Arc<dyn PersistentStorage>, avatar_code: &str) -> Task<GenerationRecord> {
        let key = Self::key(avatar_code);
        Task::spawn_blocking("Loading generation record", move || {
            let bytes = storage.load(&key)?;
            Ok(serde_json::from_slice(&bytes)?)
        })
    }
}

//! State shared by all generations of one client session.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use crate::pipeline::PipelineKind;
use crate::provider::AvatarProvider;
use crate::task::lock;

/// Hex SHA-256 of photo bytes, used to recognize repeated uploads.
pub fn photo_digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[derive(Debug)]
pub struct SessionContext {
    id: Uuid,
    started_at: DateTime<Utc>,
    provider: AvatarProvider,
    generated: Mutex<HashMap<(String, PipelineKind), String>>,
    current_avatar: Mutex<Option<String>>,
}

impl SessionContext {
    pub fn new(provider: AvatarProvider) -> Self {
        let id = Uuid::new_v4();
        debug!(session = %id, "Session started");
        Self {
            id,
            started_at: Utc::now(),
            provider,
            generated: Mutex::new(HashMap::new()),
            current_avatar: Mutex::new(None),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn provider(&self) -> &AvatarProvider {
        &self.provider
    }

    /// Avatar previously generated in this session from the same photo.
    pub fn generated_avatar(&self, digest: &str, kind: PipelineKind) -> Option<String> {
        lock(&self.generated).get(&(digest.to_string(), kind)).cloned()
    }

    pub fn remember_generated(&self, digest: String, kind: PipelineKind, avatar_code: String) {
        lock(&self.generated).insert((digest, kind), avatar_code);
    }

    pub fn current_avatar(&self) -> Option<String> {
        lock(&self.current_avatar).clone()
    }

    pub fn set_current_avatar(&self, avatar_code: impl Into<String>) {
        *lock(&self.current_avatar) = Some(avatar_code.into());
    }
}

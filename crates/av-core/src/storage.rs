//! Local persistent storage of avatar artifacts.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::task::Task;
use crate::Result;

/// Kind of a locally stored avatar file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FileKind {
    Photo,
    MeshPly,
    MeshZip,
    Texture,
    AllHaircutPoints,
    HaircutsJson,
    BlendshapesZip,
    /// Directory with the unpacked blendshapes.
    BlendshapesDir,
    Parameters,
    PipelineInfo,
    ModelInfo,
    GenerationRecord,
    HaircutMeshZip(String),
    HaircutTexture(String),
    HaircutPreview(String),
    /// Directory with the unpacked haircut mesh.
    HaircutDir(String),
}

impl FileKind {
    /// Path of the file relative to the avatar directory.
    pub fn file_name(&self) -> String {
        match self {
            Self::Photo => "photo.jpg".to_string(),
            Self::MeshPly => "model.ply".to_string(),
            Self::MeshZip => "model.zip".to_string(),
            Self::Texture => "model.jpg".to_string(),
            Self::AllHaircutPoints => "all_haircut_points.zip".to_string(),
            Self::HaircutsJson => "haircuts.json".to_string(),
            Self::BlendshapesZip => "blendshapes.zip".to_string(),
            Self::BlendshapesDir => "blendshapes".to_string(),
            Self::Parameters => "parameters.json".to_string(),
            Self::PipelineInfo => "pipeline.txt".to_string(),
            Self::ModelInfo => "model.json".to_string(),
            Self::GenerationRecord => "generation.json".to_string(),
            Self::HaircutMeshZip(id) => format!("haircuts/{}_model.zip", sanitize_id(id)),
            Self::HaircutTexture(id) => format!("haircuts/{}_model.png", sanitize_id(id)),
            Self::HaircutPreview(id) => format!("haircuts/{}_preview.png", sanitize_id(id)),
            Self::HaircutDir(id) => format!("haircuts/{}", sanitize_id(id)),
        }
    }

    /// Files that differ per level of detail live in a `LOD<n>` subdirectory.
    pub fn is_lod_specific(&self) -> bool {
        matches!(self, Self::MeshPly | Self::MeshZip | Self::BlendshapesZip | Self::BlendshapesDir)
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

// Haircut ids look like "base/generated".
fn sanitize_id(id: &str) -> String {
    id.replace(['/', '\\'], "_")
}

/// Address of a stored file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageKey {
    pub avatar_code: String,
    pub kind: FileKind,
    pub detail_level: u32,
}

impl StorageKey {
    pub fn new(avatar_code: impl Into<String>, kind: FileKind) -> Self {
        Self {
            avatar_code: avatar_code.into(),
            kind,
            detail_level: 0,
        }
    }

    pub fn with_detail_level(mut self, detail_level: u32) -> Self {
        self.detail_level = detail_level;
        self
    }
}

/// Keyed byte storage for avatar files.
///
/// Implementations are blocking; callers run them through
/// [`Task::spawn_blocking`].
pub trait PersistentStorage: Send + Sync {
    /// Location of `key`, whether or not it exists.
    fn path(&self, key: &StorageKey) -> PathBuf;
    fn save(&self, key: &StorageKey, bytes: &[u8]) -> Result<PathBuf>;
    fn load(&self, key: &StorageKey) -> Result<Vec<u8>>;
    fn exists(&self, key: &StorageKey) -> bool;
    fn delete(&self, key: &StorageKey) -> Result<()>;
}

/// Filesystem layout `<root>/avatars/<code>/[LOD<n>/]<file>`.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn avatar_dir(&self, avatar_code: &str) -> PathBuf {
        self.root.join("avatars").join(avatar_code)
    }
}

impl PersistentStorage for FsStorage {
    fn path(&self, key: &StorageKey) -> PathBuf {
        let mut dir = self.avatar_dir(&key.avatar_code);
        if key.kind.is_lod_specific() && key.detail_level > 0 {
            dir = dir.join(format!("LOD{}", key.detail_level));
        }
        dir.join(key.kind.file_name())
    }

    fn save(&self, key: &StorageKey, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, bytes)?;
        debug!(path = %path.display(), bytes = bytes.len(), "Saved file");
        Ok(path)
    }

    fn load(&self, key: &StorageKey) -> Result<Vec<u8>> {
        Ok(fs::read(self.path(key))?)
    }

    fn exists(&self, key: &StorageKey) -> bool {
        self.path(key).exists()
    }

    fn delete(&self, key: &StorageKey) -> Result<()> {
        let path = self.path(key);
        if path.is_dir() {
            fs::remove_dir_all(&path)?;
        } else if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }
}

pub fn save_task(storage: Arc<dyn PersistentStorage>, key: StorageKey, bytes: Vec<u8>) -> Task<PathBuf> {
    Task::spawn_blocking(format!("Saving {}", key.kind), move || storage.save(&key, &bytes))
}

pub fn load_task(storage: Arc<dyn PersistentStorage>, key: StorageKey) -> Task<Vec<u8>> {
    Task::spawn_blocking(format!("Loading {}", key.kind), move || storage.load(&key))
}

pub fn delete_task(storage: Arc<dyn PersistentStorage>, key: StorageKey) -> Task<()> {
    Task::spawn_blocking(format!("Deleting {}", key.kind), move || storage.delete(&key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout() {
        let storage = FsStorage::new("/data");

        let texture = StorageKey::new("abc", FileKind::Texture).with_detail_level(3);
        assert_eq!(storage.path(&texture), PathBuf::from("/data/avatars/abc/model.jpg"));

        let mesh = StorageKey::new("abc", FileKind::MeshZip).with_detail_level(3);
        assert_eq!(storage.path(&mesh), PathBuf::from("/data/avatars/abc/LOD3/model.zip"));

        let haircut = StorageKey::new("abc", FileKind::HaircutMeshZip("base/generated".into()));
        assert_eq!(
            storage.path(&haircut),
            PathBuf::from("/data/avatars/abc/haircuts/base_generated_model.zip")
        );
    }

    #[test]
    fn test_save_load_delete() {
        let dir = TempDir::new().unwrap();
        let storage = FsStorage::new(dir.path());
        let key = StorageKey::new("abc", FileKind::HaircutTexture("short".into()));

        assert!(!storage.exists(&key));
        let path = storage.save(&key, b"png").unwrap();
        assert!(path.starts_with(dir.path()));
        assert!(storage.exists(&key));
        assert_eq!(storage.load(&key).unwrap(), b"png");

        storage.delete(&key).unwrap();
        assert!(!storage.exists(&key));
        storage.delete(&key).unwrap();
    }

    #[tokio::test]
    async fn test_blocking_tasks() {
        let dir = TempDir::new().unwrap();
        let storage: Arc<dyn PersistentStorage> = Arc::new(FsStorage::new(dir.path()));
        let key = StorageKey::new("abc", FileKind::PipelineInfo);

        let saved = save_task(Arc::clone(&storage), key.clone(), b"head_2.0".to_vec());
        assert_eq!(saved.label(), "Saving pipeline.txt");
        saved.wait().await.unwrap();

        let loaded = load_task(Arc::clone(&storage), key.clone()).wait().await;
        assert_eq!(loaded.unwrap(), b"head_2.0");

        let missing = load_task(storage, StorageKey::new("missing", FileKind::Photo)).wait().await;
        assert!(matches!(missing, Err(crate::Error::Io { .. })));
    }
}

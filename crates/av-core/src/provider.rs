//! Avatar service operations exposed as composable tasks.
//!
//! Every operation returns a [`Task`] that callers await as a subtask.
//! Metadata requests go through the session caches, so repeated lookups of
//! the same avatar record, parameter set or haircut list share one request.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use av_client_api::{ClientApiError, CloudApi};
use av_rest_api_contract::validation::validate_create_avatar_request;
use av_rest_api_contract::{
    AvatarData, ComputationParameters, CreateAvatarRequest, HaircutData, ParametersSubset,
    PhotoSource,
};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::archive::{unzip, ArchiveExtractor, ZipExtractor};
use crate::cache::{FailurePolicy, ResourceCache};
use crate::config::CoreConfig;
use crate::error::Error;
use crate::pipeline::PipelineKind;
use crate::storage::{delete_task, save_task, FileKind, PersistentStorage, StorageKey};
use crate::task::Task;

/// Downloadable part of a computed avatar model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Artifact {
    Mesh,
    Texture,
    ModelInfo,
    Blendshapes,
}

impl Artifact {
    fn url(self, avatar: &AvatarData) -> Option<&Url> {
        match self {
            Self::Mesh => avatar.mesh.as_ref(),
            Self::Texture => avatar.texture.as_ref(),
            Self::ModelInfo => avatar.model_info.as_ref(),
            Self::Blendshapes => avatar.blendshapes.as_ref(),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Mesh => "mesh",
            Self::Texture => "texture",
            Self::ModelInfo => "model info",
            Self::Blendshapes => "blendshapes",
        }
    }
}

/// Last path segment of a haircut id, e.g. `generated` for `base/generated`.
pub fn short_haircut_id(id: &str) -> &str {
    id.rsplit('/').next().unwrap_or(id)
}

/// Maps a haircut id to the `plan/name` form listed in `available`.
///
/// Unknown ids are returned unchanged.
pub fn resolve_full_haircut_id(available: &ComputationParameters, id: &str) -> String {
    let full_names: Vec<String> = available
        .haircuts
        .iter()
        .flat_map(|(plan, names)| names.iter().map(move |name| format!("{}/{}", plan, name)))
        .collect();

    if full_names.iter().any(|name| name == id) {
        return id.to_string();
    }
    let suffix = format!("/{}", short_haircut_id(id));
    match full_names.into_iter().find(|name| name.ends_with(&suffix)) {
        Some(full) => full,
        None => {
            error!(haircut = id, "Unable to find full name for haircut");
            id.to_string()
        }
    }
}

fn parent_dir(path: PathBuf) -> PathBuf {
    match path.parent() {
        Some(parent) => parent.to_path_buf(),
        None => path,
    }
}

struct ProviderInner {
    api: Arc<dyn CloudApi>,
    storage: Arc<dyn PersistentStorage>,
    extractor: Arc<dyn ArchiveExtractor>,
    config: CoreConfig,
    avatars: ResourceCache<String, AvatarData>,
    parameters: ResourceCache<(PipelineKind, ParametersSubset), ComputationParameters>,
    haircuts: ResourceCache<String, Vec<HaircutData>>,
}

/// Entry point to the avatar service for the generation pipeline.
#[derive(Clone)]
pub struct AvatarProvider {
    inner: Arc<ProviderInner>,
}

impl AvatarProvider {
    pub fn new(
        api: Arc<dyn CloudApi>,
        storage: Arc<dyn PersistentStorage>,
        config: CoreConfig,
    ) -> Self {
        Self::with_extractor(api, storage, Arc::new(ZipExtractor), config)
    }

    pub fn with_extractor(
        api: Arc<dyn CloudApi>,
        storage: Arc<dyn PersistentStorage>,
        extractor: Arc<dyn ArchiveExtractor>,
        config: CoreConfig,
    ) -> Self {
        // Records of avatars still being computed change on the server.
        let avatars = ResourceCache::new("avatars", FailurePolicy::Evict)
            .with_retention(|avatar: &AvatarData| avatar.status.is_success());
        let parameters = ResourceCache::new("parameters", config.parameters_failure_policy);
        let haircuts = ResourceCache::new("haircuts", FailurePolicy::Evict);

        let provider = Self {
            inner: Arc::new(ProviderInner {
                api,
                storage,
                extractor,
                config,
                avatars,
                parameters,
                haircuts,
            }),
        };
        provider.set_use_cache(provider.inner.config.use_cache);
        provider
    }

    pub fn config(&self) -> &CoreConfig {
        &self.inner.config
    }

    pub fn storage(&self) -> Arc<dyn PersistentStorage> {
        Arc::clone(&self.inner.storage)
    }

    /// Enables or bypasses all metadata caches. Existing entries are kept.
    pub fn set_use_cache(&self, enabled: bool) {
        self.inner.avatars.set_enabled(enabled);
        self.inner.parameters.set_enabled(enabled);
        self.inner.haircuts.set_enabled(enabled);
    }

    fn path(&self, avatar_code: &str, kind: FileKind) -> PathBuf {
        self.inner.storage.path(
            &StorageKey::new(avatar_code, kind).with_detail_level(self.inner.config.detail_level),
        )
    }

    fn key(&self, avatar_code: &str, kind: FileKind) -> StorageKey {
        StorageKey::new(avatar_code, kind).with_detail_level(self.inner.config.detail_level)
    }

    /// Parameter set of `kind`, cached per pipeline and subset.
    pub fn get_parameters(
        &self,
        kind: PipelineKind,
        subset: ParametersSubset,
    ) -> Task<ComputationParameters> {
        let api = Arc::clone(&self.inner.api);
        self.inner.parameters.get_or_create((kind, subset), move || {
            let traits = kind.traits();
            Task::spawn(
                format!("Getting {} parameters", subset.path_segment()),
                move |_ctx| async move {
                    Ok(api
                        .get_parameters(traits.pipeline, traits.pipeline_subtype, subset)
                        .await?)
                },
            )
        })
    }

    /// Registers a new avatar and uploads its photo.
    pub fn create_avatar(&self, request: CreateAvatarRequest) -> Task<AvatarData> {
        let api = Arc::clone(&self.inner.api);
        Task::spawn("Uploading photo", move |_ctx| async move {
            validate_create_avatar_request(&request)?;
            let avatar = api.create_avatar(&request).await?;
            info!(avatar = %avatar.code, pipeline = %avatar.pipeline, "Avatar registered");
            Ok(avatar)
        })
    }

    /// Creates the avatar and keeps its photo and pipeline locally.
    ///
    /// Local copies are best-effort; failing to write them is logged only.
    pub fn initialize_avatar(&self, kind: PipelineKind, request: CreateAvatarRequest) -> Task<String> {
        let provider = self.clone();
        Task::spawn("Initializing avatar", move |mut ctx| async move {
            let photo = match &request.source {
                PhotoSource::Photo(bytes) => Some(bytes.clone()),
                PhotoSource::Selfie(_) => None,
            };
            let created = provider.create_avatar(request);
            let avatar = ctx.await_subtask(&created, 0.99).await?;

            let storage = provider.storage();
            let mut saves = vec![save_task(
                Arc::clone(&storage),
                StorageKey::new(&avatar.code, FileKind::PipelineInfo),
                kind.as_str().as_bytes().to_vec(),
            )
            .node()];
            if let Some(photo) = photo {
                saves.push(save_task(storage, StorageKey::new(&avatar.code, FileKind::Photo), photo).node());
            }
            if let Err(e) = ctx.await_subtasks(1.0, &saves).await {
                if e.is_cancelled() {
                    return Err(e);
                }
                warn!(avatar = %avatar.code, error = %e, "Failed to keep local copy of avatar input");
            }
            Ok(avatar.code)
        })
    }

    /// Avatar record, cached once it reports `Completed`.
    pub fn get_avatar(&self, avatar_code: &str) -> Task<AvatarData> {
        let api = Arc::clone(&self.inner.api);
        let code = avatar_code.to_string();
        self.inner.avatars.get_or_create(code.clone(), move || {
            Task::spawn("Getting avatar", move |_ctx| async move { Ok(api.get_avatar(&code).await?) })
        })
    }

    /// Polls the avatar until the server reports a final status.
    ///
    /// `Failed` and `Timed Out` fail the task with the status string.
    pub fn await_calculations(&self, avatar_code: &str) -> Task<AvatarData> {
        let provider = self.clone();
        let code = avatar_code.to_string();
        Task::spawn("Awaiting calculations", move |ctx| async move {
            let poll_interval = provider.inner.config.poll_interval();
            loop {
                ctx.checkpoint()?;
                match provider.inner.api.get_avatar(&code).await {
                    Ok(avatar) => {
                        ctx.set_progress(avatar.progress_fraction());
                        if avatar.status.is_final() {
                            if !avatar.status.is_success() {
                                warn!(avatar = %code, status = %avatar.status, "Avatar calculations failed");
                                return Err(Error::computation_failed(avatar.status.as_str()));
                            }
                            info!(avatar = %code, "Avatar calculations finished");
                            let done = avatar.clone();
                            provider
                                .inner
                                .avatars
                                .get_or_create(code.clone(), move || Task::completed("Getting avatar", done));
                            return Ok(avatar);
                        }
                        debug!(avatar = %code, status = %avatar.status, progress = avatar.progress, "Avatar status");
                        ctx.sleep(poll_interval).await?;
                    }
                    Err(ClientApiError::RateLimited { retry_after }) => {
                        warn!(avatar = %code, ?retry_after, "Status requests rate limited");
                        ctx.sleep(retry_after).await?;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        })
    }

    fn fetch(&self, url: Url) -> Task<Vec<u8>> {
        let api = Arc::clone(&self.inner.api);
        Task::spawn("Downloading", move |_ctx| async move { Ok(api.download(&url).await?) })
    }

    /// Downloads `url` and stores it under `key`.
    pub fn download_file(&self, url: Url, key: StorageKey) -> Task<PathBuf> {
        let provider = self.clone();
        Task::spawn(format!("Downloading {}", key.kind), move |mut ctx| async move {
            let bytes = ctx.await_subtask(&provider.fetch(url), 0.9).await?;
            let saved = save_task(provider.storage(), key, bytes);
            ctx.await_subtask(&saved, 1.0).await
        })
    }

    /// Downloads a zip archive, stores it under `archive_key` and unpacks it
    /// into `destination`. The stored archive is removed afterwards.
    pub fn download_archive(&self, url: Url, archive_key: StorageKey, destination: PathBuf) -> Task<PathBuf> {
        let provider = self.clone();
        Task::spawn(format!("Downloading {}", archive_key.kind), move |mut ctx| async move {
            let bytes = ctx.await_subtask(&provider.fetch(url), 0.9).await?;
            let saved = save_task(provider.storage(), archive_key.clone(), bytes);
            let archive = ctx.await_subtask(&saved, 0.95).await?;

            let unzipped = unzip(Arc::clone(&provider.inner.extractor), archive, destination);
            let destination = ctx.await_subtask(&unzipped, 0.99).await?;

            let cleanup = delete_task(provider.storage(), archive_key);
            if let Err(e) = ctx.await_subtask(&cleanup, 1.0).await {
                warn!(destination = %destination.display(), error = %e, "Failed to remove archive");
            }
            Ok(destination)
        })
    }

    /// Downloads one artifact of a computed avatar into local storage.
    pub fn download_artifact(&self, avatar: &AvatarData, artifact: Artifact) -> Task<PathBuf> {
        let code = avatar.code.as_str();
        let Some(url) = artifact.url(avatar).cloned() else {
            return Task::failed(
                format!("Downloading {}", artifact.name()),
                Error::task(format!("avatar {} has no {} to download", code, artifact.name())),
            );
        };

        match artifact {
            Artifact::Mesh => self.download_archive(
                url,
                self.key(code, FileKind::MeshZip),
                parent_dir(self.path(code, FileKind::MeshPly)),
            ),
            Artifact::Texture => self.download_file(url, self.key(code, FileKind::Texture)),
            Artifact::ModelInfo => self.download_file(url, self.key(code, FileKind::ModelInfo)),
            Artifact::Blendshapes => self.download_archive(
                url,
                self.key(code, FileKind::BlendshapesZip),
                self.path(code, FileKind::BlendshapesDir),
            ),
        }
    }

    /// Downloads mesh, texture, model info and, when enabled, blendshapes one
    /// after another.
    pub fn download_avatar(&self, avatar: AvatarData) -> Task<()> {
        let provider = self.clone();
        Task::spawn("Downloading avatar files", move |mut ctx| async move {
            let mut steps = vec![Artifact::Mesh, Artifact::Texture, Artifact::ModelInfo];
            if provider.inner.config.with_blendshapes && avatar.blendshapes.is_some() {
                steps.push(Artifact::Blendshapes);
            }

            let count = steps.len();
            for (i, artifact) in steps.into_iter().enumerate() {
                let step = provider.download_artifact(&avatar, artifact);
                ctx.await_subtask(&step, (i + 1) as f32 / count as f32).await?;
            }
            Ok(())
        })
    }

    /// Haircuts generated for the avatar; empty when its pipeline has none.
    pub fn get_haircuts(&self, avatar_code: &str) -> Task<Vec<HaircutData>> {
        let provider = self.clone();
        let code = avatar_code.to_string();
        self.inner.haircuts.get_or_create(code.clone(), move || {
            Task::spawn("Getting haircuts", move |mut ctx| async move {
                let avatar = ctx.await_subtask(&provider.get_avatar(&code), 0.1).await?;
                let kind = PipelineKind::from_pipeline(&avatar.pipeline, &avatar.pipeline_subtype);
                if kind.is_some_and(|k| !k.traits().supports_haircuts) {
                    info!(pipeline = %avatar.pipeline, "Pipeline doesn't support haircuts");
                    return Ok(Vec::new());
                }
                Ok(provider.inner.api.get_haircuts(&avatar).await?)
            })
        })
    }

    /// Full `plan/name` ids of the avatar's haircuts.
    pub fn get_haircut_ids(&self, avatar_code: &str, kind: PipelineKind) -> Task<Vec<String>> {
        let provider = self.clone();
        let code = avatar_code.to_string();
        Task::spawn("Getting haircut ids", move |mut ctx| async move {
            let haircuts = ctx.await_subtask(&provider.get_haircuts(&code), 0.9).await?;
            if haircuts.is_empty() {
                return Ok(Vec::new());
            }
            let all = provider.get_parameters(kind, ParametersSubset::All);
            let available = ctx.await_subtask(&all, 1.0).await?;
            Ok(haircuts
                .iter()
                .map(|h| resolve_full_haircut_id(&available, &h.identity))
                .collect())
        })
    }

    /// Downloads mesh and texture of one haircut; returns the directory
    /// holding the unpacked mesh.
    pub fn download_haircut(&self, avatar_code: &str, haircut_id: &str) -> Task<PathBuf> {
        let provider = self.clone();
        let code = avatar_code.to_string();
        let id = haircut_id.to_string();
        Task::spawn(format!("Downloading haircut {}", id), move |mut ctx| async move {
            let haircuts = ctx.await_subtask(&provider.get_haircuts(&code), 0.05).await?;
            let short = short_haircut_id(&id);
            let haircut = haircuts
                .into_iter()
                .find(|h| short_haircut_id(&h.identity) == short)
                .ok_or_else(|| {
                    Error::task(format!("There is no {} haircut for avatar with code: {}", id, code))
                })?;
            let mesh_url = haircut
                .mesh
                .ok_or_else(|| Error::task(format!("haircut {} has no mesh to download", id)))?;

            let mesh = provider.download_archive(
                mesh_url,
                StorageKey::new(&code, FileKind::HaircutMeshZip(id.clone())),
                provider.path(&code, FileKind::HaircutDir(id.clone())),
            );
            let mut downloads = vec![mesh.node()];
            if let Some(texture_url) = haircut.texture {
                let texture = provider
                    .download_file(texture_url, StorageKey::new(&code, FileKind::HaircutTexture(id.clone())));
                downloads.push(texture.node());
            }
            ctx.await_subtasks(1.0, &downloads).await?;
            mesh.wait().await
        })
    }
}

impl fmt::Debug for AvatarProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AvatarProvider")
            .field("config", &self.inner.config)
            .field("avatars", &self.inner.avatars)
            .field("parameters", &self.inner.parameters)
            .field("haircuts", &self.inner.haircuts)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn available(haircuts: &[(&str, &[&str])]) -> ComputationParameters {
        ComputationParameters {
            haircuts: haircuts
                .iter()
                .map(|(plan, names)| (plan.to_string(), names.iter().map(|n| n.to_string()).collect()))
                .collect::<BTreeMap<_, _>>(),
            ..ComputationParameters::default()
        }
    }

    #[test]
    fn test_resolve_full_haircut_id() {
        let params = available(&[("base", &["generated", "short_simple"]), ("plus", &["long"])]);

        assert_eq!(resolve_full_haircut_id(&params, "generated"), "base/generated");
        assert_eq!(resolve_full_haircut_id(&params, "plus/long"), "plus/long");
        assert_eq!(resolve_full_haircut_id(&params, "mohawk"), "mohawk");
    }

    #[test]
    fn test_short_haircut_id() {
        assert_eq!(short_haircut_id("base/generated"), "generated");
        assert_eq!(short_haircut_id("generated"), "generated");
    }
}

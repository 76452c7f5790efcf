//! Avatar generation state machine.
//!
//! A generation walks `UPLOADING → CALCULATING_IN_CLOUD → DOWNLOADING →
//! FINISHED`, or ends in `FAILED` from any of the transient states. Each
//! stage is a subtask of the generation task, so progress and errors
//! propagate through the usual task composition.

use std::fmt;
use std::sync::Arc;

use av_rest_api_contract::{
    find_in_set, ComputationParameters, CreateAvatarRequest, ParametersSubset, PhotoSource,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::composite::TaskContext;
use crate::pipeline::selection::select_identity;
use crate::pipeline::{GenerationRecord, GenerationState, PipelineKind, PipelineTraits};
use crate::retry::retry_until_done;
use crate::session::{photo_digest, SessionContext};
use crate::task::Task;
use crate::Result;

const BLENDSHAPES_SET: &str = "mobile_51";
const GENERATED_HAIRCUT: &str = "generated";
const AVATAR_MODIFICATIONS: [&str; 3] = ["remove_smile", "remove_glasses", "enhance_lighting"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub kind: PipelineKind,
    pub source: PhotoSource,
    pub name: String,
    pub gender: Option<Gender>,
}

impl GenerationRequest {
    pub fn new(kind: PipelineKind, source: PhotoSource) -> Self {
        Self {
            kind,
            source,
            name: "avatar".to_string(),
            gender: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_gender(mut self, gender: Gender) -> Self {
        self.gender = Some(gender);
        self
    }
}

/// Receives every state transition of a generation.
pub type StateObserver = Arc<dyn Fn(GenerationState, PipelineKind) + Send + Sync>;

/// Parameters sent with a new avatar, derived from the available set.
///
/// Returns the parameters and the selected outfit, if any.
pub fn computation_parameters(
    traits: &PipelineTraits,
    available: &ComputationParameters,
    gender: Option<Gender>,
    with_blendshapes: bool,
) -> (ComputationParameters, Option<String>) {
    let mut params = ComputationParameters::default();

    if with_blendshapes {
        match find_in_set(&available.blendshapes, BLENDSHAPES_SET) {
            Some(plan) => params
                .blendshapes
                .entry(plan.to_string())
                .or_default()
                .push(BLENDSHAPES_SET.to_string()),
            None => warn!(pipeline = %traits.kind, "Blendshapes {} are not available", BLENDSHAPES_SET),
        }
    }

    if traits.supports_haircuts {
        match find_in_set(&available.haircuts, GENERATED_HAIRCUT) {
            Some(plan) => {
                params
                    .haircuts
                    .entry(plan.to_string())
                    .or_default()
                    .push(GENERATED_HAIRCUT.to_string());
                params.embed_haircuts = Some(false);
            }
            None => warn!(pipeline = %traits.kind, "Haircut {} is not available", GENERATED_HAIRCUT),
        }
    }

    let mut selected_outfit = None;
    if traits.fullbody {
        let outfit = match gender {
            Some(Gender::Female) => "outfit_0",
            _ => "outfit_1",
        };
        match find_in_set(&available.outfits, outfit) {
            Some(plan) => {
                params
                    .outfits
                    .entry(plan.to_string())
                    .or_default()
                    .push(outfit.to_string());
                selected_outfit = Some(format!("{}/{}", plan, outfit));
            }
            None => warn!(pipeline = %traits.kind, "Outfit {} is not available", outfit),
        }
    }

    for name in AVATAR_MODIFICATIONS {
        let plan = available
            .avatar_modifications
            .iter()
            .find(|(_, modifications)| modifications.contains_key(name))
            .map(|(plan, _)| plan.clone());
        match plan {
            Some(plan) => {
                params
                    .avatar_modifications
                    .entry(plan)
                    .or_default()
                    .insert(name.to_string(), Value::Bool(true));
            }
            None => warn!(pipeline = %traits.kind, "Avatar modification {} is not available", name),
        }
    }

    (params, selected_outfit)
}

/// Drives avatar generations of one session.
#[derive(Clone)]
pub struct AvatarGenerator {
    session: Arc<SessionContext>,
    observer: Option<StateObserver>,
}

impl AvatarGenerator {
    pub fn new(session: Arc<SessionContext>) -> Self {
        Self {
            session,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: StateObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn session(&self) -> &Arc<SessionContext> {
        &self.session
    }

    /// Starts a generation. The returned task's label follows the
    /// generation state.
    pub fn generate(&self, request: GenerationRequest) -> Task<GenerationRecord> {
        let generator = self.clone();
        Task::spawn(GenerationState::Default.label(), move |mut ctx| async move {
            let kind = request.kind;
            let digest = match &request.source {
                PhotoSource::Photo(bytes) => Some(photo_digest(bytes)),
                PhotoSource::Selfie(_) => None,
            };

            if let Some(code) = digest
                .as_deref()
                .and_then(|d| generator.session.generated_avatar(d, kind))
            {
                info!(avatar = %code, pipeline = %kind, "Photo already processed in this session");
                let storage = generator.session.provider().storage();
                return ctx.await_subtask(&GenerationRecord::load(storage, &code), 1.0).await;
            }

            let mut avatar_code = None;
            match generator.run(&mut ctx, &request, &mut avatar_code).await {
                Ok(record) => {
                    if let Some(digest) = digest {
                        generator
                            .session
                            .remember_generated(digest, kind, record.avatar_code.clone());
                    }
                    Ok(record)
                }
                Err(e) => {
                    warn!(pipeline = %kind, error = %e, "Avatar generation failed");
                    generator.transition(&ctx, kind, GenerationState::Failed);
                    if let Some(code) = avatar_code {
                        let mut record = GenerationRecord::new(code, kind);
                        record.set_state(GenerationState::Failed);
                        generator.persist(&record).await;
                    }
                    Err(e)
                }
            }
        })
    }

    /// Loads the record of an earlier generation.
    pub fn resume(&self, avatar_code: &str) -> Task<GenerationRecord> {
        let session = Arc::clone(&self.session);
        let code = avatar_code.to_string();
        Task::spawn("Loading avatar", move |mut ctx| async move {
            let storage = session.provider().storage();
            let record = ctx.await_subtask(&GenerationRecord::load(storage, &code), 1.0).await?;
            session.set_current_avatar(code);
            Ok(record)
        })
    }

    fn transition(&self, ctx: &TaskContext, kind: PipelineKind, state: GenerationState) {
        debug!(pipeline = %kind, state = ?state, "Generation state changed");
        ctx.set_label(state.label());
        if kind.traits().silent {
            return;
        }
        if let Some(observer) = &self.observer {
            observer(state, kind);
        }
    }

    async fn persist(&self, record: &GenerationRecord) {
        let storage = self.session.provider().storage();
        if let Err(e) = record.save(storage).wait().await {
            warn!(avatar = %record.avatar_code, error = %e, "Failed to save generation record");
        }
    }

    async fn run(
        &self,
        ctx: &mut TaskContext,
        request: &GenerationRequest,
        avatar_code: &mut Option<String>,
    ) -> Result<GenerationRecord> {
        let provider = self.session.provider().clone();
        let kind = request.kind;
        let traits = kind.traits();
        let config = provider.config().clone();
        let policy = config.retry_policy();

        self.transition(ctx, kind, GenerationState::Uploading);
        let defaults = provider.get_parameters(kind, ParametersSubset::Default);
        let all = provider.get_parameters(kind, ParametersSubset::All);
        ctx.await_subtasks(0.1, &[defaults.node(), all.node()]).await?;
        let available = all.wait().await?;

        let (parameters, selected_outfit) =
            computation_parameters(traits, &available, request.gender, config.with_blendshapes);
        let create = CreateAvatarRequest {
            name: request.name.clone(),
            description: String::new(),
            pipeline: traits.pipeline.to_string(),
            pipeline_subtype: traits.pipeline_subtype.to_string(),
            parameters: Some(parameters),
            source: request.source.clone(),
        };
        let code = ctx
            .await_subtask(&provider.initialize_avatar(kind, create), 0.3)
            .await?;
        *avatar_code = Some(code.clone());
        self.session.set_current_avatar(code.clone());

        self.transition(ctx, kind, GenerationState::CalculatingInCloud);
        ctx.await_subtask(&provider.await_calculations(&code), 0.7).await?;

        self.transition(ctx, kind, GenerationState::Downloading);
        let avatar = {
            let (provider, code) = (provider.clone(), code.clone());
            retry_until_done("Getting avatar", policy, move || provider.get_avatar(&code))
        };
        let avatar = ctx.await_subtask(&avatar, 0.75).await?;

        let model = {
            let provider = provider.clone();
            retry_until_done("Downloading avatar files", policy, move || {
                provider.download_avatar(avatar.clone())
            })
        };
        ctx.await_subtask(&model, 0.9).await?;

        let mut selected_haircut = None;
        if traits.supports_haircuts && config.download_haircut {
            let ids = {
                let (provider, code) = (provider.clone(), code.clone());
                retry_until_done("Getting haircuts", policy, move || {
                    provider.get_haircut_ids(&code, kind)
                })
            };
            let ids = ctx.await_subtask(&ids, 0.95).await?;
            let chosen = select_identity(&ids, traits.default_haircut, &mut rand::thread_rng())
                .map(str::to_owned);

            if let Some(haircut) = chosen {
                let download = {
                    let (provider, code, haircut) = (provider.clone(), code.clone(), haircut.clone());
                    retry_until_done("Downloading haircut", policy, move || {
                        provider.download_haircut(&code, &haircut)
                    })
                };
                ctx.await_subtask(&download, 1.0).await?;
                selected_haircut = Some(haircut);
            }
        }

        let mut record = GenerationRecord::new(code, kind);
        record.selected_haircut = selected_haircut;
        record.selected_outfit = selected_outfit;
        record.set_state(GenerationState::Finished);
        self.transition(ctx, kind, GenerationState::Finished);
        self.persist(&record).await;

        info!(avatar = %record.avatar_code, pipeline = %kind, "Avatar generated");
        Ok(record)
    }
}

impl fmt::Debug for AvatarGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AvatarGenerator")
            .field("session", &self.session.id())
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

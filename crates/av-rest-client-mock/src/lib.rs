//! Mock avatar service client driven by a scripted scenario
//!
//! Every operation is answered from memory. Scenarios control the status
//! sequence observed while polling, inject failures per operation and count
//! calls so tests can assert how often the network would have been hit.

use async_trait::async_trait;
use av_client_api::{ClientApiError, ClientApiResult, CloudApi};
use av_rest_api_contract::*;
use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Write};
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Base URL of the artifacts served by the mock
pub const MOCK_BASE_URL: &str = "https://mock.avatar-service.local/";

/// Client operations that can be counted and scripted to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateAvatar,
    GetAvatar,
    GetParameters,
    GetHaircuts,
    Download,
}

#[derive(Debug, Clone)]
struct ScriptedFailure {
    /// Calls answered normally before failures start
    skip: u32,
    /// `None` fails forever
    remaining: Option<u32>,
    error: ClientApiError,
}

#[derive(Debug)]
struct AvatarEntry {
    data: AvatarData,
    polls: usize,
}

#[derive(Debug)]
struct MockState {
    statuses: Vec<AvatarStatus>,
    default_parameters: ComputationParameters,
    all_parameters: ComputationParameters,
    haircuts: Vec<String>,
    avatars: HashMap<String, AvatarEntry>,
    artifacts: HashMap<String, Vec<u8>>,
    failures: HashMap<Operation, ScriptedFailure>,
    calls: HashMap<Operation, usize>,
    created: Vec<CreateAvatarRequest>,
    next_avatar: u32,
}

pub struct MockClient {
    state: Mutex<MockState>,
    latency: Option<Duration>,
}

impl MockClient {
    /// Scenario in which every call succeeds and the avatar completes after
    /// being queued and computed.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                statuses: vec![
                    AvatarStatus::Queued,
                    AvatarStatus::Computing,
                    AvatarStatus::Completed,
                ],
                default_parameters: default_parameters(),
                all_parameters: all_parameters(),
                haircuts: vec!["base/generated".into(), "base/short_simple".into()],
                avatars: HashMap::new(),
                artifacts: HashMap::new(),
                failures: HashMap::new(),
                calls: HashMap::new(),
                created: Vec::new(),
                next_avatar: 1,
            }),
            latency: None,
        }
    }

    /// Statuses returned by successive `get_avatar` calls; the last one repeats.
    pub fn with_statuses(self, statuses: Vec<AvatarStatus>) -> Self {
        self.lock().statuses = statuses;
        self
    }

    /// Full haircut identities reported for every avatar.
    pub fn with_haircuts(self, haircuts: Vec<String>) -> Self {
        self.lock().haircuts = haircuts;
        self
    }

    pub fn with_parameters(self, subset: ParametersSubset, parameters: ComputationParameters) -> Self {
        match subset {
            ParametersSubset::Default => self.lock().default_parameters = parameters,
            ParametersSubset::All => self.lock().all_parameters = parameters,
        }
        self
    }

    /// Fail the next `times` calls of `operation` with `error`.
    pub fn failing(self, operation: Operation, times: u32, error: ClientApiError) -> Self {
        self.failing_after(operation, 0, times, error)
    }

    /// Answer `successes` calls of `operation` normally, then fail the
    /// following `times` calls with `error`.
    pub fn failing_after(
        self,
        operation: Operation,
        successes: u32,
        times: u32,
        error: ClientApiError,
    ) -> Self {
        self.lock().failures.insert(
            operation,
            ScriptedFailure {
                skip: successes,
                remaining: Some(times),
                error,
            },
        );
        self
    }

    /// Fail every call of `operation` with `error`.
    pub fn always_failing(self, operation: Operation, error: ClientApiError) -> Self {
        self.lock().failures.insert(
            operation,
            ScriptedFailure {
                skip: 0,
                remaining: None,
                error,
            },
        );
        self
    }

    /// Delay every answer, which keeps tasks in flight long enough to observe them.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Number of times `operation` was invoked, failed calls included.
    pub fn calls(&self, operation: Operation) -> usize {
        self.lock().calls.get(&operation).copied().unwrap_or(0)
    }

    /// Every creation request received so far.
    pub fn created_requests(&self) -> Vec<CreateAvatarRequest> {
        self.lock().created.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        // A panicking test thread must not hide the scenario from the others.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn begin(&self, operation: Operation) -> ClientApiResult<()> {
        let outcome = {
            let mut state = self.lock();
            *state.calls.entry(operation).or_insert(0) += 1;

            match state.failures.get_mut(&operation) {
                None => Ok(()),
                Some(failure) if failure.skip > 0 => {
                    failure.skip -= 1;
                    Ok(())
                }
                Some(failure) => match failure.remaining.as_mut() {
                    Some(n) if *n == 0 => Ok(()),
                    Some(n) => {
                        *n -= 1;
                        Err(failure.error.clone())
                    }
                    None => Err(failure.error.clone()),
                },
            }
        };

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if let Err(e) = &outcome {
            debug!(?operation, error = %e, "Scripted failure");
        }
        outcome
    }

    fn artifact_url(path: &str) -> ClientApiResult<Url> {
        Url::parse(MOCK_BASE_URL)
            .and_then(|base| base.join(path))
            .map_err(|e| ClientApiError::Unexpected(e.to_string()))
    }

    fn register_artifacts(state: &mut MockState, code: &str) -> ClientApiResult<()> {
        let haircuts = state.haircuts.clone();
        let mut put = |path: String, bytes: Vec<u8>| -> ClientApiResult<()> {
            let url = Self::artifact_url(&path)?;
            state.artifacts.insert(url.to_string(), bytes);
            Ok(())
        };

        put(
            format!("avatars/{code}/mesh/"),
            zip_archive(&[("model.ply", b"ply\nformat binary_little_endian 1.0\n".as_slice())])?,
        )?;
        put(format!("avatars/{code}/texture/"), b"jpeg texture".to_vec())?;
        put(
            format!("avatars/{code}/model_info/"),
            serde_json::to_vec(&serde_json::json!({ "gender": "female", "age": "adult" }))
                .map_err(|e| ClientApiError::Unexpected(e.to_string()))?,
        )?;
        put(
            format!("avatars/{code}/blendshapes/"),
            zip_archive(&[
                ("mobile_51/eyeBlinkLeft.bin", b"blend".as_slice()),
                ("mobile_51/jawOpen.bin", b"blend".as_slice()),
            ])?,
        )?;

        for identity in haircuts {
            let slug = identity.replace('/', "_");
            put(
                format!("avatars/{code}/haircuts/{slug}/mesh/"),
                zip_archive(&[("mesh.ply", b"ply\n".as_slice())])?,
            )?;
            put(format!("avatars/{code}/haircuts/{slug}/texture/"), b"png".to_vec())?;
        }
        Ok(())
    }
}

impl Default for MockClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CloudApi for MockClient {
    async fn create_avatar(&self, request: &CreateAvatarRequest) -> ClientApiResult<AvatarData> {
        self.begin(Operation::CreateAvatar).await?;

        let mut state = self.lock();
        let code = format!("avatar-{}", state.next_avatar);
        state.next_avatar += 1;
        state.created.push(request.clone());
        Self::register_artifacts(&mut state, &code)?;

        let data = AvatarData {
            code: code.clone(),
            status: AvatarStatus::Uploading,
            progress: 0,
            name: request.name.clone(),
            description: request.description.clone(),
            pipeline: request.pipeline.clone(),
            pipeline_subtype: request.pipeline_subtype.clone(),
            created_on: None,
            mesh: None,
            texture: None,
            thumbnail: None,
            haircuts: None,
            blendshapes: None,
            model_info: None,
        };
        state.avatars.insert(
            code,
            AvatarEntry {
                data: data.clone(),
                polls: 0,
            },
        );
        Ok(data)
    }

    async fn get_avatar(&self, avatar_code: &str) -> ClientApiResult<AvatarData> {
        self.begin(Operation::GetAvatar).await?;

        let mut state = self.lock();
        let statuses = state.statuses.clone();
        let entry = state
            .avatars
            .get_mut(avatar_code)
            .ok_or_else(|| ClientApiError::NotFound(avatar_code.to_string()))?;

        let index = entry.polls.min(statuses.len().saturating_sub(1));
        entry.polls += 1;
        let status = statuses.get(index).copied().unwrap_or(AvatarStatus::Completed);

        entry.data.status = status;
        entry.data.progress = if status.is_final() {
            100
        } else {
            ((index + 1) * 100 / statuses.len().max(1)).min(99) as u32
        };
        if status.is_success() {
            let code = entry.data.code.clone();
            entry.data.mesh = Some(Self::artifact_url(&format!("avatars/{code}/mesh/"))?);
            entry.data.texture = Some(Self::artifact_url(&format!("avatars/{code}/texture/"))?);
            entry.data.model_info = Some(Self::artifact_url(&format!("avatars/{code}/model_info/"))?);
            entry.data.blendshapes = Some(Self::artifact_url(&format!("avatars/{code}/blendshapes/"))?);
            entry.data.haircuts = Some(Self::artifact_url(&format!("avatars/{code}/haircuts/"))?);
        }
        Ok(entry.data.clone())
    }

    async fn get_parameters(
        &self,
        _pipeline: &str,
        _pipeline_subtype: &str,
        subset: ParametersSubset,
    ) -> ClientApiResult<ComputationParameters> {
        self.begin(Operation::GetParameters).await?;

        let state = self.lock();
        Ok(match subset {
            ParametersSubset::Default => state.default_parameters.clone(),
            ParametersSubset::All => state.all_parameters.clone(),
        })
    }

    async fn get_haircuts(&self, avatar: &AvatarData) -> ClientApiResult<Vec<HaircutData>> {
        self.begin(Operation::GetHaircuts).await?;

        let state = self.lock();
        let code = &avatar.code;
        state
            .haircuts
            .iter()
            .map(|identity| {
                let slug = identity.replace('/', "_");
                Ok(HaircutData {
                    identity: identity.clone(),
                    gender: None,
                    mesh: Some(Self::artifact_url(&format!("avatars/{code}/haircuts/{slug}/mesh/"))?),
                    texture: Some(Self::artifact_url(&format!(
                        "avatars/{code}/haircuts/{slug}/texture/"
                    ))?),
                    preview: None,
                    point_cloud: None,
                })
            })
            .collect()
    }

    async fn download(&self, url: &Url) -> ClientApiResult<Vec<u8>> {
        self.begin(Operation::Download).await?;

        self.lock()
            .artifacts
            .get(url.as_str())
            .cloned()
            .ok_or_else(|| ClientApiError::NotFound(url.to_string()))
    }
}

/// Builds an in-memory zip archive.
pub fn zip_archive(entries: &[(&str, &[u8])]) -> ClientApiResult<Vec<u8>> {
    let to_err = |e: &dyn std::fmt::Display| ClientApiError::Unexpected(e.to_string());

    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in entries {
        writer
            .start_file(*name, zip::write::SimpleFileOptions::default())
            .map_err(|e| to_err(&e))?;
        writer.write_all(data).map_err(|e| to_err(&e))?;
    }
    let cursor = writer.finish().map_err(|e| to_err(&e))?;
    Ok(cursor.into_inner())
}

fn parameter_set(plan: &str, names: &[&str]) -> ParameterSet {
    BTreeMap::from([(plan.to_string(), names.iter().map(|n| n.to_string()).collect())])
}

fn default_parameters() -> ComputationParameters {
    ComputationParameters {
        haircuts: parameter_set("base", &["generated"]),
        ..ComputationParameters::default()
    }
}

fn all_parameters() -> ComputationParameters {
    let modifications = ["remove_smile", "remove_glasses", "enhance_lighting"]
        .iter()
        .map(|name| (name.to_string(), serde_json::Value::Bool(false)))
        .collect();

    ComputationParameters {
        haircuts: parameter_set("base", &["generated", "short_simple"]),
        blendshapes: parameter_set("base", &["mobile_51"]),
        model_info: parameter_set("base", &["gender", "age"]),
        outfits: parameter_set("base", &["outfit_0", "outfit_1"]),
        avatar_modifications: BTreeMap::from([("plus".to_string(), modifications)]),
        ..ComputationParameters::default()
    }
}

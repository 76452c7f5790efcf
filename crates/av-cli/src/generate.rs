//! `generate` command handling for the CLI

use anyhow::{Context, Result};
use av_client_api::CloudApi;
use av_core::{
    AvatarGenerator, AvatarProvider, CoreConfig, FsStorage, Gender, GenerationRequest,
    PipelineKind, ProgressReporter, ProgressSink, SessionContext,
};
use av_rest_api_contract::PhotoSource;
use av_rest_client::{AuthConfig, RestClient};
use av_rest_client_mock::MockClient;
use clap::{Args, ValueEnum};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GenderArg {
    Male,
    Female,
}

impl From<GenderArg> for Gender {
    fn from(value: GenderArg) -> Self {
        match value {
            GenderArg::Male => Gender::Male,
            GenderArg::Female => Gender::Female,
        }
    }
}

/// Arguments for the generate command
#[derive(Args)]
pub struct GenerateArgs {
    /// Photo to generate the avatar from
    #[arg(long)]
    pub photo: Option<PathBuf>,

    /// Code of a selfie already uploaded to the service
    #[arg(long, conflicts_with = "photo")]
    pub selfie: Option<String>,

    /// Pipeline kind, e.g. head20_bust_mobile or meta_person_female
    #[arg(long, default_value = "head20_bust_mobile")]
    pub pipeline: PipelineKind,

    #[arg(long, value_enum)]
    pub gender: Option<GenderArg>,

    /// Avatar name registered with the service
    #[arg(long, default_value = "avatar")]
    pub name: String,

    /// URL of the avatar computation service
    #[arg(long, help = "URL of the avatar computation REST service")]
    pub server: Option<String>,

    /// API key for authentication with the service
    #[arg(long)]
    pub api_key: Option<String>,

    /// Bearer token for authentication with the service
    #[arg(long)]
    pub bearer_token: Option<String>,

    /// Player identifier sent with every request
    #[arg(long)]
    pub player_uid: Option<String>,

    /// Use the built-in scripted service instead of a server
    #[arg(long, conflicts_with = "server")]
    pub mock: bool,

    /// Directory receiving the avatar files
    #[arg(long, default_value = "avatars-data")]
    pub storage: PathBuf,

    /// JSON file with core settings
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Level of detail of the downloaded mesh
    #[arg(long)]
    pub detail_level: Option<u32>,

    #[arg(long)]
    pub poll_interval_ms: Option<u64>,

    #[arg(long)]
    pub no_blendshapes: bool,

    #[arg(long)]
    pub no_haircut: bool,
}

impl GenerateArgs {
    fn core_config(&self) -> Result<CoreConfig> {
        let mut config = match &self.config {
            Some(path) => CoreConfig::from_json_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => CoreConfig::default(),
        };
        if let Some(detail_level) = self.detail_level {
            config.detail_level = detail_level;
        }
        if let Some(poll_interval_ms) = self.poll_interval_ms {
            config.poll_interval_ms = poll_interval_ms;
        }
        if self.no_blendshapes {
            config.with_blendshapes = false;
        }
        if self.no_haircut {
            config.download_haircut = false;
        }
        Ok(config)
    }

    fn client(&self) -> Result<Arc<dyn CloudApi>> {
        if self.api_key.is_some() && self.bearer_token.is_some() {
            anyhow::bail!("Cannot specify both --api-key and --bearer-token");
        }
        if self.mock {
            return Ok(Arc::new(MockClient::new()));
        }
        let Some(server) = &self.server else {
            anyhow::bail!("--server is required unless --mock is given");
        };

        let mut auth = if let Some(api_key) = &self.api_key {
            AuthConfig::with_api_key(api_key.clone())
        } else if let Some(bearer_token) = &self.bearer_token {
            AuthConfig::with_bearer(bearer_token.clone())
        } else {
            AuthConfig::default()
        };
        if let Some(player_uid) = &self.player_uid {
            auth = auth.with_player_uid(player_uid.clone());
        }
        Ok(Arc::new(RestClient::from_url(server, auth)?))
    }

    fn source(&self) -> Result<PhotoSource> {
        match (&self.photo, &self.selfie) {
            (Some(path), _) => {
                let bytes = std::fs::read(path)
                    .with_context(|| format!("Failed to read photo {}", path.display()))?;
                Ok(PhotoSource::Photo(bytes))
            }
            (None, Some(code)) => Ok(PhotoSource::Selfie(code.clone())),
            (None, None) => anyhow::bail!("Either --photo or --selfie is required"),
        }
    }

    /// Run the generate command
    pub async fn run(self) -> Result<()> {
        let config = self.core_config()?;
        let api = self.client()?;
        let source = self.source()?;

        let provider = AvatarProvider::new(api, Arc::new(FsStorage::new(&self.storage)), config);
        let session = Arc::new(SessionContext::new(provider));
        let generator = AvatarGenerator::new(session);

        let mut request = GenerationRequest::new(self.pipeline, source).with_name(self.name.clone());
        if let Some(gender) = self.gender {
            request = request.with_gender(gender.into());
        }

        info!(pipeline = %self.pipeline, storage = %self.storage.display(), "Starting avatar generation");
        let task = generator.generate(request);
        let reporter = ProgressReporter::for_task(&task);
        let sink = ConsoleSink::default();

        tokio::select! {
            _ = reporter.drive(&sink) => {}
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, cancelling generation");
                task.cancel();
            }
        }

        let record = task.wait().await?;
        println!("{}", serde_json::to_string_pretty(&record)?);
        Ok(())
    }
}

/// Prints progress lines that changed since the last update.
#[derive(Default)]
struct ConsoleSink {
    last: Mutex<Vec<String>>,
}

impl ProgressSink for ConsoleSink {
    fn update(&self, label: &str, percent: f32) {
        let line = format!("{}: {:.1}%", label, percent);
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        if !last.contains(&line) {
            println!("{}", line);
            last.push(line);
            if last.len() > av_core::MAX_TRAIL_DEPTH {
                last.remove(0);
            }
        }
    }

    fn finished(&self, status: &str) {
        println!("{}", status);
    }
}

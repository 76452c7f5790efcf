//! API contract types for the avatar computation service

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use url::Url;
use validator::Validate;

use crate::error::ApiContractError;

/// Server-side lifecycle status of an avatar record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AvatarStatus {
    Uploading,
    Queued,
    Computing,
    Completed,
    Failed,
    #[serde(rename = "Timed Out")]
    TimedOut,
    #[serde(other)]
    Unknown,
}

impl AvatarStatus {
    /// The status will not change anymore.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::TimedOut)
    }

    /// The computation produced downloadable artifacts.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploading => "Uploading",
            Self::Queued => "Queued",
            Self::Computing => "Computing",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::TimedOut => "Timed Out",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for AvatarStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which slice of the computation parameters to request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParametersSubset {
    /// Parameters the server applies when the client sends none
    Default,
    /// Every parameter available for the pipeline
    All,
}

impl ParametersSubset {
    /// Path segment used by the parameters endpoint
    pub fn path_segment(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::All => "available",
        }
    }
}

impl FromStr for ParametersSubset {
    type Err = ApiContractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(Self::Default),
            "all" | "available" => Ok(Self::All),
            other => Err(ApiContractError::InvalidParametersSubset(other.to_string())),
        }
    }
}

/// Avatar record as returned by the service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvatarData {
    pub code: String,
    pub status: AvatarStatus,
    /// Server-side computation progress, 0 to 100
    #[serde(default)]
    pub progress: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub pipeline: String,
    #[serde(default)]
    pub pipeline_subtype: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub created_on: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub mesh: Option<Url>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub texture: Option<Url>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub thumbnail: Option<Url>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub haircuts: Option<Url>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub blendshapes: Option<Url>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub model_info: Option<Url>,
}

impl AvatarData {
    /// Server progress as a fraction in [0, 1]
    pub fn progress_fraction(&self) -> f32 {
        (self.progress.min(100) as f32) / 100.0
    }
}

/// Haircut available for a generated avatar
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HaircutData {
    /// Full identity, e.g. `base/generated`
    pub identity: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub gender: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub mesh: Option<Url>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub texture: Option<Url>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub preview: Option<Url>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub point_cloud: Option<Url>,
}

/// Parameter names grouped by subscription plan (`base`, `plus`, ...)
pub type ParameterSet = BTreeMap<String, Vec<String>>;

/// Returns the plan a parameter name belongs to, if present.
pub fn find_in_set<'a>(set: &'a ParameterSet, name: &str) -> Option<&'a str> {
    set.iter()
        .find(|(_, names)| names.iter().any(|n| n == name))
        .map(|(plan, _)| plan.as_str())
}

/// Computation parameters accepted and reported by the service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComputationParameters {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub haircuts: ParameterSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embed_haircuts: Option<bool>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub blendshapes: ParameterSet,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub model_info: ParameterSet,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outfits: ParameterSet,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_textures: ParameterSet,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub avatar_modifications: BTreeMap<String, BTreeMap<String, serde_json::Value>>,
    #[serde(flatten)]
    pub other: BTreeMap<String, serde_json::Value>,
}

impl ComputationParameters {
    pub fn is_empty(&self) -> bool {
        self.haircuts.is_empty()
            && self.blendshapes.is_empty()
            && self.model_info.is_empty()
            && self.outfits.is_empty()
            && self.additional_textures.is_empty()
            && self.avatar_modifications.is_empty()
            && self.other.is_empty()
    }
}

/// Where the photo of a new avatar comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhotoSource {
    /// Raw image bytes uploaded with the request
    Photo(Vec<u8>),
    /// Code of a selfie previously uploaded to the service
    Selfie(String),
}

/// Avatar creation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct CreateAvatarRequest {
    #[validate(length(min = 1, max = 256))]
    pub name: String,
    #[serde(default)]
    #[validate(length(max = 1024))]
    pub description: String,
    #[validate(length(min = 1))]
    pub pipeline: String,
    #[serde(default)]
    pub pipeline_subtype: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub parameters: Option<ComputationParameters>,
    pub source: PhotoSource,
}

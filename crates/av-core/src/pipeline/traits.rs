//! Static description of every supported computation pipeline.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineKind {
    Face,
    StyledFace,
    Head12,
    Head20HeadMobile,
    Head20BustMobile,
    UmaMale,
    UmaFemale,
    FitPerson,
    MetaPersonMale,
    MetaPersonFemale,
}

/// Per-pipeline behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineTraits {
    pub kind: PipelineKind,
    pub pipeline: &'static str,
    pub pipeline_subtype: &'static str,
    pub display_name: &'static str,
    pub supports_haircuts: bool,
    /// Short haircut id selected when the caller does not choose one.
    pub default_haircut: Option<&'static str>,
    pub fullbody: bool,
    /// Computed in the background without state notifications.
    pub silent: bool,
}

const fn row(
    kind: PipelineKind,
    pipeline: &'static str,
    pipeline_subtype: &'static str,
    display_name: &'static str,
    default_haircut: Option<&'static str>,
) -> PipelineTraits {
    PipelineTraits {
        kind,
        pipeline,
        pipeline_subtype,
        display_name,
        supports_haircuts: true,
        default_haircut,
        fullbody: false,
        silent: false,
    }
}

static TRAITS: [PipelineTraits; 10] = [
    row(PipelineKind::Face, "animated_face", "base/legacy", "Animated Face", None),
    row(PipelineKind::StyledFace, "animated_face", "indie/legacy_styled", "Styled Face", None),
    PipelineTraits {
        supports_haircuts: false,
        ..row(PipelineKind::Head12, "head_1.2", "base/mobile", "Head 1.2", None)
    },
    PipelineTraits {
        silent: true,
        ..row(
            PipelineKind::Head20HeadMobile,
            "head_2.0",
            "head/mobile",
            "Head 2.0 | head/mobile",
            Some("generated"),
        )
    },
    row(
        PipelineKind::Head20BustMobile,
        "head_2.0",
        "bust/mobile",
        "Head 2.0 | bust/mobile",
        Some("generated"),
    ),
    row(PipelineKind::UmaMale, "head_2.0", "uma2/male", "UMA Male", Some("generated")),
    row(PipelineKind::UmaFemale, "head_2.0", "uma2/female", "UMA Female", Some("generated")),
    PipelineTraits {
        fullbody: true,
        ..row(PipelineKind::FitPerson, "body_0.3", "mobile", "FitPerson", Some("generated"))
    },
    PipelineTraits {
        fullbody: true,
        ..row(PipelineKind::MetaPersonMale, "body_0.3", "male", "MetaPerson Male", Some("generated"))
    },
    PipelineTraits {
        fullbody: true,
        ..row(
            PipelineKind::MetaPersonFemale,
            "body_0.3",
            "female",
            "MetaPerson Female",
            Some("generated"),
        )
    },
];

impl PipelineKind {
    pub const ALL: [PipelineKind; 10] = [
        Self::Face,
        Self::StyledFace,
        Self::Head12,
        Self::Head20HeadMobile,
        Self::Head20BustMobile,
        Self::UmaMale,
        Self::UmaFemale,
        Self::FitPerson,
        Self::MetaPersonMale,
        Self::MetaPersonFemale,
    ];

    pub fn traits(&self) -> &'static PipelineTraits {
        &TRAITS[*self as usize]
    }

    /// Looks a kind up by the server's pipeline and subtype names.
    pub fn from_pipeline(pipeline: &str, pipeline_subtype: &str) -> Option<Self> {
        TRAITS
            .iter()
            .find(|t| t.pipeline == pipeline && t.pipeline_subtype == pipeline_subtype)
            .map(|t| t.kind)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Face => "face",
            Self::StyledFace => "styled_face",
            Self::Head12 => "head12",
            Self::Head20HeadMobile => "head20_head_mobile",
            Self::Head20BustMobile => "head20_bust_mobile",
            Self::UmaMale => "uma_male",
            Self::UmaFemale => "uma_female",
            Self::FitPerson => "fit_person",
            Self::MetaPersonMale => "meta_person_male",
            Self::MetaPersonFemale => "meta_person_female",
        }
    }
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| Error::InvalidRequest {
                message: format!("unknown pipeline kind '{}'", s),
            })
    }
}

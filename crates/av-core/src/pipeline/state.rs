use std::fmt;

use serde::{Deserialize, Serialize};

/// Stage of an avatar generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GenerationState {
    #[default]
    Default,
    Uploading,
    CalculatingInCloud,
    Downloading,
    Finished,
    Failed,
}

impl GenerationState {
    /// Text shown to users while in this state.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Default => "Unknown state",
            Self::Uploading => "Uploading photo to the server",
            Self::CalculatingInCloud => "Generating model",
            Self::Downloading => "Downloading avatar files",
            Self::Finished => "done",
            Self::Failed => "Calculations failed, please try a different photo",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }
}

impl fmt::Display for GenerationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
